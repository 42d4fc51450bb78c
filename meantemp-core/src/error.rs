use std::time::Duration;

use thiserror::Error;

/// Failure of a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The endpoint could not be reached or the body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The body did not match the source's schema.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The call did not finish in time. Carries the bound when it is known;
    /// timeouts raised inside the HTTP client do not report theirs.
    #[error("timed out{}", after(.0))]
    Timeout(Option<Duration>),
}

impl ProviderError {
    /// True for failures that happened before a body was available.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. } | Self::Timeout(_))
    }
}

fn after(limit: &Option<Duration>) -> String {
    limit.map(|d| format!(" after {d:?}")).unwrap_or_default()
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(None)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Verdict of an aggregation that produced no temperature.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no providers configured")]
    Configuration,

    /// First provider failure observed; the others are discarded.
    #[error("provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// A provider task panicked or was cancelled from outside.
    #[error("provider task for '{provider}' did not complete: {message}")]
    Task { provider: String, message: String },
}

impl AggregateError {
    /// The underlying provider failure, if this verdict came from one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider { source, .. } => Some(source),
            _ => None,
        }
    }
}
