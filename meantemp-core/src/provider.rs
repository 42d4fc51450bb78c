use crate::{
    Config, ProviderError,
    provider::{
        openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider,
        wunderground::WeatherUndergroundProvider,
    },
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::{convert::TryFrom, fmt::Debug, sync::Arc};

pub mod openweather;
pub mod weatherapi;
pub mod wunderground;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherUnderground,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherUnderground => "wunderground",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OPENWEATHER_API_KEY",
            ProviderId::WeatherUnderground => "WEATHER_UNDERGROUND_API_KEY",
            ProviderId::WeatherApi => "WEATHERAPI_API_KEY",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherUnderground, ProviderId::WeatherApi]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "wunderground" => Ok(ProviderId::WeatherUnderground),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, wunderground, weatherapi."
            )),
        }
    }
}

/// A single external temperature source.
///
/// Implementations hold no request-scoped state and are shared read-only
/// across concurrent aggregations.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Current temperature for `city` in degrees Celsius.
    async fn temperature(&self, city: &str) -> Result<f64, ProviderError>;
}

/// Ordered, immutable collection of providers, cheap to clone.
#[derive(Debug, Clone)]
pub struct ProviderSet {
    providers: Arc<[Arc<dyn WeatherProvider>]>,
}

impl ProviderSet {
    pub fn new(providers: Vec<Arc<dyn WeatherProvider>>) -> Self {
        Self { providers: providers.into() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn WeatherProvider>> {
        self.providers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn WeatherProvider>> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
    http: Client,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let provider_cfg = config.provider_config(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: set {} or add [providers.{id}] to {}.",
            id.api_key_env(),
            Config::config_file_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "the config file".to_string()),
        )
    })?;

    let api_key = provider_cfg.api_key.clone();
    let base_url = provider_cfg.base_url.clone();

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => {
            let p = OpenWeatherProvider::new(api_key, http);
            Arc::new(match base_url {
                Some(url) => p.with_base_url(url),
                None => p,
            })
        }
        ProviderId::WeatherUnderground => {
            let p = WeatherUndergroundProvider::new(api_key, http);
            Arc::new(match base_url {
                Some(url) => p.with_base_url(url),
                None => p,
            })
        }
        ProviderId::WeatherApi => {
            let p = WeatherApiProvider::new(api_key, http);
            Arc::new(match base_url {
                Some(url) => p.with_base_url(url),
                None => p,
            })
        }
    };

    Ok(provider)
}

/// Build the set of every provider that has a key, in `ProviderId::all()` order.
///
/// An empty result is not an error here; aggregation rejects it.
pub fn provider_set_from_config(config: &Config) -> anyhow::Result<ProviderSet> {
    let ids: Vec<ProviderId> = ProviderId::all()
        .iter()
        .copied()
        .filter(|id| config.is_provider_configured(*id))
        .collect();

    provider_set_for(config, &ids)
}

/// Build a set from an explicit selection; every selected provider must be configured.
pub fn provider_set_for(config: &Config, ids: &[ProviderId]) -> anyhow::Result<ProviderSet> {
    let http = http_client(config)?;

    ids.iter()
        .map(|id| provider_from_config(*id, config, http.clone()))
        .collect::<anyhow::Result<Vec<_>>>()
        .map(ProviderSet::new)
}

/// Only connection setup is bounded here; the whole call is bounded by
/// `Aggregator::with_call_timeout`, which may be longer than the configured default.
fn http_client(config: &Config) -> anyhow::Result<Client> {
    use anyhow::Context;

    Client::builder()
        .connect_timeout(config.timeout())
        .build()
        .context("Failed to build HTTP client")
}

/// Send the request and return the body of a successful response.
pub(crate) async fn fetch_body(request: RequestBuilder) -> Result<String, ProviderError> {
    let res = request.send().await?;

    let status = res.status();
    let body = res.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    Ok(body)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
