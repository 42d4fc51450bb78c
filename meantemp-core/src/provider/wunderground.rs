use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::ProviderError;

use super::{WeatherProvider, fetch_body};

const DEFAULT_BASE_URL: &str = "http://api.wunderground.com";

/// Weather Underground conditions endpoint. Reports Celsius.
#[derive(Debug, Clone)]
pub struct WeatherUndergroundProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherUndergroundProvider {
    pub fn new(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `{base}/api/{key}/conditions/q/{city}.json`, with key and city percent-encoded.
    fn conditions_url(&self, city: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Transport(format!("invalid base url: {e}")))?;

        url.path_segments_mut()
            .map_err(|()| ProviderError::Transport("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["api", self.api_key.as_str(), "conditions", "q"])
            .push(&format!("{city}.json"));

        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct WuObservation {
    temp_c: f64,
}

#[derive(Debug, Deserialize)]
struct WuResponse {
    current_observation: WuObservation,
}

/// Extract `current_observation.temp_c`.
pub fn parse_conditions(body: &str) -> Result<f64, ProviderError> {
    let parsed: WuResponse = serde_json::from_str(body)?;
    Ok(parsed.current_observation.temp_c)
}

#[async_trait]
impl WeatherProvider for WeatherUndergroundProvider {
    fn name(&self) -> &str {
        "wunderground"
    }

    #[instrument(skip(self), fields(provider = "wunderground"))]
    async fn temperature(&self, city: &str) -> Result<f64, ProviderError> {
        let url = self.conditions_url(city)?;

        let body = fetch_body(self.http.get(url)).await?;

        let celsius = parse_conditions(&body)?;
        debug!(celsius, "Weather Underground reading");
        Ok(celsius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_celsius_verbatim() {
        let body = r#"{"current_observation":{"temp_c":18.4,"temp_f":65.1}}"#;
        assert_eq!(parse_conditions(body).unwrap(), 18.4);
    }

    #[test]
    fn error_payload_is_decode_error() {
        let body = r#"{"response":{"error":{"type":"keynotfound"}}}"#;
        assert!(matches!(parse_conditions(body), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn conditions_url_encodes_city() {
        let p = WeatherUndergroundProvider::new("KEY".into(), Client::new());
        let url = p.conditions_url("San Francisco").unwrap();
        assert_eq!(
            url.as_str(),
            "http://api.wunderground.com/api/KEY/conditions/q/San%20Francisco.json"
        );
    }

    #[test]
    fn conditions_url_rejects_garbage_base() {
        let p = WeatherUndergroundProvider::new("KEY".into(), Client::new())
            .with_base_url("not a url");
        assert!(matches!(p.conditions_url("x"), Err(ProviderError::Transport(_))));
    }
}
