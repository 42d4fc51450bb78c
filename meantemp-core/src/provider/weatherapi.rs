use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::ProviderError;

use super::{WeatherProvider, fetch_body};

const DEFAULT_BASE_URL: &str = "http://api.weatherapi.com";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, http: Client) -> Self {
        Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), http }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    current: WaCurrent,
}

/// Extract `current.temp_c`.
pub fn parse_current(body: &str) -> Result<f64, ProviderError> {
    let parsed: WaResponse = serde_json::from_str(body)?;
    Ok(parsed.current.temp_c)
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &str {
        "weatherapi"
    }

    #[instrument(skip(self), fields(provider = "weatherapi"))]
    async fn temperature(&self, city: &str) -> Result<f64, ProviderError> {
        let url = format!("{}/v1/current.json", self.base_url);

        let body = fetch_body(
            self.http.get(&url).query(&[("key", self.api_key.as_str()), ("q", city)]),
        )
        .await?;

        let celsius = parse_current(&body)?;
        debug!(celsius, "WeatherAPI reading");
        Ok(celsius)
    }
}
