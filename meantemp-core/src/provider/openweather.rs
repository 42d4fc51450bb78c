use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{ProviderError, model::kelvin_to_celsius};

use super::{WeatherProvider, fetch_body};

const DEFAULT_BASE_URL: &str = "http://api.openweathermap.org";

/// OpenWeatherMap current conditions. Reports Kelvin.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
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
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    main: OwMain,
}

/// Extract `main.temp` (Kelvin) and convert it to Celsius.
pub fn parse_current(body: &str) -> Result<f64, ProviderError> {
    let parsed: OwCurrentResponse = serde_json::from_str(body)?;
    Ok(kelvin_to_celsius(parsed.main.temp))
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn name(&self) -> &str {
        "openweather"
    }

    #[instrument(skip(self), fields(provider = "openweather"))]
    async fn temperature(&self, city: &str) -> Result<f64, ProviderError> {
        let url = format!("{}/data/2.5/weather", self.base_url);

        let body = fetch_body(
            self.http
                .get(&url)
                .query(&[("APPID", self.api_key.as_str()), ("q", city)]),
        )
        .await?;

        let celsius = parse_current(&body)?;
        debug!(celsius, "OpenWeather reading");
        Ok(celsius)
    }
}
