use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kelvin to Celsius offset.
pub const CELSIUS_OFFSET: f64 = -273.15;

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin + CELSIUS_OFFSET
}

/// One provider's contribution to a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub provider: String,
    pub celsius: f64,
}

/// Combined answer with the per-provider breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub city: String,
    pub celsius: f64,
    /// Listed in provider-set order, not completion order.
    pub readings: Vec<Reading>,
    pub observed_at: DateTime<Utc>,
}
