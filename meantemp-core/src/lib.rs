//! Core library for the `meantemp` tool.
//!
//! This crate defines:
//! - Abstraction over weather providers and the three concrete adapters
//! - Concurrent aggregation of provider readings into one temperature
//! - Configuration & credentials handling
//! - Shared domain models (readings, reports) and error types
//!
//! It is used by `meantemp-cli`, but can also be reused by other binaries or services.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;

pub use aggregator::{Aggregator, combine};
pub use config::{Config, ProviderConfig};
pub use error::{AggregateError, ProviderError};
pub use model::{Reading, Report};
pub use provider::{
    ProviderId, ProviderSet, WeatherProvider, provider_from_config, provider_set_for,
    provider_set_from_config,
};
