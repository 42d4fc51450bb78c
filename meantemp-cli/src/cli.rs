use anyhow::Context;
use clap::{Parser, Subcommand};
use meantemp_core::{Aggregator, Config, ProviderId, provider_set_for, provider_set_from_config};
use tracing::info;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "meantemp", version, about = "Average temperature across weather providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the mean temperature for a city.
    Show {
        /// City name, passed to every provider as-is.
        city: String,

        /// Print every provider's reading alongside the mean.
        #[arg(long)]
        breakdown: bool,

        /// Per-provider call bound in seconds; defaults to the configured timeout.
        #[arg(long)]
        timeout: Option<u64>,

        /// Restrict to these providers, e.g. `--provider openweather`.
        #[arg(long = "provider", value_parser = parse_provider)]
        providers: Vec<ProviderId>,
    },

    /// List known providers and whether each has an API key.
    Providers,

    /// Print the config file location.
    ConfigPath,
}

fn parse_provider(value: &str) -> Result<ProviderId, String> {
    ProviderId::try_from(value).map_err(|e| e.to_string())
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Show { city, breakdown, timeout, providers } => {
                let mut config = Config::load()?;
                if timeout.is_some() {
                    config.timeout_secs = timeout;
                }

                let set = if providers.is_empty() {
                    provider_set_from_config(&config)?
                } else {
                    provider_set_for(&config, &providers)?
                };

                let call_timeout = config.timeout();
                info!(providers = ?set.names(), ?call_timeout, %city, "aggregating");

                let aggregator = Aggregator::new(set).with_call_timeout(call_timeout);

                let output = if breakdown {
                    let report = aggregator.report(&city).await?;
                    serde_json::to_string_pretty(&report)?
                } else {
                    let celsius = aggregator.temperature(&city).await?;
                    summary_json(&city, celsius).to_string()
                };

                println!("{output}");
            }
            Command::Providers => {
                let config = Config::load()?;
                for id in ProviderId::all() {
                    let state = if config.is_provider_configured(*id) {
                        "configured"
                    } else {
                        "missing key"
                    };
                    println!("{:<14}{:<14}({})", id.as_str(), state, id.api_key_env());
                }
            }
            Command::ConfigPath => {
                let path = Config::config_file_path().context("Failed to locate config file")?;
                println!("{}", path.display());
            }
        }

        Ok(())
    }
}

fn summary_json(city: &str, celsius: f64) -> serde_json::Value {
    serde_json::json!({
        "city": city,
        "celsius": celsius,
    })
}
