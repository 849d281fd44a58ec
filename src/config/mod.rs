//! Configuration management for the oracle reporter
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::chain::{validate_report_function, DEFAULT_REPORT_FUNCTION};
use crate::oracle::COINGECKO_API_URL;
use crate::types::RunContext;

/// Environment variable holding the reporter's signing key
pub const PRIVATE_KEY_ENV: &str = "REPORTER_PRIVATE_KEY";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub reporter: ReporterConfig,
    pub price: PriceConfig,
    pub chain: ChainConfig,
    pub schedule: ScheduleConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Account that signs and pays for report transactions
    pub address: String,
    /// Oracle contract receiving the report
    pub oracle_address: String,
    /// Feed slot within the oracle
    pub request_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceConfig {
    /// CoinGecko API root
    pub base_url: String,
    /// CoinGecko coin id
    pub asset: String,
    pub currency: String,
    /// Upward bias in basis points
    pub adjustment_bps: u32,
    pub scale_factor: u64,
    pub fetch_timeout_ms: u64,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Queried from the node when unset
    #[serde(default)]
    pub chain_id: Option<u64>,
    pub gas_limit: u64,
    /// Applied to the node's gas price quote
    pub gas_price_multiplier: f64,
    pub report_function: String,
    pub submit_timeout_ms: u64,
    /// Blocks required on top of the inclusion block
    pub confirmations: u64,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Daemon cadence in seconds
    pub interval_secs: u64,
    /// Stop the daemon after a run whose transaction may still land
    #[serde(default)]
    pub halt_on_ambiguous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Enable the CSV run ledger
    pub csv_enabled: bool,
}

impl PriceConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl ChainConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Load configuration from file and environment.
    ///
    /// `extra` is an additional YAML file layered above `config/local.yaml`;
    /// it must exist when given.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        Self::assemble(extra, true)
    }

    /// Built-in defaults only, ignoring files and environment
    pub fn defaults() -> Result<Self> {
        let config = with_defaults(Config::builder())?
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn assemble(extra: Option<&Path>, read_env: bool) -> Result<Self> {
        let mut builder = with_defaults(Config::builder())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = extra {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            builder = builder.add_source(File::from(path).required(true));
        }

        if read_env {
            // Override with environment variables (REPORTER__*)
            builder = builder.add_source(Environment::with_prefix("REPORTER").separator("__"));
        }

        let app_config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Check value ranges and formats
    pub fn validate(&self) -> Result<()> {
        parse_address("reporter.address", &self.reporter.address)?;
        parse_address("reporter.oracle_address", &self.reporter.oracle_address)?;

        if self.price.asset.trim().is_empty() || self.price.currency.trim().is_empty() {
            bail!("price.asset and price.currency must not be empty");
        }
        if self.price.scale_factor == 0 {
            bail!("price.scale_factor must be greater than zero");
        }
        if self.price.fetch_timeout_ms == 0 {
            bail!("price.fetch_timeout_ms must be greater than zero");
        }

        if self.chain.gas_limit == 0 {
            bail!("chain.gas_limit must be greater than zero");
        }
        if !self.chain.gas_price_multiplier.is_finite() || self.chain.gas_price_multiplier <= 0.0 {
            bail!(
                "chain.gas_price_multiplier must be positive, got {}",
                self.chain.gas_price_multiplier
            );
        }
        if self.chain.submit_timeout_ms == 0 {
            bail!("chain.submit_timeout_ms must be greater than zero");
        }
        if self.chain.poll_interval_secs == 0 {
            bail!("chain.poll_interval_secs must be greater than zero");
        }
        if self.chain.poll_timeout_secs < self.chain.poll_interval_secs {
            bail!(
                "chain.poll_timeout_secs ({}) must be at least chain.poll_interval_secs ({})",
                self.chain.poll_timeout_secs,
                self.chain.poll_interval_secs
            );
        }
        validate_report_function(&self.chain.report_function)?;

        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be greater than zero");
        }

        Ok(())
    }

    /// Validate required environment variables
    pub fn validate_env(&self) -> Result<()> {
        self.private_key().map(|_| ())
    }

    /// Signing key from the environment
    pub fn private_key(&self) -> Result<String> {
        let pk = std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("Required environment variable {} is not set", PRIVATE_KEY_ENV))?;
        check_private_key(&pk)?;
        Ok(pk)
    }

    /// Immutable per-run inputs for the pipeline
    pub fn run_context(&self) -> Result<RunContext> {
        Ok(RunContext {
            reporter: parse_address("reporter.address", &self.reporter.address)?,
            oracle: parse_address("reporter.oracle_address", &self.reporter.oracle_address)?,
            request_id: U256::from(self.reporter.request_id),
            asset: self.price.asset.to_lowercase(),
            currency: self.price.currency.to_lowercase(),
            adjustment_bps: self.price.adjustment_bps,
            scale_factor: self.price.scale_factor,
            gas_limit: self.chain.gas_limit,
            gas_price_multiplier: self.chain.gas_price_multiplier,
            confirmations: self.chain.confirmations,
            poll_interval: self.chain.poll_interval(),
            poll_timeout: self.chain.poll_timeout(),
            fetch_timeout: self.price.fetch_timeout(),
            submit_timeout: self.chain.submit_timeout(),
        })
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "reporter={} oracle={} request_id={} feed={}/{} adj={}bps scale={} rpc={} confirmations={}",
            self.reporter.address,
            self.reporter.oracle_address,
            self.reporter.request_id,
            self.price.asset,
            self.price.currency,
            self.price.adjustment_bps,
            self.price.scale_factor,
            redact_url(&self.chain.rpc_url),
            self.chain.confirmations
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        // Reporter defaults
        .set_default("reporter.address", "0xe07c9696e00f23Fc7bAE76d037A115bfF33E28be")?
        .set_default(
            "reporter.oracle_address",
            "0xA0c5d95ec359f4A33371a06C23D89BA6Fc591A97",
        )?
        .set_default("reporter.request_id", 1)?
        // Price defaults
        .set_default("price.base_url", COINGECKO_API_URL)?
        .set_default("price.asset", "ethereum")?
        .set_default("price.currency", "usd")?
        .set_default("price.adjustment_bps", 20)?
        .set_default("price.scale_factor", 1_000_000)?
        .set_default("price.fetch_timeout_ms", 10_000)?
        // Chain defaults
        .set_default("chain.rpc_url", "http://localhost:8545")?
        .set_default("chain.gas_limit", 250_000)?
        .set_default("chain.gas_price_multiplier", 10.0)?
        .set_default("chain.report_function", DEFAULT_REPORT_FUNCTION)?
        .set_default("chain.submit_timeout_ms", 30_000)?
        .set_default("chain.confirmations", 1)?
        .set_default("chain.poll_interval_secs", 20)?
        .set_default("chain.poll_timeout_secs", 600)?
        // Schedule defaults
        .set_default("schedule.interval_secs", 60)?
        .set_default("schedule.halt_on_ambiguous", false)?
        // Persistence defaults
        .set_default("persistence.data_dir", "./data")?
        .set_default("persistence.csv_enabled", true)
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .with_context(|| format!("{} is not a valid address: '{}'", field, value))
}

fn check_private_key(pk: &str) -> Result<()> {
    let Some(body) = pk.strip_prefix("0x") else {
        bail!("{} must be a hex string with 0x prefix (66 chars total)", PRIVATE_KEY_ENV);
    };
    if body.len() != 64 || hex::decode(body).is_err() {
        bail!("{} must be a hex string with 0x prefix (66 chars total)", PRIVATE_KEY_ENV);
    }
    Ok(())
}

/// Keep scheme and host only; RPC paths often embed API keys
fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => format!("{}://{}", parsed.scheme(), host),
            None => parsed.scheme().to_string(),
        },
        Err(_) => "<invalid>".to_string(),
    }
}
