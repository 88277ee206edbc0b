//! Application and per-account configuration.
//!
//! Everything validated here is fatal at load time for the offending
//! account; runtime code can assume the ranges and enum values hold.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::allocation::AllocationMode;
use crate::margin::MarginConfig;
use crate::models::{check_weight_sum, DesiredWallet};
use crate::orders::ExchangeClosureBehavior;

fn default_token_env() -> String {
    "BROKER_TOKEN".to_string()
}

fn default_desired_mode() -> String {
    "manual".to_string()
}

fn default_sleep_ms() -> u64 {
    3_000
}

/// Top-level config file: broker endpoints plus a list of accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Override for the broker REST gateway base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Override for the AUM statistics page
    #[serde(default)]
    pub aum_url: Option<String>,

    pub accounts: Vec<AccountConfig>,
}

impl AppConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        ensure!(!config.accounts.is_empty(), "config has no accounts");
        for account in &config.accounts {
            account
                .validate()
                .with_context(|| format!("invalid config for account {:?}", account.account_id))?;
        }

        Ok(config)
    }
}

/// Configuration for one brokerage account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_id: String,

    /// Environment variable holding the broker API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Ticker -> target weight percent; keys define the universe
    pub desired_wallet: DesiredWallet,

    /// Allocation mode: manual | marketcap | aum | marketcap_aum | decorrelation
    #[serde(default = "default_desired_mode")]
    pub desired_mode: String,

    #[serde(default)]
    pub margin: MarginConfig,

    #[serde(default)]
    pub exchange_closure: ExchangeClosureBehavior,

    /// Pause between individual order submissions
    #[serde(default = "default_sleep_ms")]
    pub sleep_between_orders_ms: u64,

    /// Tickers whose buys require all sells to complete first; a
    /// non-empty list enables phased submission
    #[serde(default)]
    pub total_marginal_sell: Vec<String>,
}

impl AccountConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.account_id.is_empty(), "account_id is empty");

        AllocationMode::parse(&self.desired_mode)?;
        self.margin.validate()?;

        for (ticker, weight) in &self.desired_wallet {
            ensure!(
                weight.is_finite() && *weight >= 0.0,
                "weight for {ticker} must be a non-negative number, got {weight}"
            );
        }
        check_weight_sum(&self.desired_wallet);

        // Closure mode is lenient by design: an unknown value only warns
        // here and degrades to skip_iteration at runtime.
        self.exchange_closure.mode();

        Ok(())
    }

    /// Allocation mode; `validate` guarantees this parses.
    pub fn mode(&self) -> AllocationMode {
        AllocationMode::parse(&self.desired_mode).unwrap_or_default()
    }

    /// Broker token, resolved from the configured environment variable.
    pub fn token(&self) -> Result<String> {
        std::env::var(&self.token_env)
            .with_context(|| format!("broker token env var {} not set", self.token_env))
    }

    pub fn order_pause(&self) -> Duration {
        Duration::from_millis(self.sleep_between_orders_ms)
    }
}
