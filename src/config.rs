//! # Configuration
//!
//! Settings are loaded from a single JSON file and deserialized into the
//! `Config` struct, the single source of truth for all tunables. Every knob
//! carries a serde default so a minimal config file stays minimal.

use ethers::types::{Address, U256};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain: ChainSettings,
    pub aggregator: AggregatorSettings,
    #[serde(default)]
    pub approval_policy: ApprovalPolicy,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub history: Option<HistorySettings>,
    #[serde(default)]
    pub notifier: Option<NotifierSettings>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Input to the `dustsweep-plan` dry-run binary; unused by the library.
    #[serde(default)]
    pub dry_run: Option<DryRunSettings>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.is_empty() {
            eyre::bail!("chain.rpc_url must not be empty");
        }
        if self.aggregator.default_slippage_bps > 10_000 {
            eyre::bail!(
                "aggregator.default_slippage_bps {} exceeds 10000",
                self.aggregator.default_slippage_bps
            );
        }
        if self.aggregator.retry.max_attempts == 0 {
            eyre::bail!("aggregator.retry.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub rpc_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSettings {
    #[serde(default = "default_aggregator_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Integrator fee in basis points, collected in the output token.
    #[serde(default)]
    pub swap_fee_bps: u32,
    #[serde(default)]
    pub fee_recipient: Option<Address>,
    #[serde(default = "default_slippage_bps")]
    pub default_slippage_bps: u32,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Per-leg retry budget for upstream quote requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), base_delay_ms: default_base_delay_ms() }
    }
}

/// Allowance granted by generated approve calls.
///
/// `Unlimited` approves `U256::MAX` so subsequent swaps through the same
/// spender need no further approval transactions, at the cost of a larger
/// standing allowance if the spender contract is ever compromised. `Exact`
/// approves only this swap's amount. This is a per-deployment policy choice,
/// deliberately not hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    #[default]
    Unlimited,
    Exact,
}

impl ApprovalPolicy {
    pub fn allowance_for(&self, required: U256) -> U256 {
        match self {
            ApprovalPolicy::Unlimited => U256::MAX,
            ApprovalPolicy::Exact => required,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Pause between sequential calls so wallet/UI state can settle before
    /// the next submission. Zero in tests.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl ExecutorSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self { settle_delay_ms: default_settle_delay_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierSettings {
    pub endpoint: String,
    /// Origin that notification target URLs must share.
    pub base_origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunSettings {
    pub owner: Address,
    pub output_token: Address,
    pub legs: Vec<DryRunLeg>,
    #[serde(default)]
    pub slippage_bps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunLeg {
    pub token: Address,
    /// Decimal string in the token's smallest unit.
    pub amount: String,
    #[serde(default)]
    pub symbol: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_aggregator_base_url() -> String {
    "https://api.0x.org".to_string()
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_settle_delay_ms() -> u64 {
    750
}
