//! Configuration management for the CLMM hedger.
//!
//! Loads settings from environment variables and config files.

use crate::error::HedgeError;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Range, capital and polling parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Pool and paired asset definitions
    #[serde(default)]
    pub tokens: TokensConfig,
    /// Liquidity pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// Binance futures credentials for the hedge leg
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Timeouts and backoff for external calls
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Alert delivery
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Position record storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Symbol used for price lookups and the hedge (e.g. "SUIUSDC")
    #[serde(default = "default_pair_symbol")]
    pub pair_symbol: String,
    /// Total capital deployed into the pool, in paired-asset units
    #[serde(default = "default_base_capital")]
    pub base_capital: Decimal,
    /// Half-width of the liquidity range as a fraction of price (0.0-1.0)
    #[serde(default = "default_price_range_fraction")]
    pub price_range_fraction: Decimal,
    /// Inward margin from each range boundary that triggers a rebalance (0.0-1.0)
    #[serde(default = "default_rebalance_threshold_fraction")]
    pub rebalance_threshold_fraction: Decimal,
    /// Seconds between poll iterations
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Maximum slippage accepted on pool deposits (0.0-1.0)
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,
    /// Push a status report to the alert sink every iteration
    #[serde(default = "default_send_reports")]
    pub send_reports: bool,
    /// Re-initialize automatically when a Faulted position has both legs closed
    #[serde(default)]
    pub auto_recover_idle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Ticker symbol (e.g. "SUI")
    pub symbol: String,
    /// Integer precision on chain
    pub decimals: u32,
    /// Fully qualified on-chain coin type
    #[serde(default)]
    pub coin_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    /// The hedged asset (shorted on the venue)
    #[serde(default = "default_pool_asset")]
    pub pool_asset: AssetConfig,
    /// The quote asset the capital is denominated in
    #[serde(default = "default_paired_asset")]
    pub paired_asset: AssetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Chain RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Pool object address
    #[serde(default)]
    pub pool_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Decimal places accepted for order quantity on the hedge symbol
    #[serde(default = "default_quantity_precision")]
    pub quantity_precision: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Timeout applied to every ledger, venue and oracle call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Initial backoff after an oracle failure
    #[serde(default = "default_oracle_backoff")]
    pub oracle_backoff_secs: u64,
    /// Cap for the doubling oracle backoff
    #[serde(default = "default_max_oracle_backoff")]
    pub max_oracle_backoff_secs: u64,
    /// Timeout for a single alert delivery
    #[serde(default = "default_alert_timeout")]
    pub alert_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding the current position record
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_pair_symbol() -> String {
    "SUIUSDC".to_string()
}

fn default_base_capital() -> Decimal {
    Decimal::new(1000, 0) // 1000 USDC
}

fn default_price_range_fraction() -> Decimal {
    Decimal::new(5, 2) // 0.05 = +/-5% around entry
}

fn default_rebalance_threshold_fraction() -> Decimal {
    Decimal::new(1, 2) // 0.01 = rebalance 1% inside either boundary
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_slippage_tolerance() -> Decimal {
    Decimal::new(5, 3) // 0.005 (0.5%)
}

fn default_send_reports() -> bool {
    true
}

fn default_pool_asset() -> AssetConfig {
    AssetConfig {
        symbol: "SUI".to_string(),
        decimals: 9,
        coin_type: "0x2::sui::SUI".to_string(),
    }
}

fn default_paired_asset() -> AssetConfig {
    AssetConfig {
        symbol: "USDC".to_string(),
        decimals: 6,
        coin_type: String::new(),
    }
}

fn default_rpc_url() -> String {
    "https://fullnode.mainnet.sui.io:443".to_string()
}

fn default_quantity_precision() -> u32 {
    1 // SUIUSDC perpetual trades in 0.1 lots
}

fn default_call_timeout() -> u64 {
    30
}

fn default_oracle_backoff() -> u64 {
    5
}

fn default_max_oracle_backoff() -> u64 {
    300
}

fn default_alert_timeout() -> u64 {
    10
}

fn default_db_path() -> String {
    "data/position.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("CLMM"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), HedgeError> {
        self.strategy.validate()?;

        ensure(
            self.execution.call_timeout_secs > 0,
            "call_timeout_secs must be positive",
        )?;
        ensure(
            self.execution.oracle_backoff_secs > 0
                && self.execution.oracle_backoff_secs <= self.execution.max_oracle_backoff_secs,
            "oracle_backoff_secs must be positive and <= max_oracle_backoff_secs",
        )?;
        ensure(
            self.tokens.pool_asset.decimals <= 18 && self.tokens.paired_asset.decimals <= 18,
            "asset decimals must be <= 18",
        )?;

        Ok(())
    }
}

impl StrategyConfig {
    /// Validate range and threshold parameters.
    ///
    /// Rejects a threshold wide enough that the lower trigger
    /// `p*(1-r)*(1+t)` meets the upper trigger `p*(1+r)*(1-t)`, which would make
    /// the drift condition permanently true. When the triggers do not cross they
    /// always bracket the entry price `p`.
    pub fn validate(&self) -> std::result::Result<(), HedgeError> {
        let r = self.price_range_fraction;
        let t = self.rebalance_threshold_fraction;

        ensure(
            self.base_capital > Decimal::ZERO,
            "base_capital must be positive",
        )?;
        ensure(
            in_unit_interval(r),
            "price_range_fraction must be between 0 and 1 (exclusive)",
        )?;
        ensure(
            in_unit_interval(t),
            "rebalance_threshold_fraction must be between 0 and 1 (exclusive)",
        )?;
        ensure(
            in_unit_interval(self.slippage_tolerance),
            "slippage_tolerance must be between 0 and 1 (exclusive)",
        )?;
        ensure(
            self.check_interval_secs > 0,
            "check_interval_secs must be positive",
        )?;

        let lower_trigger = (Decimal::ONE - r) * (Decimal::ONE + t);
        let upper_trigger = (Decimal::ONE + r) * (Decimal::ONE - t);
        if lower_trigger >= upper_trigger {
            return Err(HedgeError::Config(format!(
                "rebalance thresholds cross (lower trigger {} >= upper trigger {} x entry price)",
                lower_trigger, upper_trigger
            )));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl ExecutionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_secs(self.alert_timeout_secs)
    }
}

fn in_unit_interval(value: Decimal) -> bool {
    value > Decimal::ZERO && value < Decimal::ONE
}

fn ensure(condition: bool, message: &str) -> std::result::Result<(), HedgeError> {
    if condition {
        Ok(())
    } else {
        Err(HedgeError::Config(message.to_string()))
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            pair_symbol: default_pair_symbol(),
            base_capital: default_base_capital(),
            price_range_fraction: default_price_range_fraction(),
            rebalance_threshold_fraction: default_rebalance_threshold_fraction(),
            check_interval_secs: default_check_interval_secs(),
            slippage_tolerance: default_slippage_tolerance(),
            send_reports: default_send_reports(),
            auto_recover_idle: false,
        }
    }
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            pool_asset: default_pool_asset(),
            paired_asset: default_paired_asset(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            pool_address: String::new(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            quantity_precision: default_quantity_precision(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            oracle_backoff_secs: default_oracle_backoff(),
            max_oracle_backoff_secs: default_max_oracle_backoff(),
            alert_timeout_secs: default_alert_timeout(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
