//! Configuration for the autotrader.
//!
//! Loads settings from an optional `config.toml` plus environment variables
//! (prefix `ATR`, `__` separator), validates them once at startup.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker API credentials and connection settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Position and cash limits shared by both strategies
    #[serde(default)]
    pub trading: TradingConfig,
    /// Momentum-volume strategy parameters
    #[serde(default)]
    pub momentum: MomentumConfig,
    /// Volatility-breakout strategy parameters
    #[serde(default)]
    pub breakout: BreakoutConfig,
    /// Scheduler timing
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Target environment for broker calls. Paper and live use distinct base
/// hosts and transaction codes but identical request/response shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Paper,
    Live,
}

impl Environment {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Environment::Live => "https://openapi.brokerage.com",
            Environment::Paper => "https://openapi-sandbox.brokerage.com",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Paper => write!(f, "paper"),
            Environment::Live => write!(f, "live"),
        }
    }
}

/// Which strategy variant the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    MomentumVolume,
    VolatilityBreakout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Application key issued by the broker
    #[serde(default)]
    pub app_key: String,
    /// Application secret issued by the broker
    #[serde(default)]
    pub app_secret: String,
    /// Account number orders are booked against
    #[serde(default)]
    pub account_no: String,
    /// Paper or live environment
    #[serde(default = "default_environment")]
    pub environment: Environment,
    /// Override the environment's base URL (used by tests)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Directory for the persisted token cache
    #[serde(default = "default_token_cache_dir")]
    pub token_cache_dir: String,
    /// Maximum attempts for retryable request failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Minimum milliseconds between calls to the same endpoint
    #[serde(default = "default_rate_limit_interval_ms")]
    pub rate_limit_interval_ms: u64,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Strategy variant to run
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    /// Maximum concurrently open positions
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Maximum buys per calendar day
    #[serde(default = "default_max_buys_per_day")]
    pub max_buys_per_day: u32,
    /// Entries are skipped while available cash is at or below this floor
    #[serde(default = "default_min_cash")]
    pub min_cash: Decimal,
    /// Fraction of available cash committed per entry (0.0-1.0)
    #[serde(default = "default_position_ratio")]
    pub position_ratio: Decimal,
    /// Exit when profit rate reaches this threshold (inclusive), e.g. 0.05 = +5%
    #[serde(default = "default_take_profit_rate")]
    pub take_profit_rate: Decimal,
    /// Exit when loss rate reaches this threshold, e.g. 0.03 = -3%
    #[serde(default = "default_stop_loss_rate")]
    pub stop_loss_rate: Decimal,
    /// Exit positions held longer than this many days
    #[serde(default = "default_max_hold_days")]
    pub max_hold_days: i64,
    /// How many ranked candidates to pull from the screening query
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Candidate price band (inclusive)
    #[serde(default = "default_min_price")]
    pub min_price: Decimal,
    #[serde(default = "default_max_price")]
    pub max_price: Decimal,
    /// Candidate daily change-rate band, e.g. 0.01 = +1%
    #[serde(default = "default_min_change_rate")]
    pub min_change_rate: Decimal,
    #[serde(default = "default_max_change_rate")]
    pub max_change_rate: Decimal,
    /// Today's volume divided by the trailing average must reach this ratio
    #[serde(default = "default_volume_ratio_threshold")]
    pub volume_ratio_threshold: Decimal,
    /// Trailing days used for the volume average and the short moving average
    #[serde(default = "default_ma_period")]
    pub ma_period: usize,
    /// RSI entry band (inclusive)
    #[serde(default = "default_rsi_entry_min")]
    pub rsi_entry_min: Decimal,
    #[serde(default = "default_rsi_entry_max")]
    pub rsi_entry_max: Decimal,
    /// RSI level treated as overbought for the technical exit
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutConfig {
    /// Candidate price band (inclusive)
    #[serde(default = "default_min_price")]
    pub min_price: Decimal,
    #[serde(default = "default_max_price")]
    pub max_price: Decimal,
    /// Candidate daily change-rate band
    #[serde(default = "default_breakout_min_change_rate")]
    pub min_change_rate: Decimal,
    #[serde(default = "default_max_change_rate")]
    pub max_change_rate: Decimal,
    /// Breakout coefficient: target = open + k * (prev_high - prev_low)
    #[serde(default = "default_k_value")]
    pub k_value: Decimal,
    /// Entry window, "HH:MM" local time
    #[serde(default = "default_entry_start")]
    pub entry_start: String,
    #[serde(default = "default_entry_end")]
    pub entry_end: String,
    /// Positions are flattened from this time on, "HH:MM" local time
    #[serde(default = "default_exit_time")]
    pub exit_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Seconds between cycles while a market is open
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Seconds between re-checks while every market is closed
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    /// Seconds between state polls while paused
    #[serde(default = "default_pause_poll_secs")]
    pub pause_poll_secs: u64,
    /// Cool-down after a failed cycle
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    /// Path to the SQLite trade log
    #[serde(default = "default_trade_log_path")]
    pub trade_log_path: String,
}

// Default value functions

fn default_environment() -> Environment {
    Environment::Paper
}

fn default_token_cache_dir() -> String {
    "data".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_rate_limit_interval_ms() -> u64 {
    200 // 5 req/s per endpoint
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_strategy() -> StrategyKind {
    StrategyKind::MomentumVolume
}

fn default_max_positions() -> usize {
    5
}

fn default_max_buys_per_day() -> u32 {
    3
}

fn default_min_cash() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_position_ratio() -> Decimal {
    Decimal::new(20, 2) // 0.20
}

fn default_take_profit_rate() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_stop_loss_rate() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_max_hold_days() -> i64 {
    5
}

fn default_candidate_limit() -> usize {
    30
}

fn default_min_price() -> Decimal {
    Decimal::new(1_000, 0)
}

fn default_max_price() -> Decimal {
    Decimal::new(500_000, 0)
}

fn default_min_change_rate() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_breakout_min_change_rate() -> Decimal {
    Decimal::ZERO
}

fn default_max_change_rate() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

fn default_volume_ratio_threshold() -> Decimal {
    Decimal::new(2, 0)
}

fn default_ma_period() -> usize {
    5
}

fn default_rsi_entry_min() -> Decimal {
    Decimal::new(50, 0)
}

fn default_rsi_entry_max() -> Decimal {
    Decimal::new(70, 0)
}

fn default_rsi_overbought() -> Decimal {
    Decimal::new(75, 0)
}

fn default_k_value() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_entry_start() -> String {
    "09:05".to_string()
}

fn default_entry_end() -> String {
    "14:30".to_string()
}

fn default_exit_time() -> String {
    "15:10".to_string()
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_idle_interval_secs() -> u64 {
    600
}

fn default_pause_poll_secs() -> u64 {
    5
}

fn default_error_cooldown_secs() -> u64 {
    120
}

fn default_trade_log_path() -> String {
    "data/trades.db".to_string()
}

impl Config {
    /// Load configuration from config file and environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ATR"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trading.position_ratio > Decimal::ZERO
                && self.trading.position_ratio <= Decimal::ONE,
            "position_ratio must be between 0 and 1"
        );

        anyhow::ensure!(
            self.trading.take_profit_rate > Decimal::ZERO,
            "take_profit_rate must be positive"
        );

        anyhow::ensure!(
            self.trading.stop_loss_rate > Decimal::ZERO,
            "stop_loss_rate must be positive"
        );

        anyhow::ensure!(
            self.trading.max_positions >= 1,
            "max_positions must be at least 1"
        );

        anyhow::ensure!(
            self.momentum.min_price <= self.momentum.max_price,
            "momentum price band is inverted"
        );

        anyhow::ensure!(
            self.momentum.rsi_entry_min <= self.momentum.rsi_entry_max,
            "momentum RSI band is inverted"
        );

        anyhow::ensure!(self.momentum.ma_period >= 2, "ma_period must be at least 2");

        self.breakout
            .entry_window()
            .context("breakout entry window is invalid")?;
        self.breakout
            .parsed_exit_time()
            .context("breakout exit_time is invalid")?;

        Ok(())
    }

    /// Resolved base URL for broker calls.
    pub fn broker_base_url(&self) -> String {
        self.broker
            .base_url
            .clone()
            .unwrap_or_else(|| self.broker.environment.default_base_url().to_string())
    }
}

impl BreakoutConfig {
    /// Parse the configured entry window.
    pub fn entry_window(&self) -> Result<(NaiveTime, NaiveTime)> {
        let start = parse_hhmm(&self.entry_start)?;
        let end = parse_hhmm(&self.entry_end)?;
        anyhow::ensure!(start < end, "entry_start must precede entry_end");
        Ok((start, end))
    }

    /// Parse the configured exit time.
    pub fn parsed_exit_time(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.exit_time)
    }
}

fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .with_context(|| format!("expected HH:MM, got {value:?}"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            trading: TradingConfig::default(),
            momentum: MomentumConfig::default(),
            breakout: BreakoutConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            app_secret: String::new(),
            account_no: String::new(),
            environment: default_environment(),
            base_url: None,
            token_cache_dir: default_token_cache_dir(),
            max_retries: default_max_retries(),
            rate_limit_interval_ms: default_rate_limit_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_positions: default_max_positions(),
            max_buys_per_day: default_max_buys_per_day(),
            min_cash: default_min_cash(),
            position_ratio: default_position_ratio(),
            take_profit_rate: default_take_profit_rate(),
            stop_loss_rate: default_stop_loss_rate(),
            max_hold_days: default_max_hold_days(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            min_change_rate: default_min_change_rate(),
            max_change_rate: default_max_change_rate(),
            volume_ratio_threshold: default_volume_ratio_threshold(),
            ma_period: default_ma_period(),
            rsi_entry_min: default_rsi_entry_min(),
            rsi_entry_max: default_rsi_entry_max(),
            rsi_overbought: default_rsi_overbought(),
        }
    }
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            min_change_rate: default_breakout_min_change_rate(),
            max_change_rate: default_max_change_rate(),
            k_value: default_k_value(),
            entry_start: default_entry_start(),
            entry_end: default_entry_end(),
            exit_time: default_exit_time(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            pause_poll_secs: default_pause_poll_secs(),
            error_cooldown_secs: default_error_cooldown_secs(),
            trade_log_path: default_trade_log_path(),
        }
    }
}
