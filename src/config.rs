// src/config.rs

use crate::types::SellStrategy;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Stop level meaning "no stop".
pub const STOP_DISABLED: Decimal = Decimal::from_parts(100, 0, 0, true, 0);

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub secret_key: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Everything the engine needs to run one cycle. Immutable once loaded.
#[derive(Debug, Deserialize, Clone)]
pub struct TradeConfig {
    /// Asset spent on the buy and received on the sell.
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Buy worth this many USD, converted through the quote asset's
    /// BUSD or USDT pair. Takes precedence over `quote_amount`.
    #[serde(default)]
    pub usd_value: Option<Decimal>,
    /// Absolute quote amount to spend. Takes precedence over `buy_percent`.
    #[serde(default)]
    pub quote_amount: Option<Decimal>,
    /// Share of the free quote balance to spend, in percent.
    #[serde(default = "default_buy_percent")]
    pub buy_percent: Decimal,
    #[serde(default = "default_sell_strategy")]
    pub sell_strategy: SellStrategy,
    #[serde(default = "default_profit")]
    pub profit_percent: Decimal,
    /// -100 disables the stop.
    #[serde(default = "default_stop")]
    pub stop_percent: Decimal,
    /// Lowest profit a clipped limit target may fall to.
    #[serde(default)]
    pub min_profit_percent: Decimal,
    /// Ctrl+C cancels resting orders and dumps the balance on the market.
    #[serde(default = "default_true")]
    pub bailout: bool,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
}

impl TradeConfig {
    pub fn stop_enabled(&self) -> bool {
        self.stop_percent > STOP_DISABLED
    }

    /// Market selling never lowers the target, so its floor is the target itself.
    pub fn min_profit(&self) -> Decimal {
        match self.sell_strategy {
            SellStrategy::Market => self.profit_percent,
            _ => self.min_profit_percent,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quote_asset.trim().is_empty() {
            return Err(ConfigError::Message("quote asset must not be empty".into()));
        }
        if let Some(usd) = self.usd_value {
            if usd <= Decimal::ZERO {
                return Err(ConfigError::Message(
                    "cannot sell non-positive USD value".into(),
                ));
            }
        }
        if let Some(amount) = self.quote_amount {
            if amount <= Decimal::ZERO {
                return Err(ConfigError::Message(format!(
                    "cannot sell non-positive amount of {}",
                    self.quote_asset
                )));
            }
        }
        if self.buy_percent <= Decimal::ZERO || self.buy_percent > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Message(
                "buy percentage must be within (0, 100]".into(),
            ));
        }
        if self.stop_percent < STOP_DISABLED
            || self.stop_percent >= self.profit_percent
        {
            return Err(ConfigError::Message(
                "stop percentage must be at least -100 and lower than profits".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for daily log files; console only when unset.
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub trade: TradeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.trade.validate()?;
        Ok(config)
    }
}

fn default_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_quote_asset() -> String {
    "BTC".to_string()
}

fn default_buy_percent() -> Decimal {
    Decimal::ONE_HUNDRED
}

fn default_sell_strategy() -> SellStrategy {
    SellStrategy::Limit
}

fn default_profit() -> Decimal {
    Decimal::TEN
}

fn default_stop() -> Decimal {
    STOP_DISABLED
}

fn default_true() -> bool {
    true
}

fn default_retry_interval_ms() -> u64 {
    2000
}

fn default_resubscribe_delay_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}
