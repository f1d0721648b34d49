//! Process configuration, loaded once at start-up.
//!
//! Non-secret settings come from an optional JSON file; credentials are only
//! ever read from the environment.

use crate::security::{ApiKeyError, SecureApiKey, VenueCredentials};
use crate::strategy::SignalSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config IO error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ApiKeyError> for ConfigError {
    fn from(e: ApiKeyError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    #[serde(default = "default_testnet")]
    pub testnet: bool,
    /// Route master orders to the in-memory executor
    #[serde(default)]
    pub dry_run: bool,
    /// Base asset, e.g. `BTC`; the quote is always USDT
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_percentage_of_capital")]
    pub percentage_of_capital: f64,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub strategy: StrategyParams,
    #[serde(skip)]
    pub master_credentials: Option<VenueCredentials>,
    #[serde(skip)]
    pub bitmex_credentials: Option<VenueCredentials>,
    #[serde(skip)]
    pub okx_credentials: Option<VenueCredentials>,
    #[serde(skip)]
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Timing and capacity knobs of the live engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_ms: u64,
    pub reconnect_delay_secs: u64,
    pub listen_key_refresh_secs: u64,
    /// Per-venue bound on a slave replication call
    pub replication_timeout_secs: u64,
    pub max_bars: usize,
    pub min_bars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            reconnect_delay_secs: 5,
            listen_key_refresh_secs: 1800,
            replication_timeout_secs: 10,
            max_bars: 1500,
            min_bars: 100,
        }
    }
}

/// Endpoint overrides; anything left unset follows `testnet`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub ws_api_url: Option<String>,
    pub stream_url: Option<String>,
    pub rest_url: Option<String>,
    pub bitmex_url: Option<String>,
    pub okx_url: Option<String>,
    pub slack_api_url: Option<String>,
}

/// Fully resolved endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub ws_api_url: String,
    pub stream_url: String,
    pub rest_url: String,
    pub bitmex_url: String,
    pub okx_url: String,
    pub slack_api_url: String,
}

impl EndpointConfig {
    pub fn resolve(&self, testnet: bool) -> Endpoints {
        let (ws_api, stream, rest, bitmex) = if testnet {
            (
                "wss://testnet.binancefuture.com/ws-fapi/v1",
                "wss://stream.binancefuture.com/ws",
                "https://testnet.binancefuture.com",
                "https://testnet.bitmex.com",
            )
        } else {
            (
                "wss://ws-fapi.binance.com/ws-fapi/v1",
                "wss://fstream.binance.com/ws",
                "https://fapi.binance.com",
                "https://www.bitmex.com",
            )
        };
        let pick = |o: &Option<String>, d: &str| o.clone().unwrap_or_else(|| d.to_string());

        Endpoints {
            ws_api_url: pick(&self.ws_api_url, ws_api),
            stream_url: pick(&self.stream_url, stream),
            rest_url: pick(&self.rest_url, rest),
            bitmex_url: pick(&self.bitmex_url, bitmex),
            // OKX sandbox shares the production host and is selected by header
            okx_url: pick(&self.okx_url, "https://www.okx.com"),
            slack_api_url: pick(&self.slack_api_url, "https://slack.com/api"),
        }
    }
}

/// Strategy thresholds and fallbacks. Multipliers apply to an entry price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    pub fast_ma: usize,
    pub slow_ma: usize,
    pub volume_ma: usize,
    /// L1 stop-loss multiplier
    pub stop_loss: f64,
    /// L1 take-profit multiplier
    pub take_profit: f64,
    /// L2 fires once price recovers to this multiple of the failed entry
    pub l2_trigger: f64,
    pub l2_stop_loss: f64,
    pub min_leverage: u32,
    pub max_leverage: u32,
    pub leverage_boost_tier: u32,
    /// A closed episode counts as a strong win at `exit >= entry * profit_threshold`
    pub profit_threshold: f64,
    /// Drawdown fraction from the buffer high that boosts the next trend entry
    pub drawdown_threshold: f64,
    /// Dip when price < slow MA * dip_threshold
    pub dip_threshold: f64,
    /// Spike when volume > volume MA * spike_multiplier
    pub spike_multiplier: f64,
    pub scalp_leverage: u32,
    pub scalp_stop_loss: f64,
    pub scalp_take_profit: f64,
    pub scalp_capital_divisor: f64,
    pub scalp_adaptive_tp: bool,
    pub scalp_boosted_tp: f64,
    pub scalp_safe_tp: f64,
    pub volatility_leverage: u32,
    pub volatility_stop_loss: f64,
    pub volatility_take_profit: f64,
    /// Entry prices carried over from a previous run, oldest first
    pub initial_entry_prices: Vec<f64>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            fast_ma: 10,
            slow_ma: 50,
            volume_ma: 20,
            stop_loss: 0.97,
            take_profit: 1.10,
            l2_trigger: 1.01,
            l2_stop_loss: 0.98,
            min_leverage: 1,
            max_leverage: 10,
            leverage_boost_tier: 2,
            profit_threshold: 1.05,
            drawdown_threshold: 0.25,
            dip_threshold: 0.95,
            spike_multiplier: 2.0,
            scalp_leverage: 3,
            scalp_stop_loss: 0.95,
            scalp_take_profit: 1.05,
            scalp_capital_divisor: 101.0,
            scalp_adaptive_tp: false,
            scalp_boosted_tp: 1.70,
            scalp_safe_tp: 1.25,
            volatility_leverage: 3,
            volatility_stop_loss: 0.95,
            volatility_take_profit: 1.10,
            initial_entry_prices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackConfig {
    pub token: SecureApiKey,
    pub channel: String,
}

fn default_testnet() -> bool {
    true
}

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_timeframe() -> String {
    "4h".to_string()
}

fn default_percentage_of_capital() -> f64 {
    99.0
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            testnet: default_testnet(),
            dry_run: false,
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            percentage_of_capital: default_percentage_of_capital(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            endpoints: EndpointConfig::default(),
            strategy: StrategyParams::default(),
            master_credentials: None,
            bitmex_credentials: None,
            okx_credentials: None,
            slack: None,
        }
    }
}

impl TraderConfig {
    /// Load from an optional JSON file, overlay secrets from the environment
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read credentials from the environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.master_credentials =
            VenueCredentials::from_env("MASTER_API_KEY", "MASTER_API_SECRET", None)?;
        self.bitmex_credentials =
            VenueCredentials::from_env("BITMEX_API_KEY", "BITMEX_API_SECRET", None)?;
        self.okx_credentials =
            VenueCredentials::from_env("OKX_API_KEY", "OKX_API_SECRET", Some("OKX_PASSPHRASE"))?;

        self.slack = match (SecureApiKey::from_env("SLACK_TOKEN"), std::env::var("SLACK_CHANNEL")) {
            (Some(token), Ok(channel)) if !channel.trim().is_empty() => Some(SlackConfig {
                token,
                channel: channel.trim().to_string(),
            }),
            (Some(_), _) => {
                log::warn!("SLACK_TOKEN set without SLACK_CHANNEL, notifications go to the log only");
                None
            }
            _ => None,
        };
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        if s.min_leverage == 0 {
            return Err(ConfigError::Invalid("min_leverage must be at least 1".to_string()));
        }
        if s.min_leverage > s.max_leverage {
            return Err(ConfigError::Invalid(format!(
                "min_leverage {} exceeds max_leverage {}",
                s.min_leverage, s.max_leverage
            )));
        }
        if s.fast_ma == 0 || s.fast_ma >= s.slow_ma {
            return Err(ConfigError::Invalid(format!(
                "fast_ma {} must be positive and below slow_ma {}",
                s.fast_ma, s.slow_ma
            )));
        }
        if s.volume_ma == 0 {
            return Err(ConfigError::Invalid("volume_ma must be at least 1".to_string()));
        }
        let required = SignalSnapshot::required_bars(s);
        if self.engine.min_bars < required {
            return Err(ConfigError::Invalid(format!(
                "min_bars {} cannot cover slow_ma {} and volume_ma {} ({} needed)",
                self.engine.min_bars, s.slow_ma, s.volume_ma, required
            )));
        }
        if !(self.percentage_of_capital > 0.0 && self.percentage_of_capital <= 100.0) {
            return Err(ConfigError::Invalid(format!(
                "percentage_of_capital {} outside (0, 100]",
                self.percentage_of_capital
            )));
        }
        if self.engine.max_bars < self.engine.min_bars {
            return Err(ConfigError::Invalid(format!(
                "max_bars {} below min_bars {}",
                self.engine.max_bars, self.engine.min_bars
            )));
        }
        if !self.dry_run && self.master_credentials.is_none() {
            return Err(ConfigError::Invalid(
                "MASTER_API_KEY/MASTER_API_SECRET required unless dry_run is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints.resolve(self.testnet)
    }

    /// Master instrument, e.g. `BTCUSDT`
    pub fn master_symbol(&self) -> String {
        format!("{}USDT", self.symbol.to_uppercase())
    }

    /// Kline stream URL for the configured symbol and timeframe
    pub fn kline_stream_url(&self) -> String {
        format!(
            "{}/{}usdt@kline_{}",
            self.endpoints().stream_url,
            self.symbol.to_lowercase(),
            self.timeframe
        )
    }
}
