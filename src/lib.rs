pub mod config;
pub mod connectors;
pub mod core;
pub mod exchanges;
pub mod logging;
pub mod market_data;
pub mod monitoring;
pub mod realtime;
pub mod replication;
pub mod security;
pub mod streaming;
pub mod strategy;
pub mod traits;
pub mod types;

pub use config::{ConfigError, StrategyParams, TraderConfig};
pub use connectors::{DryRunMaster, MockVenue, RecordingNotifier};
pub use crate::core::error::EngineError;
pub use crate::core::events::{AccountSnapshot, Bar, ContractSpec, FillEvent, FillKind, OrderSide, Position, TradeIntent};
pub use exchanges::{BinanceFuturesClient, BitmexClient, OkxClient, VenueError};
pub use logging::init_logging;
pub use market_data::MarketBuffer;
pub use monitoring::{Category, Notifier, Severity};
pub use realtime::TradingEngine;
pub use replication::{ReplicationManager, SlaveVenue};
pub use strategy::{ActiveStrategy, Orchestrator, StrategyState, Transition};
pub use traits::{MasterExecution, VenueClient};
pub use types::{Price, Size};
