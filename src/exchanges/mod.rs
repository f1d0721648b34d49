pub mod binance;
pub mod bitmex;
pub mod error;
pub mod okx;

pub use binance::BinanceFuturesClient;
pub use bitmex::BitmexClient;
pub use error::{log_best_effort, BestEffort, VenueError};
pub use okx::OkxClient;

use rust_decimal::Decimal;
use serde_json::Value;

/// Decimal from a JSON number or numeric string. Venues mix both, and send
/// `""` for absent values.
pub(crate) fn json_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let raw = n.to_string();
            raw.parse::<Decimal>().ok().or_else(|| Decimal::from_scientific(&raw).ok())
        }
        Value::String(s) if !s.is_empty() => s.parse().ok(),
        _ => None,
    }
}
