pub mod buffer;
pub mod kline;

pub use buffer::MarketBuffer;
pub use kline::{parse_kline_message, parse_rest_klines, KlineUpdate};
