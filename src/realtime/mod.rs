//! Process wiring: notifier, master, slaves, streams and the strategy loop
pub mod engine;

pub use engine::{cancel_on_signal, TradingEngine};
