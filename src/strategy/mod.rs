//! Trend, scalp and volatility strategy: signal evaluation, the state machine
//! and the polling loop that executes it.

pub mod orchestrator;
pub mod signals;
pub mod state;

pub use orchestrator::Orchestrator;
pub use signals::SignalSnapshot;
pub use state::{ActiveStrategy, BearAction, FillAction, StrategyState, Transition};
