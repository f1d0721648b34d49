/// Notification sink for trades and errors
pub mod alerts;

pub use alerts::{build_notifier, Category, LogNotifier, Notifier, Severity, SlackNotifier};
