use log::LevelFilter;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Failure to install the global logger
#[derive(Debug)]
pub enum LoggingError {
    InvalidLevel(String),
    Io(std::io::Error),
    AlreadyInitialized(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingError::InvalidLevel(level) => write!(f, "Invalid log level: {}", level),
            LoggingError::Io(e) => write!(f, "Log file error: {}", e),
            LoggingError::AlreadyInitialized(msg) => write!(f, "Logger already set: {}", msg),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Parse a level name (`trace`..`error`, `off`), case-insensitive.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    LevelFilter::from_str(level.trim()).map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

/// Install the process-wide logger: UTC timestamp, level and target on every
/// line, to stdout and optionally appended to `log_file`.
///
/// `tracing` events from the streaming layer reach this sink through the
/// `log` feature of `tracing`.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let level = parse_level(level)?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // Connection-level chatter from the HTTP and WS stacks
        .level_for("hyper", LevelFilter::Warn)
        .level_for("tungstenite", LevelFilter::Warn)
        .level_for("tokio_tungstenite", LevelFilter::Warn)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path).map_err(LoggingError::Io)?);
    }

    dispatch
        .apply()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), LevelFilter::Info);
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::Debug);
        assert!(matches!(parse_level("loud"), Err(LoggingError::InvalidLevel(_))));
    }
}
