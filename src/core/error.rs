use crate::config::ConfigError;
use crate::exchanges::error::VenueError;
use crate::streaming::StreamError;
use std::fmt;

/// Top-level error for engine start-up and a single strategy tick
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Venue(VenueError),
    Stream(StreamError),
    Config(ConfigError),
    /// Market data not usable yet (warm-up, short buffer)
    Data(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Venue(e) => write!(f, "{}", e),
            EngineError::Stream(e) => write!(f, "{}", e),
            EngineError::Config(e) => write!(f, "{}", e),
            EngineError::Data(msg) => write!(f, "Market data error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Venue(e) => Some(e),
            EngineError::Stream(e) => Some(e),
            EngineError::Config(e) => Some(e),
            EngineError::Data(_) => None,
        }
    }
}

impl From<VenueError> for EngineError {
    fn from(e: VenueError) -> Self {
        EngineError::Venue(e)
    }
}

impl From<StreamError> for EngineError {
    fn from(e: StreamError) -> Self {
        EngineError::Stream(e)
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}
