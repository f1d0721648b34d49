use std::fmt;

/// Error raised by a venue client, master or slave
#[derive(Debug, Clone, PartialEq)]
pub enum VenueError {
    NetworkError(String),
    ConnectionError(String),
    ApiError(String),
    ParseError(String),
    AuthenticationError(String),
    /// Venue refused the order (size below minimum, margin, duplicate cancel)
    Rejected(String),
    /// Order-placement session is down; the request was dropped
    NotConnected(String),
}

impl fmt::Display for VenueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            VenueError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            VenueError::ApiError(msg) => write!(f, "API error: {}", msg),
            VenueError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            VenueError::AuthenticationError(msg) => write!(f, "Authentication error: {}", msg),
            VenueError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            VenueError::NotConnected(msg) => write!(f, "Not connected: {}", msg),
        }
    }
}

impl std::error::Error for VenueError {}

impl VenueError {
    /// Map a non-success HTTP status to the matching variant
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => VenueError::AuthenticationError(format!("{}: {}", status, body)),
            _ => VenueError::ApiError(format!("{}: {}", status, body)),
        }
    }
}

/// Outcome of a call whose failure is logged and reported but never
/// propagated to the caller's control flow.
pub type BestEffort<T> = Result<T, VenueError>;

/// Log a best-effort failure and discard it, returning whether it succeeded.
pub fn log_best_effort<T>(context: &str, result: &BestEffort<T>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("{} failed (ignored): {}", context, e);
            false
        }
    }
}
