//! Persistent websocket sessions: market data, user fills and signed order
//! placement.

pub mod handlers;
pub mod listen_key;
pub mod session;
pub mod signing;

pub use handlers::{KlineHandler, OrderResponseHandler, UserDataHandler};
pub use listen_key::ListenKeyManager;
pub use session::{StreamEndpoint, StreamHandler, StreamSession};
pub use signing::RequestSigner;

/// Streaming errors
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    Connect(String),
    Transport(String),
    Closed,
    NotConnected(String),
    /// The endpoint URL could not be resolved (listen key acquisition)
    Endpoint(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Connect(msg) => write!(f, "Connect error: {}", msg),
            StreamError::Transport(msg) => write!(f, "Transport error: {}", msg),
            StreamError::Closed => write!(f, "Stream closed"),
            StreamError::NotConnected(name) => write!(f, "Session {} not connected", name),
            StreamError::Endpoint(msg) => write!(f, "Endpoint error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {}
