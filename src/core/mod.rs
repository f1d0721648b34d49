pub mod error;
pub mod events;

pub use error::EngineError;
pub use events::*;
