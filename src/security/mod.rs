/// Credential handling that keeps secrets out of logs
pub mod api_keys;

pub use api_keys::{ApiKeyError, SecureApiKey, VenueCredentials};
