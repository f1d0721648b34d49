use std::env;
use std::fmt;

/// Secret string wrapper that never prints its contents
#[derive(Clone, PartialEq, Eq)]
pub struct SecureApiKey {
    key: String,
}

impl SecureApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Get the raw secret (use with caution)
    pub fn expose(&self) -> &str {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Read a secret from the environment. Unset or blank variables yield `None`.
    pub fn from_env(var_name: &str) -> Option<Self> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }

    /// Mask the key for logging (shows only first 4 and last 4 characters)
    pub fn mask(&self) -> String {
        if self.key.len() <= 8 {
            "****".to_string()
        } else {
            format!("{}...{}", &self.key[..4], &self.key[self.key.len() - 4..])
        }
    }
}

impl fmt::Debug for SecureApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureApiKey")
            .field("key", &self.mask())
            .finish()
    }
}

impl fmt::Display for SecureApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mask())
    }
}

/// Credentials for one venue account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueCredentials {
    pub api_key: SecureApiKey,
    pub api_secret: SecureApiKey,
    /// Only venues signing with a passphrase header need this
    pub passphrase: Option<SecureApiKey>,
}

impl VenueCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecureApiKey::new(api_key),
            api_secret: SecureApiKey::new(api_secret),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecureApiKey::new(passphrase));
        self
    }

    /// Load a credential set from environment variables.
    ///
    /// Returns `Ok(None)` when none of the variables are set, so an unconfigured
    /// venue is simply absent. A partially configured venue is an error.
    pub fn from_env(
        key_var: &str,
        secret_var: &str,
        passphrase_var: Option<&str>,
    ) -> Result<Option<Self>, ApiKeyError> {
        let key = SecureApiKey::from_env(key_var);
        let secret = SecureApiKey::from_env(secret_var);
        let passphrase = passphrase_var.and_then(SecureApiKey::from_env);

        match (key, secret) {
            (None, None) if passphrase.is_none() => Ok(None),
            (Some(api_key), Some(api_secret)) => {
                if let (Some(var), None) = (passphrase_var, &passphrase) {
                    return Err(ApiKeyError::Missing(var.to_string()));
                }
                Ok(Some(Self {
                    api_key,
                    api_secret,
                    passphrase,
                }))
            }
            (None, _) => Err(ApiKeyError::Missing(key_var.to_string())),
            (Some(_), None) => Err(ApiKeyError::Missing(secret_var.to_string())),
        }
    }
}

/// API Key errors
#[derive(Debug, Clone, PartialEq)]
pub enum ApiKeyError {
    Missing(String),
}

impl fmt::Display for ApiKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKeyError::Missing(var) => {
                write!(f, "environment variable '{}' is not set", var)
            }
        }
    }
}

impl std::error::Error for ApiKeyError {}
