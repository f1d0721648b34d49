use crate::exchanges::error::VenueError;
use crate::monitoring::{Category, Notifier, Severity};
use crate::security::SecureApiKey;
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LISTEN_KEY_ENDPOINT: &str = "/fapi/v1/listenKey";

#[derive(Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

/// Owns the user-data stream token: acquired on every (re)connect and kept
/// alive by a background timer.
pub struct ListenKeyManager {
    http_client: Client,
    rest_url: String,
    api_key: SecureApiKey,
    current: RwLock<Option<String>>,
}

impl ListenKeyManager {
    pub fn new(rest_url: &str, api_key: SecureApiKey) -> Self {
        Self {
            http_client: Client::new(),
            rest_url: rest_url.trim_end_matches('/').to_string(),
            api_key,
            current: RwLock::new(None),
        }
    }

    /// The most recently acquired key
    pub fn current(&self) -> Option<String> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Create (or fetch the still-valid) listen key
    pub async fn acquire(&self) -> Result<String, VenueError> {
        let url = format!("{}{}", self.rest_url, LISTEN_KEY_ENDPOINT);
        let response = self
            .http_client
            .post(&url)
            .header("X-MBX-APIKEY", self.api_key.expose())
            .send()
            .await
            .map_err(|e| VenueError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::from_status(status, body));
        }

        let payload: ListenKeyResponse = response
            .json()
            .await
            .map_err(|e| VenueError::ParseError(e.to_string()))?;

        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(payload.listen_key.clone());
        log::info!("Listen key acquired");
        Ok(payload.listen_key)
    }

    /// Extend the validity of the current key
    pub async fn keep_alive(&self) -> Result<(), VenueError> {
        let url = format!("{}{}", self.rest_url, LISTEN_KEY_ENDPOINT);
        let mut request = self
            .http_client
            .put(&url)
            .header("X-MBX-APIKEY", self.api_key.expose());
        if let Some(key) = self.current() {
            request = request.query(&[("listenKey", key)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VenueError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(VenueError::from_status(status, body))
        }
    }

    /// Refresh the key every `interval` until cancelled. Failures are logged
    /// and reported, never fatal.
    pub fn spawn_keepalive(
        self: &Arc<Self>,
        interval: Duration,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match manager.keep_alive().await {
                            Ok(()) => log::info!("Listen key refreshed"),
                            Err(e) => {
                                log::error!("Listen key refresh failed: {}", e);
                                notifier.notify(
                                    &format!("ListenKey refresh error: {}", e),
                                    Severity::Error,
                                    Category::Engine,
                                );
                            }
                        }
                    }
                }
            }
            log::info!("Listen key keep-alive stopped");
        })
    }
}
