use crate::monitoring::{Category, Notifier, Severity};
use crate::streaming::listen_key::ListenKeyManager;
use crate::streaming::signing::{now_millis, RequestSigner};
use crate::streaming::StreamError;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callbacks for one streaming session. All callbacks run on the session's
/// task and must not block.
pub trait StreamHandler: Send + Sync {
    fn on_open(&self, _session: &StreamSession) {}
    fn on_message(&self, session: &StreamSession, text: &str);
    fn on_close(&self, _session: &StreamSession) {}
    fn on_error(&self, _session: &StreamSession, _error: &StreamError) {}
}

/// Where a session connects to
pub enum StreamEndpoint {
    Fixed(String),
    /// `{base_url}/{listenKey}` with a fresh key per connection
    ListenKey {
        manager: Arc<ListenKeyManager>,
        base_url: String,
    },
}

impl StreamEndpoint {
    pub async fn resolve(&self) -> Result<String, StreamError> {
        match self {
            StreamEndpoint::Fixed(url) => Ok(url.clone()),
            StreamEndpoint::ListenKey { manager, base_url } => {
                let key = manager
                    .acquire()
                    .await
                    .map_err(|e| StreamError::Endpoint(e.to_string()))?;
                Ok(format!("{}/{}", base_url.trim_end_matches('/'), key))
            }
        }
    }
}

/// Persistent duplex connection with fixed-delay reconnect.
///
/// Outbound requests are `{id, method, params}` frames, signed when a
/// [`RequestSigner`] is attached. Request ids are `req_<n>`, strictly
/// increasing for the life of the session.
pub struct StreamSession {
    name: String,
    endpoint: StreamEndpoint,
    signer: Option<RequestSigner>,
    reconnect_delay: Duration,
    notifier: Arc<dyn Notifier>,
    connected: AtomicBool,
    next_request_id: AtomicU64,
    /// request id -> method, for response correlation
    pending: DashMap<String, String>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl StreamSession {
    pub fn new(
        name: impl Into<String>,
        endpoint: StreamEndpoint,
        reconnect_delay: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint,
            signer: None,
            reconnect_delay,
            notifier,
            connected: AtomicBool::new(false),
            next_request_id: AtomicU64::new(1),
            pending: DashMap::new(),
            outbound: Mutex::new(None),
        }
    }

    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Remove and return the method of a pending request
    pub fn resolve_request(&self, id: &str) -> Option<String> {
        self.pending.remove(id).map(|(_, method)| method)
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Spawn the supervised connection loop. It reconnects forever after
    /// `reconnect_delay` and only stops when `cancel` fires.
    pub fn connect(self: &Arc<Self>, handler: Arc<dyn StreamHandler>, cancel: CancellationToken) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run(handler, cancel).await })
    }

    async fn run(&self, handler: Arc<dyn StreamHandler>, cancel: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.run_connection(handler.as_ref()) => outcome,
            };

            self.mark_disconnected();
            match outcome {
                Ok(()) => info!(session = %self.name, "stream closed by peer"),
                Err(e) => {
                    warn!(session = %self.name, error = %e, "stream error");
                    self.notifier.notify(
                        &format!("{} stream error: {}", self.name, e),
                        Severity::Error,
                        Category::Engine,
                    );
                    handler.on_error(self, &e);
                }
            }
            handler.on_close(self);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    debug!(session = %self.name, "reconnecting");
                }
            }
        }
        self.mark_disconnected();
        info!(session = %self.name, "stream session stopped");
    }

    async fn run_connection(&self, handler: &dyn StreamHandler) -> Result<(), StreamError> {
        let url = self.endpoint.resolve().await?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound_lock() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        info!(session = %self.name, "stream connected");
        handler.on_open(self);

        loop {
            tokio::select! {
                inbound = read.next() => match inbound {
                    Some(Ok(Message::Text(text))) => handler.on_message(self, &text),
                    Some(Ok(Message::Ping(payload))) => {
                        write
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|e| StreamError::Transport(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(session = %self.name, ?frame, "close frame received");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
                    None => return Err(StreamError::Closed),
                },
                Some(message) = rx.recv() => {
                    write
                        .send(message)
                        .await
                        .map_err(|e| StreamError::Transport(e.to_string()))?;
                }
            }
        }
    }

    /// Queue a request. Dropped (and logged) when the session is down; callers
    /// must not assume delivery. Returns the request id.
    pub fn send(&self, method: &str, params: Map<String, Value>) -> Result<String, StreamError> {
        if !self.is_connected() {
            warn!(session = %self.name, method, "not connected, request dropped");
            return Err(StreamError::NotConnected(self.name.clone()));
        }

        let params = match &self.signer {
            Some(signer) => signer.sign_params(&params, now_millis()),
            None => params,
        };
        let id = format!("req_{}", self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let frame = json!({ "id": id, "method": method, "params": params });

        self.pending.insert(id.clone(), method.to_string());
        let delivered = match self.outbound_lock().as_ref() {
            Some(tx) => tx.send(Message::Text(frame.to_string())).is_ok(),
            None => false,
        };
        if !delivered {
            self.pending.remove(&id);
            warn!(session = %self.name, method, "connection closed while sending, request dropped");
            return Err(StreamError::NotConnected(self.name.clone()));
        }

        info!(session = %self.name, "WS SENT: {} | ID: {}", method, id);
        Ok(id)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound_lock() = None;
        self.pending.clear();
    }

    fn outbound_lock(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        self.outbound.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::LogNotifier;

    struct Noop;

    impl StreamHandler for Noop {
        fn on_message(&self, _session: &StreamSession, _text: &str) {}
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let session = StreamSession::new(
            "orders",
            StreamEndpoint::Fixed("ws://127.0.0.1:1".to_string()),
            Duration::from_secs(5),
            Arc::new(LogNotifier),
        );
        let result = session.send("order.place", Map::new());
        assert_eq!(result, Err(StreamError::NotConnected("orders".to_string())));
        assert_eq!(session.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_retry_loop() {
        let session = Arc::new(StreamSession::new(
            "unreachable",
            StreamEndpoint::Fixed("ws://127.0.0.1:1".to_string()),
            Duration::from_millis(10),
            Arc::new(LogNotifier),
        ));
        let cancel = CancellationToken::new();
        let handle = session.connect(Arc::new(Noop), cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.is_connected());
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
