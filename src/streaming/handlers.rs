use crate::core::events::{FillEvent, FillKind};
use crate::market_data::{parse_kline_message, MarketBuffer};
use crate::monitoring::{Category, Notifier, Severity};
use crate::streaming::session::{StreamHandler, StreamSession};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// "Unknown order" on cancel: the order was already gone, nothing to report
const CANCEL_REJECTED_NO_OP: i64 = -2011;

/// Handles `{id, result|error}` responses on the order-placement session
pub struct OrderResponseHandler {
    notifier: Arc<dyn Notifier>,
}

impl OrderResponseHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl StreamHandler for OrderResponseHandler {
    fn on_open(&self, session: &StreamSession) {
        self.notifier.notify(
            &format!("{} websocket connected", session.name()),
            Severity::Info,
            Category::Engine,
        );
    }

    fn on_close(&self, session: &StreamSession) {
        self.notifier.notify(
            &format!("{} websocket disconnected", session.name()),
            Severity::Info,
            Category::Engine,
        );
    }

    fn on_message(&self, session: &StreamSession, text: &str) {
        let data: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                error!("WS parse error: {}", e);
                self.notifier
                    .notify(&format!("WS parse error: {}", e), Severity::Error, Category::Engine);
                return;
            }
        };

        let method = data
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| session.resolve_request(id))
            .unwrap_or_else(|| "unknown".to_string());

        if let Some(err) = data.get("error") {
            if err.get("code").and_then(Value::as_i64) == Some(CANCEL_REJECTED_NO_OP) {
                debug!(method = %method, "cancel on unknown order ignored");
                return;
            }
            error!(method = %method, "WS API error: {}", err);
            self.notifier
                .notify(&format!("WS API error ({}): {}", method, err), Severity::Error, Category::Engine);
        } else if let Some(result) = data.get("result") {
            if let Some(order_id) = result.get("orderId") {
                info!(method = %method, "WS order success | ID: {}", order_id);
            } else if let Some(algo_id) = result.get("algoId") {
                info!(method = %method, "WS algo success | ID: {}", algo_id);
            }
        }
    }
}

/// Feeds kline updates into the market buffer
pub struct KlineHandler {
    buffer: Arc<MarketBuffer>,
}

impl KlineHandler {
    pub fn new(buffer: Arc<MarketBuffer>) -> Self {
        Self { buffer }
    }
}

impl StreamHandler for KlineHandler {
    fn on_message(&self, _session: &StreamSession, text: &str) {
        if let Some(update) = parse_kline_message(text) {
            self.buffer.push(update.bar);
        }
    }
}

/// Bounded set of recently seen ids, oldest evicted first
pub struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`; false when it was already present
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

/// Turns `ORDER_TRADE_UPDATE` fills into [`FillEvent`]s, at most once per order
pub struct UserDataHandler {
    fills: mpsc::UnboundedSender<FillEvent>,
    recent: Mutex<RecentIds>,
}

impl UserDataHandler {
    pub fn new(fills: mpsc::UnboundedSender<FillEvent>) -> Self {
        Self {
            fills,
            recent: Mutex::new(RecentIds::new(512)),
        }
    }
}

/// Decode a filled order update; anything else yields `None`
pub fn parse_fill_event(text: &str) -> Option<FillEvent> {
    let data: Value = serde_json::from_str(text).ok()?;
    if data.get("e").and_then(Value::as_str) != Some("ORDER_TRADE_UPDATE") {
        return None;
    }
    let o = data.get("o")?;
    if o.get("X").and_then(Value::as_str) != Some("FILLED") {
        return None;
    }

    let text_field = |key: &str| o.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let num_field = |key: &str| {
        o.get(key)
            .and_then(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64()))
            .unwrap_or(0.0)
    };

    let client_order_id = text_field("c");
    let order_id = match o.get("i") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => client_order_id.clone(),
    };

    Some(FillEvent {
        kind: FillKind::from_client_tag(&client_order_id),
        order_id,
        client_order_id,
        symbol: text_field("s"),
        price: num_field("ap"),
        quantity: num_field("z"),
    })
}

impl StreamHandler for UserDataHandler {
    fn on_message(&self, _session: &StreamSession, text: &str) {
        if text.contains("listenKeyExpired") {
            warn!("listen key expired, waiting for reconnect");
            return;
        }
        let Some(fill) = parse_fill_event(text) else {
            return;
        };

        let fresh = self
            .recent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(&fill.order_id);
        if !fresh {
            debug!(order_id = %fill.order_id, "duplicate fill ignored");
            return;
        }

        info!("[WS] FILL: {}", fill.client_order_id);
        if self.fills.send(fill).is_err() {
            error!("fill receiver dropped");
        }
    }
}
