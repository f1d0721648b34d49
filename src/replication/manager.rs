use crate::core::events::{OrderReceipt, OrderSide};
use crate::exchanges::error::{log_best_effort, VenueError};
use crate::monitoring::{Category, Notifier, Severity};
use crate::traits::VenueClient;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

/// Slaves at or below this quote balance are skipped
pub const MIN_SLAVE_BALANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Upper bound on one venue's share of a replication call
pub const DEFAULT_VENUE_TIMEOUT: Duration = Duration::from_secs(10);

/// One slave account: a venue client bound to its instrument
#[derive(Clone)]
pub struct SlaveVenue {
    pub name: String,
    pub instrument: String,
    pub client: Arc<dyn VenueClient>,
}

impl SlaveVenue {
    pub fn new(name: impl Into<String>, instrument: impl Into<String>, client: Arc<dyn VenueClient>) -> Self {
        Self {
            name: name.into(),
            instrument: instrument.into(),
            client,
        }
    }
}

/// What happened on one slave
#[derive(Debug, Clone, PartialEq)]
pub enum VenueResult {
    Submitted(OrderReceipt),
    /// Nothing to do (low balance, size below minimum, no position)
    Skipped(String),
    Failed(VenueError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VenueOutcome {
    pub venue: String,
    pub result: VenueResult,
}

/// Per-venue outcomes of one replication call, in configuration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationReport {
    pub outcomes: SmallVec<[VenueOutcome; 4]>,
}

impl ReplicationReport {
    pub fn outcome(&self, venue: &str) -> Option<&VenueResult> {
        self.outcomes
            .iter()
            .find(|o| o.venue == venue)
            .map(|o| &o.result)
    }

    pub fn submitted(&self) -> usize {
        self.count(|r| matches!(r, VenueResult::Submitted(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, VenueResult::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, VenueResult::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&VenueResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }
}

/// Mirrors master entries and exits onto every slave venue.
///
/// Each venue is sized from its own fresh balance and contract spec and runs
/// inside its own error boundary: a failing venue is logged and notified,
/// never propagated, and never stops the others. A venue that does not
/// answer within the timeout is reported as failed.
pub struct ReplicationManager {
    venues: Vec<SlaveVenue>,
    notifier: Arc<dyn Notifier>,
    venue_timeout: Duration,
}

impl ReplicationManager {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            venues: Vec::new(),
            notifier,
            venue_timeout: DEFAULT_VENUE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, venue_timeout: Duration) -> Self {
        self.venue_timeout = venue_timeout;
        self
    }

    pub fn with_venue(mut self, venue: SlaveVenue) -> Self {
        self.add_venue(venue);
        self
    }

    pub fn add_venue(&mut self, venue: SlaveVenue) {
        log::info!("Slave venue registered: {} ({})", venue.name, venue.instrument);
        self.venues.push(venue);
    }

    pub fn venues(&self) -> &[SlaveVenue] {
        &self.venues
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    /// One-off account setup on every venue, best effort
    pub async fn prepare(&self) {
        for venue in &self.venues {
            let result = venue.client.prepare(&venue.instrument).await;
            log_best_effort(&format!("{} account setup", venue.name), &result);
        }
    }

    /// Open a long of `pct` percent of each slave's balance at `leverage`
    pub async fn enter_long(&self, pct: Decimal, leverage: u32) -> ReplicationReport {
        let outcomes = join_all(self.venues.iter().map(|venue| async move {
            let result = self.bounded(self.enter_venue(venue, pct, leverage)).await;
            self.finish(venue, "entry", result)
        }))
        .await;
        ReplicationReport {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    /// Close any long on every slave with a reduce-only sell
    pub async fn exit_long(&self) -> ReplicationReport {
        let outcomes = join_all(self.venues.iter().map(|venue| async move {
            let result = self.bounded(self.exit_venue(venue)).await;
            self.finish(venue, "exit", result)
        }))
        .await;
        ReplicationReport {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    async fn bounded<F>(&self, call: F) -> Result<VenueResult, VenueError>
    where
        F: std::future::Future<Output = Result<VenueResult, VenueError>>,
    {
        tokio::time::timeout(self.venue_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(VenueError::NetworkError(format!(
                    "no response within {}ms",
                    self.venue_timeout.as_millis()
                )))
            })
    }

    async fn enter_venue(&self, venue: &SlaveVenue, pct: Decimal, leverage: u32) -> Result<VenueResult, VenueError> {
        let balance = venue.client.get_balance().await?;
        if balance <= MIN_SLAVE_BALANCE {
            return Ok(VenueResult::Skipped(format!("balance {} too low", balance)));
        }

        let spec = venue.client.get_ticker_and_contract_spec(&venue.instrument).await?;
        let raw = spec.raw_quantity(balance, pct, leverage);
        let Some(quantity) = spec.normalize_quantity(raw) else {
            return Ok(VenueResult::Skipped(format!(
                "quantity {} below minimum {}",
                raw.round_dp(8),
                spec.min_order_size
            )));
        };

        let leverage_result = venue.client.set_leverage(&venue.instrument, leverage).await;
        log_best_effort(&format!("{} set leverage {}x", venue.name, leverage), &leverage_result);

        let receipt = venue
            .client
            .create_market_order(&venue.instrument, OrderSide::Buy, quantity, false)
            .await?;
        Ok(VenueResult::Submitted(receipt))
    }

    async fn exit_venue(&self, venue: &SlaveVenue) -> Result<VenueResult, VenueError> {
        let positions = venue.client.get_positions(&venue.instrument).await?;
        let Some(long) = positions.into_iter().find(|p| p.is_long()) else {
            return Ok(VenueResult::Skipped("no long position".to_string()));
        };

        let receipt = venue
            .client
            .create_market_order(&venue.instrument, OrderSide::Sell, long.size.abs(), true)
            .await?;
        Ok(VenueResult::Submitted(receipt))
    }

    fn finish(&self, venue: &SlaveVenue, action: &str, result: Result<VenueResult, VenueError>) -> VenueOutcome {
        let result = match result {
            Ok(VenueResult::Submitted(receipt)) => {
                log::info!(
                    "[SLAVE {}] {} {} {} submitted",
                    venue.name,
                    action,
                    receipt.side,
                    receipt.quantity
                );
                self.notifier.notify(
                    &format!("{} {}: {} {} {}", venue.name, action, receipt.side, receipt.quantity, venue.instrument),
                    Severity::Trade,
                    Category::Engine,
                );
                VenueResult::Submitted(receipt)
            }
            Ok(VenueResult::Skipped(reason)) => {
                log::info!("[SLAVE {}] {} skipped: {}", venue.name, action, reason);
                VenueResult::Skipped(reason)
            }
            Ok(VenueResult::Failed(e)) | Err(e) => {
                log::error!("[SLAVE {}] {} failed: {}", venue.name, action, e);
                self.notifier.notify(
                    &format!("{} {} error: {}", venue.name, action, e),
                    Severity::Error,
                    Category::Engine,
                );
                VenueResult::Failed(e)
            }
        };
        VenueOutcome {
            venue: venue.name.clone(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{MockVenue, RecordingNotifier};
    use crate::core::events::{ContractSpec, Position};
    use crate::traits::MockVenueClient;
    use crate::types::{Price, Size};

    fn spec() -> ContractSpec {
        ContractSpec {
            last_price: Price::from_f64(50_000.0),
            contract_size: "0.01".parse().unwrap(),
            lot_size: "0.001".parse().unwrap(),
            min_order_size: "0.001".parse().unwrap(),
        }
    }

    fn receipt(side: OrderSide, quantity: Size) -> OrderReceipt {
        OrderReceipt {
            venue: "mock".to_string(),
            order_id: Some("1".to_string()),
            client_order_id: None,
            side,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_entry_sized_from_fresh_balance() {
        let mut client = MockVenueClient::new();
        client
            .expect_get_balance()
            .times(1)
            .returning(|| Ok(Decimal::from(1000)));
        client
            .expect_get_ticker_and_contract_spec()
            .returning(|_| Ok(spec()));
        client.expect_set_leverage().returning(|_, _| {
            Err(VenueError::ApiError("leverage not modified".to_string()))
        });
        client
            .expect_create_market_order()
            .withf(|instrument, side, qty, reduce_only| {
                instrument == "BTC-USDT-SWAP" && *side == OrderSide::Buy && qty.to_string() == "3.96" && !reduce_only
            })
            .times(1)
            .returning(|_, side, qty, _| Ok(receipt(side, qty)));

        let notifier = Arc::new(RecordingNotifier::new());
        let manager = ReplicationManager::new(notifier.clone())
            .with_venue(SlaveVenue::new("okx", "BTC-USDT-SWAP", Arc::new(client)));
        let report = manager.enter_long(Decimal::from(99), 2).await;

        assert_eq!(report.submitted(), 1);
        assert_eq!(notifier.count(Severity::Trade), 1);
    }

    #[tokio::test]
    async fn test_low_balance_skips_venue() {
        let mut client = MockVenueClient::new();
        client.expect_get_balance().returning(|| Ok(Decimal::from(5)));
        client.expect_create_market_order().times(0);

        let manager = ReplicationManager::new(Arc::new(RecordingNotifier::new()))
            .with_venue(SlaveVenue::new("bitmex", "XBTUSDT", Arc::new(client)));
        let report = manager.enter_long(Decimal::from(99), 3).await;
        assert!(matches!(report.outcome("bitmex"), Some(VenueResult::Skipped(_))));
    }

    #[tokio::test]
    async fn test_below_minimum_is_dropped_not_submitted() {
        let mut client = MockVenueClient::new();
        client.expect_get_balance().returning(|| Ok(Decimal::from(10)));
        client.expect_get_ticker_and_contract_spec().returning(|_| {
            Ok(ContractSpec {
                last_price: Price::from_f64(50_000.0),
                contract_size: Decimal::ONE,
                lot_size: Decimal::ONE,
                min_order_size: Decimal::ONE,
            })
        });
        client.expect_create_market_order().times(0);

        let manager = ReplicationManager::new(Arc::new(RecordingNotifier::new()))
            .with_venue(SlaveVenue::new("bitmex", "XBTUSDT", Arc::new(client)));
        let report = manager.enter_long(Decimal::from(99), 1).await;
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.submitted(), 0);
    }

    #[tokio::test]
    async fn test_exit_sells_long_reduce_only() {
        let mut client = MockVenueClient::new();
        client.expect_get_positions().returning(|instrument| {
            Ok(vec![Position {
                symbol: instrument.to_string(),
                size: Size::from_f64(2.5),
                entry_price: None,
            }])
        });
        client
            .expect_create_market_order()
            .withf(|_, side, qty, reduce_only| *side == OrderSide::Sell && *qty == Size::from_f64(2.5) && *reduce_only)
            .times(1)
            .returning(|_, side, qty, _| Ok(receipt(side, qty)));

        let manager = ReplicationManager::new(Arc::new(RecordingNotifier::new()))
            .with_venue(SlaveVenue::new("okx", "BTC-USDT-SWAP", Arc::new(client)));
        assert_eq!(manager.exit_long().await.submitted(), 1);
    }

    #[tokio::test]
    async fn test_exit_when_flat_is_skipped() {
        let mut client = MockVenueClient::new();
        client.expect_get_positions().returning(|_| Ok(Vec::new()));
        client.expect_create_market_order().times(0);

        let manager = ReplicationManager::new(Arc::new(RecordingNotifier::new()))
            .with_venue(SlaveVenue::new("okx", "BTC-USDT-SWAP", Arc::new(client)));
        assert_eq!(manager.exit_long().await.skipped(), 1);
    }

    #[tokio::test]
    async fn test_failure_reported_not_propagated() {
        let mut client = MockVenueClient::new();
        client
            .expect_get_balance()
            .returning(|| Err(VenueError::AuthenticationError("401".to_string())));

        let notifier = Arc::new(RecordingNotifier::new());
        let manager = ReplicationManager::new(notifier.clone())
            .with_venue(SlaveVenue::new("okx", "BTC-USDT-SWAP", Arc::new(client)));
        let report = manager.enter_long(Decimal::from(99), 2).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(notifier.count(Severity::Error), 1);
    }

    #[tokio::test]
    async fn test_unresponsive_venue_times_out_alone() {
        let hung = Arc::new(MockVenue::new("hung", Decimal::from(1000), spec()));
        hung.set_unresponsive(true);
        let ok = Arc::new(MockVenue::new("ok", Decimal::from(1000), spec()));

        let notifier = Arc::new(RecordingNotifier::new());
        let manager = ReplicationManager::new(notifier.clone())
            .with_timeout(Duration::from_millis(50))
            .with_venue(SlaveVenue::new("hung", "XBTUSDT", hung.clone()))
            .with_venue(SlaveVenue::new("ok", "XBTUSDT", ok.clone()));

        let report = tokio::time::timeout(Duration::from_secs(2), manager.enter_long(Decimal::from(99), 2))
            .await
            .unwrap();
        assert!(matches!(report.outcome("hung"), Some(VenueResult::Failed(VenueError::NetworkError(_)))));
        assert_eq!(report.submitted(), 1);
        assert_eq!(ok.orders().len(), 1);
        assert!(hung.orders().is_empty());
        assert_eq!(notifier.count(Severity::Error), 1);
    }
}
