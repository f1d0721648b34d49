use crate::core::events::{ContractSpec, OrderReceipt, OrderSide, Position};
use crate::exchanges::error::{BestEffort, VenueError};
use crate::monitoring::{Category, Notifier, Severity};
use crate::traits::VenueClient;
use crate::types::Size;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// An order received by [`MockVenue`]
#[derive(Debug, Clone, PartialEq)]
pub struct MockOrder {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Size,
    pub reduce_only: bool,
}

/// Scripted slave venue for tests: fixed balance and contract spec, a signed
/// net position, and switchable failures. An unresponsive venue never
/// answers balance or position queries.
#[derive(Debug)]
pub struct MockVenue {
    name: String,
    balance: Mutex<Decimal>,
    spec: ContractSpec,
    position: Mutex<Decimal>,
    orders: Mutex<Vec<MockOrder>>,
    leverage_calls: Mutex<Vec<u32>>,
    fail_orders: AtomicBool,
    fail_balance: AtomicBool,
    unresponsive: AtomicBool,
}

impl MockVenue {
    pub fn new(name: &str, balance: Decimal, spec: ContractSpec) -> Self {
        Self {
            name: name.to_string(),
            balance: Mutex::new(balance),
            spec,
            position: Mutex::new(Decimal::ZERO),
            orders: Mutex::new(Vec::new()),
            leverage_calls: Mutex::new(Vec::new()),
            fail_orders: AtomicBool::new(false),
            fail_balance: AtomicBool::new(false),
            unresponsive: AtomicBool::new(false),
        }
    }

    pub fn set_fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_balance(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    async fn stall_if_unresponsive(&self) {
        if self.unresponsive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    pub fn set_position(&self, size: Decimal) {
        *self.position.lock().unwrap_or_else(|p| p.into_inner()) = size;
    }

    pub fn position(&self) -> Decimal {
        *self.position.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn orders(&self) -> Vec<MockOrder> {
        self.orders.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn leverage_calls(&self) -> Vec<u32> {
        self.leverage_calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl VenueClient for MockVenue {
    async fn get_balance(&self) -> Result<Decimal, VenueError> {
        self.stall_if_unresponsive().await;
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(VenueError::NetworkError(format!("{} unreachable", self.name)));
        }
        Ok(*self.balance.lock().unwrap_or_else(|p| p.into_inner()))
    }

    async fn get_ticker_and_contract_spec(&self, _instrument: &str) -> Result<ContractSpec, VenueError> {
        Ok(self.spec)
    }

    async fn set_leverage(&self, _instrument: &str, leverage: u32) -> BestEffort<()> {
        self.leverage_calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(leverage);
        Ok(())
    }

    async fn create_market_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Size,
        reduce_only: bool,
    ) -> Result<OrderReceipt, VenueError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(VenueError::ApiError(format!("{} rejected the order", self.name)));
        }

        self.orders.lock().unwrap_or_else(|p| p.into_inner()).push(MockOrder {
            instrument: instrument.to_string(),
            side,
            quantity,
            reduce_only,
        });
        {
            let mut position = self.position.lock().unwrap_or_else(|p| p.into_inner());
            match side {
                OrderSide::Buy => *position += quantity.value(),
                OrderSide::Sell => *position -= quantity.value(),
            }
        }

        Ok(OrderReceipt {
            venue: self.name.clone(),
            order_id: Some(format!("{}-{}", self.name, self.orders().len())),
            client_order_id: None,
            side,
            quantity,
        })
    }

    async fn get_positions(&self, instrument: &str) -> Result<Vec<Position>, VenueError> {
        self.stall_if_unresponsive().await;
        let size = self.position();
        if size.is_zero() {
            return Ok(Vec::new());
        }
        Ok(vec![Position {
            symbol: instrument.to_string(),
            size: Size::new(size),
            entry_price: Some(self.spec.last_price),
        }])
    }
}

/// Notifier that keeps every message for assertions
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, Severity, Category)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, Severity, Category)> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.messages()
            .iter()
            .filter(|(_, s, _)| *s == severity)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, severity: Severity, category: Category) {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((message.to_string(), severity, category));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Price;

    fn spec() -> ContractSpec {
        ContractSpec {
            last_price: Price::from_f64(100.0),
            contract_size: Decimal::ONE,
            lot_size: Decimal::ONE,
            min_order_size: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn test_mock_venue_tracks_net_position() {
        let venue = MockVenue::new("a", Decimal::from(500), spec());
        venue
            .create_market_order("X", OrderSide::Buy, Size::new(Decimal::from(3)), false)
            .await
            .unwrap();
        venue
            .create_market_order("X", OrderSide::Sell, Size::new(Decimal::from(3)), true)
            .await
            .unwrap();
        assert!(venue.get_positions("X").await.unwrap().is_empty());
        assert_eq!(venue.orders().len(), 2);
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify("boom", Severity::Error, Category::Engine);
        notifier.notify("fill", Severity::Trade, Category::Trend);
        assert_eq!(notifier.count(Severity::Error), 1);
        assert_eq!(notifier.messages()[1].0, "fill");
    }
}
