use crate::core::events::{AccountSnapshot, Bar, OrderReceipt, OrderSide, Position};
use crate::exchanges::binance::client_order_id;
use crate::exchanges::error::{BestEffort, VenueError};
use crate::traits::MasterExecution;
use crate::types::{Price, Size};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Mutex, MutexGuard};

/// A call received by [`DryRunMaster`]
#[derive(Debug, Clone, PartialEq)]
pub enum MasterCall {
    LoadMarkets,
    SetLeverage(u32),
    EnterLong { amount: Size, leverage: u32 },
    ExitLong { amount: Size },
    StopLoss { amount: Size, price: Price },
    TakeProfit { amount: Size, price: Price },
    ModifyTakeProfit { amount: Size, price: Price },
    CancelAll,
}

#[derive(Debug)]
struct DryRunBook {
    balance: f64,
    position: Size,
    entry_price: Option<Price>,
    bars: Vec<Bar>,
    calls: Vec<MasterCall>,
    reject_entries: bool,
}

/// Master executor that logs orders instead of sending them.
///
/// Keeps a simulated balance and a single long position so the strategy loop
/// sees the effect of its own orders.
#[derive(Debug)]
pub struct DryRunMaster {
    symbol: String,
    step_size: Decimal,
    book: Mutex<DryRunBook>,
}

impl DryRunMaster {
    pub fn new(symbol: &str, balance: f64) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            step_size: Decimal::new(1, 3),
            book: Mutex::new(DryRunBook {
                balance,
                position: Size::ZERO,
                entry_price: None,
                bars: Vec::new(),
                calls: Vec::new(),
                reject_entries: false,
            }),
        }
    }

    /// History served by `fetch_ohlcv`
    pub fn with_bars(self, bars: Vec<Bar>) -> Self {
        self.book().bars = bars;
        self
    }

    pub fn set_bars(&self, bars: Vec<Bar>) {
        self.book().bars = bars;
    }

    pub fn set_balance(&self, balance: f64) {
        self.book().balance = balance;
    }

    /// Force the simulated position, e.g. to model a stop-loss fill
    pub fn set_position(&self, size: Size) {
        let mut book = self.book();
        book.position = size;
        if size.is_zero() {
            book.entry_price = None;
        }
    }

    /// Make every `enter_long` fail until switched back
    pub fn set_reject_entries(&self, reject: bool) {
        self.book().reject_entries = reject;
    }

    pub fn position(&self) -> Size {
        self.book().position
    }

    pub fn calls(&self) -> Vec<MasterCall> {
        self.book().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.book().calls.clear();
    }

    pub fn entries(&self) -> usize {
        self.book()
            .calls
            .iter()
            .filter(|c| matches!(c, MasterCall::EnterLong { .. }))
            .count()
    }

    pub fn exits(&self) -> usize {
        self.book()
            .calls
            .iter()
            .filter(|c| matches!(c, MasterCall::ExitLong { .. }))
            .count()
    }

    fn book(&self) -> MutexGuard<'_, DryRunBook> {
        self.book.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn receipt(&self, prefix: &str, side: OrderSide, quantity: Size) -> OrderReceipt {
        OrderReceipt {
            venue: "dry-run".to_string(),
            order_id: None,
            client_order_id: Some(client_order_id(prefix)),
            side,
            quantity,
        }
    }
}

#[async_trait]
impl MasterExecution for DryRunMaster {
    async fn load_markets(&self) -> Result<(), VenueError> {
        self.book().calls.push(MasterCall::LoadMarkets);
        Ok(())
    }

    async fn fetch_balance(&self) -> Result<AccountSnapshot, VenueError> {
        let book = self.book();
        let positions = if book.position.is_zero() {
            Vec::new()
        } else {
            vec![Position {
                symbol: self.symbol.clone(),
                size: book.position,
                entry_price: book.entry_price,
            }]
        };
        Ok(AccountSnapshot {
            available_balance: book.balance,
            positions,
        })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, VenueError> {
        Ok(self.fetch_balance().await?.positions)
    }

    async fn set_leverage(&self, leverage: u32) -> BestEffort<()> {
        self.book().calls.push(MasterCall::SetLeverage(leverage));
        Ok(())
    }

    fn amount_to_precision(&self, raw: f64) -> Size {
        Size::from_f64(raw).floor_to_step(self.step_size)
    }

    async fn enter_long(&self, amount: Size, leverage: u32) -> Result<OrderReceipt, VenueError> {
        let mut book = self.book();
        if book.reject_entries {
            return Err(VenueError::Rejected("dry-run entry rejected".to_string()));
        }
        log::info!("[DRY-RUN] BUY {} {} at {}x", amount, self.symbol, leverage);
        book.calls.push(MasterCall::EnterLong { amount, leverage });
        book.position = Size::new(book.position.value() + amount.value());
        book.entry_price = book.bars.last().map(|b| Price::from_f64(b.close));
        drop(book);
        Ok(self.receipt("MKT", OrderSide::Buy, amount))
    }

    async fn exit_long(&self) -> Result<Option<OrderReceipt>, VenueError> {
        let mut book = self.book();
        if !book.position.is_positive() {
            return Ok(None);
        }
        let amount = book.position;
        log::info!("[DRY-RUN] SELL {} {} (reduce-only)", amount, self.symbol);
        book.calls.push(MasterCall::ExitLong { amount });
        book.position = Size::ZERO;
        book.entry_price = None;
        drop(book);
        Ok(Some(self.receipt("EXIT", OrderSide::Sell, amount)))
    }

    async fn place_stop_loss(&self, amount: Size, price: Price) -> Result<OrderReceipt, VenueError> {
        log::info!("[DRY-RUN] STOP_MARKET {} @ {}", amount, price);
        self.book().calls.push(MasterCall::StopLoss { amount, price });
        Ok(self.receipt("SL", OrderSide::Sell, amount))
    }

    async fn place_take_profit(&self, amount: Size, price: Price) -> Result<OrderReceipt, VenueError> {
        log::info!("[DRY-RUN] TAKE_PROFIT_MARKET {} @ {}", amount, price);
        self.book().calls.push(MasterCall::TakeProfit { amount, price });
        Ok(self.receipt("TP", OrderSide::Sell, amount))
    }

    async fn modify_take_profit(&self, amount: Size, new_price: Price) -> Result<OrderReceipt, VenueError> {
        log::info!("[DRY-RUN] take-profit moved to {}", new_price);
        self.book().calls.push(MasterCall::ModifyTakeProfit {
            amount,
            price: new_price,
        });
        Ok(self.receipt("TP", OrderSide::Sell, amount))
    }

    async fn cancel_all_orders(&self) -> Result<(), VenueError> {
        self.book().calls.push(MasterCall::CancelAll);
        Ok(())
    }

    async fn fetch_ohlcv(&self, limit: usize) -> Result<Vec<Bar>, VenueError> {
        let book = self.book();
        let start = book.bars.len().saturating_sub(limit);
        Ok(book.bars[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(n: i64) -> Vec<Bar> {
        (0..n).map(|t| Bar::new(t, 100.0, 101.0, 99.0, 100.0, 1.0)).collect()
    }

    #[tokio::test]
    async fn test_dry_run_position_lifecycle() {
        let master = DryRunMaster::new("btcusdt", 1000.0).with_bars(bars(3));
        assert!(master.fetch_balance().await.unwrap().positions.is_empty());

        let receipt = master.enter_long(Size::from_f64(0.02), 2).await.unwrap();
        assert!(receipt.client_order_id.unwrap().starts_with("MKT_"));

        let snapshot = master.fetch_balance().await.unwrap();
        assert!(snapshot.in_long());
        assert_eq!(snapshot.positions[0].entry_price, Some(Price::from_f64(100.0)));

        let exit = master.exit_long().await.unwrap().unwrap();
        assert_eq!(exit.quantity, Size::from_f64(0.02));
        assert!(master.exit_long().await.unwrap().is_none());
        assert_eq!(master.entries(), 1);
        assert_eq!(master.exits(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_rejects_on_request() {
        let master = DryRunMaster::new("BTCUSDT", 1000.0);
        master.set_reject_entries(true);
        assert!(master.enter_long(Size::from_f64(0.01), 1).await.is_err());
        assert!(master.position().is_zero());
        assert!(master.calls().is_empty());
    }

    #[test]
    fn test_fetch_ohlcv_returns_most_recent() {
        let master = DryRunMaster::new("BTCUSDT", 1000.0).with_bars(bars(10));
        let recent = tokio_test::block_on(master.fetch_ohlcv(4)).unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].open_time, 6);
    }
}
