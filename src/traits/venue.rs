use crate::core::events::{ContractSpec, OrderReceipt, OrderSide, Position};
use crate::exchanges::error::{BestEffort, VenueError};
use crate::types::Size;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Signed REST client for a slave venue.
///
/// Implementations differ only in authentication and payload shapes; sizing
/// and failure isolation live in the replication layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Available margin in the quote currency
    async fn get_balance(&self) -> Result<Decimal, VenueError>;

    async fn get_ticker_and_contract_spec(&self, instrument: &str) -> Result<ContractSpec, VenueError>;

    /// Failures are returned for logging only
    async fn set_leverage(&self, instrument: &str, leverage: u32) -> BestEffort<()>;

    async fn create_market_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Size,
        reduce_only: bool,
    ) -> Result<OrderReceipt, VenueError>;

    async fn get_positions(&self, instrument: &str) -> Result<Vec<Position>, VenueError>;

    /// One-off account setup before trading (position mode and similar)
    async fn prepare(&self, _instrument: &str) -> BestEffort<()> {
        Ok(())
    }
}
