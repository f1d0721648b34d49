use crate::core::events::{AccountSnapshot, Bar, OrderReceipt, Position};
use crate::exchanges::error::{BestEffort, VenueError};
use crate::types::{Price, Size};
use async_trait::async_trait;

/// Master account execution, bound to one instrument.
///
/// The strategy only talks to the master through this trait; failures are
/// returned to the call site and never end the control loop.
#[async_trait]
pub trait MasterExecution: Send + Sync {
    /// Load instrument filters (lot step, tick size)
    async fn load_markets(&self) -> Result<(), VenueError>;

    /// Available balance plus open positions
    async fn fetch_balance(&self) -> Result<AccountSnapshot, VenueError>;

    /// Open positions on the bound instrument
    async fn fetch_positions(&self) -> Result<Vec<Position>, VenueError>;

    async fn set_leverage(&self, leverage: u32) -> BestEffort<()>;

    /// Floor a raw quantity to the instrument's lot step
    fn amount_to_precision(&self, raw: f64) -> Size;

    /// Market buy
    async fn enter_long(&self, amount: Size, leverage: u32) -> Result<OrderReceipt, VenueError>;

    /// Reduce-only market sell of the whole long, `None` when flat
    async fn exit_long(&self) -> Result<Option<OrderReceipt>, VenueError>;

    async fn place_stop_loss(&self, amount: Size, price: Price) -> Result<OrderReceipt, VenueError>;

    async fn place_take_profit(&self, amount: Size, price: Price) -> Result<OrderReceipt, VenueError>;

    /// Replace the active take-profit with one at `new_price`
    async fn modify_take_profit(&self, amount: Size, new_price: Price) -> Result<OrderReceipt, VenueError>;

    async fn cancel_all_orders(&self) -> Result<(), VenueError>;

    /// Most recent `limit` bars of the configured timeframe, oldest first
    async fn fetch_ohlcv(&self, limit: usize) -> Result<Vec<Bar>, VenueError>;
}
