use crate::types::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// One OHLCV candle as delivered by the market-data stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(open_time: Timestamp, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Open position on a venue. `size` is signed: positive is long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub size: Size,
    pub entry_price: Option<Price>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.size.is_positive()
    }

    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }
}

/// Master account state refreshed on every poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub available_balance: f64,
    pub positions: Vec<Position>,
}

impl AccountSnapshot {
    pub fn in_position(&self) -> bool {
        self.positions.iter().any(Position::is_open)
    }

    pub fn in_long(&self) -> bool {
        self.positions
            .iter()
            .find(|p| p.is_open())
            .map(Position::is_long)
            .unwrap_or(false)
    }

    pub fn long_size(&self) -> Size {
        self.positions
            .iter()
            .find(|p| p.is_long())
            .map(|p| p.size)
            .unwrap_or(Size::ZERO)
    }
}

/// Ticker and contract specification used for slave sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub last_price: Price,
    /// Underlying units per contract
    pub contract_size: Decimal,
    pub lot_size: Decimal,
    pub min_order_size: Decimal,
}

impl ContractSpec {
    /// Unrounded order size in contracts:
    /// `(balance * pct / 100 * leverage) / (price * contract_size)`
    pub fn raw_quantity(&self, balance: Decimal, pct: Decimal, leverage: u32) -> Decimal {
        let unit_notional = self.last_price.value() * self.contract_size;
        if unit_notional <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        balance * pct / Decimal::from(100) * Decimal::from(leverage) / unit_notional
    }

    /// Floor to the lot size; `None` when the result is below the venue minimum
    pub fn normalize_quantity(&self, raw: Decimal) -> Option<Size> {
        let quantity = Size::new(raw).floor_to_step(self.lot_size);
        if quantity.is_positive() && quantity.value() >= self.min_order_size {
            Some(quantity)
        } else {
            None
        }
    }
}

/// Acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub venue: String,
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub side: OrderSide,
    pub quantity: Size,
}

/// How a fill is routed, decided by the marker in its client order tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillKind {
    StopLoss,
    TakeProfit,
    Other,
}

impl FillKind {
    pub fn from_client_tag(tag: &str) -> Self {
        if tag.contains("SL") {
            FillKind::StopLoss
        } else if tag.contains("TP") {
            FillKind::TakeProfit
        } else {
            FillKind::Other
        }
    }
}

/// Order fill received on the user-data stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub kind: FillKind,
    pub price: f64,
    pub quantity: f64,
}

/// Direction of a trade intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentSide {
    Long,
    Short,
    Close,
}

/// Immutable instruction produced by the strategy for the master client and
/// the replication layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub side: IntentSide,
    /// Percentage of capital replicated to slaves
    pub capital_pct: f64,
    /// Fraction of master balance committed, before leverage
    pub master_fraction: f64,
    pub leverage: u32,
    /// Price used to convert notional into master quantity
    pub reference_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Cancel resting protective orders before entering
    pub cancel_resting: bool,
    pub tag: String,
}

impl TradeIntent {
    /// Raw (unrounded) master quantity for `balance`
    pub fn master_quantity(&self, balance: f64) -> f64 {
        if self.reference_price <= 0.0 {
            return 0.0;
        }
        balance * self.master_fraction * self.leverage as f64 / self.reference_price
    }
}
