use crate::core::events::{AccountSnapshot, Bar, OrderReceipt, OrderSide, Position};
use crate::exchanges::error::{BestEffort, VenueError};
use crate::exchanges::json_decimal;
use crate::market_data::parse_rest_klines;
use crate::streaming::signing::{form_encode, now_millis};
use crate::streaming::{RequestSigner, StreamSession};
use crate::traits::MasterExecution;
use crate::types::{Price, Size};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Largest page the kline endpoint serves
const MAX_KLINES: usize = 1500;

/// Lot step and tick size of the bound instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolFilters {
    pub step_size: Decimal,
    pub tick_size: Decimal,
}

impl Default for SymbolFilters {
    fn default() -> Self {
        // Conservative until exchangeInfo is loaded
        Self {
            step_size: Decimal::new(1, 3),
            tick_size: Decimal::new(1, 1),
        }
    }
}

/// Client order tag: `<prefix>_<16 hex chars>`
pub fn client_order_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..16])
}

/// Binance USDⓈ-M futures master client.
///
/// Account queries go over signed REST; orders go over the signed
/// order-placement websocket session, so a dropped session drops orders
/// instead of queueing them.
pub struct BinanceFuturesClient {
    symbol: String,
    timeframe: String,
    rest_url: String,
    signer: RequestSigner,
    http_client: Client,
    orders: Arc<StreamSession>,
    filters: RwLock<SymbolFilters>,
    /// Tag of the resting take-profit, if any
    active_take_profit: Mutex<Option<String>>,
}

impl BinanceFuturesClient {
    pub fn new(
        symbol: &str,
        timeframe: &str,
        rest_url: &str,
        signer: RequestSigner,
        orders: Arc<StreamSession>,
    ) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            timeframe: timeframe.to_string(),
            rest_url: rest_url.trim_end_matches('/').to_string(),
            signer,
            http_client: Client::new(),
            orders,
            filters: RwLock::new(SymbolFilters::default()),
            active_take_profit: Mutex::new(None),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn filters(&self) -> SymbolFilters {
        *self.filters.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn active_take_profit(&self) -> Option<String> {
        self.active_take_profit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn public_get(&self, path: &str) -> Result<Value, VenueError> {
        let url = format!("{}{}", self.rest_url, path);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| VenueError::NetworkError(e.to_string()))?;
        Self::read_json(response).await
    }

    /// Signed REST call: `timestamp` appended, then `signature` over the
    /// encoded query.
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, VenueError> {
        let timestamp = now_millis().to_string();
        let mut pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        pairs.push(("timestamp", timestamp.as_str()));
        let query = form_encode(pairs);
        let signature = self.signer.sign_query(&query);

        let url = format!("{}{}?{}&signature={}", self.rest_url, path, query, signature);
        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", self.signer.api_key().expose())
            .send()
            .await
            .map_err(|e| VenueError::NetworkError(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, VenueError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::from_status(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| VenueError::ParseError(e.to_string()))
    }

    fn parse_positions(&self, rows: &Value) -> Vec<Position> {
        rows.as_array()
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.get("symbol").and_then(Value::as_str) == Some(self.symbol.as_str()))
                    .filter_map(|row| {
                        let size = row.get("positionAmt").and_then(json_decimal)?;
                        if size.is_zero() {
                            return None;
                        }
                        Some(Position {
                            symbol: self.symbol.clone(),
                            size: Size::new(size),
                            entry_price: row
                                .get("entryPrice")
                                .and_then(json_decimal)
                                .filter(|p| !p.is_zero())
                                .map(Price::new),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Push an order over the websocket session
    fn place(
        &self,
        mut params: Map<String, Value>,
        tag: &str,
        side: OrderSide,
        amount: Size,
    ) -> Result<OrderReceipt, VenueError> {
        params.insert("symbol".to_string(), json!(self.symbol));
        params.insert("side".to_string(), json!(side.to_string()));
        params.insert("quantity".to_string(), json!(amount.to_string()));
        params.insert("newClientOrderId".to_string(), json!(tag));

        let request_id = self
            .orders
            .send("order.place", params)
            .map_err(|e| VenueError::NotConnected(e.to_string()))?;
        log::debug!("order {} queued as {}", tag, request_id);

        Ok(OrderReceipt {
            venue: "binance".to_string(),
            order_id: None,
            client_order_id: Some(tag.to_string()),
            side,
            quantity: amount,
        })
    }

    fn conditional(&self, order_type: &str, price: Price) -> Map<String, Value> {
        let stop_price = price.round_to_tick(self.filters().tick_size);
        let mut params = Map::new();
        params.insert("type".to_string(), json!(order_type));
        params.insert("stopPrice".to_string(), json!(stop_price.to_string()));
        params.insert("reduceOnly".to_string(), json!(true));
        params
    }

    fn set_active_take_profit(&self, tag: Option<String>) -> Option<String> {
        let mut slot = self.active_take_profit.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *slot, tag)
    }
}

/// Unsigned kline download, oldest first. Also serves dry-run warm-up,
/// which has no credentials.
pub async fn fetch_klines(
    http_client: &Client,
    rest_url: &str,
    symbol: &str,
    interval: &str,
    limit: usize,
) -> Result<Vec<Bar>, VenueError> {
    let limit = limit.clamp(1, MAX_KLINES).to_string();
    let query = form_encode([
        ("symbol", symbol),
        ("interval", interval),
        ("limit", limit.as_str()),
    ]);
    let url = format!("{}/fapi/v1/klines?{}", rest_url.trim_end_matches('/'), query);
    let response = http_client
        .get(&url)
        .send()
        .await
        .map_err(|e| VenueError::NetworkError(e.to_string()))?;
    let json = BinanceFuturesClient::read_json(response).await?;
    parse_rest_klines(&json).map_err(VenueError::ParseError)
}

/// Step and tick of `symbol` from an exchangeInfo payload
pub fn parse_symbol_filters(info: &Value, symbol: &str) -> Option<SymbolFilters> {
    let entry = info
        .get("symbols")?
        .as_array()?
        .iter()
        .find(|s| s.get("symbol").and_then(Value::as_str) == Some(symbol))?;

    let mut filters = SymbolFilters::default();
    for filter in entry.get("filters")?.as_array()? {
        match filter.get("filterType").and_then(Value::as_str) {
            Some("LOT_SIZE") => {
                if let Some(step) = filter.get("stepSize").and_then(json_decimal) {
                    filters.step_size = step.normalize();
                }
            }
            Some("PRICE_FILTER") => {
                if let Some(tick) = filter.get("tickSize").and_then(json_decimal) {
                    filters.tick_size = tick.normalize();
                }
            }
            _ => {}
        }
    }
    Some(filters)
}

#[async_trait]
impl MasterExecution for BinanceFuturesClient {
    async fn load_markets(&self) -> Result<(), VenueError> {
        let info = self.public_get("/fapi/v1/exchangeInfo").await?;
        let filters = parse_symbol_filters(&info, &self.symbol)
            .ok_or_else(|| VenueError::ApiError(format!("Symbol {} not listed", self.symbol)))?;
        log::info!(
            "Loaded {} filters: step {} tick {}",
            self.symbol,
            filters.step_size,
            filters.tick_size
        );
        *self.filters.write().unwrap_or_else(|p| p.into_inner()) = filters;
        Ok(())
    }

    async fn fetch_balance(&self) -> Result<AccountSnapshot, VenueError> {
        let account = self.signed_request(Method::GET, "/fapi/v2/account", &[]).await?;
        let available_balance = account
            .get("availableBalance")
            .and_then(json_decimal)
            .and_then(|d| d.to_f64())
            .ok_or_else(|| VenueError::ParseError("missing availableBalance".to_string()))?;
        let positions = account
            .get("positions")
            .map(|rows| self.parse_positions(rows))
            .unwrap_or_default();

        Ok(AccountSnapshot {
            available_balance,
            positions,
        })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, VenueError> {
        let rows = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", &[("symbol", self.symbol.clone())])
            .await?;
        Ok(self.parse_positions(&rows))
    }

    async fn set_leverage(&self, leverage: u32) -> BestEffort<()> {
        self.signed_request(
            Method::POST,
            "/fapi/v1/leverage",
            &[("symbol", self.symbol.clone()), ("leverage", leverage.to_string())],
        )
        .await
        .map(|_| ())
    }

    fn amount_to_precision(&self, raw: f64) -> Size {
        Size::from_f64(raw).floor_to_step(self.filters().step_size)
    }

    async fn enter_long(&self, amount: Size, leverage: u32) -> Result<OrderReceipt, VenueError> {
        if !amount.is_positive() {
            return Err(VenueError::Rejected(format!("order size {} below lot step", amount)));
        }
        let tag = client_order_id("MKT");
        log::info!("Entering long {} {} at {}x", amount, self.symbol, leverage);
        let mut params = Map::new();
        params.insert("type".to_string(), json!("MARKET"));
        self.place(params, &tag, OrderSide::Buy, amount)
    }

    async fn exit_long(&self) -> Result<Option<OrderReceipt>, VenueError> {
        let positions = self.fetch_positions().await?;
        let Some(long) = positions.iter().find(|p| p.is_long()) else {
            log::info!("No long position on {} to exit", self.symbol);
            return Ok(None);
        };

        let tag = client_order_id("EXIT");
        let mut params = Map::new();
        params.insert("type".to_string(), json!("MARKET"));
        params.insert("reduceOnly".to_string(), json!(true));
        self.place(params, &tag, OrderSide::Sell, long.size.abs()).map(Some)
    }

    async fn place_stop_loss(&self, amount: Size, price: Price) -> Result<OrderReceipt, VenueError> {
        let tag = client_order_id("SL");
        let params = self.conditional("STOP_MARKET", price);
        self.place(params, &tag, OrderSide::Sell, amount)
    }

    async fn place_take_profit(&self, amount: Size, price: Price) -> Result<OrderReceipt, VenueError> {
        let tag = client_order_id("TP");
        let params = self.conditional("TAKE_PROFIT_MARKET", price);
        let receipt = self.place(params, &tag, OrderSide::Sell, amount)?;
        self.set_active_take_profit(Some(tag));
        Ok(receipt)
    }

    async fn modify_take_profit(&self, amount: Size, new_price: Price) -> Result<OrderReceipt, VenueError> {
        if let Some(previous) = self.set_active_take_profit(None) {
            let mut params = Map::new();
            params.insert("symbol".to_string(), json!(self.symbol));
            params.insert("origClientOrderId".to_string(), json!(previous));
            self.orders
                .send("order.cancel", params)
                .map_err(|e| VenueError::NotConnected(e.to_string()))?;
        }
        self.place_take_profit(amount, new_price).await
    }

    async fn cancel_all_orders(&self) -> Result<(), VenueError> {
        self.signed_request(
            Method::DELETE,
            "/fapi/v1/allOpenOrders",
            &[("symbol", self.symbol.clone())],
        )
        .await?;
        self.set_active_take_profit(None);
        Ok(())
    }

    async fn fetch_ohlcv(&self, limit: usize) -> Result<Vec<Bar>, VenueError> {
        fetch_klines(&self.http_client, &self.rest_url, &self.symbol, &self.timeframe, limit).await
    }
}
