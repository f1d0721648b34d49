use crate::core::events::{ContractSpec, OrderReceipt, OrderSide, Position};
use crate::exchanges::error::{BestEffort, VenueError};
use crate::exchanges::json_decimal;
use crate::security::VenueCredentials;
use crate::streaming::signing::{form_encode, hmac_sha256_hex};
use crate::traits::VenueClient;
use crate::types::{Price, Size};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

/// Seconds a signed request stays valid
const EXPIRY_WINDOW_SECS: i64 = 10;

/// BitMEX-style REST client.
///
/// Signature: hex HMAC-SHA256 over `verb + path(?query) + expires + body`,
/// sent with `api-expires` (epoch seconds) and `api-key`.
pub struct BitmexClient {
    credentials: VenueCredentials,
    base_url: String,
    http_client: Client,
}

impl BitmexClient {
    pub fn new(credentials: VenueCredentials, base_url: &str) -> Self {
        Self {
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: Client::new(),
        }
    }

    /// Linear USDT contract for a base asset; BTC trades as `XBT`
    pub fn instrument_for(base: &str) -> String {
        let base = base.to_uppercase();
        let base = if base == "BTC" { "XBT".to_string() } else { base };
        format!("{}USDT", base)
    }

    /// Generate signature for API request
    pub fn sign(&self, verb: &str, path_with_query: &str, expires: i64, body: &str) -> String {
        let message = format!("{}{}{}{}", verb, path_with_query, expires, body);
        hmac_sha256_hex(self.credentials.api_secret.expose(), &message)
    }

    async fn request(&self, method: Method, path_with_query: &str, body: Option<Value>) -> Result<Value, VenueError> {
        let expires = chrono::Utc::now().timestamp() + EXPIRY_WINDOW_SECS;
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let signature = self.sign(method.as_str(), path_with_query, expires, &body);

        let url = format!("{}{}", self.base_url, path_with_query);
        let mut request = self
            .http_client
            .request(method, &url)
            .header("api-expires", expires.to_string())
            .header("api-key", self.credentials.api_key.expose())
            .header("api-signature", signature)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VenueError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VenueError::from_status(status, text));
        }

        response
            .json()
            .await
            .map_err(|e| VenueError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl VenueClient for BitmexClient {
    async fn get_balance(&self) -> Result<Decimal, VenueError> {
        let json = self
            .request(Method::GET, "/api/v1/user/margin?currency=all", None)
            .await?;

        // Margin is reported in micro-USDT
        let balance = json
            .as_array()
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.get("currency").and_then(Value::as_str) == Some("USDt"))
            })
            .and_then(|row| row.get("availableMargin"))
            .and_then(json_decimal)
            .map(|micro| micro / Decimal::from(1_000_000))
            .unwrap_or(Decimal::ZERO);
        Ok(balance)
    }

    async fn get_ticker_and_contract_spec(&self, instrument: &str) -> Result<ContractSpec, VenueError> {
        let path = format!("/api/v1/instrument?symbol={}&count=1&reverse=true", instrument);
        let json = self.request(Method::GET, &path, None).await?;
        let data = json
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| VenueError::ApiError(format!("Ticker for {} not found", instrument)))?;

        let last_price = data
            .get("lastPrice")
            .and_then(json_decimal)
            .ok_or_else(|| VenueError::ParseError("missing lastPrice".to_string()))?;
        let lot_size = data.get("lotSize").and_then(json_decimal).unwrap_or(Decimal::ONE);

        let contract_size = match data
            .get("underlyingToPositionMultiplier")
            .and_then(json_decimal)
            .filter(|m| *m > Decimal::ZERO)
        {
            Some(multiplier) => Decimal::ONE / multiplier,
            None => {
                let multiplier = data
                    .get("multiplier")
                    .and_then(json_decimal)
                    .unwrap_or(Decimal::from(1000));
                multiplier / Decimal::from(1_000_000)
            }
        };

        Ok(ContractSpec {
            last_price: Price::new(last_price),
            contract_size,
            lot_size,
            min_order_size: lot_size,
        })
    }

    async fn set_leverage(&self, instrument: &str, leverage: u32) -> BestEffort<()> {
        let body = json!({ "symbol": instrument, "leverage": leverage.to_string() });
        self.request(Method::POST, "/api/v1/position/leverage", Some(body))
            .await
            .map(|_| ())
    }

    async fn create_market_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Size,
        reduce_only: bool,
    ) -> Result<OrderReceipt, VenueError> {
        // Contracts are whole numbers on this venue
        let contracts = quantity.value().trunc().to_i64().unwrap_or(0);
        if contracts <= 0 {
            return Err(VenueError::Rejected(format!("order size {} below one contract", quantity)));
        }

        let side_str = match side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };
        let mut body = json!({
            "symbol": instrument,
            "side": side_str,
            "orderQty": contracts,
            "ordType": "Market",
        });
        if reduce_only {
            body["execInst"] = json!("ReduceOnly");
        }

        let json = self.request(Method::POST, "/api/v1/order", Some(body)).await?;
        Ok(OrderReceipt {
            venue: "bitmex".to_string(),
            order_id: json.get("orderID").and_then(Value::as_str).map(str::to_string),
            client_order_id: json.get("clOrdID").and_then(Value::as_str).map(str::to_string),
            side,
            quantity: Size::new(Decimal::from(contracts)),
        })
    }

    async fn get_positions(&self, instrument: &str) -> Result<Vec<Position>, VenueError> {
        let filter = json!({ "symbol": instrument }).to_string();
        let path = format!("/api/v1/position?{}", form_encode([("filter", filter.as_str())]));
        let json = self.request(Method::GET, &path, None).await?;

        let rows = json
            .as_array()
            .ok_or_else(|| VenueError::ParseError("position response is not an array".to_string()))?;
        Ok(rows
            .iter()
            .map(|row| Position {
                symbol: row
                    .get("symbol")
                    .and_then(Value::as_str)
                    .unwrap_or(instrument)
                    .to_string(),
                size: Size::new(row.get("currentQty").and_then(json_decimal).unwrap_or(Decimal::ZERO)),
                entry_price: row.get("avgEntryPrice").and_then(json_decimal).map(Price::new),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_naming() {
        assert_eq!(BitmexClient::instrument_for("btc"), "XBTUSDT");
        assert_eq!(BitmexClient::instrument_for("ETH"), "ETHUSDT");
    }

    #[test]
    fn test_signature_covers_verb_path_expiry_body() {
        let client = BitmexClient::new(VenueCredentials::new("key", "secret"), "http://localhost");
        let body = r#"{"symbol":"XBTUSDT"}"#;
        let sig = client.sign("POST", "/api/v1/order", 1_518_064_238, body);
        assert_eq!(
            sig,
            hmac_sha256_hex("secret", r#"POST/api/v1/order1518064238{"symbol":"XBTUSDT"}"#)
        );
        assert_ne!(sig, client.sign("POST", "/api/v1/order", 1_518_064_239, body));
    }
}
