use crate::core::events::{ContractSpec, OrderReceipt, OrderSide, Position};
use crate::exchanges::error::{BestEffort, VenueError};
use crate::exchanges::json_decimal;
use crate::security::VenueCredentials;
use crate::streaming::signing::hmac_sha256_base64;
use crate::traits::VenueClient;
use crate::types::{Price, Size};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde_json::{json, Value};

/// OKX-style REST client for USDT perpetual swaps.
///
/// Signature: base64 HMAC-SHA256 over `timestamp + verb + path + body`, with
/// an ISO-8601 millisecond timestamp and a passphrase header.
pub struct OkxClient {
    credentials: VenueCredentials,
    base_url: String,
    /// Adds `x-simulated-trading: 1` (demo trading)
    simulated: bool,
    http_client: Client,
}

impl OkxClient {
    pub fn new(credentials: VenueCredentials, base_url: &str, simulated: bool) -> Self {
        Self {
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            simulated,
            http_client: Client::new(),
        }
    }

    pub fn instrument_for(base: &str) -> String {
        format!("{}-USDT-SWAP", base.to_uppercase())
    }

    /// `2024-01-01T00:00:00.000Z`
    pub fn timestamp() -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    /// Generate signature for API request
    pub fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let message = format!("{}{}{}{}", timestamp, method, request_path, body);
        hmac_sha256_base64(self.credentials.api_secret.expose(), &message)
    }

    /// Send a signed request and return its `data` array
    async fn request(&self, method: Method, request_path: &str, body: Option<Value>) -> Result<Value, VenueError> {
        let timestamp = Self::timestamp();
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let signature = self.sign(&timestamp, method.as_str(), request_path, &body);
        let passphrase = self
            .credentials
            .passphrase
            .as_ref()
            .map(|p| p.expose().to_string())
            .unwrap_or_default();

        let url = format!("{}{}", self.base_url, request_path);
        let mut request = self
            .http_client
            .request(method, &url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("OK-ACCESS-KEY", self.credentials.api_key.expose())
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", passphrase);
        if self.simulated {
            request = request.header("x-simulated-trading", "1");
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VenueError::NetworkError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| VenueError::NetworkError(e.to_string()))?;
        if !status.is_success() {
            return Err(VenueError::from_status(status, text));
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| VenueError::ParseError(e.to_string()))?;
        // Errors come back with HTTP 200 and a non-zero code
        let code = match json.get("code") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "0".to_string(),
        };
        if code != "0" {
            return Err(VenueError::ApiError(format!("OKX code {}: {}", code, text)));
        }

        Ok(json.get("data").cloned().unwrap_or_else(|| json!([])))
    }

    fn first_row<'a>(data: &'a Value, what: &str) -> Result<&'a Value, VenueError> {
        data.as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| VenueError::ParseError(format!("empty {} response", what)))
    }

    fn decimal_field(row: &Value, key: &str) -> Result<Decimal, VenueError> {
        row.get(key)
            .and_then(json_decimal)
            .ok_or_else(|| VenueError::ParseError(format!("missing {}", key)))
    }
}

#[async_trait]
impl VenueClient for OkxClient {
    async fn get_balance(&self) -> Result<Decimal, VenueError> {
        let data = self
            .request(Method::GET, "/api/v5/account/balance?ccy=USDT", None)
            .await?;

        let balance = data
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("details"))
            .and_then(Value::as_array)
            .and_then(|details| {
                details
                    .iter()
                    .find(|d| d.get("ccy").and_then(Value::as_str) == Some("USDT"))
            })
            .and_then(|d| d.get("availEq"))
            .and_then(json_decimal)
            .unwrap_or(Decimal::ZERO);
        Ok(balance)
    }

    async fn get_ticker_and_contract_spec(&self, instrument: &str) -> Result<ContractSpec, VenueError> {
        let ticker = self
            .request(Method::GET, &format!("/api/v5/market/ticker?instId={}", instrument), None)
            .await?;
        let last_price = Self::decimal_field(Self::first_row(&ticker, "ticker")?, "last")?;

        let instruments = self
            .request(
                Method::GET,
                &format!("/api/v5/public/instruments?instType=SWAP&instId={}", instrument),
                None,
            )
            .await?;
        let spec = Self::first_row(&instruments, "instrument")?;

        Ok(ContractSpec {
            last_price: Price::new(last_price),
            contract_size: Self::decimal_field(spec, "ctVal")?,
            lot_size: Self::decimal_field(spec, "lotSz")?,
            min_order_size: Self::decimal_field(spec, "minSz")?,
        })
    }

    async fn set_leverage(&self, instrument: &str, leverage: u32) -> BestEffort<()> {
        let body = json!({ "instId": instrument, "lever": leverage.to_string(), "mgnMode": "cross" });
        self.request(Method::POST, "/api/v5/account/set-leverage", Some(body))
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
        let side_str = match side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let mut body = json!({
            "instId": instrument,
            "tdMode": "cross",
            "side": side_str,
            "ordType": "market",
            "sz": quantity.to_string(),
        });
        if reduce_only {
            body["reduceOnly"] = json!(true);
        }

        let data = self.request(Method::POST, "/api/v5/trade/order", Some(body)).await?;
        let row = Self::first_row(&data, "order")?;
        if let Some(s_code) = row.get("sCode").and_then(Value::as_str) {
            if s_code != "0" {
                let msg = row.get("sMsg").and_then(Value::as_str).unwrap_or_default();
                return Err(VenueError::Rejected(format!("{}: {}", s_code, msg)));
            }
        }

        Ok(OrderReceipt {
            venue: "okx".to_string(),
            order_id: row.get("ordId").and_then(Value::as_str).map(str::to_string),
            client_order_id: row
                .get("clOrdId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            side,
            quantity,
        })
    }

    async fn get_positions(&self, instrument: &str) -> Result<Vec<Position>, VenueError> {
        let data = self
            .request(Method::GET, &format!("/api/v5/account/positions?instId={}", instrument), None)
            .await?;

        Ok(data
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| Position {
                        symbol: row
                            .get("instId")
                            .and_then(Value::as_str)
                            .unwrap_or(instrument)
                            .to_string(),
                        size: Size::new(row.get("pos").and_then(json_decimal).unwrap_or(Decimal::ZERO)),
                        entry_price: row.get("avgPx").and_then(json_decimal).map(Price::new),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn prepare(&self, _instrument: &str) -> BestEffort<()> {
        self.request(
            Method::POST,
            "/api/v5/account/set-position-mode",
            Some(json!({ "posMode": "net_mode" })),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_naming() {
        assert_eq!(OkxClient::instrument_for("eth"), "ETH-USDT-SWAP");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = OkxClient::timestamp();
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn test_signature_is_base64_of_concatenation() {
        let client = OkxClient::new(
            VenueCredentials::new("key", "secret").with_passphrase("pass"),
            "http://localhost",
            true,
        );
        let ts = "2024-03-01T12:00:00.123Z";
        let sig = client.sign(ts, "GET", "/api/v5/account/balance?ccy=USDT", "");
        assert_eq!(
            sig,
            hmac_sha256_base64("secret", "2024-03-01T12:00:00.123ZGET/api/v5/account/balance?ccy=USDT")
        );
    }
}
