//! REST clients against a local mock server
//!
//! Every signed request is checked by recomputing its signature from what
//! actually arrived on the wire.

use mirror_trader::core::events::OrderSide;
use mirror_trader::exchanges::{BinanceFuturesClient, BitmexClient, OkxClient, VenueError};
use mirror_trader::monitoring::LogNotifier;
use mirror_trader::security::{SecureApiKey, VenueCredentials};
use mirror_trader::streaming::signing::{hmac_sha256_base64, hmac_sha256_hex};
use mirror_trader::streaming::{RequestSigner, StreamEndpoint, StreamSession};
use mirror_trader::traits::{MasterExecution, VenueClient};
use mirror_trader::types::Size;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

fn path_with_query(request: &Request) -> String {
    match request.url.query() {
        Some(query) => format!("{}?{}", request.url.path(), query),
        None => request.url.path().to_string(),
    }
}

/// `api-signature == hex(HMAC(verb + path + expires + body))`
struct BitmexSigned(&'static str);

impl Match for BitmexSigned {
    fn matches(&self, request: &Request) -> bool {
        let (Some(expires), Some(signature)) = (header_str(request, "api-expires"), header_str(request, "api-signature"))
        else {
            return false;
        };
        let payload = format!(
            "{}{}{}{}",
            request.method.as_str(),
            path_with_query(request),
            expires,
            String::from_utf8_lossy(&request.body)
        );
        signature == hmac_sha256_hex(self.0, &payload)
    }
}

/// `OK-ACCESS-SIGN == base64(HMAC(timestamp + verb + path + body))`
struct OkxSigned(&'static str);

impl Match for OkxSigned {
    fn matches(&self, request: &Request) -> bool {
        let (Some(timestamp), Some(signature)) =
            (header_str(request, "OK-ACCESS-TIMESTAMP"), header_str(request, "OK-ACCESS-SIGN"))
        else {
            return false;
        };
        let payload = format!(
            "{}{}{}{}",
            timestamp,
            request.method.as_str(),
            path_with_query(request),
            String::from_utf8_lossy(&request.body)
        );
        signature == hmac_sha256_base64(self.0, &payload)
    }
}

/// `signature` is the hex HMAC of everything before it in the query
struct BinanceSigned(&'static str);

impl Match for BinanceSigned {
    fn matches(&self, request: &Request) -> bool {
        let Some((query, signature)) = request.url.query().and_then(|q| q.rsplit_once("&signature=")) else {
            return false;
        };
        query.contains("timestamp=") && signature == hmac_sha256_hex(self.0, query)
    }
}

fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}

fn bitmex(server: &MockServer) -> BitmexClient {
    BitmexClient::new(VenueCredentials::new("bm-key", "bm-secret"), &server.uri())
}

fn okx(server: &MockServer) -> OkxClient {
    OkxClient::new(
        VenueCredentials::new("okx-key", "okx-secret").with_passphrase("okx-pass"),
        &server.uri(),
        true,
    )
}

fn binance(server: &MockServer) -> BinanceFuturesClient {
    let orders = Arc::new(StreamSession::new(
        "orders",
        StreamEndpoint::Fixed("ws://127.0.0.1:1".to_string()),
        Duration::from_secs(5),
        Arc::new(LogNotifier),
    ));
    BinanceFuturesClient::new(
        "BTCUSDT",
        "4h",
        &server.uri(),
        RequestSigner::new(SecureApiKey::new("bn-key"), SecureApiKey::new("bn-secret")),
        orders,
    )
}

#[tokio::test]
async fn test_bitmex_balance_signed_and_scaled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/margin"))
        .and(query_param("currency", "all"))
        .and(header("api-key", "bm-key"))
        .and(BitmexSigned("bm-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "currency": "XBt", "availableMargin": 1000 },
            { "currency": "USDt", "availableMargin": 250_500_000 }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let balance = bitmex(&server).get_balance().await.unwrap();
    assert_eq!(balance, dec("250.5"));
}

#[tokio::test]
async fn test_bitmex_contract_spec_from_multiplier() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/instrument"))
        .and(query_param("symbol", "XBTUSDT"))
        .and(BitmexSigned("bm-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "symbol": "XBTUSDT",
            "lastPrice": 65000.5,
            "lotSize": 1000,
            "underlyingToPositionMultiplier": 1000000
        }])))
        .mount(&server)
        .await;

    let spec = bitmex(&server).get_ticker_and_contract_spec("XBTUSDT").await.unwrap();
    assert_eq!(spec.last_price.value(), dec("65000.5"));
    assert_eq!(spec.contract_size, dec("0.000001"));
    assert_eq!(spec.lot_size, dec("1000"));
    assert_eq!(spec.min_order_size, dec("1000"));
}

#[tokio::test]
async fn test_bitmex_reduce_only_order_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order"))
        .and(BitmexSigned("bm-secret"))
        .and(body_partial_json(json!({
            "symbol": "XBTUSDT",
            "side": "Sell",
            "orderQty": 3000,
            "ordType": "Market",
            "execInst": "ReduceOnly"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "orderID": "bm-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = bitmex(&server)
        .create_market_order("XBTUSDT", OrderSide::Sell, Size::new(dec("3000.7")), true)
        .await
        .unwrap();
    assert_eq!(receipt.order_id.as_deref(), Some("bm-1"));
    assert_eq!(receipt.quantity, Size::new(dec("3000")));
}

/// Fractions of a contract never reach the venue
#[tokio::test]
async fn test_bitmex_sub_contract_order_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/order"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = bitmex(&server)
        .create_market_order("XBTUSDT", OrderSide::Buy, Size::new(dec("0.4")), false)
        .await;
    assert!(matches!(result, Err(VenueError::Rejected(_))));
}

#[tokio::test]
async fn test_bitmex_unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/margin"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid signature"))
        .mount(&server)
        .await;

    let result = bitmex(&server).get_balance().await;
    assert!(matches!(result, Err(VenueError::AuthenticationError(_))));
}

#[tokio::test]
async fn test_okx_balance_with_demo_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/balance"))
        .and(query_param("ccy", "USDT"))
        .and(header("OK-ACCESS-KEY", "okx-key"))
        .and(header("OK-ACCESS-PASSPHRASE", "okx-pass"))
        .and(header("x-simulated-trading", "1"))
        .and(header_exists("OK-ACCESS-TIMESTAMP"))
        .and(OkxSigned("okx-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "0",
            "data": [{ "details": [
                { "ccy": "BTC", "availEq": "0.1" },
                { "ccy": "USDT", "availEq": "1234.5" }
            ]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(okx(&server).get_balance().await.unwrap(), dec("1234.5"));
}

#[tokio::test]
async fn test_okx_contract_spec_from_ticker_and_instrument() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/market/ticker"))
        .and(query_param("instId", "BTC-USDT-SWAP"))
        .and(OkxSigned("okx-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "0",
            "data": [{ "instId": "BTC-USDT-SWAP", "last": "64000.1" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v5/public/instruments"))
        .and(query_param("instType", "SWAP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "0",
            "data": [{ "instId": "BTC-USDT-SWAP", "ctVal": "0.01", "lotSz": "0.1", "minSz": "0.1" }]
        })))
        .mount(&server)
        .await;

    let spec = okx(&server).get_ticker_and_contract_spec("BTC-USDT-SWAP").await.unwrap();
    assert_eq!(spec.last_price.value(), dec("64000.1"));
    assert_eq!(spec.contract_size, dec("0.01"));
    assert_eq!(spec.lot_size, dec("0.1"));

    // 1000 USDT, 99%, 3x at 640.001 per contract: 4.64 -> 4.6
    let raw = spec.raw_quantity(dec("1000"), dec("99"), 3);
    assert_eq!(spec.normalize_quantity(raw), Some(Size::new(dec("4.6"))));
    // 1 USDT is not enough for the 0.1 minimum
    assert_eq!(spec.normalize_quantity(spec.raw_quantity(dec("1"), dec("99"), 1)), None);
}

#[tokio::test]
async fn test_okx_nonzero_code_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/positions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "50113",
            "msg": "Invalid Sign",
            "data": []
        })))
        .mount(&server)
        .await;

    let result = okx(&server).get_positions("BTC-USDT-SWAP").await;
    assert!(matches!(result, Err(VenueError::ApiError(msg)) if msg.contains("50113")));
}

#[tokio::test]
async fn test_okx_order_rejection_and_reduce_only_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v5/trade/order"))
        .and(OkxSigned("okx-secret"))
        .and(body_partial_json(json!({
            "instId": "BTC-USDT-SWAP",
            "side": "sell",
            "ordType": "market",
            "tdMode": "cross",
            "reduceOnly": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "0",
            "data": [{ "ordId": "", "clOrdId": "", "sCode": "51008", "sMsg": "Insufficient balance" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = okx(&server)
        .create_market_order("BTC-USDT-SWAP", OrderSide::Sell, Size::new(dec("2.5")), true)
        .await;
    assert!(matches!(result, Err(VenueError::Rejected(msg)) if msg.starts_with("51008")));
}

#[tokio::test]
async fn test_okx_positions_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/positions"))
        .and(query_param("instId", "BTC-USDT-SWAP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "0",
            "data": [{ "instId": "BTC-USDT-SWAP", "pos": "4.6", "avgPx": "63000" }]
        })))
        .mount(&server)
        .await;

    let positions = okx(&server).get_positions("BTC-USDT-SWAP").await.unwrap();
    assert_eq!(positions.len(), 1);
    assert!(positions[0].is_long());
    assert_eq!(positions[0].size, Size::new(dec("4.6")));
}

#[tokio::test]
async fn test_binance_load_markets_sets_precision() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/exchangeInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "symbols": [
                { "symbol": "ETHUSDT", "filters": [{ "filterType": "LOT_SIZE", "stepSize": "0.001" }] },
                { "symbol": "BTCUSDT", "filters": [
                    { "filterType": "PRICE_FILTER", "tickSize": "0.10" },
                    { "filterType": "LOT_SIZE", "stepSize": "0.010" }
                ]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = binance(&server);
    client.load_markets().await.unwrap();
    assert_eq!(client.amount_to_precision(1.239), Size::new(dec("1.23")));
    assert_eq!(client.filters().tick_size, dec("0.1"));
}

#[tokio::test]
async fn test_binance_unknown_symbol_fails_load() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/exchangeInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "symbols": [] })))
        .mount(&server)
        .await;

    assert!(matches!(binance(&server).load_markets().await, Err(VenueError::ApiError(_))));
}

#[tokio::test]
async fn test_binance_signed_balance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v2/account"))
        .and(header("X-MBX-APIKEY", "bn-key"))
        .and(BinanceSigned("bn-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "availableBalance": "1500.25",
            "positions": [
                { "symbol": "ETHUSDT", "positionAmt": "3.0", "entryPrice": "3000" },
                { "symbol": "BTCUSDT", "positionAmt": "0.500", "entryPrice": "60000.0" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let account = binance(&server).fetch_balance().await.unwrap();
    assert_eq!(account.available_balance, 1500.25);
    assert_eq!(account.positions.len(), 1);
    assert!(account.in_long());
    assert_eq!(account.long_size(), Size::new(dec("0.5")));
}

#[tokio::test]
async fn test_binance_cancel_all_is_signed_delete() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/fapi/v1/allOpenOrders"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(BinanceSigned("bn-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 200, "msg": "success" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = binance(&server);
    client.cancel_all_orders().await.unwrap();
    assert_eq!(client.active_take_profit(), None);
}

#[tokio::test]
async fn test_binance_history_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/klines"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("interval", "4h"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            [1700000000000i64, "100.0", "110.0", "95.0", "105.0", "12.5", 1700014399999i64, "0", 10, "0", "0", "0"],
            [1700014400000i64, "105.0", "108.0", "101.0", "107.0", "8.0", 1700028799999i64, "0", 7, "0", "0", "0"]
        ])))
        .mount(&server)
        .await;

    let bars = binance(&server).fetch_ohlcv(2).await.unwrap();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[1].open_time, 1_700_014_400_000);
    assert_eq!(bars[0].close, 105.0);
}

#[tokio::test]
async fn test_binance_exit_when_flat_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v2/positionRisk"))
        .and(BinanceSigned("bn-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "symbol": "BTCUSDT", "positionAmt": "0.000", "entryPrice": "0.0" }
        ])))
        .mount(&server)
        .await;

    assert_eq!(binance(&server).exit_long().await.unwrap(), None);
}
