use crate::security::SecureApiKey;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, payload: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    mac
}

/// Lowercase hex HMAC-SHA256
pub fn hmac_sha256_hex(secret: &str, payload: &str) -> String {
    let code_bytes = mac(secret, payload).finalize().into_bytes();
    format!("{:x}", code_bytes)
}

/// Standard base64 HMAC-SHA256
pub fn hmac_sha256_base64(secret: &str, payload: &str) -> String {
    let code_bytes = mac(secret, payload).finalize().into_bytes();
    general_purpose::STANDARD.encode(code_bytes)
}

/// `application/x-www-form-urlencoded` query string, pairs kept in order
pub fn form_encode<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut url = reqwest::Url::parse("http://query.local/").expect("static URL is valid");
    url.query_pairs_mut().extend_pairs(pairs);
    url.query().unwrap_or_default().to_string()
}

/// Wire form of a parameter value inside a signed query string
pub fn param_to_string(value: &Value) -> String {
    match value {
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Signs request parameters the way the futures API expects: booleans as
/// `"true"`/`"false"`, `apiKey` and `timestamp` added, keys sorted, then a hex
/// HMAC over the encoded query string appended as `signature`.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    api_key: SecureApiKey,
    api_secret: SecureApiKey,
}

impl RequestSigner {
    pub fn new(api_key: SecureApiKey, api_secret: SecureApiKey) -> Self {
        Self { api_key, api_secret }
    }

    pub fn api_key(&self) -> &SecureApiKey {
        &self.api_key
    }

    /// Signed parameter set for a stream request
    pub fn sign_params(&self, params: &Map<String, Value>, timestamp_ms: i64) -> Map<String, Value> {
        let mut clean: BTreeMap<String, Value> = params
            .iter()
            .map(|(k, v)| match v {
                Value::Bool(b) => (k.clone(), Value::String(b.to_string())),
                other => (k.clone(), other.clone()),
            })
            .collect();
        clean.insert("apiKey".to_string(), Value::String(self.api_key.expose().to_string()));
        clean.insert("timestamp".to_string(), Value::from(timestamp_ms));

        let signature = self.sign_query(&Self::canonical_query(&clean));
        let mut signed: Map<String, Value> = clean.into_iter().collect();
        signed.insert("signature".to_string(), Value::String(signature));
        signed
    }

    /// Hex signature of an already encoded query string (REST calls)
    pub fn sign_query(&self, query: &str) -> String {
        hmac_sha256_hex(self.api_secret.expose(), query)
    }

    /// Encoded query of the key-sorted parameters
    pub fn canonical_query(params: &BTreeMap<String, Value>) -> String {
        let rendered: Vec<(&str, String)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), param_to_string(v)))
            .collect();
        form_encode(rendered.iter().map(|(k, v)| (*k, v.as_str())))
    }
}
