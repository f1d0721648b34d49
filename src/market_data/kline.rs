use crate::core::events::Bar;
use serde::Deserialize;
use serde_json::Value;

/// Kline push message: `{"e":"kline", "k":{...}}`
#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    k: Option<KlinePayload>,
}

/// Numeric fields arrive as strings
#[derive(Debug, Deserialize)]
struct KlinePayload {
    t: i64,
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
    #[serde(default)]
    x: bool,
}

/// A decoded kline update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KlineUpdate {
    pub bar: Bar,
    /// Exchange marked the bar closed
    pub closed: bool,
}

/// Decode a kline stream message.
///
/// Returns `None` for messages without a kline payload (subscription acks,
/// other event types) and for malformed payloads.
pub fn parse_kline_message(text: &str) -> Option<KlineUpdate> {
    let mut bytes = text.as_bytes().to_vec();
    let envelope: KlineEnvelope = match simd_json::serde::from_slice(&mut bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            log::debug!("Dropping undecodable kline message: {}", e);
            return None;
        }
    };
    let k = envelope.k?;

    let field = |name: &str, raw: &str| -> Option<f64> {
        match raw.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                log::debug!("Invalid kline field {}: {:?}", name, raw);
                None
            }
        }
    };

    Some(KlineUpdate {
        bar: Bar {
            open_time: k.t,
            open: field("o", &k.o)?,
            high: field("h", &k.h)?,
            low: field("l", &k.l)?,
            close: field("c", &k.c)?,
            volume: field("v", &k.v)?,
        },
        closed: k.x,
    })
}

/// Decode the REST kline array: `[[openTime, "o", "h", "l", "c", "v", ...], ...]`
pub fn parse_rest_klines(json: &Value) -> Result<Vec<Bar>, String> {
    let rows = json
        .as_array()
        .ok_or_else(|| "kline response is not an array".to_string())?;

    rows.iter()
        .map(|row| {
            let cells = row
                .as_array()
                .filter(|c| c.len() >= 6)
                .ok_or_else(|| format!("malformed kline row: {}", row))?;
            let num = |i: usize| -> Result<f64, String> {
                match &cells[i] {
                    Value::String(s) => s.parse::<f64>().map_err(|e| e.to_string()),
                    Value::Number(n) => n.as_f64().ok_or_else(|| "non-finite number".to_string()),
                    other => Err(format!("unexpected kline cell {}", other)),
                }
            };
            let open_time = cells[0]
                .as_i64()
                .ok_or_else(|| format!("missing open time in {}", row))?;
            Ok(Bar::new(open_time, num(1)?, num(2)?, num(3)?, num(4)?, num(5)?))
        })
        .collect()
}
