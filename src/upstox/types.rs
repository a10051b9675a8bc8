use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Accept a JSON number or numeric string; null or absent becomes `None`.
pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("invalid number")),
        _ => Err(serde::de::Error::custom("invalid numeric value")),
    }
}

/// Like [`opt_f64`], but anything that is not a finite number becomes
/// `None` instead of failing the surrounding record.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
    .filter(|x| x.is_finite()))
}

pub fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    })
}

/// Market data feed frame. Records are kept raw so one malformed record
/// does not reject its siblings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEnvelope {
    #[serde(default)]
    pub feeds: HashMap<String, Value>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub current_ts: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    #[serde(default)]
    pub full_feed: Option<FullFeed>,
}

#[derive(Debug, Deserialize)]
pub struct FullFeed {
    #[serde(rename = "indexFF", default)]
    pub index_ff: Option<FeedBody>,
    #[serde(rename = "marketFF", default)]
    pub market_ff: Option<FeedBody>,
}

#[derive(Debug, Deserialize)]
pub struct FeedBody {
    #[serde(default)]
    pub ltpc: Option<Ltpc>,
}

/// Last traded price block of a feed record.
#[derive(Debug, Deserialize)]
pub struct Ltpc {
    #[serde(default, deserialize_with = "opt_f64")]
    pub ltp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub chp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub ltt: Option<u64>,
}

/// `GET /v3/historical-candle/...` response body.
#[derive(Debug, Deserialize)]
pub struct HistoricalCandleResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<HistoricalCandleData>,
}

#[derive(Debug, Deserialize)]
pub struct HistoricalCandleData {
    /// Rows of `[time, open, high, low, close, volume, oi]`.
    #[serde(default)]
    pub candles: Option<Vec<Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
pub struct UpstoxErrorResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<UpstoxErrorItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstoxErrorItem {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UpstoxErrorResponse {
    pub fn summary(&self) -> Option<String> {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| {
                format!(
                    "{}: {}",
                    e.error_code.as_deref().unwrap_or("error"),
                    e.message.as_deref().unwrap_or("")
                )
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}
