use serde::Serialize;

/// One decoded last-traded-price update from the live feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub ltp: f64,
    pub change_abs: f64,
    pub change_pct: f64,
    pub timestamp_ms: u64,
    pub volume: Option<f64>,
}

impl Tick {
    /// Tick carrying only a price, used where the feed metadata is irrelevant.
    pub fn from_price(ltp: f64, timestamp_ms: u64) -> Self {
        Self {
            ltp,
            change_abs: 0.0,
            change_pct: 0.0,
            timestamp_ms,
            volume: None,
        }
    }
}
