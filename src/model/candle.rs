use serde::Serialize;

use super::tick::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleOrigin {
    Historical,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub open_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub origin: CandleOrigin,
}

impl Candle {
    pub fn historical(open_time: u64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            origin: CandleOrigin::Historical,
        }
    }

    /// Build a tick-derived candle that opens at `open` and closes at the tick price.
    pub fn synthetic(open: f64, tick: &Tick, open_time: u64) -> Self {
        Self {
            open_time,
            open,
            high: open.max(tick.ltp),
            low: open.min(tick.ltp),
            close: tick.ltp,
            volume: tick.volume.unwrap_or(0.0),
            origin: CandleOrigin::Synthetic,
        }
    }

    /// Re-anchor a synthetic candle to a new open, keeping its close.
    pub fn reopen(&mut self, open: f64) {
        self.open = open;
        self.high = open.max(self.close);
        self.low = open.min(self.close);
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin == CandleOrigin::Synthetic
    }
}
