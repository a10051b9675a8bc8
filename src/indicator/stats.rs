use serde::Serialize;

use crate::model::candle::Candle;

/// Summary figures for the visible series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MarketStats {
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub volume: f64,
    pub change: f64,
    pub change_percent: f64,
}

/// `high`/`low` are taken over closes, not the candle high/low fields.
/// Empty input yields all-zero stats. A zero base price gives a
/// `change_percent` of 0 rather than an infinite or NaN percentage.
pub fn compute_market_stats(candles: &[Candle]) -> MarketStats {
    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        return MarketStats::default();
    };

    let high = candles.iter().map(|c| c.close).fold(f64::NEG_INFINITY, f64::max);
    let low = candles.iter().map(|c| c.close).fold(f64::INFINITY, f64::min);
    let volume = candles.iter().map(|c| c.volume).sum();

    let base = finite(first.close).or_else(|| finite(first.open));
    let change = last.close - base.unwrap_or(0.0);
    let denom = base.unwrap_or(1.0);
    let change_percent = if denom == 0.0 { 0.0 } else { change / denom * 100.0 };

    MarketStats {
        high,
        low,
        open: first.open,
        volume,
        change,
        change_percent,
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}
