use serde::Serialize;

use super::ema::ema_values;
use super::rsi::rsi_values;
use super::sma::sma_values;
use crate::model::candle::Candle;

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;

/// Candle plus the studies attached to it for the recommendation payload.
#[derive(Debug, Clone, Serialize)]
pub struct StudyRow {
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
}

/// Annotate the whole series. Studies are computed over the full input so
/// a caller that keeps only the tail still gets warmed-up values.
pub fn annotate(candles: &[Candle]) -> Vec<StudyRow> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let sma_20 = sma_values(&closes, 20);
    let sma_50 = sma_values(&closes, 50);
    let ema_12 = ema_values(&closes, MACD_FAST);
    let ema_26 = ema_values(&closes, MACD_SLOW);
    let rsi = rsi_values(&closes, RSI_PERIOD);
    let macd: Vec<Option<f64>> = ema_12
        .iter()
        .zip(&ema_26)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let macd_line: Vec<f64> = macd.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    let macd_signal = ema_values(&macd_line, MACD_SIGNAL);

    candles
        .iter()
        .enumerate()
        .map(|(i, c)| StudyRow {
            time: format_open_time(c.open_time),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            sma_20: sma_20[i],
            sma_50: sma_50[i],
            ema_12: ema_12[i],
            ema_26: ema_26[i],
            rsi: rsi[i],
            macd: macd[i],
            macd_signal: macd_signal[i],
        })
        .collect()
}

fn format_open_time(open_time_ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(open_time_ms as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| open_time_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_align_with_input() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let p = 100.0 + (i as f64).sin();
                Candle::historical(i * 86_400_000, p, p, p, p, 1.0)
            })
            .collect();
        let rows = annotate(&candles);
        assert_eq!(rows.len(), 60);
        assert!(rows[18].sma_20.is_none());
        assert!(rows[19].sma_20.is_some());
        assert!(rows[48].sma_50.is_none());
        assert!(rows[49].sma_50.is_some());
        assert!(rows[0].ema_12.is_some());
        assert!(rows.iter().all(|r| r.macd.is_some() && r.macd_signal.is_some()));
        assert_eq!(rows[0].time, "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn macd_is_zero_on_flat_series() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| Candle::historical(i, 5.0, 5.0, 5.0, 5.0, 0.0))
            .collect();
        let rows = annotate(&candles);
        assert!(rows.iter().all(|r| r.macd.unwrap().abs() < 1e-12));
    }
}
