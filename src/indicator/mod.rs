pub mod ema;
pub mod rsi;
pub mod sma;
pub mod stats;
pub mod studies;

use serde::Serialize;

use crate::aggregator::SeriesChange;
use crate::model::candle::Candle;
use sma::SmaSeries;

pub use sma::compute_sma;
pub use stats::{compute_market_stats, MarketStats};

pub const DEFAULT_SMA_PERIOD: usize = 20;

/// Derived views of the merged series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    /// Aligned with the merged series; `None` during warm-up.
    pub sma20: Vec<Option<f64>>,
    pub stats: MarketStats,
}

/// Keeps the moving average and summary stats in step with the aggregator.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    sma: SmaSeries,
    stats: MarketStats,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SMA_PERIOD)
    }
}

impl IndicatorEngine {
    pub fn new(sma_period: usize) -> Self {
        Self {
            sma: SmaSeries::new(sma_period),
            stats: MarketStats::default(),
        }
    }

    /// Fold one aggregator mutation. `series` is the merged series after it.
    pub fn apply(&mut self, change: SeriesChange, series: &[Candle]) {
        match change {
            SeriesChange::Replaced => self.sma.reset(series),
            SeriesChange::Appended => match series.last() {
                Some(last) if self.sma.values().len() + 1 == series.len() => self.sma.append(last),
                _ => self.sma.reset(series),
            },
            SeriesChange::Rebuilt { from } => self.sma.rewind(series, from),
        }
        self.stats = compute_market_stats(series);
    }

    pub fn snapshot(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            sma20: self.sma.values().to_vec(),
            stats: self.stats,
        }
    }
}
