use std::collections::VecDeque;

use crate::model::candle::{Candle, CandleOrigin};
use crate::model::tick::Tick;

pub const DEFAULT_TICK_BUFFER_CAPACITY: usize = 200;

/// How the merged series changed after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesChange {
    /// Historical base swapped; the whole series is new.
    Replaced,
    /// One synthetic candle appended at the end.
    Appended,
    /// Elements from `from` onwards changed (tail eviction re-anchored the
    /// first synthetic candle).
    Rebuilt { from: usize },
}

/// Historical candles followed by a tick-derived synthetic tail.
///
/// Historical candles always precede synthetic ones. The tail holds one
/// candle per buffered tick; when the tick buffer overflows, the oldest tick
/// and its candle are dropped and the new first synthetic candle is
/// re-anchored on the last historical close.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    capacity: usize,
    historical: Vec<Candle>,
    ticks: VecDeque<Tick>,
    synthetic: VecDeque<Candle>,
    generation: u64,
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_BUFFER_CAPACITY)
    }
}

impl CandleAggregator {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "tick buffer capacity must be > 0");
        Self {
            capacity,
            historical: Vec::new(),
            ticks: VecDeque::with_capacity(capacity + 1),
            synthetic: VecDeque::with_capacity(capacity + 1),
            generation: 0,
        }
    }

    /// Swap in a freshly fetched historical set and drop the synthetic tail.
    pub fn replace_historical(&mut self, mut candles: Vec<Candle>) -> SeriesChange {
        candles.sort_by_key(|c| c.open_time);
        for c in &mut candles {
            c.origin = CandleOrigin::Historical;
        }
        self.historical = candles;
        self.ticks.clear();
        self.synthetic.clear();
        self.generation += 1;
        SeriesChange::Replaced
    }

    pub fn push_tick(&mut self, tick: Tick) -> SeriesChange {
        let open = self
            .synthetic
            .back()
            .map(|c| c.close)
            .or_else(|| self.anchor_close())
            .unwrap_or(tick.ltp);
        let open_time = self
            .last_open_time()
            .map_or(tick.timestamp_ms, |t| t.max(tick.timestamp_ms));
        self.synthetic.push_back(Candle::synthetic(open, &tick, open_time));
        self.ticks.push_back(tick);

        if self.ticks.len() <= self.capacity {
            return SeriesChange::Appended;
        }

        self.ticks.pop_front();
        self.synthetic.pop_front();
        let anchor = self.anchor_close();
        if let Some(front) = self.synthetic.front_mut() {
            let open = anchor.unwrap_or(front.close);
            front.reopen(open);
        }
        SeriesChange::Rebuilt {
            from: self.historical.len(),
        }
    }

    pub fn merged_series(&self) -> Vec<Candle> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.historical.iter().cloned());
        out.extend(self.synthetic.iter().cloned());
        out
    }

    pub fn historical(&self) -> &[Candle] {
        &self.historical
    }

    pub fn synthetic(&self) -> &VecDeque<Candle> {
        &self.synthetic
    }

    pub fn ticks(&self) -> &VecDeque<Tick> {
        &self.ticks
    }

    pub fn last_tick(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    pub fn len(&self) -> usize {
        self.historical.len() + self.synthetic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bumped on every historical replacement.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_price(&self) -> Option<f64> {
        self.synthetic
            .back()
            .map(|c| c.close)
            .or_else(|| self.anchor_close())
    }

    fn anchor_close(&self) -> Option<f64> {
        self.historical.last().map(|c| c.close)
    }

    fn last_open_time(&self) -> Option<u64> {
        self.synthetic
            .back()
            .or_else(|| self.historical.last())
            .map(|c| c.open_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::historical(i as u64 * 1_000, *c, *c, *c, *c, 1.0))
            .collect()
    }

    #[test]
    fn synthetic_tail_follows_historical_close() {
        let mut agg = CandleAggregator::default();
        agg.replace_historical(hist(&[100.0, 102.0, 101.0, 105.0, 110.0]));
        assert_eq!(agg.push_tick(Tick::from_price(111.0, 10_000)), SeriesChange::Appended);
        agg.push_tick(Tick::from_price(109.0, 11_000));

        let merged = agg.merged_series();
        assert_eq!(merged.len(), 7);
        assert!((merged[5].open - 110.0).abs() < f64::EPSILON);
        assert!((merged[5].close - 111.0).abs() < f64::EPSILON);
        assert!((merged[6].open - 111.0).abs() < f64::EPSILON);
        assert!((merged[6].close - 109.0).abs() < f64::EPSILON);
        assert!((merged[6].high - 111.0).abs() < f64::EPSILON);
        assert!((merged[6].low - 109.0).abs() < f64::EPSILON);
    }

    #[test]
    fn replace_clears_tail_and_bumps_generation() {
        let mut agg = CandleAggregator::default();
        agg.replace_historical(hist(&[1.0, 2.0]));
        agg.push_tick(Tick::from_price(3.0, 5_000));
        let gen = agg.generation();
        agg.replace_historical(hist(&[4.0]));
        assert_eq!(agg.len(), 1);
        assert!(agg.ticks().is_empty());
        assert_eq!(agg.generation(), gen + 1);
    }

    #[test]
    fn eviction_reanchors_first_synthetic_candle() {
        let mut agg = CandleAggregator::new(3);
        agg.replace_historical(hist(&[50.0]));
        for (i, p) in [51.0, 52.0, 53.0].iter().enumerate() {
            agg.push_tick(Tick::from_price(*p, 10_000 + i as u64));
        }
        let change = agg.push_tick(Tick::from_price(54.0, 20_000));
        assert_eq!(change, SeriesChange::Rebuilt { from: 1 });

        let merged = agg.merged_series();
        assert_eq!(merged.len(), 4);
        assert!((merged[1].open - 50.0).abs() < f64::EPSILON);
        assert!((merged[1].close - 52.0).abs() < f64::EPSILON);
        assert!((merged[1].low - 50.0).abs() < f64::EPSILON);
        assert!((merged[3].close - 54.0).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_order_tick_time_is_clamped() {
        let mut agg = CandleAggregator::default();
        agg.replace_historical(hist(&[1.0, 2.0, 3.0]));
        agg.push_tick(Tick::from_price(4.0, 500));
        let merged = agg.merged_series();
        assert!(merged.windows(2).all(|w| w[0].open_time <= w[1].open_time));
    }

    #[test]
    fn ticks_without_history_open_on_themselves() {
        let mut agg = CandleAggregator::default();
        agg.push_tick(Tick::from_price(10.0, 1));
        agg.push_tick(Tick::from_price(12.0, 2));
        let merged = agg.merged_series();
        assert!((merged[0].open - 10.0).abs() < f64::EPSILON);
        assert!((merged[1].open - 10.0).abs() < f64::EPSILON);
        assert_eq!(agg.last_price(), Some(12.0));
    }
}
