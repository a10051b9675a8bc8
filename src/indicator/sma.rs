use crate::model::candle::Candle;

/// Simple Moving Average using a ring buffer for O(1) push.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    buffer: Vec<f64>,
    head: usize,
    count: usize,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "SMA period must be > 0");
        Self {
            period,
            buffer: vec![0.0; period],
            head: 0,
            count: 0,
            sum: 0.0,
        }
    }

    /// Push a new value, return the current SMA if enough data.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.count >= self.period {
            self.sum -= self.buffer[self.head];
        }
        self.buffer[self.head] = value;
        self.sum += value;
        self.head = (self.head + 1) % self.period;
        if self.count < self.period {
            self.count += 1;
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.count >= self.period {
            Some(self.sum / self.period as f64)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|v| *v = 0.0);
        self.head = 0;
        self.count = 0;
        self.sum = 0.0;
    }

    pub fn is_ready(&self) -> bool {
        self.count >= self.period
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

/// One-shot SMA of candle closes, aligned index-for-index with `series`.
pub fn compute_sma(series: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut sma = Sma::new(period);
    series.iter().map(|c| sma.push(c.close)).collect()
}

/// Same as [`compute_sma`] over raw values.
pub fn sma_values(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut sma = Sma::new(period);
    values.iter().map(|v| sma.push(*v)).collect()
}

/// SMA kept aligned with a growing candle series.
///
/// Appends are O(1). When a suffix of the series changes, [`SmaSeries::rewind`]
/// rebuilds only from the first changed index by replaying the preceding
/// `period - 1` closes into a fresh accumulator.
#[derive(Debug, Clone)]
pub struct SmaSeries {
    sma: Sma,
    values: Vec<Option<f64>>,
}

impl SmaSeries {
    pub fn new(period: usize) -> Self {
        Self {
            sma: Sma::new(period),
            values: Vec::new(),
        }
    }

    pub fn period(&self) -> usize {
        self.sma.period()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn append(&mut self, candle: &Candle) {
        let v = self.sma.push(candle.close);
        self.values.push(v);
    }

    /// Full recompute after the whole series was replaced.
    pub fn reset(&mut self, series: &[Candle]) {
        self.sma.reset();
        self.values.clear();
        self.values.reserve(series.len());
        for candle in series {
            self.append(candle);
        }
    }

    /// Recompute every value from `from` onwards against the current `series`.
    pub fn rewind(&mut self, series: &[Candle], from: usize) {
        let from = from.min(series.len()).min(self.values.len());
        let warmup_start = from.saturating_sub(self.period() - 1);
        self.sma.reset();
        for candle in &series[warmup_start..from] {
            self.sma.push(candle.close);
        }
        self.values.truncate(from);
        for candle in &series[from..] {
            self.append(candle);
        }
    }
}
