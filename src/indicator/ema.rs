/// Recursive Exponential Moving Average seeded with the first observation,
/// `ema_t = alpha * x_t + (1 - alpha) * ema_{t-1}` with `alpha = 2 / (span + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    span: usize,
    alpha: f64,
    ema: Option<f64>,
}

impl Ema {
    pub fn new(span: usize) -> Self {
        assert!(span > 0, "EMA span must be > 0");
        Self {
            span,
            alpha: 2.0 / (span as f64 + 1.0),
            ema: None,
        }
    }

    /// Push a new value and return the updated EMA. Non-finite inputs leave
    /// the average untouched.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return self.ema;
        }
        self.ema = Some(match self.ema {
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
            None => value,
        });
        self.ema
    }

    pub fn value(&self) -> Option<f64> {
        self.ema
    }

    pub fn span(&self) -> usize {
        self.span
    }
}

pub fn ema_values(values: &[f64], span: usize) -> Vec<Option<f64>> {
    let mut ema = Ema::new(span);
    values.iter().map(|v| ema.push(*v)).collect()
}
