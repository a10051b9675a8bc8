use super::sma::sma_values;

const LOSS_EPSILON: f64 = 1e-12;

/// Relative strength over rolling means of gains and losses.
///
/// The first element has no predecessor and counts as a zero move, so the
/// first value appears at index `period - 1`.
pub fn rsi_values(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());
    for (i, close) in closes.iter().enumerate() {
        let delta = if i == 0 { 0.0 } else { close - closes[i - 1] };
        gains.push(delta.max(0.0));
        losses.push((-delta).max(0.0));
    }
    let avg_gain = sma_values(&gains, period);
    let avg_loss = sma_values(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) => {
                let rs = g / (l + LOSS_EPSILON);
                Some(100.0 - 100.0 / (1.0 + rs))
            }
            _ => None,
        })
        .collect()
}
