//! Series indicators consumed by the signal engine.
//!
//! All functions take a full close series and return a series of the same
//! length; `None` marks positions where the indicator is not yet defined.

/// Exponential moving average seeded with the simple mean of the first
/// `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(value);
    for (i, price) in values.iter().enumerate().skip(period) {
        value = alpha * price + (1.0 - alpha) * value;
        out[i] = Some(value);
    }
    out
}

/// Relative strength index with Wilder smoothing.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            gain_sum += change;
        } else {
            loss_sum -= change;
        }
    }
    let w = period as f64;
    let mut avg_gain = gain_sum / w;
    let mut avg_loss = loss_sum / w;
    out[period] = Some(rsi_value(avg_gain, avg_loss));
    for i in (period + 1)..values.len() {
        let change = values[i] - values[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (w - 1.0) + gain) / w;
        avg_loss = (avg_loss * (w - 1.0) + loss) / w;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Indices of local minima: a point no greater than every neighbour within
/// `order` positions. Neighbour indices are clipped at the series edges.
pub fn local_minima(values: &[f64], order: usize) -> Vec<usize> {
    local_extrema(values, order, |a, b| a <= b)
}

/// Indices of local maxima, see [`local_minima`].
pub fn local_maxima(values: &[f64], order: usize) -> Vec<usize> {
    local_extrema(values, order, |a, b| a >= b)
}

fn local_extrema(values: &[f64], order: usize, cmp: impl Fn(f64, f64) -> bool) -> Vec<usize> {
    if values.is_empty() {
        return Vec::new();
    }
    let last = values.len() - 1;
    (0..values.len())
        .filter(|&i| {
            (1..=order).all(|shift| {
                let ahead = (i + shift).min(last);
                let behind = i.saturating_sub(shift);
                cmp(values[i], values[ahead]) && cmp(values[i], values[behind])
            })
        })
        .collect()
}
