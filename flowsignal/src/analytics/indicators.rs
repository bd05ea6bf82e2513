/// Exponential Moving Average (EMA) calculator.
///
/// Seeded with the simple average of the first `period` values, exponential smoothing after.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    /// Smoothing factor (alpha)
    alpha: f64,
    value: Option<f64>,
    count: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            count: 0,
        }
    }

    pub fn update(&mut self, new_value: f64) {
        self.count += 1;

        self.value = match self.value {
            None => Some(new_value),
            Some(current) => {
                if self.count <= self.period {
                    // Simple average until the seed window is full
                    Some((current * (self.count - 1) as f64 + new_value) / self.count as f64)
                } else {
                    Some(self.alpha * new_value + (1.0 - self.alpha) * current)
                }
            }
        };
    }

    /// Current value, `None` until `period` values have been seen.
    pub fn value(&self) -> Option<f64> {
        self.value.filter(|_| self.is_ready())
    }

    pub fn is_ready(&self) -> bool {
        self.count >= self.period
    }
}

/// Relative Strength Index using Wilder's smoothing (factor `1/period`).
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn update(&mut self, new_value: f64) {
        let Some(prev) = self.prev.replace(new_value) else {
            return;
        };

        let change = new_value - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let period = self.period as f64;

        self.changes += 1;
        if self.changes <= self.period {
            self.avg_gain += gain / period;
            self.avg_loss += loss / period;
        } else {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
        }
    }

    /// Current value in `[0, 100]`, `None` until `period` price changes have been seen.
    pub fn value(&self) -> Option<f64> {
        if self.changes < self.period {
            return None;
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let relative_strength = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + relative_strength))
    }
}

/// Final EMA value over `values`, if enough values exist.
pub fn ema_last(values: &[f64], period: usize) -> Option<f64> {
    let mut ema = Ema::new(period);
    values.iter().for_each(|value| ema.update(*value));
    ema.value()
}

/// Final RSI value over `values`, if enough values exist.
pub fn rsi_last(values: &[f64], period: usize) -> Option<f64> {
    let mut rsi = Rsi::new(period);
    values.iter().for_each(|value| rsi.update(*value));
    rsi.value()
}

/// Mean absolute bar-to-bar percentage change over the last `window` returns, or fewer if
/// unavailable. Zero for fewer than two values.
pub fn mean_abs_return(values: &[f64], window: usize) -> f64 {
    let returns = values
        .windows(2)
        .filter(|pair| pair[0] != 0.0)
        .map(|pair| ((pair[1] - pair[0]) / pair[0]).abs())
        .collect::<Vec<_>>();

    let tail = &returns[returns.len().saturating_sub(window)..];
    tail.iter().sum::<f64>() / tail.len().clamp(1, window.max(1)) as f64
}
