use super::indicators::{ema_last, mean_abs_return, rsi_last};
use crate::{error::SignalError, model::Candle};
use serde::{Deserialize, Serialize};

/// Minimum number of candles required by [`derive_features`].
pub const MIN_HISTORY: usize = 60;

pub const TREND_FAST_PERIOD: usize = 20;
pub const TREND_SLOW_PERIOD: usize = 50;
pub const MOMENTUM_PERIOD: usize = 14;
pub const VOLATILITY_WINDOW: usize = 50;

/// Scalar features derived from a candle series.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct Features {
    /// Last close.
    pub last: f64,
    /// EMA(20) of closes.
    pub trend_fast: f64,
    /// EMA(50) of closes.
    pub trend_slow: f64,
    /// RSI(14) of closes, in `[0, 100]`.
    pub momentum: f64,
    /// Mean absolute bar-to-bar percentage change over the last 50 returns.
    pub volatility: f64,
}

impl Features {
    /// True if every feature is a finite number.
    pub fn is_finite(&self) -> bool {
        [
            self.last,
            self.trend_fast,
            self.trend_slow,
            self.momentum,
            self.volatility,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}

/// Derive [`Features`] from a time ordered candle series.
///
/// Fails with [`SignalError::InsufficientHistory`] for fewer than [`MIN_HISTORY`] candles.
pub fn derive_features(candles: &[Candle]) -> Result<Features, SignalError> {
    if candles.len() < MIN_HISTORY {
        return Err(SignalError::InsufficientHistory {
            required: MIN_HISTORY,
            actual: candles.len(),
        });
    }

    let closes = candles.iter().map(|candle| candle.close).collect::<Vec<_>>();
    let last = closes.last().copied().unwrap_or(f64::NAN);

    Ok(Features {
        last,
        trend_fast: ema_last(&closes, TREND_FAST_PERIOD).unwrap_or(f64::NAN),
        trend_slow: ema_last(&closes, TREND_SLOW_PERIOD).unwrap_or(f64::NAN),
        momentum: rsi_last(&closes, MOMENTUM_PERIOD).unwrap_or(f64::NAN),
        volatility: mean_abs_return(&closes, VOLATILITY_WINDOW),
    })
}
