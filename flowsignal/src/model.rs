/// Core data types for subscriptions, trades and candles
///
/// Every inbound trade and candle is validated on construction, so downstream analytics can
/// assume finite prices and sizes.
use crate::error::SignalError;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{str::FromStr, time::Duration};

/// Candle interval of a tracked stream.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Deserialize, Serialize,
)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    #[display("1m")]
    M1,
    #[serde(rename = "5m")]
    #[display("5m")]
    M5,
    #[serde(rename = "15m")]
    #[display("15m")]
    M15,
    #[serde(rename = "1h")]
    #[display("1h")]
    H1,
    #[serde(rename = "4h")]
    #[display("4h")]
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
    ];

    /// Bar width in minutes.
    pub fn minutes(&self) -> u64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
        }
    }

    /// Bar width, also used as the CVD bucket width.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.minutes() * 60)
    }

    pub fn as_millis(&self) -> i64 {
        (self.minutes() * 60_000) as i64
    }
}

impl FromStr for Timeframe {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" | "1H" => Ok(Timeframe::H1),
            "4h" | "4H" => Ok(Timeframe::H4),
            other => Err(SignalError::UnsupportedTimeframe(other.to_string())),
        }
    }
}

/// Identifies one tracked (symbol, timeframe) stream, eg/ `BTCUSDT:15m`.
///
/// The sole lookup key into the [`AggregateStore`](crate::store::AggregateStore).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Deserialize, Serialize,
)]
#[display("{symbol}:{timeframe}")]
pub struct SubscriptionKey {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
}

impl SubscriptionKey {
    /// Symbols are normalised to upper case.
    pub fn new(symbol: impl AsRef<str>, timeframe: Timeframe) -> Self {
        Self {
            symbol: SmolStr::new(symbol.as_ref().trim().to_ascii_uppercase()),
            timeframe,
        }
    }
}

impl FromStr for SubscriptionKey {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, timeframe) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| SignalError::InvalidSubscription(s.to_string()))?;

        if symbol.is_empty() {
            return Err(SignalError::InvalidSubscription(s.to_string()));
        }

        Ok(Self::new(symbol, timeframe.parse()?))
    }
}

/// Aggressor side of a trade.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse an exchange side string, ignoring case. Unknown values yield `None`.
    pub fn parse(side: &str) -> Option<Self> {
        if side.eq_ignore_ascii_case("buy") {
            Some(Side::Buy)
        } else if side.eq_ignore_ascii_case("sell") {
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single trade execution.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Trade {
    pub time: DateTime<Utc>,
    /// Execution price, always finite and > 0
    pub price: f64,
    /// Trade size in base units, always finite and >= 0
    pub size: f64,
    pub side: Side,
}

impl Trade {
    /// Validate and construct a [`Trade`]. Size is taken as an absolute value.
    pub fn new(time: DateTime<Utc>, price: f64, size: f64, side: Side) -> Result<Self, SignalError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(SignalError::MalformedFrame(format!(
                "trade price must be finite and positive, got {price}"
            )));
        }
        if !size.is_finite() {
            return Err(SignalError::MalformedFrame(format!(
                "trade size must be finite, got {size}"
            )));
        }

        Ok(Self {
            time,
            price,
            size: size.abs(),
            side,
        })
    }

    /// Construct from an epoch millisecond timestamp.
    pub fn from_epoch_ms(ms: i64, price: f64, size: f64, side: Side) -> Result<Self, SignalError> {
        let time = DateTime::from_timestamp_millis(ms).ok_or_else(|| {
            SignalError::MalformedFrame(format!("trade timestamp out of range: {ms}"))
        })?;
        Self::new(time, price, size, side)
    }
}

/// OHLCV bar, either historical (closed) or the live in-progress candle.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Validate and construct a [`Candle`] from an epoch millisecond open time.
    pub fn from_epoch_ms(
        open_time_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, SignalError> {
        if ![open, high, low, close].iter().all(|value| value.is_finite()) {
            return Err(SignalError::MalformedFrame(format!(
                "candle at {open_time_ms} has non-finite prices"
            )));
        }

        let open_time = DateTime::from_timestamp_millis(open_time_ms).ok_or_else(|| {
            SignalError::MalformedFrame(format!("candle open time out of range: {open_time_ms}"))
        })?;

        Ok(Self {
            open_time,
            open,
            high,
            low,
            close,
            volume: if volume.is_finite() { volume } else { 0.0 },
        })
    }
}
