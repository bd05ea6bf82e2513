use thiserror::Error;

/// All errors generated in `flowsignal`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("insufficient candle history: required {required}, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("no market data available for {0}")]
    NoData(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    #[error("invalid subscription, expected SYMBOL:TIMEFRAME: {0}")]
    InvalidSubscription(String),

    #[error("invalid url: {0}")]
    Url(String),

    #[error("signal service has stopped")]
    ServiceStopped,
}

impl SignalError {
    /// Determine if an error is transient, ie/ the operation that produced it should simply
    /// be retried or skipped on the next trigger.
    ///
    /// Non-transient errors mean "not enough data yet" or a caller mistake.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            SignalError::Http(_) | SignalError::Socket(_) | SignalError::MalformedFrame(_) => true,
            _ => false,
        }
    }

    /// Determine if an error means a recomputation pass should be skipped until more history
    /// has accumulated.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            SignalError::InsufficientHistory { .. } | SignalError::NoData(_)
        )
    }
}

impl From<reqwest::Error> for SignalError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

impl From<url::ParseError> for SignalError {
    fn from(value: url::ParseError) -> Self {
        Self::Url(value.to_string())
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedFrame(value.to_string())
    }
}
