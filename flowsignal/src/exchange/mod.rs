use crate::{
    error::SignalError,
    model::{Candle, Timeframe, Trade},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Bitget USDT-M futures live stream adapter and REST historical client.
pub mod bitget;

/// Historical market data consumed by every recomputation pass.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent `limit` candles, oldest first.
    ///
    /// Fails with a transient error when no data is available.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, SignalError>;

    /// Trades executed within `[start, end]`.
    ///
    /// Never fails: any error yields an empty list so a pass can proceed with reduced
    /// confidence.
    async fn fetch_trades(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Vec<Trade>;
}
