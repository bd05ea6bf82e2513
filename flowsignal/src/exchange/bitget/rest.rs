use super::message::{parse_candles, parse_trades};
use crate::{
    cache::TtlCache,
    config::RestConfig,
    error::SignalError,
    exchange::MarketData,
    model::{Candle, Timeframe, Trade},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub const PATH_CANDLES: &str = "/api/v2/mix/market/candles";
pub const PATH_FILLS_HISTORY: &str = "/api/v2/mix/market/fills-history";
pub const PRODUCT_TYPE: &str = "usdt-futures";

/// Maximum rows Bitget returns per request.
pub const MAX_ROWS: usize = 1000;

/// Bitget REST envelope.
///
/// ```json
/// {"code": "00000", "msg": "success", "requestTime": 1695800278693, "data": [...]}
/// ```
#[derive(Debug, Deserialize)]
struct BitgetResponse {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Vec<Value>>,
}

type CandleCacheKey = (SmolStr, Timeframe, usize);

/// Bitget USDT-M futures historical [`MarketData`] client with a short lived candle cache.
#[derive(Debug, Clone)]
pub struct BitgetRest {
    client: Client,
    base_url: Url,
    candle_cache: Arc<TtlCache<CandleCacheKey, Vec<Candle>>>,
}

impl BitgetRest {
    pub fn new(config: &RestConfig) -> Result<Self, SignalError> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(&config.base_url)?,
            candle_cache: Arc::new(TtlCache::new(config.cache_ttl)),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>, SignalError> {
        let url = self.base_url.join(path)?;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<BitgetResponse>()
            .await?;

        response.data.ok_or_else(|| {
            SignalError::Http(format!(
                "{path} returned no data: {}",
                response.msg.unwrap_or_default()
            ))
        })
    }

    async fn request_trades(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trade>, SignalError> {
        let rows = self
            .get(
                PATH_FILLS_HISTORY,
                &[
                    ("symbol", symbol.to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                    ("startTime", start.timestamp_millis().to_string()),
                    ("endTime", end.timestamp_millis().to_string()),
                    ("limit", limit.clamp(1, MAX_ROWS).to_string()),
                ],
            )
            .await?;

        let mut trades = parse_trades(&rows);
        trades.sort_by_key(|trade| trade.time);
        Ok(trades)
    }
}

/// Bitget REST candle granularity of a [`Timeframe`].
pub fn granularity(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 => "1H",
        Timeframe::H4 => "4H",
    }
}

#[async_trait]
impl MarketData for BitgetRest {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, SignalError> {
        let cache_key = (SmolStr::new(symbol), timeframe, limit);
        if let Some(candles) = self.candle_cache.get(&cache_key) {
            return Ok(candles);
        }

        let rows = self
            .get(
                PATH_CANDLES,
                &[
                    ("symbol", symbol.to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                    ("granularity", granularity(timeframe).to_string()),
                    ("limit", limit.clamp(1, MAX_ROWS).to_string()),
                ],
            )
            .await?;

        let candles = parse_candles(&rows);
        if candles.is_empty() {
            return Err(SignalError::NoData(format!("{symbol}:{timeframe}")));
        }

        debug!(%symbol, %timeframe, count = candles.len(), "fetched Bitget candles");
        self.candle_cache.insert(cache_key, candles.clone());
        Ok(candles)
    }

    async fn fetch_trades(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Vec<Trade> {
        match self.request_trades(symbol, start, end, limit).await {
            Ok(trades) => trades,
            Err(error) => {
                warn!(%symbol, %error, "Bitget trade backfill failed, continuing without trades");
                Vec::new()
            }
        }
    }
}
