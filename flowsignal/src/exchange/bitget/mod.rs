use self::channel::{BitgetArg, BitgetChannel};
use crate::{
    error::SignalError,
    model::SubscriptionKey,
    stream::{Frame, StreamAdapter},
};
use fnv::FnvHashSet;
use itertools::Itertools;
use serde_json::json;
use std::time::Duration;

/// Translates a [`SubscriptionKey`] into Bitget channels.
pub mod channel;

/// Inbound frame types and parsing.
pub mod message;

/// REST historical [`MarketData`](crate::exchange::MarketData) client.
pub mod rest;

pub use rest::BitgetRest;

/// Bitget public WebSocket base url.
///
/// See docs: <https://www.bitget.com/api-doc/common/websocket-intro>
pub const BASE_URL_BITGET: &str = "wss://ws.bitget.com/v2/ws/public";

/// Bitget expects a client `ping` at least every 30 seconds.
pub const PING_INTERVAL_BITGET: Duration = Duration::from_secs(30);

/// Maximum channels per subscribe request.
pub const MAX_ARGS_PER_REQUEST: usize = 50;

/// Bitget USDT-M futures [`StreamAdapter`].
///
/// Every key needs its candle channel, every symbol shares one trade channel.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Bitget;

impl Bitget {
    fn requests(op: &str, args: Vec<BitgetArg>) -> Vec<String> {
        let chunks = args.into_iter().unique().chunks(MAX_ARGS_PER_REQUEST);

        let requests = chunks
            .into_iter()
            .map(|chunk| {
                json!({
                    "op": op,
                    "args": chunk.collect::<Vec<_>>(),
                })
                .to_string()
            })
            .collect();
        requests
    }
}

impl StreamAdapter for Bitget {
    fn ping_interval(&self) -> Option<Duration> {
        Some(PING_INTERVAL_BITGET)
    }

    fn ping(&self) -> String {
        "ping".to_string()
    }

    fn subscribe_requests(&self, keys: &[SubscriptionKey]) -> Vec<String> {
        let args = keys
            .iter()
            .flat_map(|key| {
                [
                    BitgetArg::new(BitgetChannel::candle(key.timeframe), &key.symbol),
                    BitgetArg::new(BitgetChannel::TRADES, &key.symbol),
                ]
            })
            .collect();

        Self::requests("subscribe", args)
    }

    fn unsubscribe_requests(
        &self,
        evicted: &[SubscriptionKey],
        remaining: &[SubscriptionKey],
    ) -> Vec<String> {
        let remaining_symbols = remaining
            .iter()
            .map(|key| key.symbol.as_str())
            .collect::<FnvHashSet<_>>();

        let candles = evicted
            .iter()
            .filter(|key| !remaining.contains(key))
            .map(|key| BitgetArg::new(BitgetChannel::candle(key.timeframe), &key.symbol));

        let trades = evicted
            .iter()
            .filter(|key| !remaining_symbols.contains(key.symbol.as_str()))
            .map(|key| BitgetArg::new(BitgetChannel::TRADES, &key.symbol));

        Self::requests("unsubscribe", candles.chain(trades).collect())
    }

    fn parse(&self, text: &str) -> Result<Frame, SignalError> {
        message::parse_frame(text)
    }
}
