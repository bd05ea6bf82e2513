use crate::{
    error::SignalError,
    model::{Candle, SubscriptionKey, Trade},
};
use smol_str::SmolStr;
use std::time::Duration;

/// Classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Trades of one symbol, applied to every tracked timeframe of that symbol. A `snapshot`
    /// replays recent history sent on (re)subscribe.
    Trades {
        symbol: SmolStr,
        trades: Vec<Trade>,
        snapshot: bool,
    },
    /// Live candle rows for one subscription, oldest first.
    Candles {
        key: SubscriptionKey,
        candles: Vec<Candle>,
    },
    /// Server keep-alive that must be answered immediately with `reply`.
    Ping { reply: String },
    /// Pong, subscription ack or anything else not carrying market data.
    Ignore,
}

/// Exchange specific wire format of the live connection.
///
/// The connection manager owns the socket and the desired subscription set, the adapter only
/// translates between [`SubscriptionKey`]s and text frames.
pub trait StreamAdapter: Send + Sync + 'static {
    /// How often the client sends its own keep-alive, `None` to disable.
    fn ping_interval(&self) -> Option<Duration>;

    /// Client keep-alive frame.
    fn ping(&self) -> String;

    /// Requests subscribing every key in `keys`. Replaying them must be harmless.
    fn subscribe_requests(&self, keys: &[SubscriptionKey]) -> Vec<String>;

    /// Requests that stop the upstream for `evicted`, without touching anything `remaining`
    /// still needs.
    fn unsubscribe_requests(
        &self,
        evicted: &[SubscriptionKey],
        remaining: &[SubscriptionKey],
    ) -> Vec<String>;

    /// Classify one inbound text frame.
    fn parse(&self, text: &str) -> Result<Frame, SignalError>;
}
