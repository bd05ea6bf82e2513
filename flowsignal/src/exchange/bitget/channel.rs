use crate::model::Timeframe;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Type that defines how to translate a [`SubscriptionKey`](crate::model::SubscriptionKey)
/// into a Bitget channel to be subscribed to.
///
/// See docs: <https://www.bitget.com/api-doc/contract/websocket/public/Candlesticks-Channel>
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct BitgetChannel(pub &'static str);

impl BitgetChannel {
    /// Real-time public trades channel name.
    ///
    /// See docs: <https://www.bitget.com/api-doc/contract/websocket/public/New-Trades-Channel>
    pub const TRADES: Self = Self("trade");

    pub const CANDLE_1M: Self = Self("candle1m");
    pub const CANDLE_5M: Self = Self("candle5m");
    pub const CANDLE_15M: Self = Self("candle15m");
    pub const CANDLE_1H: Self = Self("candle1H");
    pub const CANDLE_4H: Self = Self("candle4H");

    /// Candlestick channel of a [`Timeframe`].
    pub fn candle(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::M1 => Self::CANDLE_1M,
            Timeframe::M5 => Self::CANDLE_5M,
            Timeframe::M15 => Self::CANDLE_15M,
            Timeframe::H1 => Self::CANDLE_1H,
            Timeframe::H4 => Self::CANDLE_4H,
        }
    }

    /// [`Timeframe`] of a candlestick channel name, `None` for any other channel.
    pub fn candle_timeframe(channel: &str) -> Option<Timeframe> {
        Timeframe::ALL
            .into_iter()
            .find(|timeframe| Self::candle(*timeframe).as_ref() == channel)
    }
}

impl AsRef<str> for BitgetChannel {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// Bitget instrument type for USDT margined perpetual futures.
pub const INST_TYPE_USDT_FUTURES: &str = "USDT-FUTURES";

/// One entry of a subscribe / unsubscribe `args` list, echoed back as `arg` on every push.
///
/// ```json
/// {"instType": "USDT-FUTURES", "channel": "candle15m", "instId": "BTCUSDT"}
/// ```
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub struct BitgetArg {
    #[serde(rename = "instType")]
    pub inst_type: SmolStr,
    pub channel: SmolStr,
    #[serde(rename = "instId")]
    pub inst_id: SmolStr,
}

impl BitgetArg {
    pub fn new(channel: BitgetChannel, symbol: &str) -> Self {
        Self {
            inst_type: SmolStr::new_static(INST_TYPE_USDT_FUTURES),
            channel: SmolStr::new_static(channel.0),
            inst_id: SmolStr::new(symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_channel_round_trip() {
        for timeframe in Timeframe::ALL {
            let channel = BitgetChannel::candle(timeframe);
            assert_eq!(BitgetChannel::candle_timeframe(channel.as_ref()), Some(timeframe));
        }
        assert_eq!(BitgetChannel::candle_timeframe("trade"), None);
        assert_eq!(BitgetChannel::candle_timeframe("candle1h"), None);
    }

    #[test]
    fn test_arg_serialises_exchange_field_names() {
        let arg = BitgetArg::new(BitgetChannel::CANDLE_15M, "BTCUSDT");
        assert_eq!(
            serde_json::to_value(&arg).unwrap(),
            serde_json::json!({"instType": "USDT-FUTURES", "channel": "candle15m", "instId": "BTCUSDT"})
        );
    }
}
