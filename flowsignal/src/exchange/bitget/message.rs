use super::channel::{BitgetArg, BitgetChannel};
use crate::{
    error::SignalError,
    model::{Candle, Side, SubscriptionKey, Trade},
    stream::Frame,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use smol_str::SmolStr;
use std::{fmt::Display, str::FromStr};
use tracing::{debug, warn};

/// Reply to a plain text or JSON `ping` from the server.
pub const PONG_TEXT: &str = "pong";
pub const PONG_JSON: &str = r#"{"op":"pong"}"#;

/// Messages received on the Bitget public WebSocket.
///
/// ### Raw Payload Examples
/// See docs: <https://www.bitget.com/api-doc/contract/websocket/public/New-Trades-Channel>
/// Trade push
/// ```json
/// {
///     "action": "update",
///     "arg": {"instType": "USDT-FUTURES", "channel": "trade", "instId": "BTCUSDT"},
///     "data": [{"ts": "1695716760565", "price": "27000.5", "size": "0.001", "side": "buy", "tradeId": "1"}],
///     "ts": 1695716761589
/// }
/// ```
/// Candle push, rows are `[ts, open, high, low, close, baseVolume, quoteVolume, usdtVolume]`
/// ```json
/// {
///     "action": "snapshot",
///     "arg": {"instType": "USDT-FUTURES", "channel": "candle1m", "instId": "BTCUSDT"},
///     "data": [["1695685500000", "27000", "27000.5", "27000", "27000.5", "0.057", "1539.0155", "1539.0155"]],
///     "ts": 1695715462250
/// }
/// ```
/// Subscription ack
/// ```json
/// {"event": "subscribe", "arg": {"instType": "USDT-FUTURES", "channel": "trade", "instId": "BTCUSDT"}}
/// ```
#[derive(Clone, PartialEq, Debug)]
pub enum BitgetMessage {
    /// `snapshot` is set for the history replayed on (re)subscribe, `action: "snapshot"`.
    Push {
        arg: BitgetArg,
        data: Vec<Value>,
        snapshot: bool,
    },
    Event { event: SmolStr, code: Option<Value>, msg: Option<String> },
    Ping,
}

impl<'de> Deserialize<'de> for BitgetMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        let event = value
            .get("event")
            .or_else(|| value.get("op"))
            .and_then(Value::as_str);

        if event == Some("ping") {
            return Ok(Self::Ping);
        }

        if let Some(event) = event {
            return Ok(Self::Event {
                event: SmolStr::new(event),
                code: value.get("code").cloned(),
                msg: value.get("msg").and_then(Value::as_str).map(str::to_string),
            });
        }

        let arg = value
            .get("arg")
            .cloned()
            .ok_or_else(|| serde::de::Error::missing_field("arg"))
            .and_then(|arg| BitgetArg::deserialize(arg).map_err(serde::de::Error::custom))?;

        let data = match value.get("data") {
            Some(Value::Array(data)) => data.clone(),
            _ => return Err(serde::de::Error::missing_field("data")),
        };

        let snapshot = value.get("action").and_then(Value::as_str) == Some("snapshot");

        Ok(Self::Push {
            arg,
            data,
            snapshot,
        })
    }
}

/// ### Raw Payload Examples
/// ```json
/// {"ts": "1695716760565", "price": "27000.5", "size": "0.001", "side": "buy", "tradeId": "1"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BitgetTrade {
    #[serde(alias = "time", deserialize_with = "de_str")]
    pub ts: i64,
    #[serde(deserialize_with = "de_str")]
    pub price: f64,
    #[serde(alias = "qty", deserialize_with = "de_str")]
    pub size: f64,
    pub side: String,
}

impl BitgetTrade {
    pub fn into_trade(self) -> Result<Trade, SignalError> {
        let side = Side::parse(&self.side)
            .ok_or_else(|| SignalError::MalformedFrame(format!("unknown side: {}", self.side)))?;
        Trade::from_epoch_ms(self.ts, self.price, self.size, side)
    }
}

/// Parse a list of raw trade objects, dropping any record that fails validation.
pub fn parse_trades(data: &[Value]) -> Vec<Trade> {
    data.iter()
        .filter_map(|raw| {
            match BitgetTrade::deserialize(raw)
                .map_err(SignalError::from)
                .and_then(BitgetTrade::into_trade)
            {
                Ok(trade) => Some(trade),
                Err(error) => {
                    debug!(%error, "dropping invalid Bitget trade");
                    None
                }
            }
        })
        .collect()
}

/// Parse one `[ts, open, high, low, close, volume, ...]` row.
pub fn parse_candle_row(row: &Value) -> Result<Candle, SignalError> {
    let fields = row
        .as_array()
        .ok_or_else(|| SignalError::MalformedFrame(format!("candle row is not an array: {row}")))?;

    let field = |index: usize| -> Result<f64, SignalError> {
        fields
            .get(index)
            .and_then(value_as_f64)
            .ok_or_else(|| SignalError::MalformedFrame(format!("candle row field {index}: {row}")))
    };

    let volume = fields.get(5).and_then(value_as_f64).unwrap_or(0.0);

    Candle::from_epoch_ms(
        field(0)? as i64,
        field(1)?,
        field(2)?,
        field(3)?,
        field(4)?,
        volume,
    )
}

/// Parse a list of candle rows, dropping invalid rows and ordering the rest oldest first.
pub fn parse_candles(data: &[Value]) -> Vec<Candle> {
    let mut candles = data
        .iter()
        .filter_map(|row| match parse_candle_row(row) {
            Ok(candle) => Some(candle),
            Err(error) => {
                debug!(%error, "dropping invalid Bitget candle");
                None
            }
        })
        .collect::<Vec<_>>();
    candles.sort_by_key(|candle| candle.open_time);
    candles
}

/// Classify one inbound text frame.
pub fn parse_frame(text: &str) -> Result<Frame, SignalError> {
    let text = text.trim();
    if text == "ping" {
        return Ok(Frame::Ping {
            reply: PONG_TEXT.to_string(),
        });
    }
    if text == "pong" {
        return Ok(Frame::Ignore);
    }

    match serde_json::from_str::<BitgetMessage>(text)? {
        BitgetMessage::Ping => Ok(Frame::Ping {
            reply: PONG_JSON.to_string(),
        }),
        BitgetMessage::Event { event, code, msg } => {
            if event == "error" {
                warn!(?code, ?msg, "Bitget rejected request");
            }
            Ok(Frame::Ignore)
        }
        BitgetMessage::Push {
            arg,
            data,
            snapshot,
        } => {
            if arg.channel == BitgetChannel::TRADES.as_ref() {
                return Ok(Frame::Trades {
                    symbol: arg.inst_id,
                    trades: parse_trades(&data),
                    snapshot,
                });
            }

            match BitgetChannel::candle_timeframe(&arg.channel) {
                Some(timeframe) => Ok(Frame::Candles {
                    key: SubscriptionKey::new(&arg.inst_id, timeframe),
                    candles: parse_candles(&data),
                }),
                None => Ok(Frame::Ignore),
            }
        }
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Deserialize a number that the exchange may encode either as a JSON string or a number.
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => text.parse().map_err(serde::de::Error::custom),
        Value::Number(number) => number.to_string().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
