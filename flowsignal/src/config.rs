use crate::decision::chat::{DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL};
use std::{str::FromStr, time::Duration};
use tracing::warn;

pub const DEFAULT_STREAM_URL: &str = "wss://ws.bitget.com/v2/ws/public";
pub const DEFAULT_REST_URL: &str = "https://api.bitget.com";

/// Live connection configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Exchange WebSocket URL
    pub url: String,
    /// Keep-alive ping interval
    pub ping_interval: Duration,
    /// Delay before reconnecting after a drop
    pub reconnect_delay: Duration,
    /// A connection with no inbound frame for this long is treated as dropped
    pub read_timeout: Duration,
    /// How often idle subscriptions are swept
    pub sweep_interval: Duration,
    /// Subscriptions without targets and no activity for this long are evicted
    pub idle_threshold: Duration,
    /// Capacity of the connection command channel
    pub command_buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(10 * 60),
            command_buffer_size: 256,
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `BITGET_WS` and `WS_IDLE_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("BITGET_WS").unwrap_or(defaults.url),
            idle_threshold: env_millis("WS_IDLE_MS", defaults.idle_threshold),
            ..defaults
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }
}

/// Recomputation pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub stream: StreamConfig,
    /// Debounce window, also the minimum interval between two pushes for one subscription
    pub debounce: Duration,
    /// Maximum buffered trades per subscription
    pub trade_retention: usize,
    /// Number of historical candles fetched per pass
    pub candle_limit: usize,
    /// Upper bound on the advisory call
    pub advisory_timeout: Duration,
    /// Maximum trades requested when backfilling an empty buffer
    pub backfill_limit: usize,
    /// Minimum look-back of a trade backfill, widened to the timeframe when longer
    pub backfill_window: Duration,
    /// Number of heaviest profile nodes carried in each update
    pub top_nodes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            debounce: Duration::from_secs(7),
            trade_retention: 15_000,
            candle_limit: 300,
            advisory_timeout: Duration::from_secs(5),
            backfill_limit: 5_000,
            backfill_window: Duration::from_secs(15 * 60),
            top_nodes: 3,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `WS_DEBOUNCE_MS`, `ADVISORY_TIMEOUT_MS` and the
    /// [`StreamConfig::from_env`] variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stream: StreamConfig::from_env(),
            debounce: env_millis("WS_DEBOUNCE_MS", defaults.debounce),
            advisory_timeout: env_millis("ADVISORY_TIMEOUT_MS", defaults.advisory_timeout),
            ..defaults
        }
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_trade_retention(mut self, retention: usize) -> Self {
        self.trade_retention = retention.max(1);
        self
    }

    pub fn with_candle_limit(mut self, limit: usize) -> Self {
        self.candle_limit = limit;
        self
    }

    pub fn with_advisory_timeout(mut self, timeout: Duration) -> Self {
        self.advisory_timeout = timeout;
        self
    }

    pub fn with_backfill_limit(mut self, limit: usize) -> Self {
        self.backfill_limit = limit;
        self
    }
}

/// Historical REST client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    pub base_url: String,
    /// How long fetched candle series are reused
    pub cache_ttl: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REST_URL.to_string(),
            cache_ttl: Duration::from_secs(15),
        }
    }
}

impl RestConfig {
    /// Defaults overridden by `BITGET_BASE` and `CACHE_TTL_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("BITGET_BASE").unwrap_or(defaults.base_url),
            cache_ttl: env_millis("CACHE_TTL_MS", defaults.cache_ttl),
        }
    }
}

/// Chat advisory configuration. Advisory input is disabled without an API key.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl AdvisorConfig {
    /// `None` if `OPENAI_API_KEY` is unset or empty.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())?;

        Some(Self {
            api_key,
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string()),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_CHAT_BASE_URL.to_string()),
        })
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env_parse::<u64>(name)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.debounce, Duration::from_secs(7));
        assert_eq!(config.trade_retention, 15_000);
        assert_eq!(config.candle_limit, 300);
        assert_eq!(config.stream.idle_threshold, Duration::from_secs(600));
        assert_eq!(config.stream.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.stream.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.stream.url, DEFAULT_STREAM_URL);
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::default()
            .with_debounce(Duration::from_millis(50))
            .with_trade_retention(0)
            .with_stream(StreamConfig::new("ws://127.0.0.1:1").with_reconnect_delay(Duration::ZERO));

        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.trade_retention, 1);
        assert_eq!(config.stream.url, "ws://127.0.0.1:1");
        assert_eq!(config.stream.reconnect_delay, Duration::ZERO);
        assert_eq!(config.stream.ping_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_env_millis_falls_back_on_missing_variable() {
        let default = Duration::from_secs(3);
        assert_eq!(env_millis("FLOWSIGNAL_TEST_UNSET_VARIABLE", default), default);
    }
}
