/// Flowsignal - live market data aggregation and signal synthesis
///
/// One multiplexed exchange WebSocket feeds an [`AggregateStore`] keyed by
/// `SYMBOL:TIMEFRAME`. Bursty trade and candle frames are debounced into recomputation
/// passes which derive candle features, cumulative volume delta and a volume-at-price
/// profile, synthesise a rule decision optionally refined by an advisory service, and fan
/// the result out to every registered display target.
///
/// The crate includes:
/// - Core data model and error taxonomy
/// - Connection manager with resubscribe, keep-alive and idle sweep
/// - Analytics and decision synthesis
/// - Bitget stream adapter and REST client, plus a chat completion advisor
pub mod analytics;
pub mod cache;
pub mod config;
pub mod decision;
pub mod display;
pub mod error;
pub mod exchange;
pub mod model;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod stream;

// Re-export commonly used types for convenience
pub use config::{AdvisorConfig, PipelineConfig, RestConfig, StreamConfig};
pub use decision::{Advisor, Decision, DecisionSource, Direction, NoAdvisor};
pub use display::{DisplaySink, PushError, SignalUpdate};
pub use error::SignalError;
pub use model::{Candle, Side, SubscriptionKey, Timeframe, Trade};
pub use pipeline::{PassOutcome, Pipeline, Trigger};
pub use service::SignalService;
pub use store::AggregateStore;
pub use stream::{ConnectionManager, ConnectionStatus};
