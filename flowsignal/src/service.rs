use crate::{
    config::PipelineConfig,
    decision::Advisor,
    display::DisplaySink,
    error::SignalError,
    exchange::MarketData,
    model::{SubscriptionKey, Timeframe},
    pipeline::{PassOutcome, Pipeline, Trigger},
    stream::{ConnectionManager, ConnectionStatus, StreamAdapter},
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Produced capability of the core: subscription management and forced refreshes.
///
/// Owns the [`Pipeline`] and the single [`ConnectionManager`] feeding it.
pub struct SignalService<Market, Adv, Sink>
where
    Sink: DisplaySink,
{
    pipeline: Pipeline<Market, Adv, Sink>,
    connection: ConnectionManager,
}

impl<Market, Adv, Sink> SignalService<Market, Adv, Sink>
where
    Market: MarketData + 'static,
    Adv: Advisor + 'static,
    Sink: DisplaySink + 'static,
{
    /// Construct the pipeline and spawn the live connection.
    pub fn new<Adapter>(
        config: PipelineConfig,
        adapter: Adapter,
        market: Market,
        advisor: Adv,
        sink: Sink,
    ) -> Self
    where
        Adapter: StreamAdapter,
    {
        let stream = config.stream.clone();
        let pipeline = Pipeline::new(config, market, advisor, sink);
        let connection = ConnectionManager::spawn(stream, adapter, Arc::new(pipeline.clone()));

        Self {
            pipeline,
            connection,
        }
    }

    /// Idempotently register `target` for `symbol` and `timeframe`.
    pub async fn subscribe(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        target: Sink::Target,
    ) -> Result<SubscriptionKey, SignalError> {
        let key = SubscriptionKey::new(symbol, timeframe);
        if key.symbol.is_empty() {
            return Err(SignalError::InvalidSubscription(format!(":{timeframe}")));
        }

        if self.pipeline.register(&key, target) {
            info!(%key, targets = self.pipeline.store().targets(&key).len(), "registered display target");
        }
        self.connection.subscribe(key.clone()).await?;
        Ok(key)
    }

    /// Idempotently remove `target`. Returns the number of remaining targets, or `None` if the
    /// subscription is unknown.
    ///
    /// Removing the last target drops the key from the set replayed on reconnect. Its live
    /// channels are closed by the idle sweep.
    pub async fn unsubscribe(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        target: &Sink::Target,
    ) -> Option<usize> {
        let key = SubscriptionKey::new(symbol, timeframe);
        self.unsubscribe_where(&key, |candidate| candidate == target)
            .await
    }

    /// Remove every target of `key` matching `predicate`.
    pub async fn unsubscribe_where<F>(&self, key: &SubscriptionKey, predicate: F) -> Option<usize>
    where
        F: FnMut(&Sink::Target) -> bool,
    {
        let remaining = self.pipeline.unregister(key, predicate);
        if remaining == Some(0) {
            info!(%key, "no display targets left, releasing subscription");
            if let Err(error) = self.connection.release(key.clone()).await {
                warn!(%key, %error, "failed to release subscription");
            }
        }
        remaining
    }

    /// Run an out-of-band pass, subject to the minimum push interval.
    pub async fn force_refresh(&self, symbol: &str, timeframe: Timeframe) -> PassOutcome {
        let key = SubscriptionKey::new(symbol, timeframe);
        self.pipeline.run_pass(&key, Trigger::Forced).await
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.pipeline.store().keys()
    }

    pub fn pipeline(&self) -> &Pipeline<Market, Adv, Sink> {
        &self.pipeline
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.status_receiver()
    }

    /// Close the live connection, then cancel every pending timer and drop all state.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
        self.pipeline.clear();
        info!("signal service stopped");
    }
}
