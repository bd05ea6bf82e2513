use crate::{
    analytics::{build_cvd_and_profile, derive_features, profile_bin_width},
    config::PipelineConfig,
    decision::{Advisor, Advisory, AdvisoryContext, Synthesis, rule_decision},
    display::{DisplaySink, PushError, SignalUpdate},
    error::SignalError,
    exchange::MarketData,
    model::{Candle, SubscriptionKey, Trade},
    store::{AggregateStore, CandleEvent},
    stream::FrameHandler,
};
use chrono::Utc;
use derive_more::Display;
use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::{task::AbortHandle, time::Instant};
use tracing::{debug, info, warn};

/// What started a recomputation pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
pub enum Trigger {
    /// The debounce window after a trade or in-progress candle update elapsed.
    #[display("debounce")]
    Debounce,
    /// The live candle closed. Always pushes, regardless of the minimum push interval.
    #[display("boundary")]
    Boundary,
    /// Out-of-band refresh requested by a consumer.
    #[display("forced")]
    Forced,
}

impl Trigger {
    pub fn enforces_min_interval(&self) -> bool {
        !matches!(self, Trigger::Boundary)
    }
}

/// Result of one recomputation pass. Passes never fail.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The update was fanned out. `removed` targets reported themselves gone.
    Pushed {
        delivered: usize,
        failed: usize,
        removed: usize,
    },
    /// Within the minimum push interval, or overtaken by a newer candle.
    Throttled,
    /// No update could be produced, eg/ insufficient history or market data unavailable.
    Skipped(SignalError),
    /// The subscription is unknown or nobody is interested in it any more.
    Evicted,
}

/// Sequences recomputation passes for every subscription and fans out their results.
///
/// Cheap to clone, every clone shares the same [`AggregateStore`].
pub struct Pipeline<Market, Adv, Sink>
where
    Sink: DisplaySink,
{
    inner: Arc<PipelineInner<Market, Adv, Sink>>,
}

struct PipelineInner<Market, Adv, Sink>
where
    Sink: DisplaySink,
{
    config: PipelineConfig,
    store: AggregateStore<Sink::Target>,
    market: Market,
    advisor: Adv,
    sink: Sink,
}

impl<Market, Adv, Sink> Clone for Pipeline<Market, Adv, Sink>
where
    Sink: DisplaySink,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Market, Adv, Sink> Pipeline<Market, Adv, Sink>
where
    Market: MarketData + 'static,
    Adv: Advisor + 'static,
    Sink: DisplaySink + 'static,
{
    pub fn new(config: PipelineConfig, market: Market, advisor: Adv, sink: Sink) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                store: AggregateStore::new(config.trade_retention),
                config,
                market,
                advisor,
                sink,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &AggregateStore<Sink::Target> {
        &self.inner.store
    }

    /// Idempotently register `target` for `key`. Returns true if it was not registered.
    pub fn register(&self, key: &SubscriptionKey, target: Sink::Target) -> bool {
        self.inner.store.register_target(key, target, Instant::now())
    }

    /// Remove targets of `key` matching `predicate`, returning how many remain.
    pub fn unregister<F>(&self, key: &SubscriptionKey, predicate: F) -> Option<usize>
    where
        F: FnMut(&Sink::Target) -> bool,
    {
        self.inner.store.remove_targets(key, predicate)
    }

    /// Abort every pending timer and drop all subscription state.
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    /// Spawn the debounce timer of `key`. Once it fires it frees the timer slot, then runs a
    /// pass reading whatever is buffered at that moment.
    fn spawn_debounce(&self, key: &SubscriptionKey) -> AbortHandle {
        let pipeline = self.clone();
        let key = key.clone();

        tokio::spawn(async move {
            tokio::time::sleep(pipeline.inner.config.debounce).await;
            pipeline.inner.store.take_timer(&key, tokio::task::id());
            pipeline.run_pass(&key, Trigger::Debounce).await;
        })
        .abort_handle()
    }

    /// Run one recomputation pass for `key`.
    pub async fn run_pass(&self, key: &SubscriptionKey, trigger: Trigger) -> PassOutcome {
        let started = Instant::now();
        let inner = &self.inner;
        let min_interval = inner.config.debounce;

        if !inner.store.contains(key) {
            return PassOutcome::Evicted;
        }
        if trigger.enforces_min_interval() && !inner.store.push_allowed(key, started, min_interval) {
            debug!(%key, %trigger, "pass throttled by minimum push interval");
            return PassOutcome::Throttled;
        }

        let candles = match inner
            .market
            .fetch_candles(&key.symbol, key.timeframe, inner.config.candle_limit)
            .await
        {
            Ok(candles) => candles,
            Err(error) => {
                warn!(%key, %trigger, %error, "candle history unavailable, skipping pass");
                return PassOutcome::Skipped(error);
            }
        };

        if inner.store.buffered_trades(key) == 0 {
            let trades = self.backfill(key).await;
            if !trades.is_empty() {
                debug!(%key, count = trades.len(), "backfilled trade buffer");
                inner.store.backfill_trades(key, trades);
            }
        }

        // Read the freshest state only now, after every slow fetch
        let Some(snapshot) = inner.store.snapshot(key) else {
            return PassOutcome::Evicted;
        };
        if snapshot.targets.is_empty() {
            return PassOutcome::Evicted;
        }

        let candles = merge_live_candle(candles, snapshot.current_candle.as_ref());
        let features = match derive_features(&candles) {
            Ok(features) => features,
            Err(error) => {
                debug!(%key, %trigger, %error, "skipping pass");
                return PassOutcome::Skipped(error);
            }
        };

        let flow = build_cvd_and_profile(
            &snapshot.trades,
            key.timeframe.as_millis(),
            profile_bin_width(features.last),
        );

        let rule = rule_decision(&features, &flow);
        let context = AdvisoryContext {
            key: key.clone(),
            time: Utc::now(),
            features,
            rule: rule.clone(),
            cvd_now: flow.cvd_now(),
            cvd_trend: flow.cvd_trend(),
            top_nodes: flow.top_nodes(inner.config.top_nodes),
        };
        let advisory = self.advise(&context).await;
        let decision = Synthesis::new(rule, advisory).resolve(&features, &flow);

        let update = SignalUpdate {
            key: key.clone(),
            time: context.time,
            features,
            decision,
            cvd_now: context.cvd_now,
            cvd_trend: context.cvd_trend,
            profile_top: context.top_nodes,
        };

        if !inner.store.claim_push(
            key,
            Instant::now(),
            min_interval,
            trigger.enforces_min_interval(),
            snapshot.epoch,
        ) {
            debug!(%key, %trigger, "pass overtaken before fan-out");
            return PassOutcome::Throttled;
        }

        let outcome = self.fan_out(key, &snapshot.targets, &update).await;

        if let PassOutcome::Pushed {
            delivered,
            failed,
            removed,
        } = &outcome
        {
            info!(
                %key,
                %trigger,
                direction = %update.decision.direction,
                confidence = update.decision.confidence,
                source = %update.decision.source,
                delivered,
                failed,
                removed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pushed signal update"
            );
        }

        outcome
    }

    async fn backfill(&self, key: &SubscriptionKey) -> Vec<Trade> {
        let config = &self.inner.config;
        let window = config.backfill_window.max(key.timeframe.duration());
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::minutes(15));

        self.inner
            .market
            .fetch_trades(&key.symbol, start, end, config.backfill_limit)
            .await
    }

    /// Best-effort advisory call bounded by the advisory timeout.
    async fn advise(&self, context: &AdvisoryContext) -> Advisory {
        let timeout = self.inner.config.advisory_timeout;

        match tokio::time::timeout(timeout, self.inner.advisor.advise(context)).await {
            Ok(Some(raw)) => Advisory::parse(raw),
            Ok(None) => Advisory::Absent,
            Err(_) => {
                warn!(key = %context.key, timeout_ms = timeout.as_millis() as u64, "advisory timed out");
                Advisory::Absent
            }
        }
    }

    /// Push `update` to every target concurrently. One failing target never affects another,
    /// targets reporting [`PushError::TargetGone`] are removed.
    async fn fan_out(
        &self,
        key: &SubscriptionKey,
        targets: &[Sink::Target],
        update: &SignalUpdate,
    ) -> PassOutcome {
        let results = join_all(targets.iter().map(|target| async move {
            (target, self.inner.sink.push(target, update).await)
        }))
        .await;

        let (mut delivered, mut failed, mut removed) = (0, 0, 0);
        for (target, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(PushError::TargetGone) => {
                    debug!(%key, ?target, "display target gone, removing");
                    self.inner.store.remove_targets(key, |candidate| candidate == target);
                    removed += 1;
                }
                Err(error) => {
                    warn!(%key, ?target, %error, "failed to push update to display target");
                    failed += 1;
                }
            }
        }

        PassOutcome::Pushed {
            delivered,
            failed,
            removed,
        }
    }
}

impl<Market, Adv, Sink> FrameHandler for Pipeline<Market, Adv, Sink>
where
    Market: MarketData + 'static,
    Adv: Advisor + 'static,
    Sink: DisplaySink + 'static,
{
    fn on_trades(&self, symbol: &str, trades: Vec<Trade>, snapshot: bool) {
        let now = Instant::now();
        for key in self.inner.store.keys_for_symbol(symbol) {
            self.inner.store.record_trades(&key, &trades, snapshot, now, || {
                self.spawn_debounce(&key)
            });
        }
    }

    fn on_candles(&self, key: &SubscriptionKey, candles: Vec<Candle>) {
        let event = self
            .inner
            .store
            .record_candles(key, &candles, Instant::now(), || self.spawn_debounce(key));

        if event == CandleEvent::Stale {
            debug!(%key, "ignoring candle rows older than the live candle");
        }
        if event == CandleEvent::Boundary {
            debug!(%key, "candle closed, running immediate pass");
            let pipeline = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                pipeline.run_pass(&key, Trigger::Boundary).await;
            });
        }
    }

    fn sweep_idle(&self, threshold: Duration) -> Vec<SubscriptionKey> {
        self.inner.store.sweep_idle(Instant::now(), threshold)
    }
}

/// Overlay the live in-progress candle onto a fetched history, replacing the last candle when
/// it has the same open time and appending it when newer.
pub fn merge_live_candle(mut candles: Vec<Candle>, live: Option<&Candle>) -> Vec<Candle> {
    let Some(live) = live else {
        return candles;
    };

    match candles.last_mut() {
        Some(last) if last.open_time == live.open_time => *last = live.clone(),
        Some(last) if last.open_time < live.open_time => candles.push(live.clone()),
        None => candles.push(live.clone()),
        Some(_) => {}
    }
    candles
}
