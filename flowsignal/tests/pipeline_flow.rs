use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowsignal::{
    Advisor, Candle, DecisionSource, Direction, DisplaySink, NoAdvisor, PassOutcome, Pipeline,
    PipelineConfig, PushError, Side, SignalError, SignalUpdate, SubscriptionKey, Timeframe, Trade,
    decision::AdvisoryContext, exchange::MarketData, stream::FrameHandler,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};

const DEBOUNCE: Duration = Duration::from_secs(7);

/// Historical client serving a steadily rising candle series.
#[derive(Debug, Clone)]
struct RisingMarket {
    candles: usize,
    trades: Vec<Trade>,
}

impl RisingMarket {
    fn new(candles: usize) -> Self {
        Self {
            candles,
            trades: Vec::new(),
        }
    }
}

#[async_trait]
impl MarketData for RisingMarket {
    async fn fetch_candles(
        &self,
        _: &str,
        timeframe: Timeframe,
        _: usize,
    ) -> Result<Vec<Candle>, SignalError> {
        (0..self.candles)
            .map(|i| {
                let close = 100.0 + i as f64;
                Candle::from_epoch_ms(
                    i as i64 * timeframe.as_millis(),
                    close - 0.5,
                    close + 0.5,
                    close - 1.0,
                    close,
                    10.0,
                )
            })
            .collect()
    }

    async fn fetch_trades(
        &self,
        _: &str,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
        _: usize,
    ) -> Vec<Trade> {
        self.trades.clone()
    }
}

/// Advisor that never answers.
struct SilentAdvisor;

#[async_trait]
impl Advisor for SilentAdvisor {
    async fn advise(&self, _: &AdvisoryContext) -> Option<Value> {
        std::future::pending().await
    }
}

/// Advisor replying with a fixed raw value.
struct FixedAdvisor(Value);

#[async_trait]
impl Advisor for FixedAdvisor {
    async fn advise(&self, _: &AdvisoryContext) -> Option<Value> {
        Some(self.0.clone())
    }
}

/// Sink recording every push. Targets named `gone` or `broken` fail.
#[derive(Debug, Clone, Default)]
struct RecordingSink {
    pushes: Arc<Mutex<Vec<(String, SignalUpdate)>>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.pushes.lock().len()
    }

    fn last(&self) -> Option<SignalUpdate> {
        self.pushes.lock().last().map(|(_, update)| update.clone())
    }

    fn targets(&self) -> Vec<String> {
        self.pushes
            .lock()
            .iter()
            .map(|(target, _)| target.clone())
            .collect()
    }
}

#[async_trait]
impl DisplaySink for RecordingSink {
    type Target = String;

    async fn push(&self, target: &String, update: &SignalUpdate) -> Result<(), PushError> {
        match target.as_str() {
            "gone" => Err(PushError::TargetGone),
            "broken" => Err(PushError::Failed("render error".to_string())),
            _ => {
                self.pushes.lock().push((target.clone(), update.clone()));
                Ok(())
            }
        }
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_debounce(DEBOUNCE)
        .with_advisory_timeout(Duration::from_secs(5))
}

fn key() -> SubscriptionKey {
    SubscriptionKey::new("btcusdt", Timeframe::M15)
}

fn trades(count: usize) -> Vec<Trade> {
    (0..count)
        .map(|i| {
            let side = if i % 3 == 0 { Side::Sell } else { Side::Buy };
            Trade::from_epoch_ms(i as i64 * 1_000, 100.0 + i as f64, 1.0, side).unwrap()
        })
        .collect()
}

fn live_candle(open_time_ms: i64, close: f64) -> Candle {
    Candle::from_epoch_ms(open_time_ms, close, close, close, close, 1.0).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_silent_advisor_falls_back_to_rule_decision() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), SilentAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    let outcome = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;
    assert_eq!(
        outcome,
        PassOutcome::Pushed {
            delivered: 1,
            failed: 0,
            removed: 0
        }
    );

    let update = sink.last().unwrap();
    assert_eq!(update.key, key());
    assert_eq!(update.decision.source, DecisionSource::Rule);
    assert_eq!(update.decision.direction, Direction::Long);
    assert!(update.features.trend_fast > update.features.trend_slow);
}

#[tokio::test]
async fn test_well_formed_advisory_overrides_rule() {
    let advisory = json!({
        "direction": "short",
        "confidence": "81.6",
        "levels": {"entry": 179.0, "stop": 182.0, "take_profit": 170.0},
        "rationale": "Exhaustion at the highs",
        "reasons": ["Divergence on momentum"],
    });
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(
        config(),
        RisingMarket::new(80),
        FixedAdvisor(advisory),
        sink.clone(),
    );
    pipeline.register(&key(), "chat-1".to_string());

    pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;

    let decision = sink.last().unwrap().decision;
    assert_eq!(decision.source, DecisionSource::Hybrid);
    assert_eq!(decision.direction, Direction::Short);
    assert_eq!(decision.confidence, 82);
    assert_eq!(decision.levels.stop, 182.0);
    assert_eq!(decision.rationale, "Exhaustion at the highs");
    assert!(decision.reasons.iter().any(|reason| reason == "Divergence on momentum"));
}

#[tokio::test]
async fn test_malformed_advisory_keeps_rule_values() {
    let advisory = json!({
        "direction": "SHORT",
        "confidence": "very",
        "levels": {"entry": 179.0, "stop": 182.0, "take_profit": 170.0},
    });
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(
        config(),
        RisingMarket::new(80),
        FixedAdvisor(advisory),
        sink.clone(),
    );
    pipeline.register(&key(), "chat-1".to_string());

    pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;

    let decision = sink.last().unwrap().decision;
    assert_eq!(decision.source, DecisionSource::Hybrid);
    assert_eq!(decision.direction, Direction::Long);
    assert_eq!(decision.confidence, 65);
}

#[tokio::test]
async fn test_fan_out_isolates_failing_targets() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());
    for target in ["chat-1", "broken", "gone", "chat-2"] {
        pipeline.register(&key(), target.to_string());
    }

    let outcome = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;

    assert_eq!(
        outcome,
        PassOutcome::Pushed {
            delivered: 2,
            failed: 1,
            removed: 1
        }
    );
    assert_eq!(sink.targets(), vec!["chat-1", "chat-2"]);
    assert_eq!(
        pipeline.store().targets(&key()),
        vec!["chat-1", "broken", "chat-2"]
    );
}

#[tokio::test]
async fn test_insufficient_history_skips_pass() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(59), NoAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    let outcome = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;

    assert_eq!(
        outcome,
        PassOutcome::Skipped(SignalError::InsufficientHistory {
            required: 60,
            actual: 59
        })
    );
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_unknown_or_released_subscription_is_evicted() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());

    let outcome = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;
    assert_eq!(outcome, PassOutcome::Evicted);

    pipeline.register(&key(), "chat-1".to_string());
    assert_eq!(pipeline.unregister(&key(), |target| target == "chat-1"), Some(0));

    let outcome = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;
    assert_eq!(outcome, PassOutcome::Evicted);
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_empty_buffer_is_backfilled() {
    let market = RisingMarket {
        candles: 80,
        trades: trades(5),
    };
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), market, NoAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;

    assert_eq!(pipeline.store().buffered_trades(&key()), 5);
    assert!(sink.last().unwrap().cvd_now != 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_minimum_push_interval_throttles_all_but_boundary() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    let first = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;
    assert!(matches!(first, PassOutcome::Pushed { .. }));

    let forced = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;
    assert_eq!(forced, PassOutcome::Throttled);

    let boundary = pipeline.run_pass(&key(), flowsignal::Trigger::Boundary).await;
    assert!(matches!(boundary, PassOutcome::Pushed { .. }));

    tokio::time::advance(DEBOUNCE).await;
    let forced = pipeline.run_pass(&key(), flowsignal::Trigger::Forced).await;
    assert!(matches!(forced, PassOutcome::Pushed { .. }));

    assert_eq!(sink.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_trade_bursts_are_debounced_into_one_pass() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    for _ in 0..5 {
        pipeline.on_trades("BTCUSDT", trades(4), false);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    assert!(pipeline.store().has_pending_timer(&key()));
    assert_eq!(sink.count(), 0);
    assert_eq!(pipeline.store().buffered_trades(&key()), 20);

    tokio::time::sleep(DEBOUNCE).await;

    assert_eq!(sink.count(), 1);
    assert!(!pipeline.store().has_pending_timer(&key()));

    tokio::time::sleep(DEBOUNCE * 3).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_frames_without_targets_are_ignored() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());

    pipeline.on_trades("BTCUSDT", trades(4), false);
    pipeline.on_candles(&key(), vec![live_candle(0, 100.0)]);

    assert!(!pipeline.store().contains(&key()));
    assert!(!pipeline.store().has_pending_timer(&key()));
}

#[tokio::test(start_paused = true)]
async fn test_candle_boundary_pushes_immediately_and_cancels_debounce() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    let bar = Timeframe::M15.as_millis();
    pipeline.on_candles(&key(), vec![live_candle(80 * bar, 180.0)]);
    assert!(pipeline.store().has_pending_timer(&key()));

    pipeline.on_candles(&key(), vec![live_candle(81 * bar, 181.0)]);
    assert!(!pipeline.store().has_pending_timer(&key()));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.count(), 1);
    assert_eq!(sink.last().unwrap().features.last, 181.0);

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_multi_row_candle_frames_run_at_most_one_boundary_pass() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    let bar = Timeframe::M15.as_millis();
    let rows = |from: i64| {
        (from..from + 5)
            .map(|i| live_candle(i * bar, 100.0 + i as f64))
            .collect::<Vec<_>>()
    };

    // Subscribe snapshot only arms the debounce timer
    pipeline.on_candles(&key(), rows(76));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.count(), 0);
    assert!(pipeline.store().has_pending_timer(&key()));

    // Reconnect snapshot one candle further is a single boundary
    pipeline.on_candles(&key(), rows(77));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.count(), 1);
    assert_eq!(sink.last().unwrap().features.last, 181.0);

    // Late rows of closed candles neither push nor arm a timer
    pipeline.on_candles(&key(), rows(76));
    pipeline.on_candles(&key(), vec![live_candle(79 * bar, 179.0)]);
    assert!(!pipeline.store().has_pending_timer(&key()));

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replayed_trade_snapshot_is_not_double_counted() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());
    pipeline.register(&key(), "chat-1".to_string());

    pipeline.on_trades("BTCUSDT", trades(4), true);
    pipeline.on_trades("BTCUSDT", trades(4), false);
    assert_eq!(pipeline.store().buffered_trades(&key()), 8);

    // History replayed after a reconnect overlaps everything buffered so far
    pipeline.on_trades("BTCUSDT", trades(6), true);
    assert_eq!(pipeline.store().buffered_trades(&key()), 10);

    pipeline.on_trades("BTCUSDT", trades(6), true);
    assert_eq!(pipeline.store().buffered_trades(&key()), 10);

    tokio::time::sleep(DEBOUNCE).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_sweep_releases_only_untargeted_subscriptions() {
    let sink = RecordingSink::default();
    let pipeline = Pipeline::new(config(), RisingMarket::new(80), NoAdvisor, sink.clone());
    let watched = SubscriptionKey::new("ETHUSDT", Timeframe::H1);
    pipeline.register(&key(), "chat-1".to_string());
    pipeline.register(&watched, "chat-2".to_string());

    pipeline.on_trades("BTCUSDT", trades(4), false);
    pipeline.unregister(&key(), |_| true);
    assert!(!pipeline.store().has_pending_timer(&key()));

    tokio::time::advance(Duration::from_secs(601)).await;
    let evicted = pipeline.sweep_idle(Duration::from_secs(600));

    assert_eq!(evicted, vec![key()]);
    assert!(pipeline.store().contains(&watched));
    assert_eq!(sink.count(), 0);
}
