use async_trait::async_trait;
use flowsignal::{
    AdvisorConfig, DisplaySink, PassOutcome, PipelineConfig, PushError, RestConfig, SignalService,
    SignalUpdate, SubscriptionKey,
    decision::chat::ChatAdvisor,
    exchange::bitget::{Bitget, BitgetRest},
};
use itertools::Itertools;
use tracing::{error, info, warn};

/// Subscriptions used when `FLOWSIGNAL_SUBSCRIPTIONS` is unset.
const DEFAULT_SUBSCRIPTIONS: &str = "BTCUSDT:15m";

/// Display target every configured subscription is pushed to.
const LOG_TARGET: &str = "log";

/// Display sink rendering every update as a log line.
#[derive(Debug, Clone, Copy, Default)]
struct LogSink;

#[async_trait]
impl DisplaySink for LogSink {
    type Target = String;

    async fn push(&self, target: &String, update: &SignalUpdate) -> Result<(), PushError> {
        let levels = &update.decision.levels;

        info!(
            target_name = %target,
            time = %update.time.format("%Y-%m-%d %H:%M:%S UTC"),
            entry = %format!("{:.2}", levels.entry),
            stop = %format!("{:.2}", levels.stop),
            take_profit = %format!("{:.2}", levels.take_profit),
            cvd = %format!("{:.2}", update.cvd_now),
            cvd_trend = ?update.cvd_trend,
            profile = %update.profile_summary(),
            "{}",
            update.headline()
        );
        info!(
            "  {} | {} | {}",
            update.decision.rationale,
            update.decision.reasons.iter().join("; "),
            update.decision.risk_note
        );

        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting flowsignal server");

    let config = PipelineConfig::from_env();
    info!(
        url = %config.stream.url,
        debounce_ms = config.debounce.as_millis() as u64,
        idle_ms = config.stream.idle_threshold.as_millis() as u64,
        "pipeline configuration"
    );

    let market = match BitgetRest::new(&RestConfig::from_env()) {
        Ok(market) => market,
        Err(error) => {
            error!(%error, "invalid Bitget REST configuration");
            return;
        }
    };

    let advisor = AdvisorConfig::from_env().map(|config| {
        info!(model = %config.model, "advisory input enabled");
        ChatAdvisor::new(config.api_key)
            .with_base_url(config.base_url)
            .with_model(config.model)
    });
    if advisor.is_none() {
        info!("OPENAI_API_KEY not set, decisions are rule based only");
    }

    let service = SignalService::new(config, Bitget, market, advisor, LogSink);

    let mut status = service.status_receiver();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            info!(status = ?*status.borrow_and_update(), "connection status changed");
        }
    });

    let subscriptions = subscriptions();
    if subscriptions.is_empty() {
        warn!("no valid subscriptions configured");
    }

    for key in subscriptions {
        if let Err(error) = service
            .subscribe(&key.symbol, key.timeframe, LOG_TARGET.to_string())
            .await
        {
            error!(%key, %error, "failed to subscribe");
            continue;
        }

        // Publish a first update without waiting for live activity
        match service.force_refresh(&key.symbol, key.timeframe).await {
            PassOutcome::Pushed { .. } => {}
            PassOutcome::Skipped(error) => warn!(%key, %error, "initial update skipped"),
            outcome => info!(%key, ?outcome, "initial update not pushed"),
        }
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }

    info!("Shutting down flowsignal server");
    service.shutdown().await;
}

/// Parse `FLOWSIGNAL_SUBSCRIPTIONS`, a comma separated list of `SYMBOL:TIMEFRAME`.
fn subscriptions() -> Vec<SubscriptionKey> {
    let raw = std::env::var("FLOWSIGNAL_SUBSCRIPTIONS")
        .unwrap_or_else(|_| DEFAULT_SUBSCRIPTIONS.to_string());

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<SubscriptionKey>() {
            Ok(key) => Some(key),
            Err(error) => {
                warn!(%entry, %error, "ignoring subscription");
                None
            }
        })
        .unique()
        .collect()
}

/// Initialise default non-JSON `Subscriber` for logging, defaulting to the `info` level.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
