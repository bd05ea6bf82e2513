use crate::{
    analytics::{CvdTrend, Features, ProfileNode},
    decision::Decision,
    model::SubscriptionKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, hash::Hash};
use thiserror::Error;

/// Payload fanned out to every display target of a subscription.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SignalUpdate {
    pub key: SubscriptionKey,
    pub time: DateTime<Utc>,
    pub features: Features,
    pub decision: Decision,
    pub cvd_now: f64,
    pub cvd_trend: CvdTrend,
    /// Heaviest profile nodes, heaviest first.
    pub profile_top: Vec<ProfileNode>,
}

impl SignalUpdate {
    /// One line plain text summary, eg/ `BTCUSDT:15m LONG 75% @ 64012.50 [RULE]`.
    pub fn headline(&self) -> String {
        format!(
            "{} {} {}% @ {:.2} [{}]",
            self.key,
            self.decision.direction,
            self.decision.confidence,
            self.features.last,
            self.decision.source
        )
    }

    /// `price(volume)` list of the heaviest profile nodes.
    pub fn profile_summary(&self) -> String {
        self.profile_top
            .iter()
            .map(|node| format!("{:.2}({:.0})", node.price, node.volume))
            .join(", ")
    }
}

/// Per-target push failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The target no longer exists (eg/ its message was deleted) and should be forgotten.
    #[error("display target is gone")]
    TargetGone,

    #[error("push failed: {0}")]
    Failed(String),
}

/// Rendering collaborator that owns display targets.
///
/// Targets are opaque to this crate: they are only stored, compared and handed back.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    type Target: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    async fn push(&self, target: &Self::Target, update: &SignalUpdate) -> Result<(), PushError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decision::{DecisionSource, Direction, Levels},
        model::Timeframe,
    };

    #[test]
    fn test_headline_and_profile_summary() {
        let update = SignalUpdate {
            key: SubscriptionKey::new("BTCUSDT", Timeframe::M15),
            time: DateTime::from_timestamp_millis(0).unwrap(),
            features: Features {
                last: 64012.5,
                trend_fast: 64000.0,
                trend_slow: 63800.0,
                momentum: 58.0,
                volatility: 0.001,
            },
            decision: Decision {
                direction: Direction::Long,
                confidence: 75,
                reasons: vec![],
                rationale: "Bullish bias".to_string(),
                levels: Levels::around(Direction::Long, 64012.5),
                risk_note: "Use a stop".to_string(),
                source: DecisionSource::Rule,
            },
            cvd_now: 12.0,
            cvd_trend: CvdTrend::Rising,
            profile_top: vec![
                ProfileNode {
                    price: 64000.0,
                    volume: 120.4,
                },
                ProfileNode {
                    price: 63936.0,
                    volume: 80.6,
                },
            ],
        };

        assert_eq!(update.headline(), "BTCUSDT:15m LONG 75% @ 64012.50 [RULE]");
        assert_eq!(update.profile_summary(), "64000.00(120), 63936.00(81)");
    }
}
