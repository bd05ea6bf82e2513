use super::{Direction, Levels, rule::RuleDecision};
use crate::{
    analytics::{CvdTrend, Features, ProfileNode},
    model::SubscriptionKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything an [`Advisor`] is told about one recomputation pass.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct AdvisoryContext {
    pub key: SubscriptionKey,
    pub time: DateTime<Utc>,
    pub features: Features,
    pub rule: RuleDecision,
    pub cvd_now: f64,
    pub cvd_trend: CvdTrend,
    /// Heaviest profile nodes, heaviest first.
    pub top_nodes: Vec<ProfileNode>,
}

/// Best-effort source of a loosely typed, decision shaped advisory object.
///
/// Implementations must never fail: any error is reported as `None`. The caller bounds the
/// call with a timeout and validates the returned value with [`Advisory::parse`].
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, context: &AdvisoryContext) -> Option<Value>;
}

/// [`Advisor`] that never has an opinion.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoAdvisor;

#[async_trait]
impl Advisor for NoAdvisor {
    async fn advise(&self, _: &AdvisoryContext) -> Option<Value> {
        None
    }
}

/// Optional [`Advisor`], eg/ only configured when credentials are present.
#[async_trait]
impl<A> Advisor for Option<A>
where
    A: Advisor,
{
    async fn advise(&self, context: &AdvisoryContext) -> Option<Value> {
        match self {
            Some(advisor) => advisor.advise(context).await,
            None => None,
        }
    }
}

/// Fields that override the rule decision. Only produced when every one of them is valid.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct AdvisoryOverrides {
    pub direction: Direction,
    pub confidence: u8,
    pub levels: Levels,
}

/// Free text that augments, but never replaces, the rule reasons.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct AdvisoryNotes {
    pub rationale: Option<String>,
    pub risk_note: Option<String>,
    pub reasons: Vec<String>,
}

/// Validated advisory input.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub enum Advisory {
    #[default]
    Absent,
    Received {
        overrides: Option<AdvisoryOverrides>,
        notes: AdvisoryNotes,
    },
}

impl Advisory {
    /// Parse a raw advisory response. Anything that is not a JSON object is `Absent`.
    ///
    /// Overrides are all-or-nothing: a recognised direction, a numeric confidence and numeric
    /// `levels.{entry, stop, take_profit}` must all be present, otherwise none apply.
    pub fn parse(value: Value) -> Self {
        let Value::Object(object) = value else {
            return Self::Absent;
        };

        let direction = object
            .get("direction")
            .and_then(Value::as_str)
            .and_then(Direction::parse);

        let confidence = object
            .get("confidence")
            .and_then(finite_number)
            .map(|confidence| confidence.round().clamp(1.0, 99.0) as u8);

        let levels = object.get("levels").and_then(|levels| {
            Some(Levels {
                entry: levels.get("entry").and_then(finite_number)?,
                stop: levels.get("stop").and_then(finite_number)?,
                take_profit: levels.get("take_profit").and_then(finite_number)?,
            })
        });

        let overrides = match (direction, confidence, levels) {
            (Some(direction), Some(confidence), Some(levels)) => Some(AdvisoryOverrides {
                direction,
                confidence,
                levels,
            }),
            _ => None,
        };

        let notes = AdvisoryNotes {
            rationale: object.get("rationale").and_then(non_empty_text),
            risk_note: object.get("risk").and_then(non_empty_text),
            reasons: object
                .get("reasons")
                .and_then(Value::as_array)
                .map(|reasons| {
                    reasons
                        .iter()
                        .filter_map(|reason| match reason {
                            Value::String(text) => Some(text.trim().to_string()),
                            Value::Null => None,
                            other => Some(other.to_string()),
                        })
                        .filter(|reason| !reason.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        Self::Received { overrides, notes }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Numbers, or strings holding numbers, that are finite.
fn finite_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn non_empty_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
