use crate::analytics::{Features, OrderFlow};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Optional advisory input and its validated parse step.
pub mod advisory;

/// OpenAI compatible chat completion [`Advisor`](advisory::Advisor).
pub mod chat;

/// Deterministic rule decision and reasons.
pub mod rule;

pub use advisory::{Advisor, Advisory, AdvisoryContext, AdvisoryNotes, AdvisoryOverrides, NoAdvisor};
pub use rule::{RuleDecision, rule_decision, rule_reasons};

/// Risk note used when the advisory does not supply one.
pub const DEFAULT_RISK_NOTE: &str = "Volatile conditions; always use a stop.";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[display("LONG")]
    Long,
    #[display("SHORT")]
    Short,
    #[display("NEUTRAL")]
    Neutral,
}

impl Direction {
    /// Case-insensitive parse of `LONG`, `SHORT` or `NEUTRAL`.
    pub fn parse(direction: &str) -> Option<Self> {
        match direction.trim().to_ascii_uppercase().as_str() {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            "NEUTRAL" => Some(Direction::Neutral),
            _ => None,
        }
    }
}

/// Suggested price levels.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct Levels {
    pub entry: f64,
    pub stop: f64,
    pub take_profit: f64,
}

impl Levels {
    /// Conservative placeholder levels around `last` for the given direction.
    pub fn around(direction: Direction, last: f64) -> Self {
        let (stop, take_profit) = match direction {
            Direction::Long => (0.985, 1.02),
            Direction::Short => (1.015, 0.98),
            Direction::Neutral => (0.995, 1.005),
        };
        Self {
            entry: last,
            stop: last * stop,
            take_profit: last * take_profit,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionSource {
    #[display("RULE")]
    Rule,
    #[display("HYBRID")]
    Hybrid,
}

/// Final output of one recomputation pass. Computed fresh every pass.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Decision {
    pub direction: Direction,
    /// Always within `[1, 99]`.
    pub confidence: u8,
    pub reasons: Vec<String>,
    pub rationale: String,
    pub levels: Levels,
    pub risk_note: String,
    pub source: DecisionSource,
}

/// Rule decision, optionally combined with a validated advisory response.
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    RuleOnly(RuleDecision),
    Hybrid {
        rule: RuleDecision,
        overrides: Option<AdvisoryOverrides>,
        notes: AdvisoryNotes,
    },
}

impl Synthesis {
    pub fn new(rule: RuleDecision, advisory: Advisory) -> Self {
        match advisory {
            Advisory::Absent => Self::RuleOnly(rule),
            Advisory::Received { overrides, notes } => Self::Hybrid {
                rule,
                overrides,
                notes,
            },
        }
    }

    /// Produce the final [`Decision`]. Valid advisory overrides win over the rule values,
    /// reasons always start with the rule reasons.
    pub fn resolve(self, features: &Features, flow: &OrderFlow) -> Decision {
        let mut reasons = rule_reasons(features, flow);

        let (rule, overrides, notes, source) = match self {
            Self::RuleOnly(rule) => (rule, None, AdvisoryNotes::default(), DecisionSource::Rule),
            Self::Hybrid {
                rule,
                overrides,
                notes,
            } => (rule, overrides, notes, DecisionSource::Hybrid),
        };

        let (direction, confidence, levels) = match overrides {
            Some(overrides) => (overrides.direction, overrides.confidence, overrides.levels),
            None => (
                rule.direction,
                rule.confidence,
                Levels::around(rule.direction, features.last),
            ),
        };

        let AdvisoryNotes {
            rationale,
            risk_note,
            reasons: advisory_reasons,
        } = notes;

        if !advisory_reasons.is_empty() {
            for reason in advisory_reasons {
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }
        } else if let Some(rationale) = rationale.as_ref() {
            if !reasons.contains(rationale) {
                reasons.push(rationale.clone());
            }
        }

        Decision {
            direction,
            confidence: confidence.clamp(1, 99),
            reasons,
            rationale: rationale.unwrap_or(rule.hint),
            levels,
            risk_note: risk_note.unwrap_or_else(|| DEFAULT_RISK_NOTE.to_string()),
            source,
        }
    }
}

/// Synthesise a [`Decision`] from features, order flow and an optional advisory input.
pub fn decide(features: &Features, flow: &OrderFlow, advisory: Advisory) -> Decision {
    Synthesis::new(rule_decision(features, flow), advisory).resolve(features, flow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analytics::build_cvd_and_profile,
        model::{Side, Trade},
    };
    use serde_json::json;

    fn bullish() -> Features {
        Features {
            last: 200.0,
            trend_fast: 202.0,
            trend_slow: 198.0,
            momentum: 60.0,
            volatility: 0.002,
        }
    }

    fn flow() -> OrderFlow {
        let trades = vec![
            Trade::from_epoch_ms(0, 199.0, 2.0, Side::Buy).unwrap(),
            Trade::from_epoch_ms(60_000, 199.5, 1.0, Side::Sell).unwrap(),
            Trade::from_epoch_ms(120_000, 200.0, 3.0, Side::Buy).unwrap(),
        ];
        build_cvd_and_profile(&trades, 60_000, 0.5)
    }

    #[test]
    fn test_decide_without_advisory_uses_rule() {
        let features = bullish();
        let flow = flow();

        let decision = decide(&features, &flow, Advisory::Absent);

        assert_eq!(decision.direction, Direction::Long);
        assert_eq!(decision.confidence, 75);
        assert_eq!(decision.source, DecisionSource::Rule);
        assert_eq!(decision.levels, Levels::around(Direction::Long, 200.0));
        assert_eq!(decision.rationale, "Bullish bias (EMA+RSI+CVD up)");
        assert_eq!(decision.risk_note, DEFAULT_RISK_NOTE);
        assert_eq!(decision.reasons, rule_reasons(&features, &flow));
    }

    #[test]
    fn test_decide_well_formed_advisory_overrides() {
        let features = bullish();
        let flow = flow();
        let advisory = Advisory::parse(json!({
            "direction": "SHORT",
            "confidence": 58,
            "rationale": "Distribution near highs",
            "levels": {"entry": 201.0, "stop": 205.0, "take_profit": 190.0},
            "risk": "Event risk ahead",
            "reasons": ["Funding elevated"]
        }));

        let decision = decide(&features, &flow, advisory);

        assert_eq!(decision.direction, Direction::Short);
        assert_eq!(decision.confidence, 58);
        assert_eq!(
            decision.levels,
            Levels {
                entry: 201.0,
                stop: 205.0,
                take_profit: 190.0
            }
        );
        assert_eq!(decision.source, DecisionSource::Hybrid);
        assert_eq!(decision.rationale, "Distribution near highs");
        assert_eq!(decision.risk_note, "Event risk ahead");
        assert_eq!(decision.reasons.last().map(String::as_str), Some("Funding elevated"));
    }

    #[test]
    fn test_decide_malformed_advisory_keeps_rule_values() {
        let features = bullish();
        let flow = flow();
        let rule_only = decide(&features, &flow, Advisory::Absent);

        let advisory = Advisory::parse(json!({
            "direction": "SHORT",
            "confidence": "very",
            "levels": {"entry": 201.0, "stop": 205.0, "take_profit": 190.0},
            "rationale": "Looks toppy"
        }));
        let decision = decide(&features, &flow, advisory);

        assert_eq!(decision.direction, rule_only.direction);
        assert_eq!(decision.confidence, rule_only.confidence);
        assert_eq!(decision.levels, rule_only.levels);
        assert_eq!(decision.source, DecisionSource::Hybrid);
        assert_eq!(decision.rationale, "Looks toppy");
        assert_eq!(decision.reasons.last().map(String::as_str), Some("Looks toppy"));
    }

    #[test]
    fn test_decide_dedups_advisory_reasons() {
        let features = bullish();
        let flow = flow();
        let first_rule_reason = rule_reasons(&features, &flow).remove(0);

        let advisory = Advisory::parse(json!({
            "reasons": [first_rule_reason.clone(), "New angle", "New angle"]
        }));
        let decision = decide(&features, &flow, advisory);

        let count = |text: &str| decision.reasons.iter().filter(|r| *r == text).count();
        assert_eq!(count(&first_rule_reason), 1);
        assert_eq!(count("New angle"), 1);
    }

    #[test]
    fn test_levels_around() {
        struct TestCase {
            direction: Direction,
            expected: (f64, f64),
        }

        let tests = vec![
            TestCase {
                // TC0: long
                direction: Direction::Long,
                expected: (98.5, 102.0),
            },
            TestCase {
                // TC1: short
                direction: Direction::Short,
                expected: (101.5, 98.0),
            },
            TestCase {
                // TC2: neutral
                direction: Direction::Neutral,
                expected: (99.5, 100.5),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Levels::around(test.direction, 100.0);
            assert_eq!(actual.entry, 100.0, "TC{} failed", index);
            assert!((actual.stop - test.expected.0).abs() < 1e-9, "TC{} failed", index);
            assert!((actual.take_profit - test.expected.1).abs() < 1e-9, "TC{} failed", index);
        }
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("long"), Some(Direction::Long));
        assert_eq!(Direction::parse(" Short "), Some(Direction::Short));
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::Neutral.to_string(), "NEUTRAL");
    }
}
