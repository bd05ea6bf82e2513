use super::Direction;
use crate::analytics::{CvdTrend, Features, OrderFlow};
use serde::{Deserialize, Serialize};

pub const BASE_CONFIDENCE: u8 = 65;
pub const CVD_AGREEMENT_BOOST: u8 = 10;
pub const NEUTRAL_CONFIDENCE: u8 = 50;
pub const INSUFFICIENT_DATA_CONFIDENCE: u8 = 40;

pub const MOMENTUM_BULLISH: f64 = 55.0;
pub const MOMENTUM_BEARISH: f64 = 45.0;
pub const MOMENTUM_OVERBOUGHT: f64 = 70.0;
pub const MOMENTUM_OVERSOLD: f64 = 30.0;

/// Relative band around the slow trend inside which the two trends count as converged.
pub const TREND_CONVERGENCE_BAND: f64 = 0.001;

/// Deterministic decision derived from features and CVD direction only.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct RuleDecision {
    pub direction: Direction,
    pub confidence: u8,
    /// One line summary of what drove the decision.
    pub hint: String,
}

/// Trend crossover combined with momentum thresholds, boosted when CVD agrees.
pub fn rule_decision(features: &Features, flow: &OrderFlow) -> RuleDecision {
    if !features.is_finite() {
        return RuleDecision {
            direction: Direction::Neutral,
            confidence: INSUFFICIENT_DATA_CONFIDENCE,
            hint: "Insufficient data".to_string(),
        };
    }

    let cvd_up = flow.cvd_trend() == CvdTrend::Rising;

    if features.trend_fast > features.trend_slow && features.momentum > MOMENTUM_BULLISH {
        RuleDecision {
            direction: Direction::Long,
            confidence: boosted(cvd_up),
            hint: format!("Bullish bias (EMA+RSI{})", if cvd_up { "+CVD up" } else { "" }),
        }
    } else if features.trend_fast < features.trend_slow && features.momentum < MOMENTUM_BEARISH {
        RuleDecision {
            direction: Direction::Short,
            confidence: boosted(!cvd_up),
            hint: format!("Bearish bias (EMA+RSI{})", if !cvd_up { "+CVD down" } else { "" }),
        }
    } else {
        RuleDecision {
            direction: Direction::Neutral,
            confidence: NEUTRAL_CONFIDENCE,
            hint: "Range / mixed".to_string(),
        }
    }
}

fn boosted(agrees: bool) -> u8 {
    let confidence = if agrees {
        BASE_CONFIDENCE + CVD_AGREEMENT_BOOST
    } else {
        BASE_CONFIDENCE
    };
    confidence.clamp(1, 99)
}

/// Human readable reasons from the deterministic inputs: trend relation, momentum zone,
/// CVD slope over the last three points and the heaviest profile node.
pub fn rule_reasons(features: &Features, flow: &OrderFlow) -> Vec<String> {
    let mut reasons = Vec::with_capacity(4);

    let (fast, slow) = (features.trend_fast, features.trend_slow);
    if fast.is_finite() && slow.is_finite() {
        if fast > slow * (1.0 + TREND_CONVERGENCE_BAND) {
            reasons.push(format!(
                "EMA20 ({fast:.2}) above EMA50 ({slow:.2}), short-term uptrend"
            ));
        } else if fast < slow * (1.0 - TREND_CONVERGENCE_BAND) {
            reasons.push(format!(
                "EMA20 ({fast:.2}) below EMA50 ({slow:.2}), short-term downtrend"
            ));
        } else {
            reasons.push("EMA20 and EMA50 converging, weak direction".to_string());
        }
    }

    let momentum = features.momentum;
    if momentum.is_finite() {
        let zone = if momentum >= MOMENTUM_OVERBOUGHT {
            "overbought, pullback risk"
        } else if momentum <= MOMENTUM_OVERSOLD {
            "oversold, bounce potential"
        } else if momentum >= MOMENTUM_BULLISH {
            "bullish zone"
        } else if momentum <= MOMENTUM_BEARISH {
            "bearish zone"
        } else {
            "neutral"
        };
        reasons.push(format!("RSI {momentum:.1} {zone}"));
    }

    if let Some(slope) = flow.cvd_slope() {
        let reason = if slope > 0.0 {
            "CVD rising, buyers in control"
        } else if slope < 0.0 {
            "CVD falling, sellers in control"
        } else {
            "CVD flat"
        };
        reasons.push(reason.to_string());
    }

    if let Some(node) = flow.top_nodes(1).first() {
        let role = if features.last >= node.price {
            "likely support"
        } else {
            "likely resistance"
        };
        reasons.push(format!(
            "Heavy volume node at {:.2} ({}), {role}",
            node.price,
            node.volume.round()
        ));
    }

    reasons
}
