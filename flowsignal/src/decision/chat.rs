use super::advisory::{Advisor, AdvisoryContext};
use crate::error::SignalError;
use async_trait::async_trait;
use itertools::Itertools;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f64 = 0.2;

/// [`Advisor`] backed by an OpenAI compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatAdvisor {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatAdvisor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn complete(&self, prompt: &str) -> Result<String, SignalError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: TEMPERATURE,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SignalError::NoData("empty chat completion".to_string()))
    }
}

#[async_trait]
impl Advisor for ChatAdvisor {
    async fn advise(&self, context: &AdvisoryContext) -> Option<Value> {
        let prompt = build_prompt(context);

        match self.complete(&prompt).await {
            Ok(reply) => {
                let advisory = extract_json_object(&reply);
                if advisory.is_none() {
                    debug!(key = %context.key, "chat reply carried no JSON object");
                }
                advisory
            }
            Err(error) => {
                debug!(key = %context.key, %error, "chat advisory request failed");
                None
            }
        }
    }
}

/// Render the advisory prompt for one pass.
pub fn build_prompt(context: &AdvisoryContext) -> String {
    let features = &context.features;
    let top_nodes = context
        .top_nodes
        .iter()
        .map(|node| format!("{:.2}({:.0})", node.price, node.volume))
        .join(", ");

    format!(
        "Time: {time}\n\
         Symbol: {symbol}, timeframe: {timeframe}\n\
         Indicators: EMA20={fast:.4}, EMA50={slow:.4}, RSI={rsi:.1}, volatility={vol:.2}%\n\
         Rule decision: {direction} (conf={confidence}, {hint})\n\
         CVD: now={cvd_now} ({cvd_trend:?})\n\
         Top volume nodes: {top_nodes}\n\
         Reply with JSON only:\n\
         {{\"direction\":\"LONG|SHORT|NEUTRAL\",\"confidence\":0-100,\"rationale\":\"2-4 lines\",\
         \"levels\":{{\"entry\":number,\"stop\":number,\"take_profit\":number}},\"risk\":\"1-2 lines\"}}\n\
         Last price: {last:.4}",
        time = context.time.to_rfc3339(),
        symbol = context.key.symbol,
        timeframe = context.key.timeframe,
        fast = features.trend_fast,
        slow = features.trend_slow,
        rsi = features.momentum,
        vol = features.volatility * 100.0,
        direction = context.rule.direction,
        confidence = context.rule.confidence,
        hint = context.rule.hint,
        cvd_now = context.cvd_now,
        cvd_trend = context.cvd_trend,
        last = features.last,
    )
}

/// Parse the span from the first `{` to the last `}` of a free text reply.
pub fn extract_json_object(reply: &str) -> Option<Value> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analytics::{CvdTrend, Features, ProfileNode},
        decision::{Direction, RuleDecision},
        model::{SubscriptionKey, Timeframe},
    };
    use serde_json::json;

    #[test]
    fn test_extract_json_object() {
        struct TestCase {
            input: &'static str,
            expected: Option<Value>,
        }

        let tests = vec![
            TestCase {
                // TC0: fenced reply
                input: "Sure:\n```json\n{\"direction\":\"LONG\",\"levels\":{\"entry\":1}}\n```",
                expected: Some(json!({"direction": "LONG", "levels": {"entry": 1}})),
            },
            TestCase {
                // TC1: no object
                input: "I cannot help with that",
                expected: None,
            },
            TestCase {
                // TC2: braces in the wrong order
                input: "} nope {",
                expected: None,
            },
            TestCase {
                // TC3: invalid JSON between braces
                input: "{direction: LONG}",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = extract_json_object(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_build_prompt_mentions_context() {
        let context = AdvisoryContext {
            key: SubscriptionKey::new("ethusdt", Timeframe::H1),
            time: chrono::DateTime::from_timestamp_millis(0).unwrap(),
            features: Features {
                last: 3000.0,
                trend_fast: 2990.0,
                trend_slow: 2950.0,
                momentum: 61.25,
                volatility: 0.0042,
            },
            rule: RuleDecision {
                direction: Direction::Long,
                confidence: 65,
                hint: "Bullish bias (EMA+RSI)".to_string(),
            },
            cvd_now: 12.5,
            cvd_trend: CvdTrend::Falling,
            top_nodes: vec![ProfileNode {
                price: 2997.0,
                volume: 41.2,
            }],
        };

        let prompt = build_prompt(&context);

        assert!(prompt.contains("Symbol: ETHUSDT, timeframe: 1h"));
        assert!(prompt.contains("RSI=61.2") || prompt.contains("RSI=61.3"));
        assert!(prompt.contains("volatility=0.42%"));
        assert!(prompt.contains("Rule decision: LONG (conf=65, Bullish bias (EMA+RSI))"));
        assert!(prompt.contains("2997.00(41)"));
        assert!(prompt.contains("Last price: 3000.0000"));
    }
}
