// src/decision/mod.rs
//! LLM-backed decision engine: packages one cycle's market snapshot into
//! a chat-completion request and validates the structured reply. A reply
//! that fails parsing or schema validation is always an error, never a
//! best-effort default.
use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connectors::traits::DecisionProvider;
use crate::errors::TraderError;
use crate::types::{Action, CoinSelection, MarketSnapshot, NewsItem, Sentiment, TradingDecision};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const PROVIDER: &str = "openai";

/// The trading rules live in the prompt, not in code: capital
/// preservation and technical+sentiment co-analysis are conventions the
/// model is asked to honor, not mechanically enforced invariants.
const DECISION_PROMPT: &str = r#"
You are an expert in cryptocurrency investing.

You invest according to the following principles:
Rule No.1: Never lose money.
Rule No.2: Never forget Rule No.1.

Analyze the provided data:
1. **Chart Data:** Multi-timeframe OHLCV data ('short_term': 1h, 'mid_term': 4h, 'long_term': daily). Use this for technical analysis.
2. **News Data:** A list of recent cryptocurrency news articles under the 'news' key, each containing 'title' and 'date'. Evaluate sentiment and potential market impact.

**Task:** Based on BOTH technical analysis AND news sentiment/implications, decide whether to **buy**, **sell**, or **hold** cryptocurrency.

**Output Format:** Respond ONLY in JSON format like the examples below.
{"decision": "buy", "percentage": 20, "reason": "some technical reason"}
{"decision": "sell", "percentage": 50, "reason": "some technical reason"}
{"decision": "hold", "percentage": 0, "reason": "some technical reason"}
"#;

const SELECTION_PROMPT: &str = r#"
You are an expert in cryptocurrency market sentiment.

You receive recent news headlines grouped by topic as a JSON object whose keys are topic names.

**Task:** Pick the single topic with the most favorable near-term outlook and grade its sentiment as one of: "very_positive", "positive", "neutral", "negative".

**Output Format:** Respond ONLY in JSON format like the example below. The "topic" value must be one of the input keys.
{"topic": "bitcoin", "sentiment": "positive", "reason": "short justification"}
"#;

pub struct DecisionEngine {
    api_key: String,
    model: String,
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl DecisionEngine {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            http: Client::new(),
            base_url: OPENAI_CHAT_URL.to_string(),
        }
    }

    /// One JSON-mode chat completion; returns the first choice's content.
    async fn chat(&self, system: &str, user: &str) -> Result<String, TraderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                format: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                TraderError::provider(PROVIDER, e.status().map(|s| s.as_u16()), e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraderError::provider(PROVIDER, Some(status.as_u16()), body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TraderError::provider(PROVIDER, None, format!("malformed body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TraderError::Decision("model returned no content".into()))
    }
}

#[async_trait]
impl DecisionProvider for DecisionEngine {
    async fn decide(&self, snapshot: &MarketSnapshot) -> Result<TradingDecision, TraderError> {
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| TraderError::Decision(format!("payload serialization: {e}")))?;

        let content = self.chat(DECISION_PROMPT, &payload).await?;
        debug!("raw decision: {}", content);
        parse_decision(&content)
    }

    async fn select_best_coin(
        &self,
        news_by_topic: &HashMap<String, Vec<NewsItem>>,
    ) -> Result<CoinSelection, TraderError> {
        let payload = serde_json::to_string(news_by_topic)
            .map_err(|e| TraderError::Decision(format!("payload serialization: {e}")))?;

        let content = self.chat(SELECTION_PROMPT, &payload).await?;
        debug!("raw selection: {}", content);
        parse_selection(&content, news_by_topic)
    }
}

/// Removes a surrounding markdown code fence (``` or ```json) if the
/// model wrapped its JSON in one.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Validates a raw decision reply: decision in {buy, sell, hold},
/// percentage a number in 0..=100, reason a non-empty string.
pub fn parse_decision(content: &str) -> Result<TradingDecision, TraderError> {
    let text = strip_code_fences(content);
    if text.is_empty() {
        return Err(TraderError::Decision("empty response".into()));
    }

    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| TraderError::Decision(format!("not valid JSON: {e}")))?;

    let action = match value.get("decision").and_then(|v| v.as_str()) {
        Some("buy") => Action::Buy,
        Some("sell") => Action::Sell,
        Some("hold") => Action::Hold,
        other => {
            return Err(TraderError::Decision(format!(
                "decision must be buy/sell/hold, got {other:?}"
            )))
        }
    };

    let pct = value
        .get("percentage")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| TraderError::Decision("percentage missing or not a number".into()))?;
    if !(0.0..=100.0).contains(&pct) {
        return Err(TraderError::Decision(format!(
            "percentage {pct} outside 0..=100"
        )));
    }

    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if reason.is_empty() {
        return Err(TraderError::Decision("reason missing or empty".into()));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percentage = pct.round() as u8;
    Ok(TradingDecision {
        action,
        percentage,
        reason: reason.to_string(),
    })
}

/// Validates a raw topic-selection reply. The chosen topic must be a key
/// of the news map the model was shown.
pub fn parse_selection(
    content: &str,
    news_by_topic: &HashMap<String, Vec<NewsItem>>,
) -> Result<CoinSelection, TraderError> {
    let text = strip_code_fences(content);
    if text.is_empty() {
        return Err(TraderError::Decision("empty response".into()));
    }

    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| TraderError::Decision(format!("not valid JSON: {e}")))?;

    let topic = value
        .get("topic")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TraderError::Decision("topic missing".into()))?;
    if !news_by_topic.contains_key(topic) {
        return Err(TraderError::Decision(format!(
            "topic '{topic}' is not one of the offered topics"
        )));
    }

    let sentiment: Sentiment = value
        .get("sentiment")
        .cloned()
        .ok_or_else(|| TraderError::Decision("sentiment missing".into()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| TraderError::Decision(format!("unknown sentiment: {e}")))
        })?;

    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if reason.is_empty() {
        return Err(TraderError::Decision("reason missing or empty".into()));
    }

    Ok(CoinSelection {
        topic: topic.to_string(),
        sentiment,
        reason: reason.to_string(),
    })
}
