use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::models::{CategorySummary, Narrative, StructuredNarrative};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const SYSTEM_PROMPT: &str = "You are an AI market analyst.";

#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("response parse error: {0}")]
    ResponseParse(String),
    #[error("narrative generation disabled")]
    Disabled,
}

/// Text-generation capability used to attach a narrative to each insight.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Narrative, NarrativeError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            max_tokens: 800,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiNarrator {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiNarrator {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl NarrativeGenerator for OpenAiNarrator {
    async fn generate(&self, prompt: &str) -> Result<Narrative, NarrativeError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        debug!(url = %url, model = %self.config.model, "sending narrative request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(NarrativeError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let payload: JsonValue = serde_json::from_str(&text)
            .map_err(|err| NarrativeError::ResponseParse(format!("invalid JSON: {err}")))?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| NarrativeError::ResponseParse("missing message content".to_string()))?;

        Ok(parse_narrative(content))
    }
}

/// Stand-in for offline runs; every insight gets an error payload.
pub struct DisabledNarrator;

#[async_trait]
impl NarrativeGenerator for DisabledNarrator {
    async fn generate(&self, _prompt: &str) -> Result<Narrative, NarrativeError> {
        Err(NarrativeError::Disabled)
    }
}

/// Structured narrative when the model answered with the requested JSON
/// (optionally inside a code fence), raw text otherwise.
pub fn parse_narrative(content: &str) -> Narrative {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<StructuredNarrative>(unfenced) {
        Ok(structured) => Narrative::Structured(structured),
        Err(_) => Narrative::Raw {
            raw: content.to_string(),
        },
    }
}

pub fn build_prompt(summary: &CategorySummary) -> String {
    let avg_rating = summary
        .avg_rating
        .map(|rating| format!("{rating:.2}"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "Summarize top actionables for category \"{}\" based on stats: \
         apps={}, avg_rating={}, median_price={:.2}, total_reviews={}. \
         Return JSON keys: recommendations, hypothesis, product_idea.",
        summary.category, summary.apps, avg_rating, summary.median_price, summary.total_reviews
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_answers_parse() {
        let content = r#"{"recommendations":["Add widgets","Offer a trial"],"hypothesis":"Users churn","product_idea":"Focus timer"}"#;
        match parse_narrative(content) {
            Narrative::Structured(narrative) => {
                assert_eq!(narrative.recommendations.len(), 2);
                assert_eq!(narrative.product_idea, "Focus timer");
            }
            other => panic!("expected structured narrative, got {other:?}"),
        }
    }

    #[test]
    fn fenced_answers_parse() {
        let content = "```json\n{\"recommendations\":[],\"hypothesis\":\"h\",\"product_idea\":\"p\"}\n```";
        assert!(matches!(parse_narrative(content), Narrative::Structured(_)));
    }

    #[test]
    fn prose_falls_back_to_raw() {
        let content = "Focus on offline mode.";
        assert_eq!(
            parse_narrative(content),
            Narrative::Raw {
                raw: content.to_string()
            }
        );
    }

    #[test]
    fn prompt_carries_the_metrics() {
        let prompt = build_prompt(&CategorySummary {
            category: "weather".to_string(),
            apps: 12,
            avg_rating: Some(4.25),
            median_price: 0.0,
            total_reviews: 9001,
        });
        assert!(prompt.contains("\"weather\""));
        assert!(prompt.contains("apps=12"));
        assert!(prompt.contains("avg_rating=4.25"));
        assert!(prompt.contains("total_reviews=9001"));
    }

    #[tokio::test]
    async fn disabled_narrator_always_errors() {
        let err = DisabledNarrator.generate("anything").await.expect_err("disabled");
        assert_eq!(err.to_string(), "narrative generation disabled");
    }
}
