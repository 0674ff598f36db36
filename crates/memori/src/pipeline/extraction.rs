//! The analysis-LLM contract and structured-output validation. Memori does
//! not own the analysis LLM, it only requires a `chat()` implementation
//! honoring structured output.

use crate::error::{MemoriError, Result};
use crate::models::{
    Category, CategoryTag, Classification, EntityRecord, EntityType, Importance, Message,
    ProcessedMemory, MAX_SEARCHABLE_CONTENT_LEN, MAX_SUMMARY_LEN,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Failure modes a provider implementation must distinguish.
#[derive(Debug, Clone)]
pub enum AnalysisFailure {
    /// Retry once, no backoff.
    Transient(String),
    /// Exponential backoff up to 60s before the single retry.
    RateLimited(String),
    /// Output could not be produced at all; no retry.
    InvalidOutput(String),
}

impl std::fmt::Display for AnalysisFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisFailure::Transient(m) => write!(f, "transient analysis failure: {m}"),
            AnalysisFailure::RateLimited(m) => write!(f, "rate-limited analysis failure: {m}"),
            AnalysisFailure::InvalidOutput(m) => write!(f, "invalid analysis output: {m}"),
        }
    }
}

/// A supplied analysis LLM: "a provider abstraction with one
/// method ... Memori does not care which vendor".
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
        response_schema: Option<&str>,
    ) -> std::result::Result<String, AnalysisFailure>;
}

/// Inputs assembled before calling the analysis LLM.
pub struct ConversationContext {
    pub session_id: String,
    pub model: String,
    pub user_context_hints: Vec<String>,
    /// Up to 10 recent memory summaries, most recent first.
    pub recent_summaries: Vec<String>,
}

const RESPONSE_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["summary", "searchable_content", "category", "importance", "classification", "promotion_eligible"],
  "properties": {
    "summary": {"type": "string"},
    "searchable_content": {"type": "string"},
    "category": {"type": "string", "enum": ["fact", "preference", "skill", "context", "rule"]},
    "importance": {"type": "string", "enum": ["low", "medium", "high", "critical"]},
    "classification": {"type": "string", "enum": ["essential", "conscious-info", "conversational"]},
    "promotion_eligible": {"type": "boolean"},
    "entities": {"type": "array"}
  }
}"#;

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a memory extraction assistant. Given a conversation \
turn, return a single JSON object describing the durable, structured memory it contains. Follow the \
provided schema exactly. Do not include any text outside the JSON object.";

#[derive(Debug, Deserialize, Serialize)]
struct RawEntity {
    #[serde(rename = "type")]
    entity_type: String,
    value: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawExtraction {
    summary: String,
    searchable_content: String,
    category: String,
    importance: String,
    classification: String,
    promotion_eligible: bool,
    #[serde(default)]
    entities: Vec<RawEntity>,
}

/// Calls the analysis LLM with one retry for transient/rate-limited
/// failures and one retry for schema-validation failures.
pub async fn extract(
    provider: &dyn AnalysisProvider,
    context: &ConversationContext,
    source_turn_id: Uuid,
    namespace: &str,
    user_input: &str,
    ai_output: &str,
) -> Result<ProcessedMemory> {
    let prompt = build_prompt(context, user_input, ai_output);
    let messages = vec![Message::system(EXTRACTION_SYSTEM_PROMPT), Message::user(prompt)];

    let raw_text = match call_with_retry(provider, &messages).await {
        Ok(text) => text,
        Err(e) => {
            warn!(turn_id = %source_turn_id, error = %e, "analysis LLM call failed, dropping extraction");
            return Err(MemoriError::analysis(e.to_string()));
        }
    };

    match parse_and_validate(&raw_text, source_turn_id, namespace) {
        Ok(memory) => Ok(memory),
        Err(first_err) => {
            warn!(turn_id = %source_turn_id, error = %first_err, "extraction failed schema validation, retrying once");
            let retry_text = call_with_retry(provider, &messages)
                .await
                .map_err(|e| MemoriError::analysis(e.to_string()))?;
            parse_and_validate(&retry_text, source_turn_id, namespace).map_err(|e| {
                warn!(turn_id = %source_turn_id, error = %e, "extraction failed validation twice, dropping memory");
                MemoriError::analysis(format!("invalid extraction output after retry: {e}"))
            })
        }
    }
}

async fn call_with_retry(provider: &dyn AnalysisProvider, messages: &[Message]) -> std::result::Result<String, AnalysisFailure> {
    match provider.chat(messages, 1024, 0.2, Some(RESPONSE_SCHEMA)).await {
        Ok(text) => Ok(text),
        Err(AnalysisFailure::InvalidOutput(m)) => Err(AnalysisFailure::InvalidOutput(m)),
        Err(AnalysisFailure::Transient(_)) => provider.chat(messages, 1024, 0.2, Some(RESPONSE_SCHEMA)).await,
        Err(AnalysisFailure::RateLimited(_)) => {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            provider.chat(messages, 1024, 0.2, Some(RESPONSE_SCHEMA)).await
        }
    }
}

fn build_prompt(context: &ConversationContext, user_input: &str, ai_output: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("session: {}\nmodel: {}\n", context.session_id, context.model));
    if !context.user_context_hints.is_empty() {
        prompt.push_str(&format!("known user context: {}\n", context.user_context_hints.join("; ")));
    }
    if !context.recent_summaries.is_empty() {
        prompt.push_str("recent memories:\n");
        for s in &context.recent_summaries {
            prompt.push_str(&format!("- {s}\n"));
        }
    }
    prompt.push_str(&format!("\nuser: {user_input}\nassistant: {ai_output}\n"));
    prompt
}

fn parse_and_validate(raw_text: &str, source_turn_id: Uuid, namespace: &str) -> std::result::Result<ProcessedMemory, String> {
    let raw: RawExtraction = serde_json::from_str(raw_text.trim()).map_err(|e| format!("json parse error: {e}"))?;

    if raw.summary.trim().is_empty() {
        return Err("summary must not be empty".to_string());
    }
    if raw.searchable_content.trim().is_empty() {
        return Err("searchable_content must not be empty".to_string());
    }

    let category = Category::parse(&raw.category).ok_or_else(|| format!("unknown category '{}'", raw.category))?;
    let importance = Importance::parse(&raw.importance).ok_or_else(|| format!("unknown importance '{}'", raw.importance))?;
    let classification =
        Classification::parse(&raw.classification).ok_or_else(|| format!("unknown classification '{}'", raw.classification))?;

    let memory_id = Uuid::new_v4();
    let summary = crate::utils::TextUtils::truncate_with_ellipsis(raw.summary.trim(), MAX_SUMMARY_LEN).into_owned();
    let searchable_content =
        crate::utils::TextUtils::truncate_with_ellipsis(raw.searchable_content.trim(), MAX_SEARCHABLE_CONTENT_LEN).into_owned();

    let entities = raw
        .entities
        .iter()
        .filter_map(|e| EntityType::parse(&e.entity_type).map(|t| EntityRecord::new(memory_id, t, &e.value)))
        .collect();

    let retention = if classification == Classification::Conversational {
        crate::models::Retention::ShortTerm
    } else {
        crate::models::Retention::LongTerm
    };
    let now = Utc::now();

    Ok(ProcessedMemory {
        memory_id,
        source_turn_id,
        namespace: namespace.to_string(),
        summary,
        searchable_content,
        primary_category: category,
        importance,
        classification,
        promotion_eligible: raw.promotion_eligible && classification.is_promotable(),
        duplicate_of: None,
        entities,
        secondary_categories: Vec::<CategoryTag>::new(),
        retention,
        created_at: now,
        expires_at: retention.default_ttl_days().map(|d| now + chrono::Duration::days(d)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        response: String,
    }

    #[async_trait]
    impl AnalysisProvider for StubProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
            _response_schema: Option<&str>,
        ) -> std::result::Result<String, AnalysisFailure> {
            Ok(self.response.clone())
        }
    }

    struct AlwaysInvalidProvider;

    #[async_trait]
    impl AnalysisProvider for AlwaysInvalidProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
            _response_schema: Option<&str>,
        ) -> std::result::Result<String, AnalysisFailure> {
            Err(AnalysisFailure::InvalidOutput("stub always fails".to_string()))
        }
    }

    fn sample_context() -> ConversationContext {
        ConversationContext {
            session_id: "s1".to_string(),
            model: "gpt-test".to_string(),
            user_context_hints: Vec::new(),
            recent_summaries: Vec::new(),
        }
    }

    #[tokio::test]
    async fn valid_extraction_round_trips() {
        let provider = StubProvider {
            response: r#"{"summary":"user likes rust","searchable_content":"user likes rust programming",
                "category":"preference","importance":"high","classification":"essential",
                "promotion_eligible":true,"entities":[{"type":"technology","value":"rust"}]}"#
                .to_string(),
        };
        let memory = extract(&provider, &sample_context(), Uuid::new_v4(), "ns1", "I like Rust", "Noted!").await.unwrap();
        assert_eq!(memory.primary_category.as_str(), "preference");
        assert_eq!(memory.entities.len(), 1);
        assert!(memory.promotion_eligible);
    }

    #[tokio::test]
    async fn invalid_output_drops_extraction_without_panicking() {
        let err = extract(&AlwaysInvalidProvider, &sample_context(), Uuid::new_v4(), "ns1", "hi", "hello")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "analysis");
    }

    #[test]
    fn rejects_unknown_category() {
        let raw = r#"{"summary":"x","searchable_content":"y","category":"nonsense",
            "importance":"low","classification":"essential","promotion_eligible":false}"#;
        assert!(parse_and_validate(raw, Uuid::new_v4(), "ns1").is_err());
    }
}
