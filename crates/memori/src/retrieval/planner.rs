//! `RetrievalPlan` and the heuristic/LLM-assisted planner: a structured
//! search plan `{keywords, category?, entities, limit?}` built either by
//! fixed-phrase heuristics or by asking the analysis LLM to rewrite the
//! query.

use crate::pipeline::extraction::{AnalysisFailure, AnalysisProvider};
use crate::utils::{tokenize, TextUtils};
use tracing::{debug, warn};

/// A structured search plan consumed identically whether it came from the
/// heuristic planner or an analysis LLM.
#[derive(Debug, Clone)]
pub struct RetrievalPlan {
    /// The raw or LLM-rewritten query text, used for the full-text/keyword
    /// strategies.
    pub query: String,
    pub keywords: Vec<String>,
    pub category: Option<String>,
    pub entities: Vec<String>,
    pub limit: Option<usize>,
}

impl RetrievalPlan {
    /// Builds a plan directly from the raw query with no LLM involved,
    /// using fixed-phrase matching for keyword/category/entity extraction.
    pub fn heuristic(query: &str) -> Self {
        let keywords = TextUtils::extract_keywords(query, 8);
        let category = detect_category_hint(query);
        let entities = tokenize(query);
        Self { query: query.to_string(), keywords, category, entities, limit: None }
    }
}

const CATEGORY_HINTS: &[(&str, &str)] = &[
    ("prefer", "preference"),
    ("like", "preference"),
    ("favorite", "preference"),
    ("rule", "rule"),
    ("must", "rule"),
    ("always", "rule"),
    ("never", "rule"),
    ("skill", "skill"),
    ("know how to", "skill"),
    ("project", "context"),
    ("working on", "context"),
];

/// Parses a coarse category hint from the query text by scanning a list of
/// fixed phrases.
fn detect_category_hint(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    CATEGORY_HINTS.iter().find(|(pat, _)| lower.contains(pat)).map(|(_, cat)| cat.to_string())
}

/// Rewrites a raw user query into a structured plan via the analysis LLM,
/// falling back to the heuristic plan on any failure or invalid output.
pub struct RetrievalPlanner;

impl RetrievalPlanner {
    /// `timeout` bounds the LLM call; exceeding it or any analysis failure
    /// falls back to `RetrievalPlan::heuristic`.
    pub async fn plan(provider: Option<&dyn AnalysisProvider>, query: &str, timeout: std::time::Duration) -> RetrievalPlan {
        let Some(provider) = provider else {
            return RetrievalPlan::heuristic(query);
        };

        let messages = vec![
            crate::models::Message::system(PLANNER_SYSTEM_PROMPT),
            crate::models::Message::user(query.to_string()),
        ];

        let call = provider.chat(&messages, 256, 0.0, Some(PLAN_SCHEMA));
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(text)) => match parse_plan(&text, query) {
                Some(plan) => plan,
                None => {
                    warn!("retrieval planner returned invalid output, falling back to heuristic plan");
                    RetrievalPlan::heuristic(query)
                }
            },
            Ok(Err(AnalysisFailure::InvalidOutput(m))) => {
                warn!(error = %m, "retrieval planner invalid output, falling back to heuristic plan");
                RetrievalPlan::heuristic(query)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "retrieval planner call failed, falling back to heuristic plan");
                RetrievalPlan::heuristic(query)
            }
            Err(_) => {
                debug!("retrieval planner timed out, falling back to heuristic plan");
                RetrievalPlan::heuristic(query)
            }
        }
    }
}

const PLANNER_SYSTEM_PROMPT: &str = "Rewrite the user's query into a structured search plan. Return a JSON \
object with keys: keywords (array of strings), category (string or null), entities (array of strings), \
limit (integer or null). Do not include any text outside the JSON object.";

const PLAN_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["keywords", "entities"],
  "properties": {
    "keywords": {"type": "array", "items": {"type": "string"}},
    "category": {"type": ["string", "null"]},
    "entities": {"type": "array", "items": {"type": "string"}},
    "limit": {"type": ["integer", "null"]}
  }
}"#;

#[derive(serde::Deserialize)]
struct RawPlan {
    keywords: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    limit: Option<usize>,
}

fn parse_plan(text: &str, original_query: &str) -> Option<RetrievalPlan> {
    let raw: RawPlan = serde_json::from_str(text.trim()).ok()?;
    let query = if raw.keywords.is_empty() { original_query.to_string() } else { raw.keywords.join(" ") };
    Some(RetrievalPlan { query, keywords: raw.keywords, category: raw.category, entities: raw.entities, limit: raw.limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_detects_preference_hint() {
        let plan = RetrievalPlan::heuristic("I prefer dark mode in my editor");
        assert_eq!(plan.category.as_deref(), Some("preference"));
    }

    #[test]
    fn heuristic_has_no_category_hint_by_default() {
        let plan = RetrievalPlan::heuristic("tell me about kubernetes");
        assert_eq!(plan.category, None);
        assert!(plan.entities.contains(&"kubernetes".to_string()));
    }

    #[test]
    fn parse_plan_falls_back_query_when_keywords_empty() {
        let plan = parse_plan(r#"{"keywords":[],"entities":["pytorch"]}"#, "tell me about pytorch").unwrap();
        assert_eq!(plan.query, "tell me about pytorch");
        assert_eq!(plan.entities, vec!["pytorch".to_string()]);
    }

    #[test]
    fn parse_plan_rejects_malformed_json() {
        assert!(parse_plan("not json", "q").is_none());
    }
}
