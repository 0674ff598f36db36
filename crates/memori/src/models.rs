//! Core data model: ChatTurn, ProcessedMemory, WorkingMemoryItem,
//! EntityRecord, ConversationSession, UserContext, and the small enums that
//! drive classification and promotion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An immutable request/response pair, captured post-response by the
/// Interception Layer. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub turn_id: Uuid,
    pub session_id: String,
    pub namespace: String,
    pub user_input: String,
    pub ai_output: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: i32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Primary category of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Fact,
    Preference,
    Skill,
    Context,
    Rule,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Fact => "fact",
            Category::Preference => "preference",
            Category::Skill => "skill",
            Category::Context => "context",
            Category::Rule => "rule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fact" => Some(Category::Fact),
            "preference" => Some(Category::Preference),
            "skill" => Some(Category::Skill),
            "context" => Some(Category::Context),
            "rule" => Some(Category::Rule),
            _ => None,
        }
    }
}

/// Importance enum, mapped to a numeric score in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Medium,
    High,
    Critical,
}

impl Importance {
    /// low=0.3, medium=0.5, high=0.75, critical=1.0.
    pub fn score(&self) -> f32 {
        match self {
            Importance::Low => 0.3,
            Importance::Medium => 0.5,
            Importance::High => 0.75,
            Importance::Critical => 1.0,
        }
    }

    /// Nearest enum band for a raw score, used when an analysis LLM returns
    /// a numeric importance instead of a label.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.9 {
            Importance::Critical
        } else if score >= 0.6 {
            Importance::High
        } else if score >= 0.4 {
            Importance::Medium
        } else {
            Importance::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Medium => "medium",
            Importance::High => "high",
            Importance::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Importance::Low),
            "medium" => Some(Importance::Medium),
            "high" => Some(Importance::High),
            "critical" => Some(Importance::Critical),
            _ => None,
        }
    }
}

/// Classification band driving promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Permanent, always-promote.
    Essential,
    /// Eligible, promoted after Conscious Agent review.
    ConsciousInfo,
    /// Stays in long-term, not promoted.
    Conversational,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Essential => "essential",
            Classification::ConsciousInfo => "conscious-info",
            Classification::Conversational => "conversational",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "essential" => Some(Classification::Essential),
            "conscious-info" | "conscious_info" => Some(Classification::ConsciousInfo),
            "conversational" => Some(Classification::Conversational),
            _ => None,
        }
    }

    /// Whether a memory with this classification is eligible for promotion
    /// into the working set at all.
    pub fn is_promotable(&self) -> bool {
        matches!(self, Classification::Essential | Classification::ConsciousInfo)
    }
}

/// Retention policy attached to a ProcessedMemory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    ShortTerm,
    LongTerm,
}

impl Retention {
    /// short-term: 7d, long-term: permanent.
    pub fn default_ttl_days(&self) -> Option<i64> {
        match self {
            Retention::ShortTerm => Some(7),
            Retention::LongTerm => None,
        }
    }
}

/// Entity type recognized by extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Technology,
    Topic,
    Skill,
    Project,
    Keyword,
    Location,
    Organization,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Technology => "technology",
            EntityType::Topic => "topic",
            EntityType::Skill => "skill",
            EntityType::Project => "project",
            EntityType::Keyword => "keyword",
            EntityType::Location => "location",
            EntityType::Organization => "organization",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "person" => Some(EntityType::Person),
            "technology" => Some(EntityType::Technology),
            "topic" => Some(EntityType::Topic),
            "skill" => Some(EntityType::Skill),
            "project" => Some(EntityType::Project),
            "keyword" => Some(EntityType::Keyword),
            "location" => Some(EntityType::Location),
            "organization" => Some(EntityType::Organization),
            _ => None,
        }
    }
}

/// A normalized entity mention extracted alongside a ProcessedMemory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: Uuid,
    pub memory_id: Uuid,
    pub entity_type: EntityType,
    pub entity_value: String,
    pub occurrence_count: i32,
}

impl EntityRecord {
    pub fn new(memory_id: Uuid, entity_type: EntityType, raw_value: &str) -> Self {
        Self {
            entity_id: Uuid::new_v4(),
            memory_id,
            entity_type,
            entity_value: raw_value.trim().to_lowercase(),
            occurrence_count: 1,
        }
    }
}

/// A secondary category tag. Persisted but not consulted by the Retrieval
/// Engine's ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTag {
    pub memory_id: Uuid,
    pub category: String,
    pub confidence: f32,
}

/// Structured interpretation of a ChatTurn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMemory {
    pub memory_id: Uuid,
    pub source_turn_id: Uuid,
    pub namespace: String,
    pub summary: String,
    pub searchable_content: String,
    pub primary_category: Category,
    pub importance: Importance,
    pub classification: Classification,
    pub promotion_eligible: bool,
    pub duplicate_of: Option<Uuid>,
    pub entities: Vec<EntityRecord>,
    pub secondary_categories: Vec<CategoryTag>,
    pub retention: Retention,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub const MAX_SUMMARY_LEN: usize = 500;
pub const MAX_SEARCHABLE_CONTENT_LEN: usize = 5000;

impl ProcessedMemory {
    /// True once dedup has marked this a duplicate.
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    /// Normalize `searchable_content` the way every dedup/uniqueness
    /// comparison is defined: trimmed, lowercased.
    pub fn normalized_content(&self) -> String {
        normalize_for_dedup(&self.searchable_content)
    }
}

/// Shared normalization used by every uniqueness comparison: case-insensitive,
/// trimmed.
pub fn normalize_for_dedup(s: &str) -> String {
    s.trim().to_lowercase()
}

/// A memory copied into the always-available short-term working set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryItem {
    pub working_id: Uuid,
    pub source_memory_id: Uuid,
    pub namespace: String,
    pub summary: String,
    pub searchable_content: String,
    pub importance: Importance,
    pub is_permanent: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i32,
}

impl WorkingMemoryItem {
    /// Category is always `conscious_context` for working-set items.
    pub const CATEGORY: &'static str = "conscious_context";
}

/// A single message in a conversation, as seen/sent by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Ephemeral per-caller session used for message-history injection.
/// Does not persist across process restart.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub session_id: String,
    pub messages: Vec<TimestampedMessage>,
    /// Conscious-mode idempotency flag: has the one-shot preamble fired yet?
    pub context_injected: bool,
    /// Recursion guard for auto-ingest retrieval.
    pub in_context_retrieval: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            context_injected: false,
            in_context_retrieval: false,
            created_at: now,
            last_accessed: now,
        }
    }
}

/// Small mutable profile attached to the orchestrator for pipeline hints.
/// Process-wide, cleared on shutdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    pub current_projects: Vec<String>,
    pub skills: Vec<String>,
    pub preferences: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_score_mapping_matches_spec() {
        assert_eq!(Importance::Low.score(), 0.3);
        assert_eq!(Importance::Medium.score(), 0.5);
        assert_eq!(Importance::High.score(), 0.75);
        assert_eq!(Importance::Critical.score(), 1.0);
    }

    #[test]
    fn classification_promotable_bands() {
        assert!(Classification::Essential.is_promotable());
        assert!(Classification::ConsciousInfo.is_promotable());
        assert!(!Classification::Conversational.is_promotable());
    }

    #[test]
    fn normalized_content_trims_and_lowercases() {
        assert_eq!(normalize_for_dedup("  User Name Is Bob  "), "user name is bob");
    }

    #[test]
    fn category_round_trips_through_str() {
        for c in [Category::Fact, Category::Preference, Category::Skill, Category::Context, Category::Rule] {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
    }
}
