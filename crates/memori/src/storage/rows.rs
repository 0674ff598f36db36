//! Row-shaped types returned by the Storage Layer, shared across dialects.

use crate::models::{Importance, ProcessedMemory};
use serde::{Deserialize, Serialize};

/// Which strategy in the Retrieval Engine's ladder produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchStrategy {
    Fulltext,
    KeywordLike,
    Category,
    Entity,
    RecentFallback,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Fulltext => "fulltext",
            SearchStrategy::KeywordLike => "keyword-like",
            SearchStrategy::Category => "category",
            SearchStrategy::Entity => "entity",
            SearchStrategy::RecentFallback => "recent-fallback",
        }
    }
}

/// A single search result row, tagged with the strategy that produced it
/// and its normalized score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub memory: ProcessedMemory,
    pub search_strategy: SearchStrategy,
    pub search_score: f32,
}

impl SearchHit {
    pub fn importance(&self) -> Importance {
        self.memory.importance
    }
}

/// `get_memory_stats(namespace)` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub chat_count: i64,
    pub short_term_count: i64,
    pub long_term_count: i64,
    pub working_set_count: i64,
    pub per_category: std::collections::HashMap<String, i64>,
    /// Turns whose ProcessedMemory extraction was dropped under
    /// backpressure.
    pub dropped_extractions: i64,
}

/// `get_database_info()` response.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub dialect: &'static str,
    pub fulltext_index: &'static str,
}
