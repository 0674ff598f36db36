//! Retrieval Engine: multi-strategy query planning and ranking over the
//! Storage Layer. Evaluates a five-strategy ladder (fulltext, keyword-like,
//! category, entity, recent-fallback), each strategy's failure contained so
//! one broken strategy doesn't stop the rest of the ladder.

pub mod planner;

use crate::models::ProcessedMemory;
use crate::pipeline::extraction::AnalysisProvider;
use crate::storage::{MemoryStore, SearchHit, SearchStrategy};
use crate::utils::tokenize;
use planner::{RetrievalPlan, RetrievalPlanner};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Planning + ranking over the Storage Layer's strategies.
pub struct RetrievalEngine {
    default_limit: usize,
    provider: Option<Arc<dyn AnalysisProvider>>,
    plan_timeout: Duration,
}

impl RetrievalEngine {
    /// `provider`, when set, lets `search_raw` rewrite the raw query into a
    /// structured plan via the analysis LLM, bounded by `plan_timeout`;
    /// `None` always falls back to the heuristic planner.
    pub fn new(default_limit: usize, provider: Option<Arc<dyn AnalysisProvider>>, plan_timeout: Duration) -> Self {
        Self { default_limit, provider, plan_timeout }
    }

    /// `execute-search(query, namespace, limit) -> ordered list of memory rows`.
    /// Evaluates the strategy ladder, merges hits, deduplicates by
    /// normalized `searchable_content`, and ranks by (score desc, importance
    /// desc, created_at desc, memory_id asc).
    pub async fn execute_search(
        &self,
        store: &MemoryStore,
        plan: &RetrievalPlan,
        namespace: &str,
        limit: Option<usize>,
    ) -> Vec<SearchHit> {
        let limit = limit.unwrap_or(self.default_limit).max(1);
        let mut hits = Vec::new();

        // 1 + 2: full-text, falling back to keyword-like, both live inside
        // the Storage Layer's `search_memories`.
        match store.search_memories(&plan.query, namespace, plan.category.as_deref(), limit * 2).await {
            Ok(mut h) => hits.append(&mut h),
            Err(e) => warn!(namespace, error = %e, "search_memories strategy failed, continuing ladder"),
        }

        // 3: category filter is already folded into search_memories above
        // when the plan carries a category hint; nothing further to do here.

        // 4: entity match.
        let entity_tokens: Vec<String> = if !plan.entities.is_empty() {
            plan.entities.clone()
        } else {
            tokenize(&plan.query)
        };
        if !entity_tokens.is_empty() {
            match store.entity_search(&entity_tokens, namespace, limit * 2).await {
                Ok(mut h) => hits.append(&mut h),
                Err(e) => warn!(namespace, error = %e, "entity_search strategy failed, continuing ladder"),
            }
        }

        // 5: recent-fallback, only if every prior strategy came up empty.
        if hits.is_empty() {
            match store.recent_memories(namespace, limit).await {
                Ok(mut h) => hits.append(&mut h),
                Err(e) => warn!(namespace, error = %e, "recent_memories fallback failed"),
            }
        }

        let deduped = dedup_by_content(hits);
        let mut ranked = deduped;
        rank(&mut ranked);
        ranked.truncate(limit);
        debug!(namespace, query = %plan.query, hits = ranked.len(), "retrieval engine returned hits");
        ranked
    }

    /// Convenience entry point for callers with a raw query string and no
    /// pre-built plan. Rewrites the query via the analysis LLM planner when
    /// one is configured, falling back to the heuristic planner on timeout,
    /// failure, or when no provider is set.
    pub async fn search_raw(&self, store: &MemoryStore, query: &str, namespace: &str, limit: Option<usize>) -> Vec<SearchHit> {
        let plan = RetrievalPlanner::plan(self.provider.as_deref(), query, self.plan_timeout).await;
        self.execute_search(store, &plan, namespace, limit).await
    }
}

/// Deduplicate by normalized `searchable_content`, keeping the
/// highest-ranked (by search_score, tie-broken by strategy preference) copy.
fn dedup_by_content(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut by_key: Vec<SearchHit> = Vec::with_capacity(hits.len());

    let mut sorted = hits;
    sorted.sort_by(|a, b| b.search_score.partial_cmp(&a.search_score).unwrap_or(std::cmp::Ordering::Equal));

    for hit in sorted {
        let key = hit.memory.normalized_content();
        if seen.insert(key) {
            by_key.push(hit);
        }
    }
    by_key
}

/// Final order: score desc, importance desc, created_at desc, memory_id
/// lexicographic order.
fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.search_score
            .partial_cmp(&a.search_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.importance().score().partial_cmp(&a.importance().score()).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.memory_id.to_string().cmp(&b.memory.memory_id.to_string()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Classification, Importance, Retention};
    use chrono::Utc;
    use uuid::Uuid;

    fn hit(content: &str, score: f32, importance: Importance) -> SearchHit {
        SearchHit {
            memory: ProcessedMemory {
                memory_id: Uuid::new_v4(),
                source_turn_id: Uuid::new_v4(),
                namespace: "ns1".to_string(),
                summary: content.to_string(),
                searchable_content: content.to_string(),
                primary_category: Category::Fact,
                importance,
                classification: Classification::Essential,
                promotion_eligible: true,
                duplicate_of: None,
                entities: Vec::new(),
                secondary_categories: Vec::new(),
                retention: Retention::LongTerm,
                created_at: Utc::now(),
                expires_at: None,
            },
            search_strategy: SearchStrategy::Fulltext,
            search_score: score,
        }
    }

    #[test]
    fn dedup_keeps_highest_scoring_copy() {
        let hits = vec![hit("User name is Bob", 0.4, Importance::Low), hit("user name is bob", 0.9, Importance::High)];
        let deduped = dedup_by_content(hits);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].search_score, 0.9);
    }

    #[test]
    fn rank_orders_by_score_then_importance() {
        let mut hits = vec![hit("a", 0.5, Importance::Low), hit("b", 0.5, Importance::High), hit("c", 0.9, Importance::Low)];
        rank(&mut hits);
        assert_eq!(hits[0].memory.searchable_content, "c");
        assert_eq!(hits[1].memory.searchable_content, "b");
    }
}
