//! Duplicate detection: normalized-string equality with a
//! token-set Jaccard fallback, plus the promotion-time copy predicate.

use crate::models::ProcessedMemory;
use crate::utils::jaccard_similarity;

/// Similarity threshold above which two memories are considered duplicates.
pub const JACCARD_DEDUP_THRESHOLD: f64 = 0.85;

/// True if `candidate` duplicates `existing` under the dedup rule: exact
/// normalized-string equality, or token-set Jaccard similarity at or above
/// the threshold.
pub fn is_duplicate(candidate: &str, existing: &str) -> bool {
    if crate::models::normalize_for_dedup(candidate) == crate::models::normalize_for_dedup(existing) {
        return true;
    }
    jaccard_similarity(candidate, existing) >= JACCARD_DEDUP_THRESHOLD
}

/// Finds the first memory among `recent` that `candidate` duplicates, if
/// any, comparing `searchable_content`.
pub fn find_duplicate<'a>(candidate: &ProcessedMemory, recent: &'a [ProcessedMemory]) -> Option<&'a ProcessedMemory> {
    recent.iter().find(|existing| is_duplicate(&candidate.searchable_content, &existing.searchable_content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Classification, Importance, Retention};
    use chrono::Utc;
    use uuid::Uuid;

    fn memory_with_content(content: &str) -> ProcessedMemory {
        ProcessedMemory {
            memory_id: Uuid::new_v4(),
            source_turn_id: Uuid::new_v4(),
            namespace: "ns1".to_string(),
            summary: content.to_string(),
            searchable_content: content.to_string(),
            primary_category: Category::Fact,
            importance: Importance::Medium,
            classification: Classification::Essential,
            promotion_eligible: true,
            duplicate_of: None,
            entities: Vec::new(),
            secondary_categories: Vec::new(),
            retention: Retention::LongTerm,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn exact_match_is_duplicate() {
        assert!(is_duplicate("User name is Bob", "user name is bob"));
    }

    #[test]
    fn near_match_above_threshold_is_duplicate() {
        assert!(is_duplicate("User's name is Bob.", "user name is bob"));
    }

    #[test]
    fn unrelated_strings_are_not_duplicates() {
        assert!(!is_duplicate("likes pizza and hiking", "works remotely from Berlin"));
    }

    #[test]
    fn find_duplicate_scans_recent_set() {
        let recent = vec![memory_with_content("works at Acme"), memory_with_content("user name is Bob")];
        let candidate = memory_with_content("user name is bob");
        let found = find_duplicate(&candidate, &recent).unwrap();
        assert_eq!(found.searchable_content, "user name is Bob");
    }

    #[test]
    fn find_duplicate_returns_none_when_no_match() {
        let recent = vec![memory_with_content("works at Acme")];
        let candidate = memory_with_content("prefers dark mode");
        assert!(find_duplicate(&candidate, &recent).is_none());
    }
}
