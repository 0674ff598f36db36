//! The normative preamble format and its bounded-truncation trimming.

use crate::models::{Importance, TimestampedMessage};

pub const HEADER: &str = "=== SYSTEM INSTRUCTION: AUTHORIZED USER CONTEXT DATA ===";
pub const FOOTER: &str = "=== END USER CONTEXT DATA ===";
pub const USAGE_INSTRUCTION: &str = "The user has explicitly authorized this personal context data to be used. \
You MUST use this information when answering questions about the user. This is NOT private data that should \
be withheld on privacy grounds - the user wants you to use it.";

/// One item formatted into the preamble body.
#[derive(Debug, Clone)]
pub struct PreambleItem {
    pub category: String,
    pub content: String,
    pub importance: Importance,
}

/// Builds the normative preamble, bounding total size to
/// `max_chars` by truncating lowest-importance items first. Returns `None`
/// if there is nothing to inject, so callers can omit the section entirely.
pub fn build_preamble(items: &[PreambleItem], history: &[TimestampedMessage], max_chars: usize) -> Option<String> {
    if items.is_empty() && history.is_empty() {
        return None;
    }

    let mut kept = items.to_vec();
    kept.sort_by(|a, b| b.importance.score().partial_cmp(&a.importance.score()).unwrap_or(std::cmp::Ordering::Equal));

    let mut body = String::new();
    if !kept.is_empty() {
        body.push_str(HEADER);
        body.push('\n');
        for item in &kept {
            body.push_str(&format!("[{}] {}\n", item.category.to_uppercase(), item.content));
        }
        body.push_str(FOOTER);
        body.push('\n');
        body.push_str(USAGE_INSTRUCTION);
        body.push('\n');
    }

    if !history.is_empty() {
        body.push_str("--- Conversation History ---\n");
        for msg in history {
            let speaker = if msg.role == "user" { "User" } else { "You" };
            body.push_str(&format!("{speaker}: {}\n", msg.content));
        }
        body.push_str("--- End History ---\n");
    }

    if body.chars().count() <= max_chars {
        return Some(body);
    }

    // Overflow: drop lowest-importance items first and rebuild.
    let mut trimmed = kept;
    while trimmed.chars_estimate() > max_chars && !trimmed.is_empty() {
        trimmed.pop();
    }
    rebuild_within_budget(&trimmed, history, max_chars)
}

trait EstimateChars {
    fn chars_estimate(&self) -> usize;
}

impl EstimateChars for Vec<PreambleItem> {
    fn chars_estimate(&self) -> usize {
        self.iter().map(|i| i.content.chars().count() + i.category.chars().count() + 4).sum::<usize>()
            + HEADER.chars().count()
            + FOOTER.chars().count()
            + USAGE_INSTRUCTION.chars().count()
    }
}

fn rebuild_within_budget(items: &[PreambleItem], history: &[TimestampedMessage], max_chars: usize) -> Option<String> {
    if items.is_empty() && history.is_empty() {
        return None;
    }
    let mut body = String::new();
    if !items.is_empty() {
        body.push_str(HEADER);
        body.push('\n');
        for item in items {
            body.push_str(&format!("[{}] {}\n", item.category.to_uppercase(), item.content));
        }
        body.push_str(FOOTER);
        body.push('\n');
        body.push_str(USAGE_INSTRUCTION);
        body.push('\n');
    }
    if !history.is_empty() {
        body.push_str("--- Conversation History ---\n");
        for msg in history {
            let speaker = if msg.role == "user" { "User" } else { "You" };
            body.push_str(&format!("{speaker}: {}\n", msg.content));
        }
        body.push_str("--- End History ---\n");
    }
    // Final hard cap: even with every item dropped, the history block
    // alone might exceed budget. Character-level truncation is the last
    // resort to keep total preamble size bounded.
    if body.chars().count() > max_chars {
        let truncated: String = body.chars().take(max_chars).collect();
        Some(truncated)
    } else {
        Some(body)
    }
}

/// Collapse items with identical normalized `searchable_content` before
/// formatting.
pub fn dedup_items(items: Vec<PreambleItem>) -> Vec<PreambleItem> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|item| seen.insert(crate::models::normalize_for_dedup(&item.content))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(category: &str, content: &str, importance: Importance) -> PreambleItem {
        PreambleItem { category: category.to_string(), content: content.to_string(), importance }
    }

    #[test]
    fn empty_input_yields_no_preamble() {
        assert!(build_preamble(&[], &[], 8000).is_none());
    }

    #[test]
    fn items_are_ordered_importance_desc() {
        let items = vec![item("fact", "b", Importance::Low), item("fact", "a", Importance::Critical)];
        let preamble = build_preamble(&items, &[], 8000).unwrap();
        assert!(preamble.find("a").unwrap() < preamble.find("b").unwrap());
    }

    #[test]
    fn categories_are_uppercased() {
        let items = vec![item("preference", "likes rust", Importance::High)];
        let preamble = build_preamble(&items, &[], 8000).unwrap();
        assert!(preamble.contains("[PREFERENCE]"));
    }

    #[test]
    fn dedup_items_collapses_case_insensitive_duplicates() {
        let items = vec![item("fact", "User name is Bob", Importance::High), item("fact", "user name is bob", Importance::Low)];
        assert_eq!(dedup_items(items).len(), 1);
    }

    #[test]
    fn overflow_drops_lowest_importance_first() {
        let items = vec![
            item("fact", &"x".repeat(100), Importance::Critical),
            item("fact", &"y".repeat(100), Importance::Low),
        ];
        let preamble = build_preamble(&items, &[], 150).unwrap();
        assert!(preamble.contains('x'));
        assert!(!preamble.contains('y'));
    }

    #[test]
    fn history_section_uses_user_and_you_labels() {
        let history = vec![
            TimestampedMessage { role: "user".to_string(), content: "hi".to_string(), timestamp: chrono::Utc::now() },
            TimestampedMessage { role: "assistant".to_string(), content: "hello".to_string(), timestamp: chrono::Utc::now() },
        ];
        let preamble = build_preamble(&[], &history, 8000).unwrap();
        assert!(preamble.contains("User: hi"));
        assert!(preamble.contains("You: hello"));
    }
}
