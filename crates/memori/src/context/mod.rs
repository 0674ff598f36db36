//! Context Injector: merges retrieved memories into the caller's message
//! list before it reaches the LLM provider, across three modes (conscious,
//! auto, combined) over a single working set / retrieval ladder.

pub mod preamble;

use crate::config::Config;
use crate::models::Message;
use crate::retrieval::RetrievalEngine;
use crate::session::SessionTracker;
use crate::storage::MemoryStore;
use preamble::{build_preamble, dedup_items, PreambleItem};
use std::time::Duration;
use tracing::{debug, warn};

/// Injects memory context into a caller's message list per the mode
/// configured at `open()`.
pub struct ContextInjector {
    max_preamble_chars: usize,
    auto_mode_limit: usize,
    retrieval_timeout: Duration,
}

impl ContextInjector {
    pub fn new(config: &Config) -> Self {
        Self {
            max_preamble_chars: config.max_preamble_chars,
            auto_mode_limit: config.auto_mode_limit,
            retrieval_timeout: Duration::from_millis(config.retrieval_timeout_ms),
        }
    }

    /// Entry point used by `Orchestrator::add_to_messages`.
    /// When both modes are enabled, auto mode wins on every call.
    pub async fn inject(
        &self,
        store: &MemoryStore,
        retrieval: &RetrievalEngine,
        sessions: &SessionTracker,
        conscious_mode: bool,
        auto_mode: bool,
        namespace: &str,
        session_id: &str,
        query: &str,
        messages: &mut Vec<Message>,
    ) {
        if auto_mode {
            self.inject_auto(store, retrieval, sessions, namespace, session_id, query, messages).await;
        } else if conscious_mode {
            self.inject_conscious(store, sessions, namespace, session_id, messages).await;
        }
    }

    /// Conscious mode: one-shot per session, copies the entire working set
    /// in unconditionally. No-op on every call
    /// after the first for a given session.
    pub async fn inject_conscious(
        &self,
        store: &MemoryStore,
        sessions: &SessionTracker,
        namespace: &str,
        session_id: &str,
        messages: &mut Vec<Message>,
    ) {
        if sessions.has_injected_context(session_id) {
            debug!(session_id, "conscious context already injected for this session, skipping");
            return;
        }

        let items = match store.get_working_set(namespace).await {
            Ok(items) => items,
            Err(e) => {
                warn!(namespace, error = %e, "failed to load working set for conscious injection");
                return;
            }
        };

        sessions.mark_context_injected(session_id);

        if items.is_empty() {
            return;
        }

        let preamble_items: Vec<PreambleItem> = items
            .into_iter()
            .map(|item| PreambleItem {
                category: crate::models::WorkingMemoryItem::CATEGORY.to_string(),
                content: item.searchable_content,
                importance: item.importance,
            })
            .collect();

        let history = sessions.recent_history(session_id);
        if let Some(preamble) = build_preamble(&dedup_items(preamble_items), &history, self.max_preamble_chars) {
            merge_preamble(messages, &preamble);
        }
    }

    /// Auto mode: retrieves per-request against `query` and injects every
    /// call, guarded against re-entrant retrieval triggered by the
    /// injection itself.
    pub async fn inject_auto(
        &self,
        store: &MemoryStore,
        retrieval: &RetrievalEngine,
        sessions: &SessionTracker,
        namespace: &str,
        session_id: &str,
        query: &str,
        messages: &mut Vec<Message>,
    ) {
        if query.trim().is_empty() {
            return;
        }

        if !sessions.try_enter_retrieval(session_id) {
            debug!(session_id, "already inside auto-ingest retrieval for this session, skipping re-entrant call");
            return;
        }

        let search = retrieval.search_raw(store, query, namespace, Some(self.auto_mode_limit));
        let hits = match tokio::time::timeout(self.retrieval_timeout, search).await {
            Ok(hits) => hits,
            Err(_) => {
                warn!(namespace, session_id, "auto-mode retrieval exceeded soft timeout, skipping injection for this turn");
                sessions.exit_retrieval(session_id);
                return;
            }
        };
        sessions.exit_retrieval(session_id);

        if hits.is_empty() {
            return;
        }

        let preamble_items: Vec<PreambleItem> = hits
            .into_iter()
            .map(|hit| PreambleItem {
                category: hit.memory.primary_category.as_str().to_string(),
                content: hit.memory.searchable_content,
                importance: hit.memory.importance,
            })
            .collect();

        let history = sessions.recent_history(session_id);
        if let Some(preamble) = build_preamble(&dedup_items(preamble_items), &history, self.max_preamble_chars) {
            merge_preamble(messages, &preamble);
        }
    }
}

/// Merge policy: prepend to an existing leading system
/// message, or insert a new one at the front.
fn merge_preamble(messages: &mut Vec<Message>, preamble: &str) {
    match messages.first_mut() {
        Some(first) if first.role == "system" => {
            first.content = format!("{preamble}\n\n{}", first.content);
        }
        _ => {
            messages.insert(0, Message::system(preamble.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preamble_prepends_to_existing_system_message() {
        let mut messages = vec![Message::system("be concise"), Message::user("hi")];
        merge_preamble(&mut messages, "=== CONTEXT ===");
        assert!(messages[0].content.starts_with("=== CONTEXT ==="));
        assert!(messages[0].content.ends_with("be concise"));
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn merge_preamble_inserts_new_system_message_when_absent() {
        let mut messages = vec![Message::user("hi")];
        merge_preamble(&mut messages, "=== CONTEXT ===");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }
}
