//! Conscious Agent: a cooperatively cancellable background task that copies
//! (never moves) promotion-eligible long-term memories into the
//! always-available working set, via an initial pass on startup and a
//! periodic scan afterward.

use crate::models::{Importance, ProcessedMemory, WorkingMemoryItem};
use crate::storage::MemoryStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Backoff applied after a failed pass before retrying, so a transient
/// database outage doesn't spin the agent.
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Owns the agent's background task handle and shutdown flag.
pub struct ConsciousAgent {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ConsciousAgent {
    /// Spawns the agent: an initial pass runs immediately, then a periodic
    /// pass runs every `interval` until `shutdown()` is called. `promotion_notify` lets the Memory
    /// Pipeline wake the agent early when it stores a promotion-eligible
    /// memory, instead of waiting out the full interval.
    pub fn spawn(store: Arc<MemoryStore>, namespace: String, interval: Duration, promotion_notify: Arc<Notify>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = tokio::spawn(async move {
            run(store, namespace, interval, running_clone, promotion_notify).await;
        });

        Self { running, handle: Some(handle) }
    }

    /// Signals the background task to stop after its current pass and waits
    /// for it to exit.
    pub async fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ConsciousAgent {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(store: Arc<MemoryStore>, namespace: String, interval: Duration, running: Arc<AtomicBool>, promotion_notify: Arc<Notify>) {
    info!(namespace, "conscious agent starting initial pass");
    if let Err(e) = run_initial_pass(&store, &namespace).await {
        error!(namespace, error = %e, "conscious agent initial pass failed");
    }

    let mut last_pass = Utc::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; already consumed above

    while running.load(Ordering::Relaxed) {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = promotion_notify.notified() => {
                debug!(namespace, "conscious agent woken early by a promotion-eligible store");
            }
        }

        if !running.load(Ordering::Relaxed) {
            break;
        }
        match run_periodic_pass(&store, &namespace, last_pass).await {
            Ok(promoted) => {
                last_pass = Utc::now();
                debug!(namespace, promoted, "conscious agent periodic pass complete");
            }
            Err(e) => {
                warn!(namespace, error = %e, "conscious agent periodic pass failed, backing off");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
    debug!(namespace, "conscious agent loop exiting");
}

/// Copies every `conscious-info` long-term memory in the namespace into the
/// working set.
async fn run_initial_pass(store: &MemoryStore, namespace: &str) -> crate::error::Result<usize> {
    let candidates = store.conscious_info_memories(namespace).await?;
    promote_all(store, &candidates).await
}

/// Scans long-term memories created since the last pass and promotes any
/// that are eligible.
async fn run_periodic_pass(store: &MemoryStore, namespace: &str, since: DateTime<Utc>) -> crate::error::Result<usize> {
    let candidates = store.promotable_memories_since(namespace, since).await?;
    promote_all(store, &candidates).await
}

/// Copies (never moves) each eligible memory into the working set. The
/// storage layer's `store_working_item` enforces the promotion dedup
/// predicate (existing row in the namespace with `category_primary =
/// 'conscious_context'` and matching `searchable_content` OR `summary`);
/// this function just counts how many new rows actually landed.
async fn promote_all(store: &MemoryStore, candidates: &[ProcessedMemory]) -> crate::error::Result<usize> {
    let mut promoted = 0;
    for memory in candidates {
        if !memory.classification.is_promotable() || memory.is_duplicate() {
            continue;
        }
        let item = working_item_from(memory);
        if store.store_working_item(&item).await? {
            promoted += 1;
        }
    }
    Ok(promoted)
}

fn working_item_from(memory: &ProcessedMemory) -> WorkingMemoryItem {
    WorkingMemoryItem {
        working_id: uuid::Uuid::new_v4(),
        source_memory_id: memory.memory_id,
        namespace: memory.namespace.clone(),
        summary: memory.summary.clone(),
        searchable_content: memory.searchable_content.clone(),
        importance: memory.importance,
        is_permanent: matches!(memory.classification, crate::models::Classification::Essential),
        created_at: Utc::now(),
        expires_at: memory.expires_at,
        access_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Classification, Retention};
    use uuid::Uuid;

    fn memory(classification: Classification, duplicate_of: Option<Uuid>) -> ProcessedMemory {
        ProcessedMemory {
            memory_id: Uuid::new_v4(),
            source_turn_id: Uuid::new_v4(),
            namespace: "ns1".to_string(),
            summary: "s".to_string(),
            searchable_content: "s".to_string(),
            primary_category: Category::Fact,
            importance: Importance::High,
            classification,
            promotion_eligible: true,
            duplicate_of,
            entities: Vec::new(),
            secondary_categories: Vec::new(),
            retention: Retention::LongTerm,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn working_item_inherits_permanence_from_essential_classification() {
        let m = memory(Classification::Essential, None);
        let item = working_item_from(&m);
        assert!(item.is_permanent);
    }

    #[test]
    fn working_item_is_not_permanent_for_conscious_info() {
        let m = memory(Classification::ConsciousInfo, None);
        let item = working_item_from(&m);
        assert!(!item.is_permanent);
    }

    #[tokio::test]
    async fn promote_all_skips_conversational_and_duplicate_memories() {
        let store = MemoryStore::Sqlite(
            crate::storage::sqlite_backend::SqliteBackend::open(&crate::config::Config::default()).unwrap(),
        );
        let candidates = vec![
            memory(Classification::Conversational, None),
            memory(Classification::Essential, Some(Uuid::new_v4())),
        ];
        let promoted = promote_all(&store, &candidates).await.unwrap();
        assert_eq!(promoted, 0);
    }
}
