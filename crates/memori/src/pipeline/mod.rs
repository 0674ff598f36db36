//! Memory Pipeline: the per-turn chain from a captured ChatTurn to a
//! deduplicated, filtered, stored ProcessedMemory, run on a single
//! background tokio task over a bounded channel.

pub mod dedup;
pub mod extraction;

use crate::config::MemoryFilters;
use crate::models::ChatTurn;
use crate::storage::MemoryStore;
use extraction::{AnalysisProvider, ConversationContext};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

struct PipelineJob {
    turn: ChatTurn,
    context: ConversationContext,
}

/// Owns the bounded job queue and background worker task. Dropped turns
/// (queue full) are counted in `dropped_extractions` and surfaced via
/// `Orchestrator::stats()`.
pub struct MemoryPipeline {
    sender: mpsc::Sender<PipelineJob>,
    dropped_extractions: Arc<AtomicI64>,
}

impl MemoryPipeline {
    pub fn new(
        store: Arc<MemoryStore>,
        provider: Arc<dyn AnalysisProvider>,
        filters: MemoryFilters,
        queue_high_water_mark: usize,
        promotion_notify: Arc<Notify>,
        conscious_mode: bool,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_high_water_mark.max(1));
        let dropped_extractions = Arc::new(AtomicI64::new(0));

        tokio::spawn(Self::run(receiver, store, provider, filters, promotion_notify, conscious_mode));

        Self { sender, dropped_extractions }
    }

    /// Enqueues a turn for asynchronous extraction. Never blocks the
    /// caller's critical path; if the queue is full, the turn's ChatTurn
    /// (already written by the caller) is kept but extraction is dropped.
    pub fn enqueue(&self, turn: ChatTurn, context: ConversationContext) {
        if let Err(e) = self.sender.try_send(PipelineJob { turn, context }) {
            self.dropped_extractions.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "pipeline queue at high-water mark, dropping extraction for this turn");
        }
    }

    pub fn dropped_extractions(&self) -> i64 {
        self.dropped_extractions.load(Ordering::Relaxed)
    }

    async fn run(
        mut receiver: mpsc::Receiver<PipelineJob>,
        store: Arc<MemoryStore>,
        provider: Arc<dyn AnalysisProvider>,
        filters: MemoryFilters,
        promotion_notify: Arc<Notify>,
        conscious_mode: bool,
    ) {
        while let Some(job) = receiver.recv().await {
            let turn_id = job.turn.turn_id;
            if let Err(e) = Self::process_job(&store, provider.as_ref(), &filters, &promotion_notify, conscious_mode, job).await {
                warn!(turn_id = %turn_id, error = %e, "memory pipeline dropped extraction for this turn");
            }
        }
        debug!("memory pipeline worker loop exiting (channel closed)");
    }

    async fn process_job(
        store: &Arc<MemoryStore>,
        provider: &dyn AnalysisProvider,
        filters: &MemoryFilters,
        promotion_notify: &Arc<Notify>,
        conscious_mode: bool,
        job: PipelineJob,
    ) -> crate::error::Result<()> {
        let PipelineJob { turn, context } = job;

        let mut memory =
            extraction::extract(provider, &context, turn.turn_id, &turn.namespace, &turn.user_input, &turn.ai_output).await?;

        if !passes_filters(&memory, filters) {
            debug!(turn_id = %turn.turn_id, category = memory.primary_category.as_str(), "memory filtered out, not stored");
            return Ok(());
        }

        let recent = store.recent_undeduped_memories(&turn.namespace, 20).await?;
        if let Some(existing) = dedup::find_duplicate(&memory, &recent) {
            info!(turn_id = %turn.turn_id, duplicate_of = %existing.memory_id, "marking memory as duplicate");
            memory.duplicate_of = Some(existing.memory_id);
        }

        let is_duplicate = memory.duplicate_of.is_some();
        let promotion_eligible = memory.promotion_eligible;
        store.store_processed_memory(&memory).await?;

        if promotion_eligible && !is_duplicate && conscious_mode {
            promotion_notify.notify_one();
        }

        Ok(())
    }
}

fn passes_filters(memory: &crate::models::ProcessedMemory, filters: &MemoryFilters) -> bool {
    if memory.importance.score() < filters.min_importance {
        return false;
    }
    if !filters.category_allow_list.is_empty() && !filters.category_allow_list.iter().any(|c| c == memory.primary_category.as_str())
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Importance, ProcessedMemory};

    fn memory(category: &str, importance: Importance) -> ProcessedMemory {
        use crate::models::{Category, Classification, Retention};
        ProcessedMemory {
            memory_id: uuid::Uuid::new_v4(),
            source_turn_id: uuid::Uuid::new_v4(),
            namespace: "ns1".to_string(),
            summary: "s".to_string(),
            searchable_content: "s".to_string(),
            primary_category: Category::parse(category).unwrap(),
            importance,
            classification: Classification::Essential,
            promotion_eligible: true,
            duplicate_of: None,
            entities: Vec::new(),
            secondary_categories: Vec::new(),
            retention: Retention::LongTerm,
            created_at: chrono::Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn min_importance_filter_drops_low_scores() {
        let filters = MemoryFilters { category_allow_list: Vec::new(), min_importance: 0.6 };
        assert!(!passes_filters(&memory("fact", Importance::Low), &filters));
        assert!(passes_filters(&memory("fact", Importance::High), &filters));
    }

    #[test]
    fn category_allow_list_restricts_categories() {
        let filters = MemoryFilters { category_allow_list: vec!["fact".to_string()], min_importance: 0.0 };
        assert!(passes_filters(&memory("fact", Importance::Low), &filters));
        assert!(!passes_filters(&memory("preference", Importance::Low), &filters));
    }
}
