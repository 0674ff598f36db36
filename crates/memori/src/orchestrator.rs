//! Orchestrator: owns every component's lifecycle and exposes the crate's
//! public API surface (open/enable/disable/record/search/clear/stats).

use crate::agent::ConsciousAgent;
use crate::config::Config;
use crate::context::ContextInjector;
use crate::error::Result;
use crate::interception::{HookKind, InterceptionRegistry};
use crate::models::{ChatTurn, Message};
use crate::pipeline::extraction::{AnalysisProvider, ConversationContext};
use crate::pipeline::MemoryPipeline;
use crate::retrieval::planner::RetrievalPlan;
use crate::retrieval::RetrievalEngine;
use crate::session::SessionTracker;
use crate::storage::{ClearScope, MemoryStats, MemoryStore, SearchHit};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};
use uuid::Uuid;

/// Owns every subsystem and drives the crate's public API. Cheaply
/// cloneable: every field is an `Arc` or copy-cheap handle.
pub struct Orchestrator {
    config: Config,
    store: Arc<MemoryStore>,
    sessions: Arc<SessionTracker>,
    pipeline: Arc<MemoryPipeline>,
    retrieval: Arc<RetrievalEngine>,
    injector: Arc<ContextInjector>,
    interception: Arc<InterceptionRegistry>,
    promotion_notify: Arc<Notify>,
    agent: Arc<Mutex<Option<ConsciousAgent>>>,
}

impl Orchestrator {
    /// `open(config) -> Orchestrator`. Initializes the schema
    /// (if `config.schema_init`) and wires every component; does not start
    /// the Conscious Agent or install hooks yet — that happens in
    /// `enable()`.
    pub fn open(config: Config, provider: Arc<dyn AnalysisProvider>) -> Result<Self> {
        let store = Arc::new(MemoryStore::open(&config)?);
        let sessions = Arc::new(SessionTracker::new(config.max_sessions, config.session_timeout_secs, config.max_history));
        let promotion_notify = Arc::new(Notify::new());

        let retrieval = Arc::new(RetrievalEngine::new(
            config.auto_mode_limit,
            Some(provider.clone()),
            std::time::Duration::from_millis(config.retrieval_timeout_ms),
        ));

        let pipeline = Arc::new(MemoryPipeline::new(
            store.clone(),
            provider,
            config.memory_filters.clone(),
            config.pipeline_queue_high_water_mark,
            promotion_notify.clone(),
            config.conscious_mode,
        ));
        let injector = Arc::new(ContextInjector::new(&config));
        let interception = Arc::new(InterceptionRegistry::new());

        info!(namespace = %config.namespace, conscious_mode = config.conscious_mode, auto_mode = config.auto_mode, "memori orchestrator opened");

        Ok(Self {
            config,
            store,
            sessions,
            pipeline,
            retrieval,
            injector,
            interception,
            promotion_notify,
            agent: Arc::new(Mutex::new(None)),
        })
    }

    /// `Orchestrator.enable(hooks)`: installs the requested
    /// interception hooks and, if `conscious_mode` is on, starts the
    /// Conscious Agent. Idempotent: calling it again while already enabled
    /// re-installs only the hooks not already present and leaves a running
    /// agent alone.
    pub async fn enable(&self, hooks: &[HookKind]) -> Vec<(HookKind, bool)> {
        let results = self.interception.enable(hooks);

        if self.config.conscious_mode {
            let mut agent = self.agent.lock().await;
            if agent.is_none() {
                *agent = Some(ConsciousAgent::spawn(
                    self.store.clone(),
                    self.config.namespace.clone(),
                    std::time::Duration::from_secs(self.config.conscious_agent_interval_secs),
                    self.promotion_notify.clone(),
                ));
                info!(namespace = %self.config.namespace, "conscious agent started");
            }
        }

        results
    }

    /// `Orchestrator.disable()`: uninstalls every hook and cancels the agent. Safe to
    /// call when nothing was ever enabled.
    pub async fn disable(&self) {
        self.interception.disable();
        let mut agent = self.agent.lock().await;
        if let Some(mut running_agent) = agent.take() {
            running_agent.shutdown().await;
            info!(namespace = %self.config.namespace, "conscious agent stopped");
        }
    }

    /// `Orchestrator.record(user-input, ai-output, model, metadata) ->
    /// turn-id`: the explicit recording API, also the common path every
    /// other hook ultimately calls into. Persists the ChatTurn synchronously
    /// and enqueues extraction asynchronously.
    pub async fn record(
        &self,
        session_id: &str,
        user_input: &str,
        ai_output: &str,
        model: &str,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let turn = ChatTurn {
            turn_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            namespace: self.config.namespace.clone(),
            user_input: user_input.to_string(),
            ai_output: ai_output.to_string(),
            model: model.to_string(),
            timestamp: Utc::now(),
            token_count: estimate_token_count(user_input, ai_output),
            metadata,
        };

        let identity = InterceptionRegistry::fallback_identity(session_id, turn.timestamp, user_input);
        if !self.interception.claim_ingestion(&identity) {
            debug!(session_id, "duplicate ingestion for this turn suppressed by interception registry");
            return Ok(turn.turn_id);
        }

        self.store.store_chat(&turn).await?;
        self.sessions.record_turn(session_id, "user", user_input);
        self.sessions.record_turn(session_id, "assistant", ai_output);

        let recent = self.store.recent_undeduped_memories(&self.config.namespace, 10).await.unwrap_or_default();
        let context = ConversationContext {
            session_id: session_id.to_string(),
            model: model.to_string(),
            user_context_hints: Vec::new(),
            recent_summaries: recent.into_iter().map(|m| m.summary).collect(),
        };

        self.pipeline.enqueue(turn.clone(), context);
        Ok(turn.turn_id)
    }

    /// `Orchestrator.search(query, limit) -> [memory]`: runs
    /// the Retrieval Engine's full strategy ladder directly, bypassing the
    /// context-injection merge policy.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<SearchHit> {
        self.retrieval.search_raw(&self.store, query, &self.config.namespace, limit).await
    }

    /// `Orchestrator.clear(type?)`. `None` clears everything.
    pub async fn clear(&self, scope: Option<ClearScope>) -> Result<()> {
        let scope = scope.unwrap_or(ClearScope::All);
        self.store.clear_memory(&self.config.namespace, scope).await
    }

    /// `Orchestrator.stats() -> {chat-count, short-term-count,
    /// long-term-count, per-category}`, extended with the
    /// `dropped_extractions` backpressure counter.
    pub async fn stats(&self) -> Result<MemoryStats> {
        let mut stats = self.store.get_memory_stats(&self.config.namespace).await?;
        stats.dropped_extractions = self.pipeline.dropped_extractions();
        Ok(stats)
    }

    /// `Orchestrator.add-to-messages(messages, user-query?) -> messages`
    ///: runs the Context Injector against
    /// `messages` in place per the configured mode.
    pub async fn add_to_messages(&self, session_id: &str, messages: &mut Vec<Message>, user_query: Option<&str>) {
        let query = user_query.unwrap_or("");
        self.injector
            .inject(
                &self.store,
                &self.retrieval,
                &self.sessions,
                self.config.conscious_mode,
                self.config.auto_mode,
                &self.config.namespace,
                session_id,
                query,
                messages,
            )
            .await;
    }

    /// Convenience wrapper used by interception hooks that only have a raw
    /// query string and no pre-built `RetrievalPlan`.
    pub async fn search_with_plan(&self, plan: &RetrievalPlan, limit: Option<usize>) -> Vec<SearchHit> {
        self.retrieval.execute_search(&self.store, plan, &self.config.namespace, limit).await
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Rough token estimate (character count / 4) used only for the stored
/// `token_count` column; Memori does not own tokenization for any specific
/// model family.
fn estimate_token_count(user_input: &str, ai_output: &str) -> i32 {
    ((user_input.len() + ai_output.len()) / 4) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::pipeline::extraction::AnalysisFailure;

    struct StubProvider;

    #[async_trait]
    impl AnalysisProvider for StubProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
            _response_schema: Option<&str>,
        ) -> std::result::Result<String, AnalysisFailure> {
            Ok(r#"{"summary":"s","searchable_content":"c","category":"fact",
                "importance":"low","classification":"conversational","promotion_eligible":false}"#
                .to_string())
        }
    }

    fn test_config() -> Config {
        Config { database_uri: "sqlite://:memory:".to_string(), namespace: "test".to_string(), ..Config::default() }
    }

    #[tokio::test]
    async fn record_persists_chat_turn_and_enqueues_extraction() {
        let orchestrator = Orchestrator::open(test_config(), Arc::new(StubProvider)).unwrap();
        let turn_id = orchestrator.record("s1", "hello", "hi there", "gpt-test", serde_json::json!({})).await.unwrap();
        assert_ne!(turn_id, Uuid::nil());
    }

    #[tokio::test]
    async fn record_twice_persists_two_distinct_chat_turns() {
        let orchestrator = Orchestrator::open(test_config(), Arc::new(StubProvider)).unwrap();
        let first = orchestrator.record("s1", "hello", "hi", "m", serde_json::json!({})).await.unwrap();
        let second = orchestrator.record("s1", "goodbye", "bye", "m", serde_json::json!({})).await.unwrap();
        assert_ne!(first, second);
        let stats = orchestrator.stats().await.unwrap();
        assert_eq!(stats.chat_count, 2);
    }

    #[tokio::test]
    async fn add_to_messages_is_noop_with_neither_mode_enabled() {
        let mut config = test_config();
        config.conscious_mode = false;
        config.auto_mode = false;
        let orchestrator = Orchestrator::open(config, Arc::new(StubProvider)).unwrap();
        let mut messages = vec![Message::user("hi")];
        orchestrator.add_to_messages("s1", &mut messages, Some("hi")).await;
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn enable_and_disable_round_trip_without_error() {
        let orchestrator = Orchestrator::open(test_config(), Arc::new(StubProvider)).unwrap();
        let results = orchestrator.enable(&[HookKind::Explicit]).await;
        assert!(results.iter().all(|(_, ok)| *ok));
        orchestrator.disable().await;
    }
}
