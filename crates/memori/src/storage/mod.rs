//! Storage Layer: a dialect-agnostic API over SQLite, MySQL, and
//! Postgres, each with five tables (chat_history, short_term_memory,
//! long_term_memory, memory_entities, memory_categories) and a
//! dialect-native full-text index, dispatched through a single
//! facade, `MemoryStore`.

pub mod mysql_backend;
pub mod postgres_backend;
pub mod queries;
pub mod rows;
pub mod schema;
pub mod sqlite_backend;

use crate::config::{Config, Dialect};
use crate::error::{MemoriError, Result};
use crate::models::{ChatTurn, ProcessedMemory, WorkingMemoryItem};
pub use rows::{DatabaseInfo, MemoryStats, SearchHit, SearchStrategy};

/// What to clear with `Orchestrator.clear(type?)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Short,
    Long,
    All,
}

/// Dialect-agnostic facade. Each dialect stores its pooled connection behind
/// its own backend struct; `MemoryStore` just dispatches.
pub enum MemoryStore {
    Sqlite(sqlite_backend::SqliteBackend),
    MySql(mysql_backend::MySqlBackend),
    Postgres(postgres_backend::PostgresBackend),
}

impl MemoryStore {
    pub fn open(config: &Config) -> Result<Self> {
        match config.database_dialect()? {
            Dialect::Sqlite => Ok(MemoryStore::Sqlite(sqlite_backend::SqliteBackend::open(config)?)),
            Dialect::MySql => Ok(MemoryStore::MySql(mysql_backend::MySqlBackend::open(config)?)),
            Dialect::Postgres => Ok(MemoryStore::Postgres(postgres_backend::PostgresBackend::open(config)?)),
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            MemoryStore::Sqlite(_) => Dialect::Sqlite,
            MemoryStore::MySql(_) => Dialect::MySql,
            MemoryStore::Postgres(_) => Dialect::Postgres,
        }
    }

    pub async fn store_chat(&self, turn: &ChatTurn) -> Result<()> {
        match self {
            MemoryStore::Sqlite(b) => b.store_chat(turn).await,
            MemoryStore::MySql(b) => b.store_chat(turn).await,
            MemoryStore::Postgres(b) => b.store_chat(turn).await,
        }
    }

    /// Stores a ProcessedMemory, its entities, and its secondary categories
    /// in a single transaction.
    pub async fn store_processed_memory(&self, memory: &ProcessedMemory) -> Result<()> {
        match self {
            MemoryStore::Sqlite(b) => b.store_processed_memory(memory).await,
            MemoryStore::MySql(b) => b.store_processed_memory(memory).await,
            MemoryStore::Postgres(b) => b.store_processed_memory(memory).await,
        }
    }

    /// Inserts a WorkingMemoryItem iff the (namespace, normalized content)
    /// dedup predicate allows it. Returns `true` if a row was inserted.
    pub async fn store_working_item(&self, item: &WorkingMemoryItem) -> Result<bool> {
        match self {
            MemoryStore::Sqlite(b) => b.store_working_item(item).await,
            MemoryStore::MySql(b) => b.store_working_item(item).await,
            MemoryStore::Postgres(b) => b.store_working_item(item).await,
        }
    }

    pub async fn search_memories(
        &self,
        query: &str,
        namespace: &str,
        category_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        match self {
            MemoryStore::Sqlite(b) => b.search_memories(query, namespace, category_filter, limit).await,
            MemoryStore::MySql(b) => b.search_memories(query, namespace, category_filter, limit).await,
            MemoryStore::Postgres(b) => b.search_memories(query, namespace, category_filter, limit).await,
        }
    }

    pub async fn entity_search(&self, tokens: &[String], namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        match self {
            MemoryStore::Sqlite(b) => b.entity_search(tokens, namespace, limit).await,
            MemoryStore::MySql(b) => b.entity_search(tokens, namespace, limit).await,
            MemoryStore::Postgres(b) => b.entity_search(tokens, namespace, limit).await,
        }
    }

    pub async fn recent_memories(&self, namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        match self {
            MemoryStore::Sqlite(b) => b.recent_memories(namespace, limit).await,
            MemoryStore::MySql(b) => b.recent_memories(namespace, limit).await,
            MemoryStore::Postgres(b) => b.recent_memories(namespace, limit).await,
        }
    }

    pub async fn get_chat_history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        match self {
            MemoryStore::Sqlite(b) => b.get_chat_history(session_id, limit).await,
            MemoryStore::MySql(b) => b.get_chat_history(session_id, limit).await,
            MemoryStore::Postgres(b) => b.get_chat_history(session_id, limit).await,
        }
    }

    pub async fn get_working_set(&self, namespace: &str) -> Result<Vec<WorkingMemoryItem>> {
        match self {
            MemoryStore::Sqlite(b) => b.get_working_set(namespace).await,
            MemoryStore::MySql(b) => b.get_working_set(namespace).await,
            MemoryStore::Postgres(b) => b.get_working_set(namespace).await,
        }
    }

    /// Long-term memories eligible for promotion, created after `since`, not
    /// yet copied to the working set.
    pub async fn promotable_memories_since(
        &self,
        namespace: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<ProcessedMemory>> {
        match self {
            MemoryStore::Sqlite(b) => b.promotable_memories_since(namespace, since).await,
            MemoryStore::MySql(b) => b.promotable_memories_since(namespace, since).await,
            MemoryStore::Postgres(b) => b.promotable_memories_since(namespace, since).await,
        }
    }

    /// All `conscious-info` long-term memories, for the agent's initial
    /// pass.
    pub async fn conscious_info_memories(&self, namespace: &str) -> Result<Vec<ProcessedMemory>> {
        match self {
            MemoryStore::Sqlite(b) => b.conscious_info_memories(namespace).await,
            MemoryStore::MySql(b) => b.conscious_info_memories(namespace).await,
            MemoryStore::Postgres(b) => b.conscious_info_memories(namespace).await,
        }
    }

    /// Recent un-deduped long-term memories in the namespace, for the
    /// pipeline's dedup comparison.
    pub async fn recent_undeduped_memories(&self, namespace: &str, limit: usize) -> Result<Vec<ProcessedMemory>> {
        match self {
            MemoryStore::Sqlite(b) => b.recent_undeduped_memories(namespace, limit).await,
            MemoryStore::MySql(b) => b.recent_undeduped_memories(namespace, limit).await,
            MemoryStore::Postgres(b) => b.recent_undeduped_memories(namespace, limit).await,
        }
    }

    pub async fn get_memory_stats(&self, namespace: &str) -> Result<MemoryStats> {
        match self {
            MemoryStore::Sqlite(b) => b.get_memory_stats(namespace).await,
            MemoryStore::MySql(b) => b.get_memory_stats(namespace).await,
            MemoryStore::Postgres(b) => b.get_memory_stats(namespace).await,
        }
    }

    pub async fn clear_memory(&self, namespace: &str, scope: ClearScope) -> Result<()> {
        match self {
            MemoryStore::Sqlite(b) => b.clear_memory(namespace, scope).await,
            MemoryStore::MySql(b) => b.clear_memory(namespace, scope).await,
            MemoryStore::Postgres(b) => b.clear_memory(namespace, scope).await,
        }
    }

    pub fn get_database_info(&self) -> DatabaseInfo {
        match self {
            MemoryStore::Sqlite(b) => b.get_database_info(),
            MemoryStore::MySql(b) => b.get_database_info(),
            MemoryStore::Postgres(b) => b.get_database_info(),
        }
    }
}

pub(crate) fn db_err(context: &str, e: impl std::fmt::Display) -> MemoriError {
    MemoriError::database(format!("{context}: {e}"))
}
