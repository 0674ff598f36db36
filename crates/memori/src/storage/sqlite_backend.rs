//! SQLite backend for the Storage Layer: full CRUD plus FTS5 full-text
//! search over an r2d2-pooled connection.

use crate::config::Config;
use crate::error::{MemoriError, Result};
use crate::models::{ChatTurn, ProcessedMemory, WorkingMemoryItem};
use crate::storage::queries;
use crate::storage::rows::{DatabaseInfo, MemoryStats, SearchHit, SearchStrategy};
use crate::storage::schema::SQLITE_SCHEMA_SQL;
use crate::storage::{db_err, ClearScope};
use crate::utils::tokenize;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SqliteBackend {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteBackend {
    pub fn open(config: &Config) -> Result<Self> {
        let uri = crate::config::DatabaseUri::parse(&config.database_uri)?;
        let path = uri.sqlite_path.unwrap_or_else(|| ":memory:".to_string());

        let manager = if path == ":memory:" {
            SqliteConnectionManager::memory()
        } else {
            if let Some(parent) = std::path::Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| MemoriError::database(format!("failed to create db directory: {e}")))?;
                }
            }
            SqliteConnectionManager::file(&path)
        };

        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| MemoriError::database(format!("failed to create sqlite pool: {e}")))?;

        {
            let conn = pool.get()?;
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
                .or_else(|_| conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;"))?;
            if config.schema_init {
                conn.execute_batch(SQLITE_SCHEMA_SQL)?;
                info!("sqlite schema initialized at {}", path);
            } else {
                debug!("schema_init disabled, assuming sqlite schema pre-exists");
            }
        }

        Ok(Self { pool: Arc::new(pool) })
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub async fn store_chat(&self, turn: &ChatTurn) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO chat_history (turn_id, session_id, namespace, user_input, ai_output, model, timestamp, tokens, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                turn.turn_id.to_string(),
                turn.session_id,
                turn.namespace,
                turn.user_input,
                turn.ai_output,
                turn.model,
                turn.timestamp.to_rfc3339(),
                turn.token_count,
                serde_json::to_string(&turn.metadata)?,
            ],
        )
        .map_err(|e| db_err("store_chat", e))?;
        Ok(())
    }

    pub async fn store_processed_memory(&self, memory: &ProcessedMemory) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction().map_err(|e| db_err("store_processed_memory begin", e))?;

        let use_short_term = memory.classification == crate::models::Classification::Conversational
            && memory.retention == crate::models::Retention::ShortTerm;

        let processed_data = serde_json::to_string(memory)?;
        let memory_id = memory.memory_id.to_string();

        let insert_result = if use_short_term {
            tx.execute(
                "INSERT INTO short_term_memory
                 (memory_id, namespace, source_memory_id, processed_data, importance, category_primary,
                  retention_type, created_at, expires_at, searchable_content, summary, is_permanent, access_count)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, 0)",
                params![
                    memory_id,
                    memory.namespace,
                    processed_data,
                    memory.importance.score(),
                    memory.primary_category.as_str(),
                    "short-term",
                    memory.created_at.to_rfc3339(),
                    memory.expires_at.map(|d| d.to_rfc3339()),
                    memory.searchable_content,
                    memory.summary,
                ],
            )
        } else {
            tx.execute(
                "INSERT INTO long_term_memory
                 (memory_id, namespace, source_turn_id, processed_data, importance, category_primary,
                  classification, promotion_eligible, duplicate_of, processed_for_duplicates,
                  retention_type, created_at, expires_at, searchable_content, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11, ?12, ?13, ?14)",
                params![
                    memory_id,
                    memory.namespace,
                    memory.source_turn_id.to_string(),
                    processed_data,
                    memory.importance.score(),
                    memory.primary_category.as_str(),
                    memory.classification.as_str(),
                    memory.promotion_eligible,
                    memory.duplicate_of.map(|d| d.to_string()),
                    "long-term",
                    memory.created_at.to_rfc3339(),
                    memory.expires_at.map(|d| d.to_rfc3339()),
                    memory.searchable_content,
                    memory.summary,
                ],
            )
        };

        match insert_result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                debug!(memory_id = %memory.memory_id, "memory already present, treating as success");
                tx.rollback().map_err(|e| db_err("store_processed_memory rollback", e))?;
                return Ok(());
            }
            Err(e) => return Err(db_err("store_processed_memory insert", e)),
        }

        for entity in &memory.entities {
            tx.execute(
                "INSERT INTO memory_entities (entity_id, memory_id, entity_type, entity_value, occurrence_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entity.entity_id.to_string(),
                    entity.memory_id.to_string(),
                    entity.entity_type.as_str(),
                    entity.entity_value,
                    entity.occurrence_count,
                ],
            )
            .map_err(|e| db_err("store entity", e))?;
        }

        for tag in &memory.secondary_categories {
            tx.execute(
                "INSERT INTO memory_categories (memory_id, category, confidence) VALUES (?1, ?2, ?3)",
                params![tag.memory_id.to_string(), tag.category, tag.confidence],
            )
            .map_err(|e| db_err("store category tag", e))?;
        }

        tx.commit().map_err(|e| db_err("store_processed_memory commit", e))?;
        Ok(())
    }

    pub async fn store_working_item(&self, item: &WorkingMemoryItem) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction().map_err(|e| db_err("store_working_item begin", e))?;

        // Promotion dedup predicate: skip if a row already exists
        // for this namespace with category_primary = 'conscious_context'
        // AND (searchable_content equal OR summary equal).
        let existing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM short_term_memory
                 WHERE namespace = ?1 AND category_primary = 'conscious_context'
                   AND (searchable_content = ?2 OR summary = ?3)",
                params![item.namespace, item.searchable_content, item.summary],
                |row| row.get(0),
            )
            .map_err(|e| db_err("working item dedup check", e))?;

        if existing > 0 {
            debug!(namespace = %item.namespace, "working item already present, skipping copy");
            tx.rollback().map_err(|e| db_err("store_working_item rollback", e))?;
            return Ok(false);
        }

        let processed_data = serde_json::to_string(item)?;
        tx.execute(
            "INSERT INTO short_term_memory
             (memory_id, namespace, source_memory_id, processed_data, importance, category_primary,
              retention_type, created_at, expires_at, searchable_content, summary, is_permanent, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 'conscious_context', ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                item.working_id.to_string(),
                item.namespace,
                item.source_memory_id.to_string(),
                processed_data,
                item.importance.score(),
                if item.is_permanent { "permanent" } else { "short-term" },
                item.created_at.to_rfc3339(),
                item.expires_at.map(|d| d.to_rfc3339()),
                item.searchable_content,
                item.summary,
                item.is_permanent,
                item.access_count,
            ],
        )
        .map_err(|e| db_err("insert working item", e))?;

        tx.commit().map_err(|e| db_err("store_working_item commit", e))?;
        Ok(true)
    }

    pub async fn search_memories(
        &self,
        query: &str,
        namespace: &str,
        category_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.get_conn()?;
        let mut hits = self.fulltext_search(&conn, query, namespace, limit)?;
        if hits.is_empty() {
            hits = self.keyword_like_search(&conn, query, namespace, limit)?;
        }
        if let Some(cat) = category_filter {
            hits.extend(self.category_search(&conn, cat, namespace, limit)?);
        }
        Ok(hits)
    }

    fn fulltext_search(&self, conn: &Connection, query: &str, namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = tokens
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ");

        let mut stmt = match conn.prepare(queries::SQLITE_FULLTEXT_QUERY) {
            Ok(s) => s,
            Err(e) => {
                warn!("fulltext search unavailable, skipping: {e}");
                return Ok(Vec::new());
            }
        };
        let rows = stmt.query_map(params![match_expr, namespace, limit as i64], |row| {
            let rank: f64 = row.get(14)?;
            Ok((row_to_memory(row)?, rank))
        });
        let rows = match rows {
            Ok(r) => r,
            Err(e) => {
                warn!("fulltext search query failed, skipping: {e}");
                return Ok(Vec::new());
            }
        };
        let mut hits = Vec::new();
        for row in rows {
            let (memory, rank) = row.map_err(|e| db_err("fulltext row", e))?;
            hits.push(SearchHit {
                memory,
                search_strategy: SearchStrategy::Fulltext,
                search_score: queries::normalize_rank(rank, true),
            });
        }
        Ok(hits)
    }

    fn keyword_like_search(&self, conn: &Connection, query: &str, namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT memory_id, namespace, source_turn_id, processed_data, importance,
                    category_primary, classification, promotion_eligible, duplicate_of,
                    retention_type, created_at, expires_at, searchable_content, summary
             FROM long_term_memory WHERE namespace = ?1 AND duplicate_of IS NULL AND (",
        );
        let clauses: Vec<String> = (0..tokens.len())
            .map(|i| format!("LOWER(searchable_content) LIKE ?{} OR LOWER(summary) LIKE ?{}", i + 2, i + 2))
            .collect();
        sql.push_str(&clauses.join(" OR "));
        sql.push_str(") ORDER BY created_at DESC LIMIT ?");
        let limit_param = tokens.len() + 2;
        sql = sql.replace("LIMIT ?", &format!("LIMIT ?{limit_param}"));

        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("keyword search prepare", e))?;
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(namespace.to_string())];
        for t in &tokens {
            sql_params.push(Box::new(format!("%{t}%")));
        }
        sql_params.push(Box::new(limit as i64));
        let param_refs: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|p| p.as_ref()).collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(param_refs))
            .map_err(|e| db_err("keyword search query", e))?;

        let total_tokens = tokens.len() as f32;
        let mut hits = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("keyword search row", e))? {
            let memory = row_to_memory(row).map_err(|e| db_err("keyword search row map", e))?;
            let haystack = format!("{} {}", memory.searchable_content, memory.summary).to_lowercase();
            let matching = tokens.iter().filter(|t| haystack.contains(t.as_str())).count() as f32;
            hits.push(SearchHit {
                memory,
                search_strategy: SearchStrategy::KeywordLike,
                search_score: if total_tokens > 0.0 { matching / total_tokens } else { 0.0 },
            });
        }
        Ok(hits)
    }

    fn category_search(&self, conn: &Connection, category: &str, namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut stmt = conn
            .prepare(
                "SELECT memory_id, namespace, source_turn_id, processed_data, importance,
                        category_primary, classification, promotion_eligible, duplicate_of,
                        retention_type, created_at, expires_at, searchable_content, summary
                 FROM long_term_memory
                 WHERE namespace = ?1 AND category_primary = ?2 AND duplicate_of IS NULL
                 ORDER BY importance DESC, created_at DESC LIMIT ?3",
            )
            .map_err(|e| db_err("category search prepare", e))?;
        let mut rows = stmt
            .query(params![namespace, category, limit as i64])
            .map_err(|e| db_err("category search query", e))?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("category search row", e))? {
            hits.push(SearchHit {
                memory: row_to_memory(row).map_err(|e| db_err("category search row map", e))?,
                search_strategy: SearchStrategy::Category,
                search_score: 1.0,
            });
        }
        Ok(hits)
    }

    pub async fn entity_search(&self, tokens: &[String], namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let placeholders: Vec<String> = (0..tokens.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "SELECT DISTINCT l.memory_id, l.namespace, l.source_turn_id, l.processed_data, l.importance,
                    l.category_primary, l.classification, l.promotion_eligible, l.duplicate_of,
                    l.retention_type, l.created_at, l.expires_at, l.searchable_content, l.summary
             FROM long_term_memory l
             JOIN memory_entities e ON e.memory_id = l.memory_id
             WHERE l.namespace = ?1 AND l.duplicate_of IS NULL AND e.entity_value IN ({})
             ORDER BY l.importance DESC, l.created_at DESC
             LIMIT ?{}",
            placeholders.join(","),
            tokens.len() + 2,
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("entity search prepare", e))?;
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(namespace.to_string())];
        for t in tokens {
            sql_params.push(Box::new(t.clone()));
        }
        sql_params.push(Box::new(limit as i64));
        let param_refs: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|p| p.as_ref()).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(param_refs))
            .map_err(|e| db_err("entity search query", e))?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("entity search row", e))? {
            hits.push(SearchHit {
                memory: row_to_memory(row).map_err(|e| db_err("entity search row map", e))?,
                search_strategy: SearchStrategy::Entity,
                search_score: 0.6,
            });
        }
        Ok(hits)
    }

    pub async fn recent_memories(&self, namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT memory_id, namespace, source_turn_id, processed_data, importance,
                        category_primary, classification, promotion_eligible, duplicate_of,
                        retention_type, created_at, expires_at, searchable_content, summary
                 FROM long_term_memory
                 WHERE namespace = ?1 AND duplicate_of IS NULL
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| db_err("recent memories prepare", e))?;
        let mut rows = stmt
            .query(params![namespace, limit as i64])
            .map_err(|e| db_err("recent memories query", e))?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("recent memories row", e))? {
            hits.push(SearchHit {
                memory: row_to_memory(row).map_err(|e| db_err("recent memories row map", e))?,
                search_strategy: SearchStrategy::RecentFallback,
                search_score: 0.0,
            });
        }
        Ok(hits)
    }

    pub async fn get_chat_history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT turn_id, session_id, namespace, user_input, ai_output, model, timestamp, tokens, metadata
                 FROM chat_history WHERE session_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )
            .map_err(|e| db_err("chat history prepare", e))?;
        let mut rows = stmt
            .query(params![session_id, limit as i64])
            .map_err(|e| db_err("chat history query", e))?;
        let mut turns = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("chat history row", e))? {
            turns.push(row_to_chat_turn(row).map_err(|e| db_err("chat history row map", e))?);
        }
        turns.reverse();
        Ok(turns)
    }

    pub async fn get_working_set(&self, namespace: &str) -> Result<Vec<WorkingMemoryItem>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT processed_data FROM short_term_memory
                 WHERE namespace = ?1 AND category_primary = 'conscious_context'
                 ORDER BY importance DESC, created_at DESC",
            )
            .map_err(|e| db_err("working set prepare", e))?;
        let mut rows = stmt.query(params![namespace]).map_err(|e| db_err("working set query", e))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("working set row", e))? {
            let data: String = row.get(0)?;
            items.push(serde_json::from_str(&data)?);
        }
        Ok(items)
    }

    pub async fn promotable_memories_since(&self, namespace: &str, since: DateTime<Utc>) -> Result<Vec<ProcessedMemory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT memory_id, namespace, source_turn_id, processed_data, importance,
                        category_primary, classification, promotion_eligible, duplicate_of,
                        retention_type, created_at, expires_at, searchable_content, summary
                 FROM long_term_memory
                 WHERE namespace = ?1 AND promotion_eligible = 1 AND duplicate_of IS NULL AND created_at > ?2
                 ORDER BY importance DESC, created_at DESC",
            )
            .map_err(|e| db_err("promotable prepare", e))?;
        let mut rows = stmt
            .query(params![namespace, since.to_rfc3339()])
            .map_err(|e| db_err("promotable query", e))?;
        let mut memories = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("promotable row", e))? {
            memories.push(row_to_memory(row).map_err(|e| db_err("promotable row map", e))?);
        }
        Ok(memories)
    }

    pub async fn conscious_info_memories(&self, namespace: &str) -> Result<Vec<ProcessedMemory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT memory_id, namespace, source_turn_id, processed_data, importance,
                        category_primary, classification, promotion_eligible, duplicate_of,
                        retention_type, created_at, expires_at, searchable_content, summary
                 FROM long_term_memory
                 WHERE namespace = ?1 AND classification = 'conscious-info' AND duplicate_of IS NULL
                 ORDER BY importance DESC, created_at DESC",
            )
            .map_err(|e| db_err("conscious info prepare", e))?;
        let mut rows = stmt.query(params![namespace]).map_err(|e| db_err("conscious info query", e))?;
        let mut memories = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("conscious info row", e))? {
            memories.push(row_to_memory(row).map_err(|e| db_err("conscious info row map", e))?);
        }
        Ok(memories)
    }

    pub async fn recent_undeduped_memories(&self, namespace: &str, limit: usize) -> Result<Vec<ProcessedMemory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT memory_id, namespace, source_turn_id, processed_data, importance,
                        category_primary, classification, promotion_eligible, duplicate_of,
                        retention_type, created_at, expires_at, searchable_content, summary
                 FROM long_term_memory
                 WHERE namespace = ?1 AND duplicate_of IS NULL
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| db_err("recent undeduped prepare", e))?;
        let mut rows = stmt
            .query(params![namespace, limit as i64])
            .map_err(|e| db_err("recent undeduped query", e))?;
        let mut memories = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("recent undeduped row", e))? {
            memories.push(row_to_memory(row).map_err(|e| db_err("recent undeduped row map", e))?);
        }
        Ok(memories)
    }

    pub async fn get_memory_stats(&self, namespace: &str) -> Result<MemoryStats> {
        let conn = self.get_conn()?;
        let chat_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_history WHERE namespace = ?1", [namespace], |r| r.get(0))
            .map_err(|e| db_err("stats chat_count", e))?;
        let short_term_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM short_term_memory WHERE namespace = ?1 AND category_primary != 'conscious_context'",
                [namespace],
                |r| r.get(0),
            )
            .map_err(|e| db_err("stats short_term_count", e))?;
        let long_term_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM long_term_memory WHERE namespace = ?1 AND duplicate_of IS NULL",
                [namespace],
                |r| r.get(0),
            )
            .map_err(|e| db_err("stats long_term_count", e))?;
        let working_set_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM short_term_memory WHERE namespace = ?1 AND category_primary = 'conscious_context'",
                [namespace],
                |r| r.get(0),
            )
            .map_err(|e| db_err("stats working_set_count", e))?;

        let mut per_category = HashMap::new();
        let mut stmt = conn
            .prepare(
                "SELECT category_primary, COUNT(*) FROM long_term_memory WHERE namespace = ?1 AND duplicate_of IS NULL GROUP BY category_primary",
            )
            .map_err(|e| db_err("stats per_category prepare", e))?;
        let mut rows = stmt.query(params![namespace]).map_err(|e| db_err("stats per_category query", e))?;
        while let Some(row) = rows.next().map_err(|e| db_err("stats per_category row", e))? {
            let cat: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            per_category.insert(cat, count);
        }

        Ok(MemoryStats {
            chat_count,
            short_term_count,
            long_term_count,
            working_set_count,
            per_category,
            dropped_extractions: 0,
        })
    }

    pub async fn clear_memory(&self, namespace: &str, scope: ClearScope) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction().map_err(|e| db_err("clear_memory begin", e))?;
        match scope {
            ClearScope::Short => {
                tx.execute("DELETE FROM short_term_memory WHERE namespace = ?1", [namespace])
                    .map_err(|e| db_err("clear short_term_memory", e))?;
            }
            ClearScope::Long => {
                tx.execute(
                    "DELETE FROM memory_entities WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?1)",
                    [namespace],
                )
                .map_err(|e| db_err("clear memory_entities", e))?;
                tx.execute(
                    "DELETE FROM memory_categories WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?1)",
                    [namespace],
                )
                .map_err(|e| db_err("clear memory_categories", e))?;
                tx.execute("DELETE FROM long_term_memory WHERE namespace = ?1", [namespace])
                    .map_err(|e| db_err("clear long_term_memory", e))?;
            }
            ClearScope::All => {
                tx.execute("DELETE FROM chat_history WHERE namespace = ?1", [namespace])
                    .map_err(|e| db_err("clear chat_history", e))?;
                tx.execute("DELETE FROM short_term_memory WHERE namespace = ?1", [namespace])
                    .map_err(|e| db_err("clear short_term_memory", e))?;
                tx.execute(
                    "DELETE FROM memory_entities WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?1)",
                    [namespace],
                )
                .map_err(|e| db_err("clear memory_entities", e))?;
                tx.execute(
                    "DELETE FROM memory_categories WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?1)",
                    [namespace],
                )
                .map_err(|e| db_err("clear memory_categories", e))?;
                tx.execute("DELETE FROM long_term_memory WHERE namespace = ?1", [namespace])
                    .map_err(|e| db_err("clear long_term_memory", e))?;
            }
        }
        tx.commit().map_err(|e| db_err("clear_memory commit", e))?;
        info!(namespace, scope = ?format!("{scope:?}"), "cleared memory");
        Ok(())
    }

    pub fn get_database_info(&self) -> DatabaseInfo {
        DatabaseInfo { dialect: "sqlite", fulltext_index: "fts5" }
    }
}

fn row_to_memory(row: &Row) -> rusqlite::Result<ProcessedMemory> {
    let processed_data: String = row.get(3)?;
    let mut memory: ProcessedMemory = serde_json::from_str(&processed_data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    // The `duplicate_of` column is the canonical source of truth once dedup
    // has run post-insert; the JSON blob is the
    // as-extracted snapshot and is not re-serialized on update.
    let duplicate_of: Option<String> = row.get(8)?;
    memory.duplicate_of = duplicate_of.and_then(|s| Uuid::parse_str(&s).ok());
    Ok(memory)
}

fn row_to_chat_turn(row: &Row) -> rusqlite::Result<ChatTurn> {
    let turn_id: String = row.get(0)?;
    let timestamp: String = row.get(6)?;
    let metadata: String = row.get(8)?;
    Ok(ChatTurn {
        turn_id: Uuid::parse_str(&turn_id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        session_id: row.get(1)?,
        namespace: row.get(2)?,
        user_input: row.get(3)?,
        ai_output: row.get(4)?,
        model: row.get(5)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?,
        token_count: row.get(7)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::*;

    fn test_config() -> Config {
        Config { database_uri: "sqlite://".to_string(), namespace: "test".to_string(), ..Config::default() }
    }

    fn sample_memory(namespace: &str, content: &str) -> ProcessedMemory {
        ProcessedMemory {
            memory_id: Uuid::new_v4(),
            source_turn_id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            summary: content.to_string(),
            searchable_content: content.to_string(),
            primary_category: Category::Fact,
            importance: Importance::High,
            classification: Classification::ConsciousInfo,
            promotion_eligible: true,
            duplicate_of: None,
            entities: Vec::new(),
            secondary_categories: Vec::new(),
            retention: Retention::LongTerm,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn store_and_search_round_trips() {
        let backend = SqliteBackend::open(&test_config()).unwrap();
        let mem = sample_memory("test", "user name is Alice and she loves kubernetes");
        backend.store_processed_memory(&mem).await.unwrap();

        let hits = backend.search_memories("kubernetes", "test", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.memory_id, mem.memory_id);
    }

    #[tokio::test]
    async fn search_respects_namespace_partitioning() {
        let backend = SqliteBackend::open(&test_config()).unwrap();
        backend.store_processed_memory(&sample_memory("ns1", "loves pytorch")).await.unwrap();
        backend.store_processed_memory(&sample_memory("ns2", "loves pytorch")).await.unwrap();

        let hits = backend.search_memories("pytorch", "ns1", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.namespace, "ns1");
    }

    #[tokio::test]
    async fn working_item_dedup_prevents_double_insert() {
        let backend = SqliteBackend::open(&test_config()).unwrap();
        let item = WorkingMemoryItem {
            working_id: Uuid::new_v4(),
            source_memory_id: Uuid::new_v4(),
            namespace: "test".to_string(),
            summary: "user name is Bob".to_string(),
            searchable_content: "user name is Bob".to_string(),
            importance: Importance::Critical,
            is_permanent: true,
            created_at: Utc::now(),
            expires_at: None,
            access_count: 0,
        };
        let first = backend.store_working_item(&item).await.unwrap();
        assert!(first);

        let mut dup = item.clone();
        dup.working_id = Uuid::new_v4();
        let second = backend.store_working_item(&dup).await.unwrap();
        assert!(!second);

        let set = backend.get_working_set("test").await.unwrap();
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn clear_all_zeroes_stats() {
        let backend = SqliteBackend::open(&test_config()).unwrap();
        backend.store_processed_memory(&sample_memory("test", "something memorable")).await.unwrap();
        backend
            .store_chat(&ChatTurn {
                turn_id: Uuid::new_v4(),
                session_id: "s1".to_string(),
                namespace: "test".to_string(),
                user_input: "hi".to_string(),
                ai_output: "hello".to_string(),
                model: "stub".to_string(),
                timestamp: Utc::now(),
                token_count: 2,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        backend.clear_memory("test", ClearScope::All).await.unwrap();
        let stats = backend.get_memory_stats("test").await.unwrap();
        assert_eq!(stats.chat_count, 0);
        assert_eq!(stats.long_term_count, 0);
        assert_eq!(stats.short_term_count, 0);

        let hits = backend.search_memories("anything", "test", None, 10).await.unwrap();
        assert!(hits.is_empty());
    }
}
