//! MySQL backend for the Storage Layer: full CRUD plus
//! `MATCH ... AGAINST ... IN NATURAL LANGUAGE MODE` full-text search over the
//! `FULLTEXT(summary, searchable_content)` indexes, via the `mysql` crate's
//! `Queryable` trait and an r2d2-pooled `MysqlConnectionManager`.

use crate::config::Config;
use crate::error::{MemoriError, Result};
use crate::models::{ChatTurn, ProcessedMemory, WorkingMemoryItem};
use crate::storage::queries;
use crate::storage::rows::{DatabaseInfo, MemoryStats, SearchHit, SearchStrategy};
use crate::storage::schema::MYSQL_SCHEMA_SQL;
use crate::storage::{db_err, ClearScope};
use crate::utils::tokenize;
use chrono::{DateTime, NaiveDateTime, Utc};
use mysql::prelude::{FromValue, Queryable};
use mysql::{Opts, Params, Value};
use r2d2::Pool;
use r2d2_mysql::MysqlConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MEMORY_COLUMNS: &str = "memory_id, namespace, source_turn_id, processed_data, importance, \
     category_primary, classification, promotion_eligible, duplicate_of, \
     retention_type, created_at, expires_at, searchable_content, summary";

pub struct MySqlBackend {
    pool: Arc<Pool<MysqlConnectionManager>>,
}

impl MySqlBackend {
    pub fn open(config: &Config) -> Result<Self> {
        let opts = Opts::from_url(&config.database_uri)
            .map_err(|e| MemoriError::configuration(format!("invalid mysql URI: {e}")))?;
        let manager = MysqlConnectionManager::new(mysql::OptsBuilder::from_opts(opts));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| MemoriError::database(format!("failed to create mysql pool: {e}")))?;

        if config.schema_init {
            let mut conn = pool.get()?;
            for stmt in MYSQL_SCHEMA_SQL {
                conn.query_drop(*stmt).map_err(|e| db_err("mysql schema init", e))?;
            }
            info!("mysql schema initialized");
        } else {
            debug!("schema_init disabled, assuming mysql schema pre-exists");
        }

        Ok(Self { pool: Arc::new(pool) })
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<MysqlConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub async fn store_chat(&self, turn: &ChatTurn) -> Result<()> {
        let mut conn = self.get_conn()?;
        conn.exec_drop(
            "INSERT INTO chat_history (turn_id, session_id, namespace, user_input, ai_output, model, timestamp, tokens, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                turn.turn_id.to_string(),
                &turn.session_id,
                &turn.namespace,
                &turn.user_input,
                &turn.ai_output,
                &turn.model,
                to_naive(turn.timestamp),
                turn.token_count,
                serde_json::to_string(&turn.metadata)?,
            ),
        )
        .map_err(|e| db_err("store_chat", e))?;
        Ok(())
    }

    pub async fn store_processed_memory(&self, memory: &ProcessedMemory) -> Result<()> {
        let mut conn = self.get_conn()?;
        let mut tx = conn
            .start_transaction(mysql::TxOpts::default())
            .map_err(|e| db_err("store_processed_memory begin", e))?;

        let use_short_term = memory.classification == crate::models::Classification::Conversational
            && memory.retention == crate::models::Retention::ShortTerm;
        let processed_data = serde_json::to_string(memory)?;
        let memory_id = memory.memory_id.to_string();

        let insert_result = if use_short_term {
            tx.exec_drop(
                "INSERT INTO short_term_memory
                 (memory_id, namespace, source_memory_id, processed_data, importance, category_primary,
                  retention_type, created_at, expires_at, searchable_content, summary, is_permanent, access_count)
                 VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0)",
                (
                    &memory_id,
                    &memory.namespace,
                    &processed_data,
                    memory.importance.score(),
                    memory.primary_category.as_str(),
                    "short-term",
                    to_naive(memory.created_at),
                    memory.expires_at.map(to_naive),
                    &memory.searchable_content,
                    &memory.summary,
                ),
            )
        } else {
            tx.exec_drop(
                "INSERT INTO long_term_memory
                 (memory_id, namespace, source_turn_id, processed_data, importance, category_primary,
                  classification, promotion_eligible, duplicate_of, processed_for_duplicates,
                  retention_type, created_at, expires_at, searchable_content, summary)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)",
                (
                    &memory_id,
                    &memory.namespace,
                    memory.source_turn_id.to_string(),
                    &processed_data,
                    memory.importance.score(),
                    memory.primary_category.as_str(),
                    memory.classification.as_str(),
                    memory.promotion_eligible,
                    memory.duplicate_of.map(|d| d.to_string()),
                    "long-term",
                    to_naive(memory.created_at),
                    memory.expires_at.map(to_naive),
                    &memory.searchable_content,
                    &memory.summary,
                ),
            )
        };

        match insert_result {
            Ok(_) => {}
            Err(mysql::Error::MySqlError(e)) if e.code == 1062 => {
                debug!(memory_id = %memory.memory_id, "memory already present, treating as success");
                tx.rollback().map_err(|e| db_err("store_processed_memory rollback", e))?;
                return Ok(());
            }
            Err(e) => return Err(db_err("store_processed_memory insert", e)),
        }

        for entity in &memory.entities {
            tx.exec_drop(
                "INSERT INTO memory_entities (entity_id, memory_id, entity_type, entity_value, occurrence_count)
                 VALUES (?, ?, ?, ?, ?)",
                (
                    entity.entity_id.to_string(),
                    entity.memory_id.to_string(),
                    entity.entity_type.as_str(),
                    &entity.entity_value,
                    entity.occurrence_count,
                ),
            )
            .map_err(|e| db_err("store entity", e))?;
        }

        for tag in &memory.secondary_categories {
            tx.exec_drop(
                "INSERT INTO memory_categories (memory_id, category, confidence) VALUES (?, ?, ?)",
                (tag.memory_id.to_string(), &tag.category, tag.confidence),
            )
            .map_err(|e| db_err("store category tag", e))?;
        }


        tx.commit().map_err(|e| db_err("store_processed_memory commit", e))?;
        Ok(())
    }

    pub async fn store_working_item(&self, item: &WorkingMemoryItem) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let mut tx = conn
            .start_transaction(mysql::TxOpts::default())
            .map_err(|e| db_err("store_working_item begin", e))?;

        let existing: Option<i64> = tx
            .exec_first(
                "SELECT COUNT(*) FROM short_term_memory
                 WHERE namespace = ? AND category_primary = 'conscious_context'
                   AND (searchable_content = ? OR summary = ?)",
                (&item.namespace, &item.searchable_content, &item.summary),
            )
            .map_err(|e| db_err("working item dedup check", e))?;

        if existing.unwrap_or(0) > 0 {
            debug!(namespace = %item.namespace, "working item already present, skipping copy");
            tx.rollback().map_err(|e| db_err("store_working_item rollback", e))?;
            return Ok(false);
        }

        let processed_data = serde_json::to_string(item)?;
        tx.exec_drop(
            "INSERT INTO short_term_memory
             (memory_id, namespace, source_memory_id, processed_data, importance, category_primary,
              retention_type, created_at, expires_at, searchable_content, summary, is_permanent, access_count)
             VALUES (?, ?, ?, ?, ?, 'conscious_context', ?, ?, ?, ?, ?, ?, ?)",
            (
                item.working_id.to_string(),
                &item.namespace,
                item.source_memory_id.to_string(),
                &processed_data,
                item.importance.score(),
                if item.is_permanent { "permanent" } else { "short-term" },
                to_naive(item.created_at),
                item.expires_at.map(to_naive),
                &item.searchable_content,
                &item.summary,
                item.is_permanent,
                item.access_count,
            ),
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
        let mut conn = self.get_conn()?;
        let mut hits = self.fulltext_search(&mut conn, query, namespace, limit)?;
        if hits.is_empty() {
            hits = self.keyword_like_search(&mut conn, query, namespace, limit)?;
        }
        if let Some(cat) = category_filter {
            hits.extend(self.category_search(&mut conn, cat, namespace, limit)?);
        }
        Ok(hits)
    }

    fn fulltext_search(
        &self,
        conn: &mut r2d2::PooledConnection<MysqlConnectionManager>,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = tokens.join(" ");
        let rows: std::result::Result<Vec<mysql::Row>, mysql::Error> = conn.exec(
            queries::MYSQL_FULLTEXT_QUERY,
            (&match_expr, namespace, &match_expr, limit as i64),
        );
        let rows = match rows {
            Ok(r) => r,
            Err(e) => {
                warn!("fulltext search unavailable, skipping: {e}");
                return Ok(Vec::new());
            }
        };
        let mut hits = Vec::new();
        for row in rows {
            let score: f64 = col(&row, 14)?;
            hits.push(SearchHit {
                memory: row_to_memory(&row)?,
                search_strategy: SearchStrategy::Fulltext,
                search_score: queries::normalize_rank(score, false),
            });
        }
        Ok(hits)
    }

    fn keyword_like_search(
        &self,
        conn: &mut r2d2::PooledConnection<MysqlConnectionManager>,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let clauses: Vec<String> = tokens
            .iter()
            .map(|_| "LOWER(searchable_content) LIKE ? OR LOWER(summary) LIKE ?".to_string())
            .collect();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = ? AND duplicate_of IS NULL AND ({})
             ORDER BY created_at DESC LIMIT ?",
            clauses.join(" OR ")
        );

        let mut params: Vec<Value> = vec![Value::from(namespace)];
        for t in &tokens {
            let like = format!("%{t}%");
            params.push(Value::from(like.clone()));
            params.push(Value::from(like));
        }
        params.push(Value::from(limit as i64));

        let rows: Vec<mysql::Row> = conn
            .exec(sql, Params::Positional(params))
            .map_err(|e| db_err("keyword search", e))?;

        let total_tokens = tokens.len() as f32;
        let mut hits = Vec::new();
        for row in rows {
            let memory = row_to_memory(&row)?;
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

    fn category_search(
        &self,
        conn: &mut r2d2::PooledConnection<MysqlConnectionManager>,
        category: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = ? AND category_primary = ? AND duplicate_of IS NULL
             ORDER BY importance DESC, created_at DESC LIMIT ?"
        );
        let rows: Vec<mysql::Row> = conn
            .exec(sql, (namespace, category, limit as i64))
            .map_err(|e| db_err("category search", e))?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(SearchHit { memory: row_to_memory(&row)?, search_strategy: SearchStrategy::Category, search_score: 1.0 });
        }
        Ok(hits)
    }

    pub async fn entity_search(&self, tokens: &[String], namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.get_conn()?;
        let placeholders = vec!["?"; tokens.len()].join(",");
        let sql = format!(
            "SELECT DISTINCT l.memory_id, l.namespace, l.source_turn_id, l.processed_data, l.importance,
                    l.category_primary, l.classification, l.promotion_eligible, l.duplicate_of,
                    l.retention_type, l.created_at, l.expires_at, l.searchable_content, l.summary
             FROM long_term_memory l
             JOIN memory_entities e ON e.memory_id = l.memory_id
             WHERE l.namespace = ? AND l.duplicate_of IS NULL AND e.entity_value IN ({placeholders})
             ORDER BY l.importance DESC, l.created_at DESC
             LIMIT ?"
        );
        let mut params: Vec<Value> = vec![Value::from(namespace)];
        for t in tokens {
            params.push(Value::from(t.clone()));
        }
        params.push(Value::from(limit as i64));

        let rows: Vec<mysql::Row> = conn
            .exec(sql, Params::Positional(params))
            .map_err(|e| db_err("entity search", e))?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(SearchHit { memory: row_to_memory(&row)?, search_strategy: SearchStrategy::Entity, search_score: 0.6 });
        }
        Ok(hits)
    }

    pub async fn recent_memories(&self, namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = ? AND duplicate_of IS NULL
             ORDER BY created_at DESC LIMIT ?"
        );
        let rows: Vec<mysql::Row> = conn.exec(sql, (namespace, limit as i64)).map_err(|e| db_err("recent memories", e))?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(SearchHit { memory: row_to_memory(&row)?, search_strategy: SearchStrategy::RecentFallback, search_score: 0.0 });
        }
        Ok(hits)
    }

    pub async fn get_chat_history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<mysql::Row> = conn
            .exec(
                "SELECT turn_id, session_id, namespace, user_input, ai_output, model, timestamp, tokens, metadata
                 FROM chat_history WHERE session_id = ? ORDER BY timestamp DESC LIMIT ?",
                (session_id, limit as i64),
            )
            .map_err(|e| db_err("chat history", e))?;
        let mut turns = Vec::new();
        for row in rows {
            turns.push(row_to_chat_turn(&row)?);
        }
        turns.reverse();
        Ok(turns)
    }

    pub async fn get_working_set(&self, namespace: &str) -> Result<Vec<WorkingMemoryItem>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<mysql::Row> = conn
            .exec(
                "SELECT processed_data FROM short_term_memory
                 WHERE namespace = ? AND category_primary = 'conscious_context'
                 ORDER BY importance DESC, created_at DESC",
                (namespace,),
            )
            .map_err(|e| db_err("working set", e))?;
        let mut items = Vec::new();
        for row in rows {
            let data: String = col(&row, 0)?;
            items.push(serde_json::from_str(&data)?);
        }
        Ok(items)
    }

    pub async fn promotable_memories_since(&self, namespace: &str, since: DateTime<Utc>) -> Result<Vec<ProcessedMemory>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = ? AND promotion_eligible = 1 AND duplicate_of IS NULL AND created_at > ?
             ORDER BY importance DESC, created_at DESC"
        );
        let rows: Vec<mysql::Row> = conn
            .exec(sql, (namespace, to_naive(since)))
            .map_err(|e| db_err("promotable", e))?;
        rows.iter().map(row_to_memory).collect()
    }

    pub async fn conscious_info_memories(&self, namespace: &str) -> Result<Vec<ProcessedMemory>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = ? AND classification = 'conscious-info' AND duplicate_of IS NULL
             ORDER BY importance DESC, created_at DESC"
        );
        let rows: Vec<mysql::Row> = conn.exec(sql, (namespace,)).map_err(|e| db_err("conscious info", e))?;
        rows.iter().map(row_to_memory).collect()
    }

    pub async fn recent_undeduped_memories(&self, namespace: &str, limit: usize) -> Result<Vec<ProcessedMemory>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = ? AND duplicate_of IS NULL
             ORDER BY created_at DESC LIMIT ?"
        );
        let rows: Vec<mysql::Row> = conn.exec(sql, (namespace, limit as i64)).map_err(|e| db_err("recent undeduped", e))?;
        rows.iter().map(row_to_memory).collect()
    }

    pub async fn get_memory_stats(&self, namespace: &str) -> Result<MemoryStats> {
        let mut conn = self.get_conn()?;
        let chat_count: i64 = conn
            .exec_first("SELECT COUNT(*) FROM chat_history WHERE namespace = ?", (namespace,))
            .map_err(|e| db_err("stats chat_count", e))?
            .unwrap_or(0);
        let short_term_count: i64 = conn
            .exec_first(
                "SELECT COUNT(*) FROM short_term_memory WHERE namespace = ? AND category_primary != 'conscious_context'",
                (namespace,),
            )
            .map_err(|e| db_err("stats short_term_count", e))?
            .unwrap_or(0);
        let long_term_count: i64 = conn
            .exec_first(
                "SELECT COUNT(*) FROM long_term_memory WHERE namespace = ? AND duplicate_of IS NULL",
                (namespace,),
            )
            .map_err(|e| db_err("stats long_term_count", e))?
            .unwrap_or(0);
        let working_set_count: i64 = conn
            .exec_first(
                "SELECT COUNT(*) FROM short_term_memory WHERE namespace = ? AND category_primary = 'conscious_context'",
                (namespace,),
            )
            .map_err(|e| db_err("stats working_set_count", e))?
            .unwrap_or(0);

        let rows: Vec<(String, i64)> = conn
            .exec(
                "SELECT category_primary, COUNT(*) FROM long_term_memory WHERE namespace = ? AND duplicate_of IS NULL GROUP BY category_primary",
                (namespace,),
            )
            .map_err(|e| db_err("stats per_category", e))?;
        let per_category: HashMap<String, i64> = rows.into_iter().collect();

        Ok(MemoryStats { chat_count, short_term_count, long_term_count, working_set_count, per_category, dropped_extractions: 0 })
    }

    pub async fn clear_memory(&self, namespace: &str, scope: ClearScope) -> Result<()> {
        let mut conn = self.get_conn()?;
        let mut tx = conn.start_transaction(mysql::TxOpts::default()).map_err(|e| db_err("clear_memory begin", e))?;
        match scope {
            ClearScope::Short => {
                tx.exec_drop("DELETE FROM short_term_memory WHERE namespace = ?", (namespace,))
                    .map_err(|e| db_err("clear short_term_memory", e))?;
            }
            ClearScope::Long => {
                tx.exec_drop(
                    "DELETE FROM memory_entities WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?)",
                    (namespace,),
                )
                .map_err(|e| db_err("clear memory_entities", e))?;
                tx.exec_drop(
                    "DELETE FROM memory_categories WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?)",
                    (namespace,),
                )
                .map_err(|e| db_err("clear memory_categories", e))?;
                tx.exec_drop("DELETE FROM long_term_memory WHERE namespace = ?", (namespace,))
                    .map_err(|e| db_err("clear long_term_memory", e))?;
            }
            ClearScope::All => {
                tx.exec_drop("DELETE FROM chat_history WHERE namespace = ?", (namespace,))
                    .map_err(|e| db_err("clear chat_history", e))?;
                tx.exec_drop("DELETE FROM short_term_memory WHERE namespace = ?", (namespace,))
                    .map_err(|e| db_err("clear short_term_memory", e))?;
                tx.exec_drop(
                    "DELETE FROM memory_entities WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?)",
                    (namespace,),
                )
                .map_err(|e| db_err("clear memory_entities", e))?;
                tx.exec_drop(
                    "DELETE FROM memory_categories WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = ?)",
                    (namespace,),
                )
                .map_err(|e| db_err("clear memory_categories", e))?;
                tx.exec_drop("DELETE FROM long_term_memory WHERE namespace = ?", (namespace,))
                    .map_err(|e| db_err("clear long_term_memory", e))?;
            }
        }
        tx.commit().map_err(|e| db_err("clear_memory commit", e))?;
        info!(namespace, scope = ?format!("{scope:?}"), "cleared memory");
        Ok(())
    }

    pub fn get_database_info(&self) -> DatabaseInfo {
        DatabaseInfo { dialect: "mysql", fulltext_index: "fulltext-natural-language" }
    }
}

fn col<T: FromValue>(row: &mysql::Row, idx: usize) -> Result<T> {
    row.get(idx).ok_or_else(|| MemoriError::database(format!("missing or null column at index {idx}")))
}

fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

fn row_to_memory(row: &mysql::Row) -> Result<ProcessedMemory> {
    let processed_data: String = col(row, 3)?;
    let mut memory: ProcessedMemory = serde_json::from_str(&processed_data)?;
    let duplicate_of: Option<String> = row.get(8).unwrap_or(None);
    memory.duplicate_of = duplicate_of.and_then(|s| Uuid::parse_str(&s).ok());
    Ok(memory)
}

fn row_to_chat_turn(row: &mysql::Row) -> Result<ChatTurn> {
    let turn_id: String = col(row, 0)?;
    let timestamp: NaiveDateTime = col(row, 6)?;
    let metadata: String = col(row, 8)?;
    Ok(ChatTurn {
        turn_id: Uuid::parse_str(&turn_id).map_err(|e| MemoriError::database(format!("bad turn_id: {e}")))?,
        session_id: col(row, 1)?,
        namespace: col(row, 2)?,
        user_input: col(row, 3)?,
        ai_output: col(row, 4)?,
        model: col(row, 5)?,
        timestamp: DateTime::from_naive_utc_and_offset(timestamp, Utc),
        token_count: col(row, 7)?,
        metadata: serde_json::from_str(&metadata)?,
    })
}
