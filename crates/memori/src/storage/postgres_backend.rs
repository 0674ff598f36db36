//! Postgres backend for the Storage Layer: full CRUD plus
//! `tsvector`/`ts_rank` full-text search over the generated `search_vector`
//! column and its GIN index, via a synchronous blocking client pooled with
//! `r2d2_postgres::PostgresConnectionManager<NoTls>`.

use crate::config::Config;
use crate::error::{MemoriError, Result};
use crate::models::{ChatTurn, ProcessedMemory, WorkingMemoryItem};
use crate::storage::queries;
use crate::storage::rows::{DatabaseInfo, MemoryStats, SearchHit, SearchStrategy};
use crate::storage::schema::POSTGRES_SCHEMA_SQL;
use crate::storage::{db_err, ClearScope};
use crate::utils::tokenize;
use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::{NoTls, Row};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MEMORY_COLUMNS: &str = "memory_id, namespace, source_turn_id, processed_data, importance, \
     category_primary, classification, promotion_eligible, duplicate_of, \
     retention_type, created_at, expires_at, searchable_content, summary";

pub struct PostgresBackend {
    pool: Arc<Pool<PostgresConnectionManager<NoTls>>>,
}

impl PostgresBackend {
    pub fn open(config: &Config) -> Result<Self> {
        let pg_config: postgres::Config = config
            .database_uri
            .parse()
            .map_err(|e| MemoriError::configuration(format!("invalid postgres URI: {e}")))?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| MemoriError::database(format!("failed to create postgres pool: {e}")))?;

        if config.schema_init {
            let mut conn = pool.get()?;
            for stmt in POSTGRES_SCHEMA_SQL {
                conn.batch_execute(stmt).map_err(|e| db_err("postgres schema init", e))?;
            }
            info!("postgres schema initialized");
        } else {
            debug!("schema_init disabled, assuming postgres schema pre-exists");
        }

        Ok(Self { pool: Arc::new(pool) })
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<PostgresConnectionManager<NoTls>>> {
        Ok(self.pool.get()?)
    }

    pub async fn store_chat(&self, turn: &ChatTurn) -> Result<()> {
        let mut conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO chat_history (turn_id, session_id, namespace, user_input, ai_output, model, timestamp, tokens, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &turn.turn_id,
                &turn.session_id,
                &turn.namespace,
                &turn.user_input,
                &turn.ai_output,
                &turn.model,
                &turn.timestamp,
                &turn.token_count,
                &serde_json::to_value(&turn.metadata)?,
            ],
        )
        .map_err(|e| db_err("store_chat", e))?;
        Ok(())
    }

    pub async fn store_processed_memory(&self, memory: &ProcessedMemory) -> Result<()> {
        let mut conn = self.get_conn()?;
        let mut tx = conn.transaction().map_err(|e| db_err("store_processed_memory begin", e))?;

        let use_short_term = memory.classification == crate::models::Classification::Conversational
            && memory.retention == crate::models::Retention::ShortTerm;
        let processed_data = serde_json::to_value(memory)?;

        let insert_result = if use_short_term {
            tx.execute(
                "INSERT INTO short_term_memory
                 (memory_id, namespace, source_memory_id, processed_data, importance, category_primary,
                  retention_type, created_at, expires_at, searchable_content, summary, is_permanent, access_count)
                 VALUES ($1, $2, NULL, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, 0)",
                &[
                    &memory.memory_id,
                    &memory.namespace,
                    &processed_data,
                    &memory.importance.score(),
                    &memory.primary_category.as_str(),
                    &"short-term",
                    &memory.created_at,
                    &memory.expires_at,
                    &memory.searchable_content,
                    &memory.summary,
                ],
            )
        } else {
            tx.execute(
                "INSERT INTO long_term_memory
                 (memory_id, namespace, source_turn_id, processed_data, importance, category_primary,
                  classification, promotion_eligible, duplicate_of, processed_for_duplicates,
                  retention_type, created_at, expires_at, searchable_content, summary)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10, $11, $12, $13, $14)",
                &[
                    &memory.memory_id,
                    &memory.namespace,
                    &memory.source_turn_id,
                    &processed_data,
                    &memory.importance.score(),
                    &memory.primary_category.as_str(),
                    &memory.classification.as_str(),
                    &memory.promotion_eligible,
                    &memory.duplicate_of,
                    &"long-term",
                    &memory.created_at,
                    &memory.expires_at,
                    &memory.searchable_content,
                    &memory.summary,
                ],
            )
        };

        match insert_result {
            Ok(_) => {}
            Err(e) if e.code() == Some(&postgres::error::SqlState::UNIQUE_VIOLATION) => {
                debug!(memory_id = %memory.memory_id, "memory already present, treating as success");
                tx.rollback().map_err(|e| db_err("store_processed_memory rollback", e))?;
                return Ok(());
            }
            Err(e) => return Err(db_err("store_processed_memory insert", e)),
        }

        for entity in &memory.entities {
            tx.execute(
                "INSERT INTO memory_entities (entity_id, memory_id, entity_type, entity_value, occurrence_count)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&entity.entity_id, &entity.memory_id, &entity.entity_type.as_str(), &entity.entity_value, &entity.occurrence_count],
            )
            .map_err(|e| db_err("store entity", e))?;
        }

        for tag in &memory.secondary_categories {
            tx.execute(
                "INSERT INTO memory_categories (memory_id, category, confidence) VALUES ($1, $2, $3)",
                &[&tag.memory_id, &tag.category, &tag.confidence],
            )
            .map_err(|e| db_err("store category tag", e))?;
        }

        tx.commit().map_err(|e| db_err("store_processed_memory commit", e))?;
        Ok(())
    }

    pub async fn store_working_item(&self, item: &WorkingMemoryItem) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let mut tx = conn.transaction().map_err(|e| db_err("store_working_item begin", e))?;

        let existing: i64 = tx
            .query_one(
                "SELECT COUNT(*) FROM short_term_memory
                 WHERE namespace = $1 AND category_primary = 'conscious_context'
                   AND (searchable_content = $2 OR summary = $3)",
                &[&item.namespace, &item.searchable_content, &item.summary],
            )
            .map_err(|e| db_err("working item dedup check", e))?
            .get(0);

        if existing > 0 {
            debug!(namespace = %item.namespace, "working item already present, skipping copy");
            tx.rollback().map_err(|e| db_err("store_working_item rollback", e))?;
            return Ok(false);
        }

        let processed_data = serde_json::to_value(item)?;
        tx.execute(
            "INSERT INTO short_term_memory
             (memory_id, namespace, source_memory_id, processed_data, importance, category_primary,
              retention_type, created_at, expires_at, searchable_content, summary, is_permanent, access_count)
             VALUES ($1, $2, $3, $4, $5, 'conscious_context', $6, $7, $8, $9, $10, $11, $12)",
            &[
                &item.working_id,
                &item.namespace,
                &item.source_memory_id,
                &processed_data,
                &item.importance.score(),
                &(if item.is_permanent { "permanent" } else { "short-term" }),
                &item.created_at,
                &item.expires_at,
                &item.searchable_content,
                &item.summary,
                &item.is_permanent,
                &item.access_count,
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
        conn: &mut r2d2::PooledConnection<PostgresConnectionManager<NoTls>>,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let plain = tokens.join(" ");
        let limit_i64 = limit as i64;
        let rows = conn.query(queries::POSTGRES_FULLTEXT_QUERY, &[&plain, &namespace, &limit_i64]);
        let rows = match rows {
            Ok(r) => r,
            Err(e) => {
                warn!("fulltext search unavailable, skipping: {e}");
                return Ok(Vec::new());
            }
        };
        let mut hits = Vec::new();
        for row in &rows {
            let score: f32 = row.get(14);
            hits.push(SearchHit {
                memory: row_to_memory(row)?,
                search_strategy: SearchStrategy::Fulltext,
                search_score: queries::normalize_rank(score as f64, false),
            });
        }
        Ok(hits)
    }

    fn keyword_like_search(
        &self,
        conn: &mut r2d2::PooledConnection<PostgresConnectionManager<NoTls>>,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut clauses = Vec::new();
        let mut likes: Vec<String> = Vec::new();
        let mut idx = 2;
        for t in &tokens {
            clauses.push(format!("(LOWER(searchable_content) LIKE ${idx} OR LOWER(summary) LIKE ${idx})"));
            likes.push(format!("%{t}%"));
            idx += 1;
        }
        let limit_idx = idx;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = $1 AND duplicate_of IS NULL AND ({})
             ORDER BY created_at DESC LIMIT ${limit_idx}",
            clauses.join(" OR ")
        );

        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&namespace];
        for like in &likes {
            params.push(like);
        }
        let limit_i64 = limit as i64;
        params.push(&limit_i64);

        let rows = conn.query(sql.as_str(), &params).map_err(|e| db_err("keyword search", e))?;
        let total_tokens = tokens.len() as f32;
        let mut hits = Vec::new();
        for row in &rows {
            let memory = row_to_memory(row)?;
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
        conn: &mut r2d2::PooledConnection<PostgresConnectionManager<NoTls>>,
        category: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = $1 AND category_primary = $2 AND duplicate_of IS NULL
             ORDER BY importance DESC, created_at DESC LIMIT $3"
        );
        let limit_i64 = limit as i64;
        let rows = conn.query(sql.as_str(), &[&namespace, &category, &limit_i64]).map_err(|e| db_err("category search", e))?;
        let mut hits = Vec::new();
        for row in &rows {
            hits.push(SearchHit { memory: row_to_memory(row)?, search_strategy: SearchStrategy::Category, search_score: 1.0 });
        }
        Ok(hits)
    }

    pub async fn entity_search(&self, tokens: &[String], namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.get_conn()?;
        let sql = "SELECT DISTINCT l.memory_id, l.namespace, l.source_turn_id, l.processed_data, l.importance,
                    l.category_primary, l.classification, l.promotion_eligible, l.duplicate_of,
                    l.retention_type, l.created_at, l.expires_at, l.searchable_content, l.summary
             FROM long_term_memory l
             JOIN memory_entities e ON e.memory_id = l.memory_id
             WHERE l.namespace = $1 AND l.duplicate_of IS NULL AND e.entity_value = ANY($2)
             ORDER BY l.importance DESC, l.created_at DESC
             LIMIT $3";
        let limit_i64 = limit as i64;
        let rows = conn.query(sql, &[&namespace, &tokens, &limit_i64]).map_err(|e| db_err("entity search", e))?;
        let mut hits = Vec::new();
        for row in &rows {
            hits.push(SearchHit { memory: row_to_memory(row)?, search_strategy: SearchStrategy::Entity, search_score: 0.6 });
        }
        Ok(hits)
    }

    pub async fn recent_memories(&self, namespace: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = $1 AND duplicate_of IS NULL
             ORDER BY created_at DESC LIMIT $2"
        );
        let limit_i64 = limit as i64;
        let rows = conn.query(sql.as_str(), &[&namespace, &limit_i64]).map_err(|e| db_err("recent memories", e))?;
        let mut hits = Vec::new();
        for row in &rows {
            hits.push(SearchHit { memory: row_to_memory(row)?, search_strategy: SearchStrategy::RecentFallback, search_score: 0.0 });
        }
        Ok(hits)
    }

    pub async fn get_chat_history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let mut conn = self.get_conn()?;
        let limit_i64 = limit as i64;
        let rows = conn
            .query(
                "SELECT turn_id, session_id, namespace, user_input, ai_output, model, timestamp, tokens, metadata
                 FROM chat_history WHERE session_id = $1 ORDER BY timestamp DESC LIMIT $2",
                &[&session_id, &limit_i64],
            )
            .map_err(|e| db_err("chat history", e))?;
        let mut turns = Vec::new();
        for row in &rows {
            turns.push(row_to_chat_turn(row)?);
        }
        turns.reverse();
        Ok(turns)
    }

    pub async fn get_working_set(&self, namespace: &str) -> Result<Vec<WorkingMemoryItem>> {
        let mut conn = self.get_conn()?;
        let rows = conn
            .query(
                "SELECT processed_data FROM short_term_memory
                 WHERE namespace = $1 AND category_primary = 'conscious_context'
                 ORDER BY importance DESC, created_at DESC",
                &[&namespace],
            )
            .map_err(|e| db_err("working set", e))?;
        let mut items = Vec::new();
        for row in &rows {
            let data: serde_json::Value = row.get(0);
            items.push(serde_json::from_value(data)?);
        }
        Ok(items)
    }

    pub async fn promotable_memories_since(&self, namespace: &str, since: DateTime<Utc>) -> Result<Vec<ProcessedMemory>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = $1 AND promotion_eligible = TRUE AND duplicate_of IS NULL AND created_at > $2
             ORDER BY importance DESC, created_at DESC"
        );
        let rows = conn.query(sql.as_str(), &[&namespace, &since]).map_err(|e| db_err("promotable", e))?;
        rows.iter().map(row_to_memory).collect()
    }

    pub async fn conscious_info_memories(&self, namespace: &str) -> Result<Vec<ProcessedMemory>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = $1 AND classification = 'conscious-info' AND duplicate_of IS NULL
             ORDER BY importance DESC, created_at DESC"
        );
        let rows = conn.query(sql.as_str(), &[&namespace]).map_err(|e| db_err("conscious info", e))?;
        rows.iter().map(row_to_memory).collect()
    }

    pub async fn recent_undeduped_memories(&self, namespace: &str, limit: usize) -> Result<Vec<ProcessedMemory>> {
        let mut conn = self.get_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM long_term_memory
             WHERE namespace = $1 AND duplicate_of IS NULL
             ORDER BY created_at DESC LIMIT $2"
        );
        let limit_i64 = limit as i64;
        let rows = conn.query(sql.as_str(), &[&namespace, &limit_i64]).map_err(|e| db_err("recent undeduped", e))?;
        rows.iter().map(row_to_memory).collect()
    }


    pub async fn get_memory_stats(&self, namespace: &str) -> Result<MemoryStats> {
        let mut conn = self.get_conn()?;
        let chat_count: i64 = conn
            .query_one("SELECT COUNT(*) FROM chat_history WHERE namespace = $1", &[&namespace])
            .map_err(|e| db_err("stats chat_count", e))?
            .get(0);
        let short_term_count: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM short_term_memory WHERE namespace = $1 AND category_primary != 'conscious_context'",
                &[&namespace],
            )
            .map_err(|e| db_err("stats short_term_count", e))?
            .get(0);
        let long_term_count: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM long_term_memory WHERE namespace = $1 AND duplicate_of IS NULL",
                &[&namespace],
            )
            .map_err(|e| db_err("stats long_term_count", e))?
            .get(0);
        let working_set_count: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM short_term_memory WHERE namespace = $1 AND category_primary = 'conscious_context'",
                &[&namespace],
            )
            .map_err(|e| db_err("stats working_set_count", e))?
            .get(0);

        let rows = conn
            .query(
                "SELECT category_primary, COUNT(*) FROM long_term_memory WHERE namespace = $1 AND duplicate_of IS NULL GROUP BY category_primary",
                &[&namespace],
            )
            .map_err(|e| db_err("stats per_category", e))?;
        let mut per_category = HashMap::new();
        for row in &rows {
            let cat: String = row.get(0);
            let count: i64 = row.get(1);
            per_category.insert(cat, count);
        }

        Ok(MemoryStats { chat_count, short_term_count, long_term_count, working_set_count, per_category, dropped_extractions: 0 })
    }

    pub async fn clear_memory(&self, namespace: &str, scope: ClearScope) -> Result<()> {
        let mut conn = self.get_conn()?;
        let mut tx = conn.transaction().map_err(|e| db_err("clear_memory begin", e))?;
        match scope {
            ClearScope::Short => {
                tx.execute("DELETE FROM short_term_memory WHERE namespace = $1", &[&namespace])
                    .map_err(|e| db_err("clear short_term_memory", e))?;
            }
            ClearScope::Long => {
                tx.execute(
                    "DELETE FROM memory_entities WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = $1)",
                    &[&namespace],
                )
                .map_err(|e| db_err("clear memory_entities", e))?;
                tx.execute(
                    "DELETE FROM memory_categories WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = $1)",
                    &[&namespace],
                )
                .map_err(|e| db_err("clear memory_categories", e))?;
                tx.execute("DELETE FROM long_term_memory WHERE namespace = $1", &[&namespace])
                    .map_err(|e| db_err("clear long_term_memory", e))?;
            }
            ClearScope::All => {
                tx.execute("DELETE FROM chat_history WHERE namespace = $1", &[&namespace])
                    .map_err(|e| db_err("clear chat_history", e))?;
                tx.execute("DELETE FROM short_term_memory WHERE namespace = $1", &[&namespace])
                    .map_err(|e| db_err("clear short_term_memory", e))?;
                tx.execute(
                    "DELETE FROM memory_entities WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = $1)",
                    &[&namespace],
                )
                .map_err(|e| db_err("clear memory_entities", e))?;
                tx.execute(
                    "DELETE FROM memory_categories WHERE memory_id IN (SELECT memory_id FROM long_term_memory WHERE namespace = $1)",
                    &[&namespace],
                )
                .map_err(|e| db_err("clear memory_categories", e))?;
                tx.execute("DELETE FROM long_term_memory WHERE namespace = $1", &[&namespace])
                    .map_err(|e| db_err("clear long_term_memory", e))?;
            }
        }
        tx.commit().map_err(|e| db_err("clear_memory commit", e))?;
        info!(namespace, scope = ?format!("{scope:?}"), "cleared memory");
        Ok(())
    }

    pub fn get_database_info(&self) -> DatabaseInfo {
        DatabaseInfo { dialect: "postgres", fulltext_index: "tsvector-gin" }
    }
}

fn row_to_memory(row: &Row) -> Result<ProcessedMemory> {
    let processed_data: serde_json::Value = row.get(3);
    let mut memory: ProcessedMemory = serde_json::from_value(processed_data)?;
    memory.duplicate_of = row.get(8);
    Ok(memory)
}

fn row_to_chat_turn(row: &Row) -> Result<ChatTurn> {
    let metadata: serde_json::Value = row.get(8);
    Ok(ChatTurn {
        turn_id: row.get(0),
        session_id: row.get(1),
        namespace: row.get(2),
        user_input: row.get(3),
        ai_output: row.get(4),
        model: row.get(5),
        timestamp: row.get(6),
        token_count: row.get(7),
        metadata: serde_json::from_value(metadata)?,
    })
}
