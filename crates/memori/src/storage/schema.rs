//! Schema definitions: five tables per database, plus a per-dialect
//! full-text artifact.
//!
//! The physical `short_term_memory` table does double duty: it holds both
//! conversational short-retention ProcessedMemory rows and WorkingMemoryItem
//! copies (the latter tagged `category_primary = 'conscious_context'`). A
//! `source_memory_id` column records the promotion source for the latter.

/// SQLite schema: five base tables plus an FTS5 virtual table over
/// `long_term_memory` with sync triggers.
pub const SQLITE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS chat_history (
    turn_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    namespace TEXT NOT NULL,
    user_input TEXT NOT NULL,
    ai_output TEXT NOT NULL,
    model TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history (session_id);
CREATE INDEX IF NOT EXISTS idx_chat_history_namespace ON chat_history (namespace);

CREATE TABLE IF NOT EXISTS long_term_memory (
    memory_id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    source_turn_id TEXT NOT NULL,
    processed_data TEXT NOT NULL,
    importance REAL NOT NULL,
    category_primary TEXT NOT NULL,
    classification TEXT NOT NULL,
    promotion_eligible INTEGER NOT NULL DEFAULT 0,
    duplicate_of TEXT,
    processed_for_duplicates INTEGER NOT NULL DEFAULT 0,
    retention_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    searchable_content TEXT NOT NULL,
    summary TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ltm_namespace ON long_term_memory (namespace);
CREATE INDEX IF NOT EXISTS idx_ltm_created_at ON long_term_memory (created_at);
CREATE INDEX IF NOT EXISTS idx_ltm_promotion ON long_term_memory (namespace, promotion_eligible, duplicate_of);

CREATE TABLE IF NOT EXISTS short_term_memory (
    memory_id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    source_memory_id TEXT,
    processed_data TEXT NOT NULL,
    importance REAL NOT NULL,
    category_primary TEXT NOT NULL,
    retention_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    searchable_content TEXT NOT NULL,
    summary TEXT NOT NULL,
    is_permanent INTEGER NOT NULL DEFAULT 0,
    access_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_stm_namespace ON short_term_memory (namespace);
CREATE INDEX IF NOT EXISTS idx_stm_category ON short_term_memory (namespace, category_primary);

CREATE TABLE IF NOT EXISTS memory_entities (
    entity_id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_value TEXT NOT NULL,
    occurrence_count INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_entities_memory ON memory_entities (memory_id);
CREATE INDEX IF NOT EXISTS idx_entities_value ON memory_entities (entity_value);

CREATE TABLE IF NOT EXISTS memory_categories (
    memory_id TEXT NOT NULL,
    category TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5
);
CREATE INDEX IF NOT EXISTS idx_categories_memory ON memory_categories (memory_id);

CREATE VIRTUAL TABLE IF NOT EXISTS long_term_memory_fts USING fts5(
    summary, searchable_content, content='long_term_memory', content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS ltm_fts_insert AFTER INSERT ON long_term_memory BEGIN
    INSERT INTO long_term_memory_fts(rowid, summary, searchable_content)
    VALUES (new.rowid, new.summary, new.searchable_content);
END;
CREATE TRIGGER IF NOT EXISTS ltm_fts_delete AFTER DELETE ON long_term_memory BEGIN
    INSERT INTO long_term_memory_fts(long_term_memory_fts, rowid, summary, searchable_content)
    VALUES ('delete', old.rowid, old.summary, old.searchable_content);
END;
CREATE TRIGGER IF NOT EXISTS ltm_fts_update AFTER UPDATE ON long_term_memory BEGIN
    INSERT INTO long_term_memory_fts(long_term_memory_fts, rowid, summary, searchable_content)
    VALUES ('delete', old.rowid, old.summary, old.searchable_content);
    INSERT INTO long_term_memory_fts(rowid, summary, searchable_content)
    VALUES (new.rowid, new.summary, new.searchable_content);
END;
";

/// MySQL schema: `FULLTEXT(summary, searchable_content)` on long-term and
/// short-term tables.
pub const MYSQL_SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS chat_history (
        turn_id VARCHAR(36) PRIMARY KEY,
        session_id VARCHAR(255) NOT NULL,
        namespace VARCHAR(255) NOT NULL,
        user_input TEXT NOT NULL,
        ai_output TEXT NOT NULL,
        model VARCHAR(255) NOT NULL,
        timestamp DATETIME(6) NOT NULL,
        tokens INT NOT NULL DEFAULT 0,
        metadata JSON NOT NULL,
        INDEX idx_chat_history_session (session_id),
        INDEX idx_chat_history_namespace (namespace)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS long_term_memory (
        memory_id VARCHAR(36) PRIMARY KEY,
        namespace VARCHAR(255) NOT NULL,
        source_turn_id VARCHAR(36) NOT NULL,
        processed_data JSON NOT NULL,
        importance FLOAT NOT NULL,
        category_primary VARCHAR(64) NOT NULL,
        classification VARCHAR(32) NOT NULL,
        promotion_eligible TINYINT(1) NOT NULL DEFAULT 0,
        duplicate_of VARCHAR(36),
        processed_for_duplicates TINYINT(1) NOT NULL DEFAULT 0,
        retention_type VARCHAR(32) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        expires_at DATETIME(6),
        searchable_content TEXT NOT NULL,
        summary VARCHAR(500) NOT NULL,
        INDEX idx_ltm_namespace (namespace),
        INDEX idx_ltm_promotion (namespace, promotion_eligible),
        FULLTEXT KEY ft_ltm (summary, searchable_content)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS short_term_memory (
        memory_id VARCHAR(36) PRIMARY KEY,
        namespace VARCHAR(255) NOT NULL,
        source_memory_id VARCHAR(36),
        processed_data JSON NOT NULL,
        importance FLOAT NOT NULL,
        category_primary VARCHAR(64) NOT NULL,
        retention_type VARCHAR(32) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        expires_at DATETIME(6),
        searchable_content TEXT NOT NULL,
        summary VARCHAR(500) NOT NULL,
        is_permanent TINYINT(1) NOT NULL DEFAULT 0,
        access_count INT NOT NULL DEFAULT 0,
        INDEX idx_stm_namespace (namespace),
        FULLTEXT KEY ft_stm (summary, searchable_content)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS memory_entities (
        entity_id VARCHAR(36) PRIMARY KEY,
        memory_id VARCHAR(36) NOT NULL,
        entity_type VARCHAR(32) NOT NULL,
        entity_value VARCHAR(255) NOT NULL,
        occurrence_count INT NOT NULL DEFAULT 1,
        INDEX idx_entities_memory (memory_id),
        INDEX idx_entities_value (entity_value)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS memory_categories (
        memory_id VARCHAR(36) NOT NULL,
        category VARCHAR(64) NOT NULL,
        confidence FLOAT NOT NULL DEFAULT 0.5,
        INDEX idx_categories_memory (memory_id)
    ) ENGINE=InnoDB",
];

/// Postgres schema: a generated `tsvector` column plus a GIN index.
pub const POSTGRES_SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS chat_history (
        turn_id UUID PRIMARY KEY,
        session_id TEXT NOT NULL,
        namespace TEXT NOT NULL,
        user_input TEXT NOT NULL,
        ai_output TEXT NOT NULL,
        model TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        tokens INTEGER NOT NULL DEFAULT 0,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb
    )",
    "CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history (session_id)",
    "CREATE INDEX IF NOT EXISTS idx_chat_history_namespace ON chat_history (namespace)",
    "CREATE TABLE IF NOT EXISTS long_term_memory (
        memory_id UUID PRIMARY KEY,
        namespace TEXT NOT NULL,
        source_turn_id UUID NOT NULL,
        processed_data JSONB NOT NULL,
        importance REAL NOT NULL,
        category_primary TEXT NOT NULL,
        classification TEXT NOT NULL,
        promotion_eligible BOOLEAN NOT NULL DEFAULT FALSE,
        duplicate_of UUID,
        processed_for_duplicates BOOLEAN NOT NULL DEFAULT FALSE,
        retention_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ,
        searchable_content TEXT NOT NULL,
        summary TEXT NOT NULL,
        search_vector TSVECTOR GENERATED ALWAYS AS (
            setweight(to_tsvector('english', coalesce(summary, '')), 'A') ||
            setweight(to_tsvector('english', coalesce(searchable_content, '')), 'B')
        ) STORED
    )",
    "CREATE INDEX IF NOT EXISTS idx_ltm_namespace ON long_term_memory (namespace)",
    "CREATE INDEX IF NOT EXISTS idx_ltm_promotion ON long_term_memory (namespace, promotion_eligible)",
    "CREATE INDEX IF NOT EXISTS idx_ltm_search_vector ON long_term_memory USING GIN (search_vector)",
    "CREATE TABLE IF NOT EXISTS short_term_memory (
        memory_id UUID PRIMARY KEY,
        namespace TEXT NOT NULL,
        source_memory_id UUID,
        processed_data JSONB NOT NULL,
        importance REAL NOT NULL,
        category_primary TEXT NOT NULL,
        retention_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ,
        searchable_content TEXT NOT NULL,
        summary TEXT NOT NULL,
        is_permanent BOOLEAN NOT NULL DEFAULT FALSE,
        access_count INTEGER NOT NULL DEFAULT 0,
        search_vector TSVECTOR GENERATED ALWAYS AS (
            setweight(to_tsvector('english', coalesce(summary, '')), 'A') ||
            setweight(to_tsvector('english', coalesce(searchable_content, '')), 'B')
        ) STORED
    )",
    "CREATE INDEX IF NOT EXISTS idx_stm_namespace ON short_term_memory (namespace)",
    "CREATE INDEX IF NOT EXISTS idx_stm_search_vector ON short_term_memory USING GIN (search_vector)",
    "CREATE TABLE IF NOT EXISTS memory_entities (
        entity_id UUID PRIMARY KEY,
        memory_id UUID NOT NULL,
        entity_type TEXT NOT NULL,
        entity_value TEXT NOT NULL,
        occurrence_count INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_entities_memory ON memory_entities (memory_id)",
    "CREATE INDEX IF NOT EXISTS idx_entities_value ON memory_entities (entity_value)",
    "CREATE TABLE IF NOT EXISTS memory_categories (
        memory_id UUID NOT NULL,
        category TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 0.5
    )",
    "CREATE INDEX IF NOT EXISTS idx_categories_memory ON memory_categories (memory_id)",
];
