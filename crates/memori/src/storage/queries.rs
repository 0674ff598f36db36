//! Dialect-specific full-text SQL fragments, one per native full-text
//! operator (FTS5 / FULLTEXT / tsvector).

/// SQLite: FTS5 `MATCH` against the shadow `long_term_memory_fts` table,
/// joined back to `long_term_memory` for the full row and an `rank`-derived
/// score.
pub const SQLITE_FULLTEXT_QUERY: &str = "
SELECT l.memory_id, l.namespace, l.source_turn_id, l.processed_data, l.importance,
       l.category_primary, l.classification, l.promotion_eligible, l.duplicate_of,
       l.retention_type, l.created_at, l.expires_at, l.searchable_content, l.summary,
       bm25(long_term_memory_fts) AS rank
FROM long_term_memory_fts
JOIN long_term_memory l ON l.rowid = long_term_memory_fts.rowid
WHERE long_term_memory_fts MATCH ?1 AND l.namespace = ?2 AND l.duplicate_of IS NULL
ORDER BY rank
LIMIT ?3
";

/// MySQL: `MATCH ... AGAINST ... IN NATURAL LANGUAGE MODE` over the
/// `FULLTEXT(summary, searchable_content)` index.
pub const MYSQL_FULLTEXT_QUERY: &str = "
SELECT memory_id, namespace, source_turn_id, processed_data, importance,
       category_primary, classification, promotion_eligible, duplicate_of,
       retention_type, created_at, expires_at, searchable_content, summary,
       MATCH(summary, searchable_content) AGAINST (? IN NATURAL LANGUAGE MODE) AS score
FROM long_term_memory
WHERE namespace = ? AND duplicate_of IS NULL
  AND MATCH(summary, searchable_content) AGAINST (? IN NATURAL LANGUAGE MODE)
ORDER BY score DESC
LIMIT ?
";

/// Postgres: `@@ plainto_tsquery` against the generated `search_vector`
/// column, ranked with `ts_rank`.
pub const POSTGRES_FULLTEXT_QUERY: &str = "
SELECT memory_id, namespace, source_turn_id, processed_data, importance,
       category_primary, classification, promotion_eligible, duplicate_of,
       retention_type, created_at, expires_at, searchable_content, summary,
       ts_rank(search_vector, plainto_tsquery('english', $1)) AS score
FROM long_term_memory
WHERE namespace = $2 AND duplicate_of IS NULL
  AND search_vector @@ plainto_tsquery('english', $1)
ORDER BY score DESC
LIMIT $3
";

/// Normalize a native full-text rank into `[0, 1]` for the `search_score`
/// field shared across strategies. SQLite's `bm25()` returns a
/// negative-is-better score with no fixed upper bound; MySQL/Postgres
/// return a non-negative relevance score. Both are squashed with the same
/// monotonic curve so callers never see a dialect-specific scale.
pub fn normalize_rank(raw: f64, dialect_is_bm25: bool) -> f32 {
    let magnitude = if dialect_is_bm25 { -raw } else { raw };
    let clamped = magnitude.max(0.0);
    (1.0 - (1.0 / (1.0 + clamped))) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rank_is_bounded() {
        assert!(normalize_rank(-12.0, true) > 0.0);
        assert!(normalize_rank(-12.0, true) <= 1.0);
        assert!(normalize_rank(0.0, false) == 0.0);
        assert!(normalize_rank(5.0, false) < 1.0);
    }

    #[test]
    fn normalize_rank_monotonic() {
        let low = normalize_rank(-1.0, true);
        let high = normalize_rank(-10.0, true);
        assert!(high > low, "higher bm25 magnitude should normalize higher");
    }
}
