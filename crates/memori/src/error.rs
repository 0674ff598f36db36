//! Error taxonomy for the memory layer: kinds, not types. This enum exists
//! so callers at the public API boundary can match on *kind* (configuration
//! vs database vs analysis vs validation vs interception) without parsing
//! strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoriError {
    /// Invalid database URI, missing required config. Surfaced at `open()`; fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection, constraint, or query failure.
    #[error("database error: {0}")]
    Database(String),

    /// Analysis-LLM extraction failed or returned invalid output. Always
    /// swallowed by the pipeline; the ChatTurn is still persisted.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Caller-supplied argument failed a precondition.
    #[error("validation error: {0}")]
    Validation(String),

    /// A hook could not be installed or removed.
    #[error("interception error: {0}")]
    Interception(String),
}

impl MemoriError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn interception(msg: impl Into<String>) -> Self {
        Self::Interception(msg.into())
    }

    /// Kind name, stable across message text, for metrics/stats tagging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Database(_) => "database",
            Self::Analysis(_) => "analysis",
            Self::Validation(_) => "validation",
            Self::Interception(_) => "interception",
        }
    }
}

impl From<rusqlite::Error> for MemoriError {
    fn from(e: rusqlite::Error) -> Self {
        MemoriError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for MemoriError {
    fn from(e: r2d2::Error) -> Self {
        MemoriError::Database(format!("connection pool error: {e}"))
    }
}

impl From<serde_json::Error> for MemoriError {
    fn from(e: serde_json::Error) -> Self {
        MemoriError::Validation(format!("json error: {e}"))
    }
}

impl From<mysql::Error> for MemoriError {
    fn from(e: mysql::Error) -> Self {
        MemoriError::Database(e.to_string())
    }
}

impl From<postgres::Error> for MemoriError {
    fn from(e: postgres::Error) -> Self {
        MemoriError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoriError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_across_message() {
        let a = MemoriError::database("connection refused");
        let b = MemoriError::database("timeout");
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.kind(), "database");
    }

    #[test]
    fn display_includes_message() {
        let e = MemoriError::validation("namespace must not be empty");
        assert!(e.to_string().contains("namespace must not be empty"));
    }
}
