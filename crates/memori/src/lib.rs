//! Memori: a persistent, structured memory layer that sits between an
//! application and an LLM provider, turning raw conversation turns into
//! deduplicated, searchable, retention-governed memories and injecting the
//! relevant ones back into future requests.
//!
//! See [`Orchestrator`] for the crate's entry point and `README.md` for an
//! end-to-end example.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod interception;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod retrieval;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod utils;

pub use config::{Config, Dialect, MemoryFilters};
pub use error::{MemoriError, Result};
pub use interception::{HookKind, InterceptionRegistry};
pub use models::{
    Category, ChatTurn, Classification, EntityRecord, EntityType, Importance, Message,
    ProcessedMemory, Retention, UserContext, WorkingMemoryItem,
};
pub use orchestrator::Orchestrator;
pub use pipeline::extraction::{AnalysisFailure, AnalysisProvider};
pub use storage::{ClearScope, DatabaseInfo, MemoryStats, SearchHit, SearchStrategy};
pub use telemetry::init_tracing;
