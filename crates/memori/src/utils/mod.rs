//! Text and keyword utilities shared by extraction, dedup, and retrieval.

pub mod text;

pub use text::{jaccard_similarity, normalize_similarity_key, tokenize, TextUtils};
