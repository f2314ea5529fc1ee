mod chunk;
mod embedding;
mod error;
mod hash;
mod normalization;
mod script;

pub use chunk::{check_span, chunk_text, ChunkConfig, ChunkRecord, Chunker, DEFAULT_CHUNK_CHARS};
pub use embedding::{cosine_similarity, HashEmbedder, HashEmbedderConfig};
pub use error::{CoreError, Result};
pub use hash::{content_hash, content_hash_bytes, short_id};
pub use normalization::{normalize_query, query_terms};
pub use script::{detect_script, dominant_script, non_latin_runs, Script};
