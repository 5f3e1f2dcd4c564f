//! Semantic retrieval over the assessment catalog.
//!
//! This module provides embedding generation, an immutable in-memory vector
//! index and the retriever that ties them together per request.
//!
//! # Architecture
//!
//! - `embeddings`: Embedding capability trait and its fastembed implementation
//! - `index`: Immutable vector index with exact cosine/L2 search
//! - `storage`: Binary file I/O for vectors.bin persistence
//! - `retriever`: Query embedding, search and similarity floor

pub mod embeddings;
mod index;
mod retriever;
mod storage;

pub use embeddings::{EmbeddingError, EmbeddingModel, EmbeddingProvider};
pub use index::{Metric, VectorIndex};
pub use retriever::{Candidate, RetrievalError, RetrievalResult, Retriever};
pub use storage::VectorStorage;

/// Default embedding model name, good enough on short product descriptions
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";

/// Default similarity floor applied to retrieved candidates
pub const DEFAULT_SIMILARITY_FLOOR: f32 = 0.35;

/// Default number of candidates fetched per query (over-fetch for re-ranking)
pub const DEFAULT_RETRIEVAL_K: usize = 20;
