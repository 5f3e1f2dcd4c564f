//! Query embedding plus index search with recall filtering.

use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{Catalog, Document};
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{IndexError, VectorIndex};

/// A retrieved document with its similarity and 0-based retrieval rank.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub document: Document,
    pub score: f32,
    pub rank: usize,
}

/// Candidates ordered by descending similarity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub candidates: Vec<Candidate>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("query text is empty")]
    InvalidQuery,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// Embeds queries and searches the shared, read-only index.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    catalog: Arc<Catalog>,
    similarity_floor: Option<f32>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        catalog: Arc<Catalog>,
        similarity_floor: Option<f32>,
    ) -> Self {
        Self {
            embedder,
            index,
            catalog,
            similarity_floor,
        }
    }

    /// Retrieve at most `k` candidates for `query`.
    ///
    /// Candidates scoring below the similarity floor are dropped; if nothing
    /// survives the result is empty rather than an error.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult, RetrievalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery);
        }

        if self.index.is_empty() {
            return Ok(RetrievalResult::default());
        }

        let query_embedding = self.embedder.embed(query)?;
        let hits = self.index.search(&query_embedding, k)?;
        let total = hits.len();

        let candidates: Vec<Candidate> = hits
            .into_iter()
            .filter(|hit| self.similarity_floor.map_or(true, |floor| hit.score >= floor))
            .filter_map(|hit| match self.catalog.get(hit.id) {
                Some(document) => Some((document.clone(), hit.score)),
                None => {
                    log::warn!("index returned document {} missing from catalog", hit.id);
                    None
                }
            })
            .enumerate()
            .map(|(rank, (document, score))| Candidate {
                document,
                score,
                rank,
            })
            .collect();

        log::debug!(
            "retrieved {} of {} candidates above floor {:?}",
            candidates.len(),
            total,
            self.similarity_floor
        );

        Ok(RetrievalResult { candidates })
    }
}
