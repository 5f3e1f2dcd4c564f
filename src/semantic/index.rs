//! Immutable in-memory vector index with exact nearest-neighbour search.
//!
//! Holds only document ids and vectors; document content lives in the
//! catalog. The index is built once and never mutated afterwards.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::DocumentId;

/// Similarity metric used for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl Metric {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::L2 => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::L2),
            _ => None,
        }
    }
}

/// An entry in the vector index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: DocumentId,
    pub embedding: Vec<f32>,
    /// Precomputed L2 norm of `embedding`
    norm: f32,
}

/// In-memory vector index for semantic search.
#[derive(Debug)]
pub struct VectorIndex {
    /// Entries in build order; search ties resolve by id, not position
    entries: Vec<VectorEntry>,
    dimensions: usize,
    metric: Metric,
}

/// Search result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: DocumentId,
    /// Similarity score, higher is better regardless of metric
    pub score: f32,
}

impl VectorIndex {
    /// Create an empty index.
    pub fn empty(dimensions: usize, metric: Metric) -> Self {
        Self {
            entries: vec![],
            dimensions,
            metric,
        }
    }

    /// Build an index from `(id, embedding)` pairs.
    ///
    /// Rejects wrong dimensions, duplicate ids and, for cosine, zero-norm
    /// vectors.
    pub fn build(
        dimensions: usize,
        metric: Metric,
        entries: impl IntoIterator<Item = (DocumentId, Vec<f32>)>,
    ) -> Result<Self, IndexError> {
        let mut seen = HashSet::new();
        let mut built = vec![];

        for (id, embedding) in entries {
            if embedding.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: embedding.len(),
                });
            }

            let norm = l2_norm(&embedding);
            if metric == Metric::Cosine && norm < f32::EPSILON {
                return Err(IndexError::ZeroNormVector(id));
            }

            if !seen.insert(id) {
                return Err(IndexError::DuplicateId(id));
            }

            built.push(VectorEntry {
                id,
                embedding,
                norm,
            });
        }

        Ok(Self {
            entries: built,
            dimensions,
            metric,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VectorEntry> {
        self.entries.iter()
    }

    /// Return at most `k` entries most similar to `query`.
    ///
    /// Results are sorted by score descending, ties broken by ascending id.
    /// An empty index yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .map(|entry| SearchResult {
                id: entry.id,
                score: self.score(query, query_norm, entry),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(k);

        Ok(results)
    }

    fn score(&self, query: &[f32], query_norm: f32, entry: &VectorEntry) -> f32 {
        match self.metric {
            Metric::Cosine => {
                if query_norm < f32::EPSILON {
                    return 0.0;
                }
                let dot: f32 = query.iter().zip(&entry.embedding).map(|(a, b)| a * b).sum();
                dot / (query_norm * entry.norm)
            }
            Metric::L2 => {
                let distance = query
                    .iter()
                    .zip(&entry.embedding)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + distance)
            }
        }
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot index zero-norm vector for document {0}")]
    ZeroNormVector(DocumentId),

    #[error("Document {0} indexed twice")]
    DuplicateId(DocumentId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis_index(metric: Metric) -> VectorIndex {
        VectorIndex::build(
            3,
            metric,
            vec![
                (1, vec![1.0, 0.0, 0.0]),
                (2, vec![0.0, 1.0, 0.0]),
                (3, vec![0.7, 0.7, 0.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_index_search_is_empty() {
        let index = VectorIndex::empty(3, Metric::Cosine);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 10).unwrap().is_empty());

        // dimension checks do not apply when there is nothing to compare
        assert!(index.search(&[1.0], 10).unwrap().is_empty());
    }

    #[test]
    fn test_build_dimension_mismatch() {
        let result = VectorIndex::build(3, Metric::Cosine, vec![(1, vec![1.0, 0.0])]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_build_zero_norm_rejected_for_cosine_only() {
        let zero = vec![(1, vec![0.0, 0.0, 0.0])];
        assert!(matches!(
            VectorIndex::build(3, Metric::Cosine, zero.clone()),
            Err(IndexError::ZeroNormVector(1))
        ));
        assert!(VectorIndex::build(3, Metric::L2, zero).is_ok());
    }

    #[test]
    fn test_build_duplicate_id_rejected() {
        let result = VectorIndex::build(
            3,
            Metric::Cosine,
            vec![(1, vec![1.0, 0.0, 0.0]), (1, vec![0.0, 1.0, 0.0])],
        );
        assert!(matches!(result, Err(IndexError::DuplicateId(1))));
    }

    #[test]
    fn test_cosine_search_orders_by_similarity() {
        let index = basis_index(Metric::Cosine);
        let results = index.search(&[1.0, 0.1, 0.0], 10).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, 1);
        assert_eq!(results[1].id, 3);
        assert_eq!(results[2].id, 2);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_l2_scores_are_inverted_distances() {
        let index = basis_index(Metric::L2);
        let results = index.search(&[1.0, 0.0, 0.0], 10).unwrap();

        assert_eq!(results[0].id, 1);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_search_limit() {
        let index = basis_index(Metric::Cosine);
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 2).unwrap().len(), 2);
        assert!(index.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_ties_break_by_id() {
        let index = VectorIndex::build(
            2,
            Metric::Cosine,
            vec![(9, vec![1.0, 0.0]), (4, vec![2.0, 0.0]), (6, vec![0.5, 0.0])],
        )
        .unwrap();

        let ids: Vec<_> = index
            .search(&[1.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![4, 6, 9]);
    }

    #[test]
    fn test_search_is_deterministic() {
        let index = basis_index(Metric::Cosine);
        let query = [0.3, 0.9, 0.1];
        assert_eq!(
            index.search(&query, 3).unwrap(),
            index.search(&query, 3).unwrap()
        );
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = basis_index(Metric::Cosine);
        assert!(matches!(
            index.search(&[1.0, 0.0], 3),
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }
}
