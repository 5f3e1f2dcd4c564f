//! Recommendation synthesis: turns retrieved candidates into a strictly
//! structured, scored and ranked list.
//!
//! Semantic judgment is delegated to a generative model, but the contract is
//! owned here: output schema, count, ordering and the deterministic fallback
//! used whenever the model cannot be relied on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{Document, YesNo};

mod constraints;
mod fallback;
mod parse;
mod prompt;
mod synthesizer;
mod validate;

pub use synthesizer::Synthesizer;

pub const DEFAULT_TARGET_COUNT: usize = 10;

/// One ranked assessment. Metadata always comes from the catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub assessment_name: String,
    pub url: String,
    pub remote_testing: YesNo,
    pub adaptive_support: YesNo,
    pub duration: Option<u32>,
    pub test_type: String,
    pub relevance_score: f32,
    pub relevance_explanation: String,
}

impl Recommendation {
    pub(crate) fn from_document(document: &Document, score: f32, explanation: String) -> Self {
        let meta = &document.metadata;
        Self {
            assessment_name: meta.name.clone(),
            url: meta.url.clone(),
            remote_testing: meta.remote_testing,
            adaptive_support: meta.adaptive_support,
            duration: meta.duration,
            test_type: meta.test_type.clone(),
            relevance_score: score,
            relevance_explanation: explanation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<Recommendation>,
}

impl RecommendationResponse {
    pub fn len(&self) -> usize {
        self.recommendations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }
}

/// Why the model's ranking was replaced by the local one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DegradedReason {
    #[error("generation timed out")]
    Timeout,

    #[error("provider failed: {0}")]
    ProviderFailed(String),

    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// Result of one synthesis. `degraded` is set when the fallback ranking was
/// used; the response is valid either way.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub response: RecommendationResponse,
    pub degraded: Option<DegradedReason>,
}

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub target_count: usize,
    /// Bound on the whole generation loop, retries and repairs included.
    pub timeout: Duration,
    pub max_retries: usize,
    pub max_repairs: usize,
    pub max_tokens: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            target_count: DEFAULT_TARGET_COUNT,
            timeout: Duration::from_secs(30),
            max_retries: 1,
            max_repairs: 2,
            max_tokens: 2048,
        }
    }
}

/// A recommendation together with the retrieval rank of its document.
#[derive(Debug, Clone)]
pub(crate) struct Ranked {
    pub rank: usize,
    pub recommendation: Recommendation,
}

/// Clamp a score into [0, 1]; NaN becomes 0.
pub(crate) fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Sort by score descending, ties by retrieval rank, and cut to `target`.
pub(crate) fn finalize(mut ranked: Vec<Ranked>, target: usize) -> Vec<Recommendation> {
    ranked.sort_by(|a, b| {
        b.recommendation
            .relevance_score
            .total_cmp(&a.recommendation.relevance_score)
            .then(a.rank.cmp(&b.rank))
    });
    ranked.truncate(target);
    ranked.into_iter().map(|r| r.recommendation).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(rank: usize, score: f32) -> Ranked {
        Ranked {
            rank,
            recommendation: Recommendation {
                assessment_name: format!("A{rank}"),
                url: format!("https://example.com/{rank}"),
                remote_testing: YesNo::Yes,
                adaptive_support: YesNo::No,
                duration: None,
                test_type: String::new(),
                relevance_score: score,
                relevance_explanation: "x".to_string(),
            },
        }
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(f32::NAN), 0.0);
        assert_eq!(clamp_score(1.5), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(0.42), 0.42);
    }

    #[test]
    fn test_finalize_orders_by_score_then_rank() {
        let out = finalize(
            vec![ranked(2, 0.5), ranked(0, 0.5), ranked(1, 0.9), ranked(3, 0.1)],
            3,
        );
        let names: Vec<_> = out.iter().map(|r| r.assessment_name.as_str()).collect();
        assert_eq!(names, vec!["A1", "A0", "A2"]);
    }

    #[test]
    fn test_response_serializes_flags_as_yes_no() {
        let response = RecommendationResponse {
            recommendations: vec![ranked(0, 0.7).recommendation],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["recommendations"][0]["remote_testing"], "Yes");
        assert_eq!(json["recommendations"][0]["adaptive_support"], "No");
        assert!(json["recommendations"][0]["duration"].is_null());
    }
}
