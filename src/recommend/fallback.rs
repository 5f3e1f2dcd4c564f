//! Deterministic local ranking used when the model cannot be relied on.

use std::collections::HashSet;

use crate::catalog::Document;
use crate::semantic::Candidate;

use super::{clamp_score, Ranked, Recommendation};

/// Words too common in hiring queries, or in every document's field labels,
/// to explain a match.
const STOPWORDS: &[&str] = &[
    "and", "are", "assessment", "can", "description", "downloads", "for", "from", "have",
    "hour", "hours", "job", "languages", "length", "levels", "looking", "max", "min", "mins",
    "minute", "minutes", "name", "need", "our", "product", "should", "test", "that", "the",
    "their", "this", "types", "who", "will", "with", "within", "you", "your",
];

/// Rank eligible candidates purely by retrieval similarity.
pub(crate) fn fallback_ranking(query: &str, eligible: &[Candidate]) -> Vec<Ranked> {
    eligible
        .iter()
        .map(|candidate| {
            let score = clamp_score(candidate.score);
            Ranked {
                rank: candidate.rank,
                recommendation: Recommendation::from_document(
                    &candidate.document,
                    score,
                    templated_explanation(query, &candidate.document, candidate.score),
                ),
            }
        })
        .collect()
}

/// Explanation built from the terms the query and document share.
pub fn templated_explanation(query: &str, document: &Document, similarity: f32) -> String {
    let doc_terms: HashSet<String> = terms(&document.content).collect();

    let mut seen = HashSet::new();
    let shared: Vec<String> = terms(query)
        .filter(|term| doc_terms.contains(term))
        .filter(|term| seen.insert(term.clone()))
        .take(5)
        .collect();

    if shared.is_empty() {
        format!(
            "Semantically similar to the query (similarity {:.2}).",
            similarity
        )
    } else {
        format!(
            "Matches query terms: {} (similarity {:.2}).",
            shared.join(", "),
            similarity
        )
    }
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .map(str::to_lowercase)
        .filter(|term| term.chars().count() >= 3 || term.contains(['+', '#']))
        .filter(|term| !STOPWORDS.contains(&term.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{normalize, RawRow};

    fn doc(name: &str, description: &str) -> Document {
        normalize(
            0,
            &RawRow {
                name: Some(name.to_string()),
                description: Some(description.to_string()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_explanation_lists_shared_terms_in_query_order() {
        let document = doc("Core Java (Entry Level)", "Multiple-choice test of Java basics");
        let text = templated_explanation("Entry level Java developer, java", &document, 0.8123);

        assert_eq!(text, "Matches query terms: entry, level, java (similarity 0.81).");
    }

    #[test]
    fn test_explanation_without_overlap() {
        let document = doc("Verify Numerical", "Numerical reasoning");
        let text = templated_explanation("team lead with people skills", &document, 0.4);

        assert_eq!(text, "Semantically similar to the query (similarity 0.40).");
    }

    #[test]
    fn test_explanation_keeps_language_names() {
        let document = doc("C++ Programming", "Tests C# and C++ knowledge");
        let text = templated_explanation("c++ engineer", &document, 0.7);
        assert!(text.contains("c++"));
    }

    #[test]
    fn test_fallback_uses_clamped_similarity_in_retrieval_order() {
        let candidates = vec![
            Candidate {
                document: doc("A", "first"),
                score: 1.2,
                rank: 0,
            },
            Candidate {
                document: doc("B", "second"),
                score: -0.1,
                rank: 1,
            },
        ];

        let ranked = fallback_ranking("anything", &candidates);
        assert_eq!(ranked[0].recommendation.relevance_score, 1.0);
        assert_eq!(ranked[1].recommendation.relevance_score, 0.0);
        assert_eq!(ranked[1].rank, 1);
        assert!(!ranked[1].recommendation.relevance_explanation.is_empty());
    }
}
