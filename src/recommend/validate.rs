//! Validation of parsed model output against the eligible candidate set.
//!
//! Anything that cannot be traced back to a retrieved document is dropped,
//! so the final list never contains an assessment the model made up.

use std::collections::{HashMap, HashSet};

use url::Url;

use crate::catalog::DocumentId;
use crate::semantic::Candidate;

use super::fallback::templated_explanation;
use super::parse::RawRecommendation;
use super::{clamp_score, finalize, Ranked, Recommendation};

/// Normalize a URL for matching: trimmed, lowercased, no trailing slash.
///
/// Unparsable input is compared by its trimmed, lowercased text.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let canonical = match Url::parse(trimmed) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => trimmed.to_string(),
    };
    canonical.to_lowercase().trim_end_matches('/').to_string()
}

/// Turn raw model entries into the final ranked list.
///
/// Entries are matched to candidates by url, or by id when the model gave no
/// url. Unmatched and repeated entries are dropped. Metadata is copied from
/// the matched document, never from the model. When fewer than `target`
/// entries survive, unused candidates pad the list in retrieval order, scored
/// below the weakest accepted entry.
pub(crate) fn assemble(
    query: &str,
    raw: Vec<RawRecommendation>,
    eligible: &[Candidate],
    target: usize,
) -> Vec<Recommendation> {
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut by_id: HashMap<DocumentId, usize> = HashMap::new();
    for (pos, candidate) in eligible.iter().enumerate() {
        let url = &candidate.document.metadata.url;
        if !url.trim().is_empty() {
            by_url.entry(normalize_url(url)).or_insert(pos);
        }
        by_id.entry(candidate.document.id).or_insert(pos);
    }

    let mut used: HashSet<usize> = HashSet::new();
    let mut accepted: Vec<Ranked> = vec![];

    for entry in raw {
        let matched = match (&entry.url, entry.id) {
            (Some(url), _) => by_url.get(&normalize_url(url)).copied(),
            (None, Some(id)) => by_id.get(&id).copied(),
            (None, None) => None,
        };

        let Some(pos) = matched else {
            log::debug!(
                "dropping recommendation not in candidate set: name={:?} url={:?} id={:?}",
                entry.assessment_name,
                entry.url,
                entry.id
            );
            continue;
        };

        if !used.insert(pos) {
            log::debug!("dropping duplicate recommendation for candidate {pos}");
            continue;
        }

        let candidate = &eligible[pos];
        let score = match entry.relevance_score {
            Some(score) if !score.is_nan() => clamp_score(score),
            _ => clamp_score(candidate.score),
        };
        let explanation = entry.relevance_explanation.unwrap_or_else(|| {
            templated_explanation(query, &candidate.document, candidate.score)
        });

        accepted.push(Ranked {
            rank: candidate.rank,
            recommendation: Recommendation::from_document(
                &candidate.document,
                score,
                explanation,
            ),
        });
    }

    // padding sits strictly below the weakest pick, so equal scores only
    // ever occur between entries of the same kind
    let ceiling = accepted
        .iter()
        .map(|r| r.recommendation.relevance_score)
        .min_by(f32::total_cmp)
        .map(|floor| (floor - f32::EPSILON).max(0.0));

    let missing = target.saturating_sub(accepted.len());
    if missing > 0 {
        let padding: Vec<Ranked> = eligible
            .iter()
            .enumerate()
            .filter(|(pos, _)| !used.contains(pos))
            .take(missing)
            .map(|(_, candidate)| {
                let similarity = clamp_score(candidate.score);
                let score = ceiling.map_or(similarity, |ceiling| similarity.min(ceiling));
                Ranked {
                    rank: candidate.rank,
                    recommendation: Recommendation::from_document(
                        &candidate.document,
                        score,
                        templated_explanation(query, &candidate.document, candidate.score),
                    ),
                }
            })
            .collect();

        if !padding.is_empty() {
            log::debug!(
                "padding {} model picks with {} candidates",
                accepted.len(),
                padding.len()
            );
        }
        accepted.extend(padding);
    }

    finalize(accepted, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{normalize, RawRow, YesNo};

    fn candidate(id: u64, name: &str, url: &str, score: f32) -> Candidate {
        let row = RawRow {
            name: Some(name.to_string()),
            url: Some(url.to_string()),
            remote_testing: Some("Yes".to_string()),
            assessment_length: Some("Approximate Completion Time in minutes = 15".to_string()),
            ..Default::default()
        };
        Candidate {
            document: normalize(id, &row).unwrap(),
            score,
            rank: id as usize,
        }
    }

    fn raw(url: Option<&str>, id: Option<u64>, score: Option<f32>) -> RawRecommendation {
        RawRecommendation {
            id,
            url: url.map(str::to_string),
            assessment_name: Some("whatever the model says".to_string()),
            relevance_score: score,
            relevance_explanation: Some("model reason".to_string()),
        }
    }

    fn eligible() -> Vec<Candidate> {
        vec![
            candidate(0, "Java 8", "https://example.com/java-8/", 0.9),
            candidate(1, "Core Java", "https://example.com/core-java/", 0.8),
            candidate(2, "Verify G+", "https://example.com/verify/", 0.6),
        ]
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("  HTTPS://Example.com/Java-8/ "),
            "https://example.com/java-8"
        );
        assert_eq!(normalize_url("not a url/"), "not a url");
        assert_eq!(
            normalize_url("https://example.com/a"),
            normalize_url("https://example.com/a/")
        );
    }

    #[test]
    fn test_hallucinated_entries_are_dropped() {
        let out = assemble(
            "java",
            vec![
                raw(Some("https://made-up.example/x"), Some(99), Some(1.0)),
                raw(Some("https://example.com/core-java"), None, Some(0.95)),
            ],
            &eligible(),
            2,
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].assessment_name, "Core Java");
        assert_eq!(out[0].relevance_explanation, "model reason");
        assert!(out.iter().all(|r| r.url.starts_with("https://example.com/")));
    }

    #[test]
    fn test_metadata_comes_from_document() {
        let out = assemble(
            "java",
            vec![raw(None, Some(2), Some(0.7))],
            &eligible(),
            1,
        );
        assert_eq!(out[0].assessment_name, "Verify G+");
        assert_eq!(out[0].remote_testing, YesNo::Yes);
        assert_eq!(out[0].duration, Some(15));
    }

    #[test]
    fn test_duplicates_and_bad_scores() {
        let out = assemble(
            "java",
            vec![
                raw(Some("https://example.com/java-8"), None, Some(7.0)),
                raw(Some("https://example.com/java-8/"), None, Some(0.1)),
                raw(Some("https://example.com/core-java/"), None, Some(f32::NAN)),
            ],
            &eligible(),
            2,
        );

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].relevance_score, 1.0);
        assert_eq!(out[1].assessment_name, "Core Java");
        assert_eq!(out[1].relevance_score, 0.8);
    }

    #[test]
    fn test_padding_never_outranks_model_picks() {
        let out = assemble(
            "java",
            vec![raw(Some("https://example.com/verify"), None, Some(0.3))],
            &eligible(),
            3,
        );

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].assessment_name, "Verify G+");
        assert!(out[1..].iter().all(|r| r.relevance_score < 0.3));
        // padding shares one score and keeps retrieval order
        assert_eq!(out[1].relevance_score, out[2].relevance_score);
        assert_eq!(out[1].assessment_name, "Java 8");
        assert_eq!(out[2].assessment_name, "Core Java");
        assert!(!out[2].relevance_explanation.is_empty());
    }

    #[test]
    fn test_padding_keeps_its_own_similarity_when_lower() {
        let out = assemble(
            "java",
            vec![raw(Some("https://example.com/java-8"), None, Some(0.95))],
            &eligible(),
            3,
        );

        let scores: Vec<f32> = out.iter().map(|r| r.relevance_score).collect();
        assert_eq!(scores, vec![0.95, 0.8, 0.6]);
    }

    #[test]
    fn test_missing_explanation_is_templated() {
        let mut entry = raw(Some("https://example.com/java-8"), None, Some(0.9));
        entry.relevance_explanation = None;
        let out = assemble("java developer", vec![entry], &eligible(), 1);
        assert_eq!(
            out[0].relevance_explanation,
            "Matches query terms: java (similarity 0.90)."
        );
    }
}
