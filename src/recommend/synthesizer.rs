use std::sync::Arc;

use crate::llm::{GenerationError, GenerationRequest, GenerativeProvider};
use crate::semantic::{Candidate, RetrievalResult};

use super::constraints::max_duration;
use super::fallback::fallback_ranking;
use super::parse::{parse_response, ParseOutcome, RawRecommendation};
use super::{finalize, prompt, validate};
use super::{DegradedReason, RecommendationResponse, Synthesis, SynthesizerConfig};

/// Ranks retrieved candidates with a generative model, falling back to
/// retrieval order when the model times out, fails or keeps answering
/// garbage.
pub struct Synthesizer {
    provider: Arc<dyn GenerativeProvider>,
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn GenerativeProvider>, config: SynthesizerConfig) -> Self {
        Self { provider, config }
    }

    pub async fn synthesize(&self, query: &str, retrieval: &RetrievalResult) -> Synthesis {
        let bound = max_duration(query);
        let eligible: Vec<Candidate> = retrieval
            .candidates
            .iter()
            .filter(|c| match (bound, c.document.metadata.duration) {
                (Some(max), Some(duration)) => duration <= max,
                _ => true,
            })
            .cloned()
            .collect();

        if let Some(max) = bound {
            log::debug!(
                "duration bound {max} min keeps {} of {} candidates",
                eligible.len(),
                retrieval.len()
            );
        }

        let target = self.config.target_count.min(eligible.len());
        if target == 0 {
            return Synthesis {
                response: RecommendationResponse::default(),
                degraded: None,
            };
        }

        let request = GenerationRequest {
            system: prompt::system_instructions(target, bound),
            context: prompt::render_context(query, &eligible),
            temperature: 0.0,
            max_tokens: self.config.max_tokens,
        };

        let outcome =
            tokio::time::timeout(self.config.timeout, self.generate_parsed(request)).await;
        let (recommendations, degraded) = match outcome {
            Ok(Ok(raw)) => (validate::assemble(query, raw, &eligible, target), None),
            Ok(Err(reason)) => (finalize(fallback_ranking(query, &eligible), target), Some(reason)),
            Err(_) => (
                finalize(fallback_ranking(query, &eligible), target),
                Some(DegradedReason::Timeout),
            ),
        };

        if let Some(reason) = &degraded {
            log::warn!(
                "synthesis degraded ({}), ranking {} candidates by similarity: {reason}",
                self.provider.name(),
                eligible.len()
            );
        }

        Synthesis {
            response: RecommendationResponse { recommendations },
            degraded,
        }
    }

    /// Generate and parse, re-prompting with the parser's complaint while
    /// repairs remain.
    async fn generate_parsed(
        &self,
        mut request: GenerationRequest,
    ) -> Result<Vec<RawRecommendation>, DegradedReason> {
        let context = request.context.clone();
        let mut repairs = 0;

        loop {
            let text = self
                .call_with_retry(&request)
                .await
                .map_err(|e| DegradedReason::ProviderFailed(e.to_string()))?;

            match parse_response(&text) {
                ParseOutcome::Parsed(items) => return Ok(items),
                ParseOutcome::Malformed(reason) => {
                    if repairs >= self.config.max_repairs {
                        return Err(DegradedReason::Malformed(reason));
                    }
                    repairs += 1;
                    log::debug!("model output unparsable ({reason}), repair attempt {repairs}");
                    request.context = prompt::repair_context(&context, &text, &reason);
                }
            }
        }
    }

    /// One provider call on a blocking thread, retried on transient failures.
    async fn call_with_retry(
        &self,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        let mut retries = 0;

        loop {
            let provider = Arc::clone(&self.provider);
            let owned = request.clone();
            let result = tokio::task::spawn_blocking(move || provider.generate(&owned))
                .await
                .unwrap_or_else(|e| {
                    Err(GenerationError::InvalidResponse(format!(
                        "generation task failed: {e}"
                    )))
                });

            match result {
                Err(e) if e.is_transient() && retries < self.config.max_retries => {
                    retries += 1;
                    log::debug!("transient generation failure, retrying: {e}");
                }
                other => return other,
            }
        }
    }
}
