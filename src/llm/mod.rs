//! Generative model capability used by the recommendation synthesizer.
//!
//! Providers are blocking HTTP clients; callers run them on a blocking
//! thread and bound them with their own deadline.

use std::time::Duration;

use reqwest::blocking::Client;

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Trait implemented by concrete LLM providers.
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System instructions fixing role and output schema
    pub system: String,
    /// Candidate context plus the user query
    pub context: String,
    /// Pinned to 0.0 for reproducible output
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Worth one more attempt: timeouts, connection failures, 429 and 5xx.
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("provider response could not be read: {0}")]
    InvalidResponse(String),

    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }

    fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            GenerationError::Transient(format!("{provider}: {err}"))
        } else if err.is_decode() {
            GenerationError::InvalidResponse(format!("{provider}: {err}"))
        } else {
            GenerationError::Transient(format!("{provider}: {err}"))
        }
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            GenerationError::Transient(format!("status {status}: {body}"))
        } else {
            GenerationError::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// Which provider to construct from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Anthropic,
}

/// Build the configured provider.
pub fn build_provider(
    kind: ProviderKind,
    api_key: String,
    model: String,
    timeout: Duration,
) -> Result<Box<dyn GenerativeProvider>, GenerationError> {
    if api_key.trim().is_empty() {
        return Err(GenerationError::Config("API key is empty".to_string()));
    }

    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GenerationError::Config(format!("failed to build HTTP client: {e}")))?;

    Ok(match kind {
        ProviderKind::Gemini => Box::new(GeminiProvider::new(api_key, model, client)),
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(api_key, model, client)),
        ProviderKind::Anthropic => Box::new(AnthropicProvider::new(api_key, model, client)),
    })
}

/// Read the response body of a failed call for error reporting.
fn failure_body(resp: reqwest::blocking::Response) -> GenerationError {
    let status = resp.status();
    let text = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    GenerationError::from_status(status, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let transient =
            GenerationError::from_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(transient.is_transient());

        let throttled =
            GenerationError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(throttled.is_transient());

        let rejected =
            GenerationError::from_status(reqwest::StatusCode::BAD_REQUEST, "bad".to_string());
        assert!(matches!(rejected, GenerationError::Rejected { status: 400, .. }));
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = build_provider(
            ProviderKind::Gemini,
            "  ".to_string(),
            "gemini-1.5-flash".to_string(),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(GenerationError::Config(_))));
    }

    #[test]
    fn test_provider_kind_names() {
        let kind: ProviderKind = serde_yml::from_str("openai").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);

        let provider = build_provider(
            ProviderKind::Anthropic,
            "key".to_string(),
            "claude-3-5-haiku-latest".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.name(), "anthropic");
    }
}
