use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{failure_body, GenerationError, GenerationRequest, GenerativeProvider};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, client: Client) -> Self {
        Self {
            api_key,
            model,
            client,
        }
    }
}

impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &request.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.context,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: "application/json",
            },
        };
        let resp = self
            .client
            .post(format!("{GEMINI_BASE_URL}/{}:generateContent", self.model))
            .header("x-goog-api-key", self.api_key.trim())
            .json(&body)
            .send()
            .map_err(|e| GenerationError::from_reqwest("gemini", e))?;
        if !resp.status().is_success() {
            return Err(failure_body(resp));
        }
        let parsed: GenerateContentResponse = resp
            .json()
            .map_err(|e| GenerationError::InvalidResponse(format!("gemini: {e}")))?;
        let answer = parsed
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if answer.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(
                "gemini response missing text content".to_string(),
            ));
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}
