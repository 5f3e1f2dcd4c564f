use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{failure_body, GenerationError, GenerationRequest, GenerativeProvider};

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, client: Client) -> Self {
        Self {
            api_key,
            model,
            client,
        }
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

impl GenerativeProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let headers = self
            .headers()
            .map_err(|e| GenerationError::Config(e.to_string()))?;
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.context,
                },
            ],
        };
        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .headers(headers)
            .json(&body)
            .send()
            .map_err(|e| GenerationError::from_reqwest("openai", e))?;
        if !resp.status().is_success() {
            return Err(failure_body(resp));
        }
        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| GenerationError::InvalidResponse(format!("openai: {e}")))?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::InvalidResponse("openai response missing content".to_string())
            })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
