use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{failure_body, GenerationError, GenerationRequest, GenerativeProvider};

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, client: Client) -> Self {
        Self {
            api_key,
            model,
            client,
        }
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

impl GenerativeProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let headers = self
            .headers()
            .map_err(|e| GenerationError::Config(e.to_string()))?;
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: &request.context,
                }],
            }],
        };
        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .headers(headers)
            .json(&body)
            .send()
            .map_err(|e| GenerationError::from_reqwest("anthropic", e))?;
        if !resp.status().is_success() {
            return Err(failure_body(resp));
        }
        let parsed: AnthropicResponse = resp
            .json()
            .map_err(|e| GenerationError::InvalidResponse(format!("anthropic: {e}")))?;
        let answer = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(
                "anthropic response missing text content".to_string(),
            ));
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
