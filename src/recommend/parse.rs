//! Validating parser for untrusted model output.
//!
//! Never assumes well-formedness: the answer may be fenced in markdown,
//! surrounded by prose, use strings for numbers, or not be JSON at all.

use serde_json::Value;

use crate::catalog::DocumentId;

/// One entry as proposed by the model, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecommendation {
    pub id: Option<DocumentId>,
    pub url: Option<String>,
    pub assessment_name: Option<String>,
    pub relevance_score: Option<f32>,
    pub relevance_explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Vec<RawRecommendation>),
    Malformed(String),
}

/// Parse a model answer into raw recommendations.
pub fn parse_response(text: &str) -> ParseOutcome {
    let value = match extract_json(text) {
        Ok(value) => value,
        Err(reason) => return ParseOutcome::Malformed(reason),
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("recommendations") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return ParseOutcome::Malformed(format!(
                    "\"recommendations\" must be an array, got {}",
                    type_name(&other)
                ))
            }
            None => {
                return ParseOutcome::Malformed(
                    "missing \"recommendations\" array".to_string(),
                )
            }
        },
        other => {
            return ParseOutcome::Malformed(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            ))
        }
    };

    let mut parsed = vec![];
    for item in items {
        match item {
            Value::Object(map) => parsed.push(RawRecommendation {
                id: map.get("id").and_then(as_u64),
                url: map.get("url").and_then(as_text),
                assessment_name: map.get("assessment_name").and_then(as_text),
                relevance_score: map.get("relevance_score").and_then(as_f32),
                relevance_explanation: map.get("relevance_explanation").and_then(as_text),
            }),
            other => log::debug!("skipping non-object recommendation: {other}"),
        }
    }

    ParseOutcome::Parsed(parsed)
}

/// Find the JSON payload in a possibly decorated answer.
fn extract_json(text: &str) -> Result<Value, String> {
    let text = strip_fences(text.trim());
    if text.is_empty() {
        return Err("empty response".to_string());
    }

    let first_error = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    Err(format!("response is not valid JSON: {first_error}"))
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string line (```json)
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
