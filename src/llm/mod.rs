//! Language-model collaborator contract.
//!
//! The core only ever talks to a model through [`ModelClient::call_model`]:
//! one input (text or tool results), optional tool declarations, and an optional
//! continuation handle linking this turn to the previous one. Responses are an
//! ordered list of parts (thought, function call, text).

mod openrouter;

pub use openrouter::OpenRouterClient;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Uniform failure raised by any model call.
#[derive(Debug, Clone, Error)]
#[error("model call failed: {0}")]
pub struct ModelError(pub String);

/// Opaque reference returned by the provider, linking turn *k* to turn *k+1*.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationHandle(String);

impl ContinuationHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How much reasoning effort the model should spend per turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Low,
    Medium,
    #[default]
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Sampling settings for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationConfig {
    /// Investigation planning: low temperature, short JSON.
    pub const PLANNING: Self = Self {
        temperature: 0.2,
        max_output_tokens: 1024,
    };

    /// Evidence analysis: near-deterministic, long JSON.
    pub const ANALYSIS: Self = Self {
        temperature: 0.1,
        max_output_tokens: 4096,
    };

    /// Agent turns.
    pub const AGENT: Self = Self {
        temperature: 0.5,
        max_output_tokens: 2048,
    };
}

/// A tool the model may call, in JSON-schema form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The executed result of a [`FunctionCall`], sent back on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub call_id: String,
    pub name: String,
    pub payload: Value,
}

/// What the caller sends on one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    Text(String),
    FunctionResults(Vec<FunctionResult>),
}

/// One element of a model response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputPart {
    Thought { text: String },
    FunctionCall(FunctionCall),
    Text { text: String },
}

/// A single model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub input: ModelInput,
    pub system_instruction: Option<String>,
    pub tools: Option<Vec<ToolDeclaration>>,
    pub continuation: Option<ContinuationHandle>,
    pub thinking_level: ThinkingLevel,
    pub generation: GenerationConfig,
}

impl ModelRequest {
    /// A one-shot text request with no tools and no prior context.
    pub fn text(input: impl Into<String>, generation: GenerationConfig) -> Self {
        Self {
            input: ModelInput::Text(input.into()),
            system_instruction: None,
            tools: None,
            continuation: None,
            thinking_level: ThinkingLevel::Medium,
            generation,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

/// The model's answer to one [`ModelRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub handle: Option<ContinuationHandle>,
    pub parts: Vec<OutputPart>,
}

impl ModelResponse {
    /// Concatenated text parts, if any.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                OutputPart::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    pub fn has_function_call(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, OutputPart::FunctionCall(_)))
    }
}

/// Anything that can answer a [`ModelRequest`].
///
/// Implementations enforce their own timeouts and report every failure as a
/// [`ModelError`]; callers never retry.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call_model(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Parse a JSON body out of model text, tolerating markdown code fences.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T, ModelError> {
    let mut clean = text.trim();
    if let Some(rest) = clean.strip_prefix("```") {
        // Drop the fence line, including any language tag.
        clean = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        clean = clean.trim_end();
        if let Some(stripped) = clean.strip_suffix("```") {
            clean = stripped;
        }
        clean = clean.trim();
    }

    serde_json::from_str(clean).map_err(|e| {
        let preview: String = text.chars().take(100).collect();
        ModelError(format!(
            "failed to parse JSON from model response: {} (response was: {}...)",
            e, preview
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Approach {
        approach: String,
    }

    #[test]
    fn parse_plain_json() {
        let parsed: Approach = parse_json_response(r#"{"approach": "trace auth"}"#).unwrap();
        assert_eq!(parsed.approach, "trace auth");
    }

    #[test]
    fn parse_fenced_json_with_language_tag() {
        let text = "```json\n{\"approach\": \"grep\"}\n```";
        let parsed: Approach = parse_json_response(text).unwrap();
        assert_eq!(parsed.approach, "grep");
    }

    #[test]
    fn parse_failure_reports_preview() {
        let err = parse_json_response::<Approach>("not json at all").unwrap_err();
        assert!(err.to_string().contains("not json at all"));
    }

    #[test]
    fn response_text_ignores_thoughts_and_blank_text() {
        let response = ModelResponse {
            handle: None,
            parts: vec![
                OutputPart::Thought {
                    text: "hmm".to_string(),
                },
                OutputPart::Text {
                    text: "  ".to_string(),
                },
                OutputPart::Text {
                    text: "answer".to_string(),
                },
            ],
        };
        assert_eq!(response.text().as_deref(), Some("answer"));
        assert!(!response.has_function_call());
    }

    #[test]
    fn output_parts_serialize_with_type_tag() {
        let part = OutputPart::FunctionCall(FunctionCall {
            id: "c1".to_string(),
            name: "semantic_search".to_string(),
            arguments: json!({"query": "auth"}),
        });
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "function_call");
        assert_eq!(value["name"], "semantic_search");
    }
}
