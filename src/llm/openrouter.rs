//! OpenRouter (OpenAI-compatible chat completions) model client.
//!
//! Chat completions are stateless, so continuation handles are materialised
//! locally: each handle maps to the message history that produced it. Only
//! turns that end in tool calls get a handle, and a handle is consumed when the
//! next turn is sent. Unclaimed histories expire.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ContinuationHandle, FunctionCall, ModelClient, ModelError, ModelInput, ModelRequest,
    ModelResponse, OutputPart, ToolDeclaration,
};

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Per-request timeout; the core never re-implements this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Histories nobody continued within this window are dropped.
const CONVERSATION_TTL: Duration = Duration::from_secs(30 * 60);

const MAX_CONVERSATIONS: usize = 256;

struct Conversation {
    messages: Vec<Value>,
    stored_at: Instant,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
    conversations: Mutex<HashMap<ContinuationHandle, Conversation>>,
}

impl OpenRouterClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            model: model.into(),
            endpoint: OPENROUTER_URL.to_string(),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn history_for(
        &self,
        handle: Option<&ContinuationHandle>,
    ) -> Result<Vec<Value>, ModelError> {
        match handle {
            None => Ok(Vec::new()),
            Some(handle) => self
                .conversations
                .lock()
                .await
                .remove(handle)
                .map(|c| c.messages)
                .ok_or_else(|| ModelError(format!("unknown continuation handle {}", handle.as_str()))),
        }
    }

    /// Keep `messages` for a follow-up turn and return its handle.
    async fn remember(&self, messages: Vec<Value>) -> ContinuationHandle {
        let mut conversations = self.conversations.lock().await;
        conversations.retain(|_, c| c.stored_at.elapsed() < CONVERSATION_TTL);
        if conversations.len() >= MAX_CONVERSATIONS {
            let oldest = conversations
                .iter()
                .min_by_key(|(_, c)| c.stored_at)
                .map(|(handle, _)| handle.clone());
            if let Some(oldest) = oldest {
                tracing::debug!("Evicting continuation {}", oldest.as_str());
                conversations.remove(&oldest);
            }
        }
        let handle = ContinuationHandle::new(Uuid::new_v4().to_string());
        conversations.insert(
            handle.clone(),
            Conversation {
                messages,
                stored_at: Instant::now(),
            },
        );
        handle
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn tool_schemas(tools: &[ToolDeclaration]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

fn input_messages(input: &ModelInput) -> Vec<Value> {
    match input {
        ModelInput::Text(text) => vec![json!({ "role": "user", "content": text })],
        ModelInput::FunctionResults(results) => results
            .iter()
            .map(|r| {
                json!({
                    "role": "tool",
                    "tool_call_id": r.call_id,
                    "name": r.name,
                    "content": r.payload.to_string(),
                })
            })
            .collect(),
    }
}

/// Convert the wire message into ordered output parts.
fn output_parts(message: &AssistantMessage) -> Vec<OutputPart> {
    let mut parts = Vec::new();
    if let Some(reasoning) = message.reasoning.as_ref().filter(|r| !r.trim().is_empty()) {
        parts.push(OutputPart::Thought {
            text: reasoning.clone(),
        });
    }
    for call in message.tool_calls.iter().flatten() {
        // Arguments the model produced may not be valid JSON; pass them through
        // as a string and let the tool reject them.
        let arguments = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
        parts.push(OutputPart::FunctionCall(FunctionCall {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments,
        }));
    }
    if let Some(content) = message.content.as_ref().filter(|c| !c.trim().is_empty()) {
        parts.push(OutputPart::Text {
            text: content.clone(),
        });
    }
    parts
}

#[async_trait]
impl ModelClient for OpenRouterClient {
    async fn call_model(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError("OPENROUTER_API_KEY is not configured".to_string()))?;

        let mut messages = self.history_for(request.continuation.as_ref()).await?;
        if messages.is_empty() {
            if let Some(system) = &request.system_instruction {
                messages.push(json!({ "role": "system", "content": system }));
            }
        }
        messages.extend(input_messages(&request.input));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.generation.temperature,
            "max_tokens": request.generation.max_output_tokens,
            "reasoning": { "effort": request.thinking_level.as_str() },
        });
        if let Some(tools) = request.tools.as_deref().filter(|t| !t.is_empty()) {
            body["tools"] = Value::Array(tool_schemas(tools));
        }

        tracing::debug!(
            "OpenRouter call: model={} messages={}",
            self.model,
            messages.len()
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let preview: String = text.chars().take(300).collect();
            return Err(ModelError(format!("provider returned {}: {}", status, preview)));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ModelError(format!("invalid provider response: {}", e)))?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ModelError("provider returned no choices".to_string()))?;

        let parts = output_parts(&message);

        // Nothing continues a turn without tool calls.
        let calls = message.tool_calls.as_deref().unwrap_or_default();
        if calls.is_empty() {
            return Ok(ModelResponse {
                handle: None,
                parts,
            });
        }

        messages.push(json!({
            "role": "assistant",
            "content": message.content.clone(),
            "tool_calls": calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.function.name, "arguments": c.function.arguments },
                    })
                })
                .collect::<Vec<_>>(),
        }));
        let handle = self.remember(messages).await;

        Ok(ModelResponse {
            handle: Some(handle),
            parts,
        })
    }
}
