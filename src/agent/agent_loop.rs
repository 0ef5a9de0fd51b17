//! Core agent loop implementation.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::OrchestratorError;
use crate::llm::{
    ContinuationHandle, FunctionCall, FunctionResult, GenerationConfig, ModelClient, ModelInput,
    ModelRequest, OutputPart, ThinkingLevel,
};
use crate::tools::ToolRegistry;

use super::prompt::build_system_prompt;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// The model answered in plain text.
    Done,
    /// The iteration budget ran out. Not a failure.
    MaxIterations,
    /// A model call failed or returned nothing usable.
    Aborted,
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub iteration: usize,
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub result: Value,
    pub success: bool,
}

/// Report of one `Agent::run`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub thoughts: Vec<String>,
    /// Number of model calls made.
    pub iterations: usize,
}

/// Session state for a single run.
struct Session {
    tool_calls: Vec<ToolCallRecord>,
    thoughts: Vec<String>,
    iterations: usize,
}

impl Session {
    fn finish(self, status: AgentStatus, response: Option<String>, error: Option<String>) -> AgentRun {
        AgentRun {
            status,
            response,
            error,
            tool_calls: self.tool_calls,
            thoughts: self.thoughts,
            iterations: self.iterations,
        }
    }
}

/// The autonomous agent.
pub struct Agent {
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
}

impl Agent {
    pub fn new(model: Arc<dyn ModelClient>, tools: Arc<ToolRegistry>) -> Self {
        Self { model, tools }
    }

    /// Drive the model toward `goal`, executing whatever tools it asks for,
    /// for at most `max_iterations` model calls.
    pub async fn run(
        &self,
        goal: &str,
        max_iterations: usize,
        thinking_level: ThinkingLevel,
    ) -> AgentRun {
        let system_prompt = build_system_prompt(&self.tools);
        let declarations = self.tools.declarations();

        let mut session = Session {
            tool_calls: Vec::new(),
            thoughts: Vec::new(),
            iterations: 0,
        };
        let mut input = ModelInput::Text(goal.to_string());
        let mut handle: Option<ContinuationHandle> = None;

        for iteration in 1..=max_iterations {
            tracing::debug!("Agent iteration {}", iteration);
            session.iterations = iteration;

            let request = ModelRequest {
                input,
                system_instruction: Some(system_prompt.clone()),
                tools: Some(declarations.clone()),
                continuation: handle.take(),
                thinking_level,
                generation: GenerationConfig::AGENT,
            };

            let response = match self.model.call_model(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Agent aborted at iteration {}: {}", iteration, e);
                    let message = OrchestratorError::from(e).public_message();
                    return session.finish(AgentStatus::Aborted, None, Some(message));
                }
            };

            let final_text = response.text();
            handle = response.handle;

            let mut results = Vec::new();
            for part in response.parts {
                match part {
                    OutputPart::Thought { text } => session.thoughts.push(text),
                    OutputPart::FunctionCall(call) => {
                        let result = self.execute_tool_call(iteration, call, &mut session).await;
                        results.push(result);
                    }
                    OutputPart::Text { .. } => {}
                }
            }

            if !results.is_empty() {
                if handle.is_none() {
                    tracing::warn!("Model returned tool calls without a continuation handle");
                }
                input = ModelInput::FunctionResults(results);
                continue;
            }

            return match final_text {
                Some(text) => {
                    tracing::info!("Agent finished after {} iteration(s)", iteration);
                    session.finish(AgentStatus::Done, Some(text), None)
                }
                None => session.finish(
                    AgentStatus::Aborted,
                    None,
                    Some("empty model response".to_string()),
                ),
            };
        }

        tracing::info!(
            "Agent reached max iterations ({}) without a final answer",
            max_iterations
        );
        session.finish(AgentStatus::MaxIterations, None, None)
    }

    /// Execute a single tool call and log it on the session.
    async fn execute_tool_call(
        &self,
        iteration: usize,
        call: FunctionCall,
        session: &mut Session,
    ) -> FunctionResult {
        tracing::info!("Calling tool: {} with args: {}", call.name, call.arguments);

        let (payload, success) = match self.tools.try_execute(&call.name, call.arguments.clone()).await {
            Ok(value) => (value, true),
            Err(e) => (e.to_payload(), false),
        };

        session.tool_calls.push(ToolCallRecord {
            iteration,
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments,
            result: payload.clone(),
            success,
        });

        FunctionResult {
            call_id: call.id,
            name: call.name,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelError;
    use crate::test_support::{call_response, text_response, ScriptedModel};
    use serde_json::json;

    fn tools() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register_fn("semantic_search", "Search", json!({}), |args| async move {
            Ok::<Value, anyhow::Error>(json!({ "results": [], "query": args["query"] }))
        });
        tools.register_fn("flaky_scan", "Always fails", json!({}), |_| async move {
            Err::<Value, _>(anyhow::anyhow!("scanner unavailable"))
        });
        Arc::new(tools)
    }

    #[tokio::test]
    async fn answer_without_tools_is_done_at_first_iteration() {
        let model = ScriptedModel::new(vec![text_response("h1", "No issues found.")]);
        let agent = Agent::new(model.clone(), tools());

        let run = agent.run("Is there a README?", 5, ThinkingLevel::Low).await;

        assert_eq!(run.status, AgentStatus::Done);
        assert_eq!(run.iterations, 1);
        assert_eq!(run.response.as_deref(), Some("No issues found."));
        assert!(run.tool_calls.is_empty());

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].input, ModelInput::Text("Is there a README?".to_string()));
        assert!(requests[0].continuation.is_none());
        assert_eq!(requests[0].thinking_level, ThinkingLevel::Low);
        assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn always_failing_tool_exhausts_exactly_n_iterations() {
        let script = (1..=6)
            .map(|i| call_response(&format!("h{}", i), "flaky_scan", json!({})))
            .collect();
        let model = ScriptedModel::new(script);
        let agent = Agent::new(model.clone(), tools());

        let run = agent.run("Scan everything", 4, ThinkingLevel::High).await;

        assert_eq!(run.status, AgentStatus::MaxIterations);
        assert_eq!(run.iterations, 4);
        assert_eq!(model.calls(), 4);
        assert_eq!(run.tool_calls.len(), 4);
        assert!(run.tool_calls.iter().all(|c| !c.success));
        assert_eq!(run.tool_calls[3].iteration, 4);
        assert_eq!(run.tool_calls[0].result, json!({"error": "scanner unavailable"}));
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn tool_results_are_sent_with_the_previous_handle() {
        let model = ScriptedModel::new(vec![
            call_response("h1", "semantic_search", json!({"query": "auth"})),
            text_response("h2", "Auth lives in src/auth.py"),
        ]);
        let agent = Agent::new(model.clone(), tools());

        let run = agent.run("Where is auth?", 5, ThinkingLevel::Medium).await;

        assert_eq!(run.status, AgentStatus::Done);
        assert_eq!(run.iterations, 2);
        assert_eq!(run.thoughts, vec!["I should call semantic_search".to_string()]);
        assert!(run.tool_calls[0].success);

        let second = &model.requests()[1];
        assert_eq!(second.continuation, Some(ContinuationHandle::new("h1")));
        match &second.input {
            ModelInput::FunctionResults(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].call_id, "call_h1");
                assert_eq!(results[0].name, "semantic_search");
                assert_eq!(results[0].payload["query"], "auth");
            }
            other => panic!("expected function results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back_not_fatal() {
        let model = ScriptedModel::new(vec![
            call_response("h1", "delete_repo", json!({})),
            text_response("h2", "That tool does not exist, stopping."),
        ]);
        let agent = Agent::new(model, tools());

        let run = agent.run("Clean up", 5, ThinkingLevel::High).await;

        assert_eq!(run.status, AgentStatus::Done);
        assert_eq!(run.tool_calls[0].result, json!({"error": "Tool delete_repo not found"}));
    }

    #[tokio::test]
    async fn model_failure_aborts_with_partial_history() {
        let model = ScriptedModel::new(vec![
            call_response("h1", "semantic_search", json!({"query": "token"})),
            Err(ModelError("upstream timeout".to_string())),
        ]);
        let agent = Agent::new(model, tools());

        let run = agent.run("Find tokens", 5, ThinkingLevel::High).await;

        assert_eq!(run.status, AgentStatus::Aborted);
        assert_eq!(run.iterations, 2);
        assert_eq!(run.tool_calls.len(), 1);
        let error = run.error.unwrap();
        assert!(error.starts_with("collaborator failure"));
        assert!(!error.contains("upstream timeout"));
    }

    #[tokio::test]
    async fn empty_response_aborts() {
        let model = ScriptedModel::new(vec![Ok(Default::default())]);
        let agent = Agent::new(model, tools());

        let run = agent.run("Anything", 3, ThinkingLevel::High).await;

        assert_eq!(run.status, AgentStatus::Aborted);
        assert_eq!(run.error.as_deref(), Some("empty model response"));
    }
}
