//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ThinkingLevel;

/// Request to compile a new analysis plan.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlanRequest {
    /// Local path or existing repository id
    pub repo_ref: String,

    /// security, performance, architecture, full or deep
    pub analysis_kind: String,

    /// Free-text question; required for deep analysis
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Request to run an approved plan.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutePlanRequest {
    pub plan_id: String,
    pub approved_by: String,
    pub approval_signature: String,
}

/// Request for the dev-mode signing helper.
#[derive(Debug, Clone, Deserialize)]
pub struct SignPlanRequest {
    pub plan_id: String,
    pub approved_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignPlanResponse {
    pub plan_id: String,
    pub approved_by: String,
    pub approval_signature: String,
}

/// Request to run the autonomous agent.
#[derive(Debug, Clone, Deserialize)]
pub struct RunAgentRequest {
    /// What the agent should find out
    pub goal: String,

    /// Iteration budget (clamped to the server cap)
    #[serde(default)]
    pub max_iterations: Option<usize>,

    #[serde(default)]
    pub thinking_level: Option<ThinkingLevel>,
}

/// Request to run a tool as a background job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    pub tool_name: String,

    #[serde(default = "empty_object")]
    pub args: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}
