//! HTTP handlers. Each is a thin adapter over the gate, agent, or job manager.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::agent::AgentRun;
use crate::error::OrchestratorError;
use crate::jobs::JobSnapshot;
use crate::orchestrator::{AnalysisKind, AnalysisRequest, Plan};

use super::error::ApiError;
use super::routes::AppState;
use super::types::{
    CreatePlanRequest, ExecutePlanRequest, HealthResponse, RunAgentRequest, SignPlanRequest,
    SignPlanResponse, SubmitJobRequest, SubmitJobResponse,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

// ─────────────────────────────────────────────────────────────────────────────
// Plans
// ─────────────────────────────────────────────────────────────────────────────

pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePlanRequest>,
) -> ApiResult<Plan> {
    let kind: AnalysisKind = req.analysis_kind.parse()?;
    let request = AnalysisRequest::new(req.repo_ref, kind, req.instructions)?;
    let plan = state.gate.create_plan(request).await?;
    Ok(Json(plan))
}

pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
) -> ApiResult<Plan> {
    Ok(Json(state.gate.get_plan(&plan_id).await?))
}

pub async fn execute_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecutePlanRequest>,
) -> ApiResult<Plan> {
    let plan = state
        .gate
        .verify_and_execute(&req.plan_id, &req.approved_by, &req.approval_signature)
        .await?;
    Ok(Json(plan))
}

/// Dev-mode helper: sign the stored plan with the server secret.
pub async fn sign_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignPlanRequest>,
) -> ApiResult<SignPlanResponse> {
    let signature = state.gate.sign_stored(&req.plan_id, &req.approved_by).await?;
    Ok(Json(SignPlanResponse {
        plan_id: req.plan_id,
        approved_by: req.approved_by,
        approval_signature: signature,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

pub async fn run_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunAgentRequest>,
) -> ApiResult<AgentRun> {
    let goal = req.goal.trim();
    if goal.is_empty() {
        return Err(OrchestratorError::Validation("goal must not be empty".to_string()).into());
    }
    let max_iterations = state.config.clamp_iterations(req.max_iterations);
    let thinking_level = req.thinking_level.unwrap_or_default();

    tracing::info!(
        "Agent run: max_iterations={} thinking={}",
        max_iterations,
        thinking_level.as_str()
    );
    let run = state.agent.run(goal, max_iterations, thinking_level).await;
    Ok(Json(run))
}

// ─────────────────────────────────────────────────────────────────────────────
// Jobs
// ─────────────────────────────────────────────────────────────────────────────

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<SubmitJobResponse> {
    let job_id = state.jobs.submit(&req.tool_name, req.args).await?;
    Ok(Json(SubmitJobResponse { job_id }))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.jobs.list().await)
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<JobSnapshot> {
    Ok(Json(state.jobs.status(&job_id).await?))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
