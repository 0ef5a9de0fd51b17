//! Sequential plan execution.
//!
//! Actions run strictly in list order and share one [`ExecutionContext`].
//! Deterministic steps go through the tool registry; `think` and `analyze`
//! call the model directly. A failed critical step stops the run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::collaborators::RepositoryIngestor;
use crate::error::{OrchestratorError, Result};
use crate::llm::{parse_json_response, GenerationConfig, ModelClient, ModelRequest};
use crate::tools::{
    ToolRegistry, INDEX_REPOSITORY, INGEST_REPOSITORY, RUN_STATIC_ANALYSIS, SEMANTIC_SEARCH,
};

use super::context::{ExecutionContext, INVESTIGATION_PLAN, REPO_ID};
use super::plan::{Action, ActionKind, ActionStatus, AnalysisKind, AnalysisRequest};
use super::prompts::{ANALYST_SYSTEM_PROMPT, PLANNER_SYSTEM_PROMPT};

/// Upper bound on files `analyze` will read from one investigation plan.
const MAX_EVIDENCE_FILES: usize = 8;

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub step: usize,
    pub action: ActionKind,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate results stored on a completed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub repo_ref: String,
    pub analysis_kind: AnalysisKind,
    pub summary: String,
    pub action_results: Vec<ActionResult>,
    pub total_actions: usize,
    pub completed_actions: usize,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at_step: Option<usize>,
}

/// Output of `think`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationPlan {
    pub approach: String,
    #[serde(default)]
    pub files_to_read: Vec<FileToRead>,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileToRead {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

/// Output of `analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFindings {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Value>,
    #[serde(default)]
    pub security_risks: Vec<Value>,
    #[serde(default)]
    pub code_changes: Vec<Value>,
    #[serde(default)]
    pub confidence_score: f64,
}

pub struct StepExecutor {
    tools: Arc<ToolRegistry>,
    ingestor: Arc<dyn RepositoryIngestor>,
    model: Arc<dyn ModelClient>,
    repo_text_budget: usize,
}

impl StepExecutor {
    pub fn new(
        tools: Arc<ToolRegistry>,
        ingestor: Arc<dyn RepositoryIngestor>,
        model: Arc<dyn ModelClient>,
        repo_text_budget: usize,
    ) -> Self {
        Self {
            tools,
            ingestor,
            model,
            repo_text_budget,
        }
    }

    /// Run `actions` in order, updating each in place.
    pub async fn execute(
        &self,
        actions: &mut [Action],
        request: &AnalysisRequest,
    ) -> ExecutionResults {
        let mut ctx = ExecutionContext::new();
        let mut results = ExecutionResults {
            repo_ref: request.repo_ref.clone(),
            analysis_kind: request.analysis_kind,
            summary: String::new(),
            action_results: Vec::with_capacity(actions.len()),
            total_actions: actions.len(),
            completed_actions: 0,
            aborted: false,
            aborted_at_step: None,
        };

        for action in actions.iter_mut() {
            tracing::info!("Executing action {}: {}", action.step, action.kind);

            match self.run_action(action, request, &mut ctx).await {
                Ok(value) => {
                    action.status = ActionStatus::Completed;
                    action.error = None;
                    results.completed_actions += 1;
                    results.action_results.push(ActionResult {
                        step: action.step,
                        action: action.kind,
                        status: ActionStatus::Completed,
                        result: Some(value),
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!("Action {} failed: {}", action.step, e);
                    let message = e.public_message();
                    action.status = ActionStatus::Failed;
                    action.error = Some(message.clone());
                    results.action_results.push(ActionResult {
                        step: action.step,
                        action: action.kind,
                        status: ActionStatus::Failed,
                        result: None,
                        error: Some(message),
                    });
                    if action.critical {
                        tracing::warn!(
                            "Critical action {} failed; skipping remaining actions",
                            action.step
                        );
                        results.aborted = true;
                        results.aborted_at_step = Some(action.step);
                        break;
                    }
                }
            }
        }

        results.summary = match results.aborted_at_step {
            Some(step) => format!(
                "Analysis aborted at step {}: {} of {} actions completed",
                step, results.completed_actions, results.total_actions
            ),
            None => format!(
                "Orchestrated analysis completed: {} of {} actions succeeded",
                results.completed_actions, results.total_actions
            ),
        };
        results
    }

    async fn run_action(
        &self,
        action: &Action,
        request: &AnalysisRequest,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        match action.kind {
            ActionKind::Ingest => {
                let repo_ref = action.param_str("repo_ref").unwrap_or(&request.repo_ref);
                let value = self
                    .call_tool(INGEST_REPOSITORY, json!({ "repo_ref": repo_ref }))
                    .await?;
                if let Some(repo_id) = value.get("repo_id").cloned() {
                    ctx.insert(REPO_ID, repo_id);
                }
                Ok(value)
            }
            ActionKind::Index => {
                let repo_id = repo_id(ctx, action, request);
                self.call_tool(INDEX_REPOSITORY, json!({ "repo_id": repo_id }))
                    .await
            }
            ActionKind::StaticAnalysis => {
                let mut args = action.params.clone();
                args.insert("repo_id".to_string(), json!(repo_id(ctx, action, request)));
                self.call_tool(RUN_STATIC_ANALYSIS, Value::Object(args)).await
            }
            ActionKind::SemanticSearch => {
                let mut args = action.params.clone();
                args.insert("repo_id".to_string(), json!(repo_id(ctx, action, request)));
                self.call_tool(SEMANTIC_SEARCH, Value::Object(args)).await
            }
            ActionKind::Think => self.think(action, request, ctx).await,
            ActionKind::Analyze => self.analyze(action, request, ctx).await,
        }
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.tools
            .try_execute(name, args)
            .await
            .map_err(|e| OrchestratorError::Collaborator(e.to_string()))
    }

    /// Ask the model for an investigation plan and store it in the context.
    async fn think(
        &self,
        action: &Action,
        request: &AnalysisRequest,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let query = query_param(action)?;
        let repo_id = repo_id(ctx, action, request);

        let repo_text = self.ingestor.get_repo_text(&repo_id).await?;
        let context = truncate_chars(&repo_text, self.repo_text_budget);

        let prompt = format!(
            "CONTEXT:\n{}\n\nUSER QUERY:\n{}\n\nCreate an investigation plan in JSON.",
            context, query
        );
        let response = self
            .model
            .call_model(
                ModelRequest::text(prompt, GenerationConfig::PLANNING)
                    .with_system_instruction(PLANNER_SYSTEM_PROMPT),
            )
            .await?;
        let text = response.text().ok_or_else(|| {
            OrchestratorError::Collaborator("model returned no investigation plan".to_string())
        })?;
        let plan: InvestigationPlan = parse_json_response(&text)?;

        tracing::info!(
            "Investigation plan: {} ({} files)",
            plan.approach,
            plan.files_to_read.len()
        );

        let value = serde_json::to_value(&plan)
            .map_err(|e| OrchestratorError::Collaborator(e.to_string()))?;
        ctx.insert(INVESTIGATION_PLAN, value.clone());
        Ok(value)
    }

    /// Read the planned files and ask the model for findings.
    async fn analyze(
        &self,
        action: &Action,
        request: &AnalysisRequest,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let plan_value = ctx.require(INVESTIGATION_PLAN)?.clone();
        let plan: InvestigationPlan = serde_json::from_value(plan_value).map_err(|e| {
            OrchestratorError::Collaborator(format!("unusable investigation plan: {}", e))
        })?;
        let query = query_param(action)?;
        let repo_id = repo_id(ctx, action, request);

        let mut evidence = Vec::new();
        let mut unreadable = Vec::new();
        for file in plan.files_to_read.iter().take(MAX_EVIDENCE_FILES) {
            match self.ingestor.read_file(&repo_id, &file.path).await {
                Ok(content) => evidence.push((file.path.as_str(), content)),
                Err(e) => {
                    tracing::warn!("Could not read planned file {}: {}", file.path, e);
                    unreadable.push(file.path.clone());
                }
            }
        }

        let plan_json = serde_json::to_string_pretty(&plan)
            .map_err(|e| OrchestratorError::Collaborator(e.to_string()))?;
        let prompt = format!(
            "USER QUERY:\n{}\n\nPLAN:\n{}\n\nEVIDENCE:\n{}\n\nAnalyze the evidence and provide findings in JSON.",
            query,
            plan_json,
            format_evidence(&evidence)
        );
        let response = self
            .model
            .call_model(
                ModelRequest::text(prompt, GenerationConfig::ANALYSIS)
                    .with_system_instruction(ANALYST_SYSTEM_PROMPT),
            )
            .await?;
        let text = response.text().ok_or_else(|| {
            OrchestratorError::Collaborator("model returned no analysis".to_string())
        })?;
        let findings: AnalysisFindings = parse_json_response(&text)?;

        Ok(json!({
            "analysis": findings,
            "files_read": evidence.iter().map(|(path, _)| *path).collect::<Vec<_>>(),
            "files_unreadable": unreadable,
        }))
    }
}

/// Repository id from the ingest step, else the action's own, else the request's.
fn repo_id(ctx: &ExecutionContext, action: &Action, request: &AnalysisRequest) -> String {
    ctx.get(REPO_ID)
        .and_then(Value::as_str)
        .or_else(|| action.param_str("repo_id"))
        .unwrap_or(&request.repo_ref)
        .to_string()
}

fn query_param(action: &Action) -> Result<&str> {
    action
        .param_str("query")
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| {
            OrchestratorError::Validation(format!("action {} has no query", action.step))
        })
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Files as line-numbered blocks.
fn format_evidence(files: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (path, content) in files {
        out.push_str(&format!("--- START FILE: {} ---\n", path));
        for (i, line) in content.lines().enumerate() {
            out.push_str(&format!("{:4} | {}\n", i + 1, line));
        }
        out.push_str(&format!("--- END FILE: {} ---\n\n", path));
    }
    out
}
