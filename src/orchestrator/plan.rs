//! Plans, actions, and the rules that compile a request into actions.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::tools::{DEFAULT_LANGUAGE, DEFAULT_QUERY_SUITE};

use super::executor::ExecutionResults;

pub const MAX_REPO_REF_LEN: usize = 100;
pub const MAX_INSTRUCTIONS_LEN: usize = 2000;
pub const SEARCH_LIMIT: u64 = 10;

/// What kind of analysis the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Security,
    Performance,
    Architecture,
    Full,
    /// Model-driven investigation of the instructions.
    Deep,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Architecture => "architecture",
            Self::Full => "full",
            Self::Deep => "deep",
        }
    }

    fn runs_static_analysis(&self) -> bool {
        matches!(self, Self::Security | Self::Full)
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            "architecture" => Ok(Self::Architecture),
            "full" => Ok(Self::Full),
            "deep" => Ok(Self::Deep),
            other => Err(OrchestratorError::Validation(format!(
                "unknown analysis kind '{}' (expected security, performance, architecture, full or deep)",
                other
            ))),
        }
    }
}

/// A validated analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub repo_ref: String,
    pub analysis_kind: AnalysisKind,
    pub instructions: Option<String>,
}

impl AnalysisRequest {
    /// Build and validate a request. Blank instructions count as absent.
    pub fn new(
        repo_ref: impl Into<String>,
        analysis_kind: AnalysisKind,
        instructions: Option<String>,
    ) -> Result<Self> {
        let request = Self {
            repo_ref: repo_ref.into().trim().to_string(),
            analysis_kind,
            instructions: instructions
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repo_ref.is_empty() {
            return Err(OrchestratorError::Validation(
                "repo_ref must not be empty".to_string(),
            ));
        }
        if self.repo_ref.chars().count() > MAX_REPO_REF_LEN {
            return Err(OrchestratorError::Validation(format!(
                "repo_ref must be at most {} characters",
                MAX_REPO_REF_LEN
            )));
        }
        if let Some(instructions) = &self.instructions {
            if instructions.chars().count() > MAX_INSTRUCTIONS_LEN {
                return Err(OrchestratorError::Validation(format!(
                    "instructions must be at most {} characters",
                    MAX_INSTRUCTIONS_LEN
                )));
            }
        }
        if self.analysis_kind == AnalysisKind::Deep && self.instructions.is_none() {
            return Err(OrchestratorError::Validation(
                "deep analysis requires instructions describing what to investigate".to_string(),
            ));
        }
        Ok(())
    }
}

/// The closed set of plan steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ingest,
    Index,
    StaticAnalysis,
    Think,
    Analyze,
    SemanticSearch,
}

impl ActionKind {
    /// A failed critical action stops the run.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Think | Self::Analyze)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Index => "index",
            Self::StaticAnalysis => "static_analysis",
            Self::Think => "think",
            Self::Analyze => "analyze",
            Self::SemanticSearch => "semantic_search",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// 1-indexed position in the plan.
    pub step: usize,
    pub kind: ActionKind,
    pub description: String,
    pub params: Map<String, Value>,
    pub status: ActionStatus,
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    fn new(kind: ActionKind, description: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            step: 0,
            kind,
            description: description.into(),
            params,
            status: ActionStatus::Pending,
            critical: kind.is_critical(),
            error: None,
        }
    }

    /// String parameter, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Compile a request into its ordered action list.
///
/// `ingest` and `index` always come first. `static_analysis` follows for
/// security and full analyses. A deep analysis appends `think` then `analyze`
/// and no search; any other request with instructions appends a search.
pub fn compile_actions(request: &AnalysisRequest) -> Vec<Action> {
    let repo = request.repo_ref.as_str();
    let mut actions = vec![
        Action::new(
            ActionKind::Ingest,
            "Fetch and normalize repository",
            json!({ "repo_ref": repo }),
        ),
        Action::new(
            ActionKind::Index,
            "Index repository for semantic search",
            json!({ "repo_id": repo }),
        ),
    ];

    if request.analysis_kind.runs_static_analysis() {
        actions.push(Action::new(
            ActionKind::StaticAnalysis,
            "Run static security analysis",
            json!({
                "repo_id": repo,
                "language": DEFAULT_LANGUAGE,
                "query_suite": DEFAULT_QUERY_SUITE,
            }),
        ));
    }

    match (&request.analysis_kind, &request.instructions) {
        (AnalysisKind::Deep, Some(query)) => {
            actions.push(Action::new(
                ActionKind::Think,
                "Plan the investigation",
                json!({ "repo_id": repo, "query": query }),
            ));
            actions.push(Action::new(
                ActionKind::Analyze,
                "Analyze the planned files",
                json!({ "repo_id": repo, "query": query }),
            ));
        }
        (AnalysisKind::Deep, None) => {}
        (_, Some(query)) => {
            actions.push(Action::new(
                ActionKind::SemanticSearch,
                format!("Search for: {}", query),
                json!({ "repo_id": repo, "query": query, "limit": SEARCH_LIMIT }),
            ));
        }
        (_, None) => {}
    }

    for (idx, action) in actions.iter_mut().enumerate() {
        action.step = idx + 1;
    }
    actions
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    PendingApproval,
    Completed,
}

/// A persisted, approval-gated analysis plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub status: PlanStatus,
    /// RFC 3339, UTC.
    pub created_at: String,
    pub request: AnalysisRequest,
    pub actions: Vec<Action>,
    pub executed_at: Option<String>,
    pub results: Option<ExecutionResults>,
    pub approval_required: bool,
    pub approval_instructions: String,
}

impl Plan {
    /// A fresh pending plan for `request`.
    pub fn new(request: AnalysisRequest) -> Self {
        let actions = compile_actions(&request);
        Self {
            plan_id: new_plan_id(),
            status: PlanStatus::PendingApproval,
            created_at: timestamp(),
            request,
            actions,
            executed_at: None,
            results: None,
            approval_required: true,
            approval_instructions:
                "Call POST /api/orchestrate/execute with plan_id, approved_by and an HMAC signature"
                    .to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PlanStatus::Completed
    }
}

fn new_plan_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("plan_{}", &hex[..12])
}

/// Current time as RFC 3339 with a `Z` suffix.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
