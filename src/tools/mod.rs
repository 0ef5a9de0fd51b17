//! Tool registry shared by the step executor, the agent, and job workers.
//!
//! Tools are registered once at startup and looked up by name. Arguments
//! usually come from a model's structured output, so the registry boundary
//! turns every failure, including a panic inside the tool, into a structured
//! `{"error": ...}` value instead of letting it reach the caller.

mod discovery;
mod repo;
mod scan;

pub use discovery::{
    AnalyzeRepository, RegistryClient, SearchGithubRepos, SearchNpmPackages, SearchPypiPackages,
};
pub use repo::{IndexRepository, IngestRepository, ReadRepositoryFile, SemanticSearch};
pub use scan::{
    CheckScanStatus, RunSecurityScan, RunStaticAnalysis, SecurityScan, DEFAULT_LANGUAGE,
    DEFAULT_QUERY_SUITE,
};

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::collaborators::Collaborators;
use crate::jobs::JobManager;
use crate::llm::ToolDeclaration;

/// Tool names the step executor dispatches deterministic actions to.
pub const INGEST_REPOSITORY: &str = "ingest_repository";
pub const INDEX_REPOSITORY: &str = "index_repository";
pub const SEMANTIC_SEARCH: &str = "semantic_search";
pub const READ_REPOSITORY_FILE: &str = "read_repository_file";
pub const RUN_STATIC_ANALYSIS: &str = "run_static_analysis";
pub const SECURITY_SCAN: &str = "security_scan";
pub const RUN_SECURITY_SCAN: &str = "run_security_scan";
pub const CHECK_SCAN_STATUS: &str = "check_scan_status";
pub const SEARCH_GITHUB_REPOS: &str = "search_github_repos";
pub const ANALYZE_REPOSITORY: &str = "analyze_repository";
pub const SEARCH_NPM_PACKAGES: &str = "search_npm_packages";
pub const SEARCH_PYPI_PACKAGES: &str = "search_pypi_packages";

/// A callable the model or the executor can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// Name and description, for prompts and listings.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Why a tool invocation produced no result.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),

    #[error("Tool {name} crashed: {message}")]
    Panicked { name: String, message: String },
}

impl ToolError {
    /// The structured payload returned to models and API callers.
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

type BoxedToolFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Adapter so plain async closures can be registered as tools.
struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    func: Box<dyn Fn(Value) -> BoxedToolFuture + Send + Sync>,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        (self.func)(args).await
    }
}

/// Name → tool mapping.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous holder.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool {} registered twice; keeping the latest", name);
        }
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let tool = FnTool {
            name: name.into(),
            description: description.into(),
            parameters,
            func: Box::new(move |args| -> BoxedToolFuture { Box::pin(func(args)) }),
        };
        self.register(Arc::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Declarations handed to the model, sorted by name.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self
            .tools
            .values()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Run a tool, reporting failures as a typed error.
    pub async fn try_execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        tracing::debug!("Executing tool {} with args: {}", name, args);

        match AssertUnwindSafe(tool.execute(args)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!("Tool {} failed: {:#}", name, e);
                Err(ToolError::Failed(format!("{:#}", e)))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Tool {} panicked: {}", name, message);
                Err(ToolError::Panicked {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Run a tool. Never fails: errors come back as `{"error": message}`.
    pub async fn execute(&self, name: &str, args: Value) -> Value {
        match self.try_execute(name, args).await {
            Ok(value) => value,
            Err(e) => e.to_payload(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Tools a background worker may run: everything deterministic, including the
/// inline security scan.
pub fn job_tools(collaborators: &Collaborators) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_repository_tools(&mut registry, collaborators);
    registry.register(Arc::new(SecurityScan::new(collaborators.clone())));
    registry
}

/// Tools exposed to the agent and the step executor. The security scan is
/// only reachable through the background job manager here.
pub fn agent_tools(
    collaborators: &Collaborators,
    jobs: Arc<JobManager>,
    registries: &RegistryClient,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_repository_tools(&mut registry, collaborators);
    registry.register(Arc::new(RunSecurityScan::new(
        Arc::clone(&jobs),
        SecurityScan::new(collaborators.clone()),
    )));
    registry.register(Arc::new(CheckScanStatus::new(jobs)));
    registry.register(Arc::new(SearchGithubRepos::new(registries.clone())));
    registry.register(Arc::new(AnalyzeRepository::new(registries.clone())));
    registry.register(Arc::new(SearchNpmPackages::new(registries.clone())));
    registry.register(Arc::new(SearchPypiPackages::new(registries.clone())));
    registry
}

fn register_repository_tools(registry: &mut ToolRegistry, collaborators: &Collaborators) {
    registry.register(Arc::new(IngestRepository::new(Arc::clone(
        &collaborators.ingestor,
    ))));
    registry.register(Arc::new(IndexRepository::new(Arc::clone(
        &collaborators.searcher,
    ))));
    registry.register(Arc::new(SemanticSearch::new(Arc::clone(
        &collaborators.searcher,
    ))));
    registry.register(Arc::new(ReadRepositoryFile::new(Arc::clone(
        &collaborators.ingestor,
    ))));
    registry.register(Arc::new(RunStaticAnalysis::new(Arc::clone(
        &collaborators.analyzer,
    ))));
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    if !args.is_object() {
        anyhow::bail!("Arguments must be a JSON object");
    }
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", key))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_fn("echo", "Echo arguments", json!({"type": "object"}), |args| async move {
            Ok::<Value, anyhow::Error>(json!({ "echo": args }))
        });
        registry.register_fn("fail", "Always fails", json!({"type": "object"}), |_| async move {
            Err::<Value, _>(anyhow::anyhow!("backend unavailable"))
        });
        registry.register_fn("boom", "Panics", json!({"type": "object"}), |args| async move {
            let n = args["n"].as_u64().unwrap_or(0);
            if n == 0 {
                panic!("malformed call");
            }
            Ok::<Value, anyhow::Error>(json!(n))
        });
        registry
    }

    #[tokio::test]
    async fn execute_returns_tool_value() {
        let result = registry().execute("echo", json!({"a": 1})).await;
        assert_eq!(result, json!({"echo": {"a": 1}}));
    }

    #[tokio::test]
    async fn unknown_tool_is_structured_not_found() {
        let registry = registry();
        let result = registry.execute("nope", json!({})).await;
        assert_eq!(result, json!({"error": "Tool nope not found"}));
        assert!(matches!(
            registry.try_execute("nope", json!({})).await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tool_error_becomes_error_payload() {
        let result = registry().execute("fail", json!({})).await;
        assert_eq!(result, json!({"error": "backend unavailable"}));
    }

    #[tokio::test]
    async fn tool_panic_is_contained() {
        let registry = registry();
        let result = registry.execute("boom", json!({})).await;
        let message = result["error"].as_str().unwrap();
        assert!(message.contains("boom"));
        assert!(message.contains("malformed call"));

        // The registry is still usable after a panic.
        assert_ok!(registry.try_execute("boom", json!({"n": 3})).await);
    }

    #[test]
    fn listings_are_sorted() {
        let registry = registry();
        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["boom", "echo", "fail"]);
        assert_eq!(registry.declarations()[1].name, "echo");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn argument_helpers_reject_non_objects() {
        assert_err!(required_str(&json!("just a string"), "query"));
        assert_err!(required_str(&json!({"query": "   "}), "query"));
        assert_eq!(required_str(&json!({"query": " auth "}), "query").unwrap(), "auth");
        assert_eq!(optional_str(&json!({}), "language"), None);
    }
}
