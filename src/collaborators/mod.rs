//! External collaborators: ingestion, static analysis, and search.
//!
//! These are contracts only. Each implementation enforces its own timeouts and
//! reports any failure as a single [`CollaboratorError`]; the core never retries.

pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalWorkspace;

/// Uniform failure raised by every collaborator call.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Outcome of ingesting a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedRepo {
    pub repo_id: String,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Outcome of indexing a repository for search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub repo_id: String,
    pub files_indexed: usize,
    pub lines_indexed: usize,
}

/// Severity levels for static-analysis findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// A single static-analysis finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_path: String,
    pub line: usize,
    pub snippet: String,
    pub score: f32,
}

/// Turns a repository reference into a normalized text form.
#[async_trait]
pub trait RepositoryIngestor: Send + Sync {
    /// Ingest `repo_ref` and return the id later calls use.
    async fn ingest(&self, repo_ref: &str) -> Result<IngestedRepo, CollaboratorError>;

    /// Full normalized text of an ingested repository.
    async fn get_repo_text(&self, repo_id: &str) -> Result<String, CollaboratorError>;

    /// Contents of a single file inside an ingested repository.
    async fn read_file(&self, repo_id: &str, path: &str) -> Result<String, CollaboratorError>;
}

/// Runs a static-analysis suite over an ingested repository.
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    async fn run_static_analysis(
        &self,
        repo_id: &str,
        language: &str,
        suite: &str,
    ) -> Result<Vec<Finding>, CollaboratorError>;
}

/// Indexes and searches an ingested repository.
#[async_trait]
pub trait SemanticSearcher: Send + Sync {
    async fn index_repository(&self, repo_id: &str) -> Result<IndexSummary, CollaboratorError>;

    async fn run_semantic_search(
        &self,
        repo_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError>;
}

/// The collaborator set shared by the tool registry and the step executor.
#[derive(Clone)]
pub struct Collaborators {
    pub ingestor: Arc<dyn RepositoryIngestor>,
    pub analyzer: Arc<dyn StaticAnalyzer>,
    pub searcher: Arc<dyn SemanticSearcher>,
}

impl Collaborators {
    /// Use one implementation for all three contracts.
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: RepositoryIngestor + StaticAnalyzer + SemanticSearcher + 'static,
    {
        Self {
            ingestor: shared.clone(),
            analyzer: shared.clone(),
            searcher: shared,
        }
    }
}
