//! Repository tools: ingest, index, search, and read files.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, Tool, INDEX_REPOSITORY, INGEST_REPOSITORY, READ_REPOSITORY_FILE, SEMANTIC_SEARCH};
use crate::collaborators::{RepositoryIngestor, SemanticSearcher};

/// Default and ceiling for `semantic_search` result counts.
const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 50;

/// Files longer than this are cut before being handed to the model.
const MAX_FILE_CHARS: usize = 20_000;

/// Fetch a repository and normalize it to text.
pub struct IngestRepository {
    ingestor: Arc<dyn RepositoryIngestor>,
}

impl IngestRepository {
    pub fn new(ingestor: Arc<dyn RepositoryIngestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl Tool for IngestRepository {
    fn name(&self) -> &str {
        INGEST_REPOSITORY
    }

    fn description(&self) -> &str {
        "Ingest a repository (git URL, local path, or previously returned repo_id) so other tools can analyze it. Returns the repo_id used by every other repository tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_ref": {
                    "type": "string",
                    "description": "Repository reference: a git URL, a local directory path, or an existing repo_id"
                }
            },
            "required": ["repo_ref"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let repo_ref = required_str(&args, "repo_ref")?;
        let ingested = self.ingestor.ingest(repo_ref).await?;
        Ok(json!({
            "repo_id": ingested.repo_id,
            "file_count": ingested.file_count,
            "total_bytes": ingested.total_bytes,
        }))
    }
}

/// Build the search index for an ingested repository.
pub struct IndexRepository {
    searcher: Arc<dyn SemanticSearcher>,
}

impl IndexRepository {
    pub fn new(searcher: Arc<dyn SemanticSearcher>) -> Self {
        Self { searcher }
    }
}

#[async_trait]
impl Tool for IndexRepository {
    fn name(&self) -> &str {
        INDEX_REPOSITORY
    }

    fn description(&self) -> &str {
        "Index an ingested repository for search. Must be run before semantic_search."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_id": {
                    "type": "string",
                    "description": "Id returned by ingest_repository"
                }
            },
            "required": ["repo_id"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let repo_id = required_str(&args, "repo_id")?;
        let summary = self.searcher.index_repository(repo_id).await?;
        Ok(serde_json::to_value(summary)?)
    }
}

/// Search an indexed repository.
pub struct SemanticSearch {
    searcher: Arc<dyn SemanticSearcher>,
}

impl SemanticSearch {
    pub fn new(searcher: Arc<dyn SemanticSearcher>) -> Self {
        Self { searcher }
    }
}

#[async_trait]
impl Tool for SemanticSearch {
    fn name(&self) -> &str {
        SEMANTIC_SEARCH
    }

    fn description(&self) -> &str {
        "Search an indexed repository for code related to a natural-language query. Returns file paths, line numbers and snippets ranked by relevance."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_id": {
                    "type": "string",
                    "description": "Id returned by ingest_repository"
                },
                "query": {
                    "type": "string",
                    "description": "What to look for, e.g. 'password hashing' or 'SQL query construction'"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results to return (default: 10, max: 50)"
                }
            },
            "required": ["repo_id", "query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let repo_id = required_str(&args, "repo_id")?;
        let query = required_str(&args, "query")?;
        let limit = args["limit"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);

        let hits = self
            .searcher
            .run_semantic_search(repo_id, query, limit)
            .await?;

        Ok(json!({
            "repo_id": repo_id,
            "query": query,
            "total_results": hits.len(),
            "results": hits,
        }))
    }
}

/// Read one file from an ingested repository.
pub struct ReadRepositoryFile {
    ingestor: Arc<dyn RepositoryIngestor>,
}

impl ReadRepositoryFile {
    pub fn new(ingestor: Arc<dyn RepositoryIngestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl Tool for ReadRepositoryFile {
    fn name(&self) -> &str {
        READ_REPOSITORY_FILE
    }

    fn description(&self) -> &str {
        "Read the contents of a file inside an ingested repository. Use paths as reported by semantic_search or static analysis findings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_id": {
                    "type": "string",
                    "description": "Id returned by ingest_repository"
                },
                "path": {
                    "type": "string",
                    "description": "File path relative to the repository root"
                }
            },
            "required": ["repo_id", "path"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let repo_id = required_str(&args, "repo_id")?;
        let path = required_str(&args, "path")?;
        let content = self.ingestor.read_file(repo_id, path).await?;

        let truncated = content.chars().count() > MAX_FILE_CHARS;
        let content = if truncated {
            content.chars().take(MAX_FILE_CHARS).collect()
        } else {
            content
        };

        Ok(json!({
            "path": path,
            "content": content,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRepo, FAKE_REPO_ID};
    use tokio_test::assert_err;

    #[tokio::test]
    async fn ingest_reports_repo_id() {
        let repo = Arc::new(FakeRepo::new());
        let tool = IngestRepository::new(repo.clone());
        let result = tool.execute(json!({"repo_ref": "/srv/app"})).await.unwrap();
        assert_eq!(result["repo_id"], FAKE_REPO_ID);
        assert_eq!(result["file_count"], 2);
        assert_eq!(FakeRepo::count(&repo.ingest_calls), 1);
    }

    #[tokio::test]
    async fn ingest_requires_repo_ref() {
        let tool = IngestRepository::new(Arc::new(FakeRepo::new()));
        assert_err!(tool.execute(json!({})).await);
    }

    #[tokio::test]
    async fn search_defaults_and_clamps_limit() {
        let tool = SemanticSearch::new(Arc::new(FakeRepo::new()));
        let result = tool
            .execute(json!({"repo_id": FAKE_REPO_ID, "query": "password", "limit": 0}))
            .await
            .unwrap();
        // limit 0 is raised to 1
        assert_eq!(result["total_results"], 1);
        assert_eq!(result["query"], "password");

        let result = tool
            .execute(json!({"repo_id": FAKE_REPO_ID, "query": "password"}))
            .await
            .unwrap();
        assert_eq!(result["total_results"], 2);
    }

    #[tokio::test]
    async fn read_file_returns_content() {
        let tool = ReadRepositoryFile::new(Arc::new(FakeRepo::new()));
        let result = tool
            .execute(json!({"repo_id": FAKE_REPO_ID, "path": "src/auth.py"}))
            .await
            .unwrap();
        assert!(result["content"].as_str().unwrap().contains("def login"));
        assert_eq!(result["truncated"], false);
    }

    #[tokio::test]
    async fn collaborator_failure_surfaces_as_error() {
        let tool = ReadRepositoryFile::new(Arc::new(FakeRepo::new()));
        let err = tool
            .execute(json!({"repo_id": FAKE_REPO_ID, "path": "missing.rs"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such file"));
    }

    #[tokio::test]
    async fn index_summarizes_repository() {
        let tool = IndexRepository::new(Arc::new(FakeRepo::new()));
        let result = tool.execute(json!({"repo_id": FAKE_REPO_ID})).await.unwrap();
        assert_eq!(result["files_indexed"], 2);
    }
}
