//! Fakes for unit tests: a scripted model and counting collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::collaborators::{
    CollaboratorError, Collaborators, Finding, IndexSummary, IngestedRepo, RepositoryIngestor,
    SearchHit, SemanticSearcher, Severity, StaticAnalyzer,
};
use crate::llm::{
    ContinuationHandle, FunctionCall, ModelClient, ModelError, ModelRequest, ModelResponse,
    OutputPart,
};

/// Replays a fixed list of responses and records every request.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<ModelResponse, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn call_model(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError("script exhausted".to_string())))
    }
}

pub fn text_response(handle: &str, text: &str) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse {
        handle: Some(ContinuationHandle::new(handle)),
        parts: vec![OutputPart::Text {
            text: text.to_string(),
        }],
    })
}

pub fn call_response(handle: &str, name: &str, arguments: Value) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse {
        handle: Some(ContinuationHandle::new(handle)),
        parts: vec![
            OutputPart::Thought {
                text: format!("I should call {}", name),
            },
            OutputPart::FunctionCall(FunctionCall {
                id: format!("call_{}", handle),
                name: name.to_string(),
                arguments,
            }),
        ],
    })
}

/// In-memory collaborator that counts calls and can be told to fail.
#[derive(Default)]
pub struct FakeRepo {
    pub files: HashMap<String, String>,
    pub findings: Vec<Finding>,
    pub fail_ingest: bool,
    pub fail_analysis: bool,
    pub ingest_calls: AtomicUsize,
    pub analysis_calls: AtomicUsize,
    pub index_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
}

pub const FAKE_REPO_ID: &str = "a1b2c3d4e5f6";

impl FakeRepo {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(
            "src/auth.py".to_string(),
            "def login(user, password):\n    return db.check(user, password)\n".to_string(),
        );
        files.insert(
            "src/db.py".to_string(),
            "def check(user, password):\n    q = \"SELECT * FROM users WHERE name='\" + user + \"'\"\n".to_string(),
        );
        Self {
            files,
            findings: vec![Finding {
                rule_id: "sql-concatenation".to_string(),
                severity: Severity::High,
                message: "SQL built by string concatenation".to_string(),
                file_path: "src/db.py".to_string(),
                start_line: 2,
                end_line: 2,
                recommendation: Some("Use parameterized queries".to_string()),
            }],
            ..Default::default()
        }
    }

    pub fn failing_ingest() -> Self {
        Self {
            fail_ingest: true,
            ..Self::new()
        }
    }

    pub fn failing_analysis() -> Self {
        Self {
            fail_analysis: true,
            ..Self::new()
        }
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators::from_shared(Arc::clone(self))
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check_repo(&self, repo_id: &str) -> Result<(), CollaboratorError> {
        if repo_id == FAKE_REPO_ID {
            Ok(())
        } else {
            Err(CollaboratorError::new(format!("unknown repository {}", repo_id)))
        }
    }
}

#[async_trait]
impl RepositoryIngestor for FakeRepo {
    async fn ingest(&self, repo_ref: &str) -> Result<IngestedRepo, CollaboratorError> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ingest {
            return Err(CollaboratorError::new(format!("could not clone {}", repo_ref)));
        }
        Ok(IngestedRepo {
            repo_id: FAKE_REPO_ID.to_string(),
            file_count: self.files.len(),
            total_bytes: self.files.values().map(|c| c.len() as u64).sum(),
        })
    }

    async fn get_repo_text(&self, repo_id: &str) -> Result<String, CollaboratorError> {
        self.check_repo(repo_id)?;
        let mut paths: Vec<&String> = self.files.keys().collect();
        paths.sort();
        Ok(paths
            .into_iter()
            .map(|p| format!("--- START FILE: {p} ---\n{}\n--- END FILE: {p} ---\n", self.files[p]))
            .collect())
    }

    async fn read_file(&self, repo_id: &str, path: &str) -> Result<String, CollaboratorError> {
        self.check_repo(repo_id)?;
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| CollaboratorError::new(format!("no such file {}", path)))
    }
}

#[async_trait]
impl StaticAnalyzer for FakeRepo {
    async fn run_static_analysis(
        &self,
        repo_id: &str,
        _language: &str,
        _suite: &str,
    ) -> Result<Vec<Finding>, CollaboratorError> {
        self.analysis_calls.fetch_add(1, Ordering::SeqCst);
        self.check_repo(repo_id)?;
        if self.fail_analysis {
            return Err(CollaboratorError::new("analyzer exited with status 2"));
        }
        Ok(self.findings.clone())
    }
}

#[async_trait]
impl SemanticSearcher for FakeRepo {
    async fn index_repository(&self, repo_id: &str) -> Result<IndexSummary, CollaboratorError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        self.check_repo(repo_id)?;
        Ok(IndexSummary {
            repo_id: repo_id.to_string(),
            files_indexed: self.files.len(),
            lines_indexed: self.files.values().map(|c| c.lines().count()).sum(),
        })
    }

    async fn run_semantic_search(
        &self,
        repo_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_repo(repo_id)?;
        let mut hits: Vec<SearchHit> = self
            .files
            .iter()
            .filter(|(_, content)| content.contains(query))
            .map(|(path, _)| SearchHit {
                file_path: path.clone(),
                line: 1,
                snippet: query.to_string(),
                score: 1.0,
            })
            .collect();
        hits.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        hits.truncate(limit);
        Ok(hits)
    }
}
