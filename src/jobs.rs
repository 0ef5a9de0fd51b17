//! Background job manager.
//!
//! `submit` records a queued job, spawns a worker, and returns the id at once,
//! so a caller's latency never depends on how long the tool runs. Workers are
//! fire-and-forget: nothing joins or cancels them, and the job table lives only
//! as long as the process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::tools::ToolRegistry;

/// Lifecycle of a background job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Recorded, worker not started yet
    Queued,
    /// Worker is executing the tool
    Running,
    /// Tool returned a result
    Completed,
    /// Tool failed; see `error`
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    fn can_advance_to(&self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// A job record as held in the table.
#[derive(Debug, Clone)]
struct Job {
    job_id: String,
    tool_name: String,
    status: JobStatus,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    error: Option<String>,
}

/// Point-in-time view of a job returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub tool_name: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set while the job is queued or running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        let message = (!job.status.is_terminal())
            .then(|| "Job is still in progress. Check again later.".to_string());
        Self {
            job_id: job.job_id.clone(),
            tool_name: job.tool_name.clone(),
            status: job.status,
            submitted_at: job.submitted_at,
            finished_at: job.finished_at,
            message,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

type JobTable = Arc<RwLock<HashMap<String, Job>>>;

/// Runs named tool invocations off the caller's path.
pub struct JobManager {
    tools: Arc<ToolRegistry>,
    jobs: JobTable,
}

impl JobManager {
    /// `tools` is the registry workers execute against.
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Queue `tool_name(args)` and return its job id immediately.
    pub async fn submit(&self, tool_name: &str, args: Value) -> Result<String> {
        if !self.tools.contains(tool_name) {
            return Err(OrchestratorError::Validation(format!(
                "Tool {} cannot be run as a background job",
                tool_name
            )));
        }

        let job_id = Uuid::new_v4().to_string();
        let job = Job {
            job_id: job_id.clone(),
            tool_name: tool_name.to_string(),
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        self.jobs.write().await.insert(job_id.clone(), job);

        tracing::info!("Job {} queued for tool {}", job_id, tool_name);

        let tools = Arc::clone(&self.tools);
        let jobs = Arc::clone(&self.jobs);
        let worker_id = job_id.clone();
        let worker_tool = tool_name.to_string();
        tokio::spawn(async move {
            run_worker(tools, jobs, worker_id, worker_tool, args).await;
        });

        Ok(job_id)
    }

    /// Snapshot of one job.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::NotFound` for an id this process never issued.
    pub async fn status(&self, job_id: &str) -> Result<JobSnapshot> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(JobSnapshot::from)
            .ok_or_else(|| OrchestratorError::NotFound(format!("Job {} not found", job_id)))
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut snapshots: Vec<JobSnapshot> = jobs.values().map(JobSnapshot::from).collect();
        snapshots.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        snapshots
    }
}

async fn run_worker(
    tools: Arc<ToolRegistry>,
    jobs: JobTable,
    job_id: String,
    tool_name: String,
    args: Value,
) {
    advance(&jobs, &job_id, JobStatus::Running, |job| {
        job.started_at = Some(Utc::now());
    })
    .await;

    match tools.try_execute(&tool_name, args).await {
        Ok(value) => {
            advance(&jobs, &job_id, JobStatus::Completed, |job| {
                job.finished_at = Some(Utc::now());
                job.result = Some(value);
            })
            .await;
            tracing::info!("Job {} completed", job_id);
        }
        Err(e) => {
            tracing::warn!("Job {} failed: {}", job_id, e);
            let message = OrchestratorError::Collaborator(e.to_string()).public_message();
            advance(&jobs, &job_id, JobStatus::Failed, |job| {
                job.finished_at = Some(Utc::now());
                job.error = Some(message);
            })
            .await;
        }
    }
}

/// Move a job forward under the table lock; backward moves are ignored.
async fn advance<F>(jobs: &JobTable, job_id: &str, next: JobStatus, update: F)
where
    F: FnOnce(&mut Job),
{
    let mut jobs = jobs.write().await;
    let Some(job) = jobs.get_mut(job_id) else {
        tracing::warn!("Job {} vanished before reaching {:?}", job_id, next);
        return;
    };
    if !job.status.can_advance_to(next) {
        tracing::warn!(
            "Ignoring job {} transition {:?} -> {:?}",
            job_id,
            job.status,
            next
        );
        return;
    }
    job.status = next;
    update(job);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn manager_with_gate(gate: Arc<Notify>) -> JobManager {
        let mut registry = ToolRegistry::new();
        registry.register_fn("gated_scan", "Waits for the gate", json!({}), move |args| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok::<Value, anyhow::Error>(json!({ "scanned": args["repo"] }))
            }
        });
        registry.register_fn("broken_scan", "Always fails", json!({}), |_| async move {
            Err::<Value, _>(anyhow::anyhow!("analyzer exited with status 2"))
        });
        JobManager::new(Arc::new(registry))
    }

    async fn wait_for(manager: &JobManager, job_id: &str, status: JobStatus) -> JobSnapshot {
        for _ in 0..1000 {
            let snapshot = manager.status(job_id).await.unwrap();
            if snapshot.status == status {
                return snapshot;
            }
            tokio::task::yield_now().await;
        }
        panic!("job {} never reached {:?}", job_id, status);
    }

    #[tokio::test]
    async fn submit_returns_before_tool_finishes() {
        let manager = manager_with_gate(Arc::new(Notify::new()));
        // The gate is never opened, so the tool would run forever.
        let job_id = tokio::time::timeout(
            Duration::from_millis(200),
            manager.submit("gated_scan", json!({"repo": "r1"})),
        )
        .await
        .expect("submit must not wait for the tool")
        .unwrap();
        assert!(!job_id.is_empty());
    }

    #[tokio::test]
    async fn status_moves_queued_running_completed() {
        let gate = Arc::new(Notify::new());
        let manager = manager_with_gate(Arc::clone(&gate));

        let job_id = manager
            .submit("gated_scan", json!({"repo": "r1"}))
            .await
            .unwrap();

        // Single-threaded runtime: the worker has not been polled yet.
        let queued = manager.status(&job_id).await.unwrap();
        assert_eq!(queued.status, JobStatus::Queued);
        assert!(queued.message.is_some());
        assert!(queued.result.is_none());

        let running = wait_for(&manager, &job_id, JobStatus::Running).await;
        assert!(running.message.is_some());

        gate.notify_one();
        let done = wait_for(&manager, &job_id, JobStatus::Completed).await;
        assert_eq!(done.result, Some(json!({"scanned": "r1"})));
        assert!(done.message.is_none());
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn failing_tool_marks_job_failed() {
        let manager = manager_with_gate(Arc::new(Notify::new()));
        let job_id = manager.submit("broken_scan", json!({})).await.unwrap();
        let failed = wait_for(&manager, &job_id, JobStatus::Failed).await;
        let error = failed.error.unwrap();
        assert!(error.starts_with("collaborator failure"));
        assert!(!error.contains("status 2"));
        assert!(failed.result.is_none());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let manager = manager_with_gate(Arc::new(Notify::new()));
        let err = manager.status("missing").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn unregistered_tool_is_rejected_at_submission() {
        let manager = manager_with_gate(Arc::new(Notify::new()));
        let err = manager.submit("rm_rf", json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn job_ids_are_unique() {
        let manager = manager_with_gate(Arc::new(Notify::new()));
        let mut ids = HashSet::new();
        for _ in 0..50 {
            ids.insert(manager.submit("broken_scan", json!({})).await.unwrap());
        }
        assert_eq!(ids.len(), 50);
        assert_eq!(manager.list().await.len(), 50);
    }

    #[test]
    fn transitions_never_move_backward() {
        assert!(JobStatus::Queued.can_advance_to(JobStatus::Running));
        assert!(JobStatus::Running.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::Running));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Running.can_advance_to(JobStatus::Queued));
    }
}
