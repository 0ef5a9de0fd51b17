//! Static analysis tools, inline and as background jobs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    optional_str, required_str, Tool, CHECK_SCAN_STATUS, RUN_SECURITY_SCAN, RUN_STATIC_ANALYSIS,
    SECURITY_SCAN,
};
use crate::collaborators::{Collaborators, Finding, StaticAnalyzer};
use crate::jobs::JobManager;

pub const DEFAULT_LANGUAGE: &str = "auto";
pub const DEFAULT_QUERY_SUITE: &str = "security-extended";

fn scan_options(args: &Value) -> (&str, &str) {
    (
        optional_str(args, "language").unwrap_or(DEFAULT_LANGUAGE),
        optional_str(args, "query_suite").unwrap_or(DEFAULT_QUERY_SUITE),
    )
}

fn summarize(repo_id: &str, findings: Vec<Finding>) -> Value {
    let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
    for finding in &findings {
        let key = serde_json::to_value(finding.severity)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        *by_severity.entry(key).or_default() += 1;
    }
    json!({
        "repo_id": repo_id,
        "total_findings": findings.len(),
        "by_severity": by_severity,
        "findings": findings,
    })
}

/// Run the static analyzer over an already ingested repository.
pub struct RunStaticAnalysis {
    analyzer: Arc<dyn StaticAnalyzer>,
}

impl RunStaticAnalysis {
    pub fn new(analyzer: Arc<dyn StaticAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Tool for RunStaticAnalysis {
    fn name(&self) -> &str {
        RUN_STATIC_ANALYSIS
    }

    fn description(&self) -> &str {
        "Run static analysis over an ingested repository. Returns findings with rule id, severity, file and line range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_id": {
                    "type": "string",
                    "description": "Id returned by ingest_repository"
                },
                "language": {
                    "type": "string",
                    "description": "Language to analyze, or 'auto' to detect (default: auto)"
                },
                "query_suite": {
                    "type": "string",
                    "description": "Rule suite: security-extended, security-and-quality or default (default: security-extended)"
                }
            },
            "required": ["repo_id"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let repo_id = required_str(&args, "repo_id")?;
        let (language, suite) = scan_options(&args);
        let findings = self
            .analyzer
            .run_static_analysis(repo_id, language, suite)
            .await?;
        Ok(summarize(repo_id, findings))
    }
}

/// Ingest then analyze, in one call. Slow; agents reach it through the job
/// manager via [`RunSecurityScan`].
#[derive(Clone)]
pub struct SecurityScan {
    collaborators: Collaborators,
}

impl SecurityScan {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

fn security_scan_schema(with_background: bool) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "repo_ref": {
                "type": "string",
                "description": "Repository reference: a local directory path or an existing repo_id"
            },
            "language": {
                "type": "string",
                "description": "Language to analyze, or 'auto' to detect (default: auto)"
            },
            "query_suite": {
                "type": "string",
                "description": "Rule suite (default: security-extended)"
            }
        },
        "required": ["repo_ref"]
    });
    if with_background {
        schema["properties"]["background"] = json!({
            "type": "boolean",
            "description": "Run as a background job and return a job_id to poll with check_scan_status (default: true)"
        });
    }
    schema
}

#[async_trait]
impl Tool for SecurityScan {
    fn name(&self) -> &str {
        SECURITY_SCAN
    }

    fn description(&self) -> &str {
        "Ingest a repository and run a full static security scan over it."
    }

    fn parameters_schema(&self) -> Value {
        security_scan_schema(false)
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let repo_ref = required_str(&args, "repo_ref")?;
        let (language, suite) = scan_options(&args);

        let ingested = self.collaborators.ingestor.ingest(repo_ref).await?;
        tracing::info!(
            "Security scan of {} ({} files) with suite {}",
            ingested.repo_id,
            ingested.file_count,
            suite
        );

        let findings = self
            .collaborators
            .analyzer
            .run_static_analysis(&ingested.repo_id, language, suite)
            .await?;
        Ok(summarize(&ingested.repo_id, findings))
    }
}

/// Start a security scan, by default as a background job.
pub struct RunSecurityScan {
    jobs: Arc<JobManager>,
    inline: SecurityScan,
}

impl RunSecurityScan {
    pub fn new(jobs: Arc<JobManager>, inline: SecurityScan) -> Self {
        Self { jobs, inline }
    }
}

#[async_trait]
impl Tool for RunSecurityScan {
    fn name(&self) -> &str {
        RUN_SECURITY_SCAN
    }

    fn description(&self) -> &str {
        "Start a security scan of a repository. Scans take minutes, so by default this returns a job_id immediately; poll it with check_scan_status."
    }

    fn parameters_schema(&self) -> Value {
        security_scan_schema(true)
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        required_str(&args, "repo_ref")?;
        let background = args["background"].as_bool().unwrap_or(true);

        let mut scan_args = args;
        if let Some(obj) = scan_args.as_object_mut() {
            obj.remove("background");
        }

        if !background {
            return self.inline.execute(scan_args).await;
        }

        let job_id = self.jobs.submit(SECURITY_SCAN, scan_args).await?;
        Ok(json!({
            "status": "queued",
            "job_id": job_id,
            "message": "Security scan started. Use check_scan_status with this job_id to get the results.",
        }))
    }
}

/// Poll a background job.
pub struct CheckScanStatus {
    jobs: Arc<JobManager>,
}

impl CheckScanStatus {
    pub fn new(jobs: Arc<JobManager>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for CheckScanStatus {
    fn name(&self) -> &str {
        CHECK_SCAN_STATUS
    }

    fn description(&self) -> &str {
        "Check the status of a background scan job. Returns the result once the job has completed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": {
                    "type": "string",
                    "description": "Job id returned by run_security_scan"
                }
            },
            "required": ["job_id"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let job_id = required_str(&args, "job_id")?;
        let snapshot = self.jobs.status(job_id).await?;
        Ok(serde_json::to_value(snapshot)?)
    }
}
