//! Filesystem-backed collaborators.
//!
//! `LocalWorkspace` ingests a local directory, or a shallow clone of a git
//! URL, into `{ingest_dir}/{repo_id}/repo.md`, keeps a line index for keyword
//! search, and runs a small built-in rule set as its static analyzer.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use super::{
    CollaboratorError, Finding, IndexSummary, IngestedRepo, RepositoryIngestor, SearchHit,
    SemanticSearcher, Severity, StaticAnalyzer,
};

/// Directories never worth ingesting.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
];

/// Files larger than this are treated as artifacts and skipped.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

const REPO_TEXT_FILE: &str = "repo.md";
const SOURCE_POINTER_FILE: &str = "source_path";
/// Checkout directory for cloned repositories, inside the repo's ingest dir.
const CHECKOUT_DIR: &str = "checkout";

const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

const MAX_SEARCH_RESULTS: usize = 50;
const SNIPPET_CHARS: usize = 200;

struct SourceFile {
    rel_path: String,
    content: String,
}

#[derive(Debug)]
struct IndexedLine {
    file_path: String,
    line: usize,
    text: String,
    lower: String,
}

pub struct LocalWorkspace {
    ingest_dir: PathBuf,
    indexes: RwLock<HashMap<String, Arc<Vec<IndexedLine>>>>,
}

impl LocalWorkspace {
    pub fn new(ingest_dir: impl Into<PathBuf>) -> Self {
        Self {
            ingest_dir: ingest_dir.into(),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn repo_dir(&self, repo_id: &str) -> Result<PathBuf, CollaboratorError> {
        if !is_safe_id(repo_id) {
            return Err(CollaboratorError::new(format!(
                "Invalid repository id: {}",
                repo_id
            )));
        }
        Ok(self.ingest_dir.join(repo_id))
    }

    async fn source_root(&self, repo_id: &str) -> Result<PathBuf, CollaboratorError> {
        let pointer = self.repo_dir(repo_id)?.join(SOURCE_POINTER_FILE);
        let root = tokio::fs::read_to_string(&pointer).await.map_err(|_| {
            CollaboratorError::new(format!(
                "Repository {} not found. Please ingest it first.",
                repo_id
            ))
        })?;
        Ok(PathBuf::from(root.trim()))
    }

    /// Shallow-clone `url` into the repository's checkout dir, replacing any
    /// earlier checkout.
    async fn clone_repository(&self, url: &str, repo_id: &str) -> Result<PathBuf, CollaboratorError> {
        let dir = self.repo_dir(repo_id)?;
        let target = dir.join(CHECKOUT_DIR);
        let io_err = |e: std::io::Error| CollaboratorError::new(format!("checkout setup failed: {}", e));
        if tokio::fs::try_exists(&target).await.map_err(io_err)? {
            tokio::fs::remove_dir_all(&target).await.map_err(io_err)?;
        }
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        tracing::info!("Cloning {} into {}", url, target.display());
        let mut command = Command::new("git");
        command
            .args(["clone", "--depth", "1", "--quiet", "--"])
            .arg(url)
            .arg(&target)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = tokio::time::timeout(CLONE_TIMEOUT, command.output())
            .await
            .map_err(|_| CollaboratorError::new(format!("Clone of {} timed out", url)))?
            .map_err(|e| CollaboratorError::new(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::new(format!(
                "Git clone of {} failed: {}",
                url,
                stderr.trim()
            )));
        }
        tokio::fs::canonicalize(&target).await.map_err(io_err)
    }

    async fn load_sources(root: PathBuf) -> Result<Vec<SourceFile>, CollaboratorError> {
        tokio::task::spawn_blocking(move || collect_sources(&root))
            .await
            .map_err(|e| CollaboratorError::new(format!("source walk aborted: {}", e)))
    }

    async fn index_for(&self, repo_id: &str) -> Result<Arc<Vec<IndexedLine>>, CollaboratorError> {
        if let Some(index) = self.indexes.read().await.get(repo_id) {
            return Ok(Arc::clone(index));
        }
        self.index_repository(repo_id).await?;
        self.indexes
            .read()
            .await
            .get(repo_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::new(format!("Repository {} has no index", repo_id)))
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 100
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn repo_id_for(root: &Path) -> String {
    short_digest(root.to_string_lossy().as_bytes())
}

/// Ids for cloned repositories ignore a trailing slash or `.git`.
fn repo_id_for_url(url: &str) -> String {
    let normalized = url.trim_end_matches('/').trim_end_matches(".git");
    short_digest(normalized.as_bytes())
}

fn short_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))[..12].to_string()
}

/// References git should fetch rather than the local filesystem.
fn is_git_url(repo_ref: &str) -> bool {
    ["https://", "http://", "ssh://", "git://", "file://", "git@"]
        .iter()
        .any(|scheme| repo_ref.starts_with(scheme))
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIP_DIRS.contains(&name))
            .unwrap_or(false)
}

fn collect_sources(root: &Path) -> Vec<SourceFile> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            if meta.len() > MAX_FILE_BYTES {
                return None;
            }
            let bytes = std::fs::read(e.path()).ok()?;
            let content = String::from_utf8(bytes).ok()?;
            if content.contains('\0') {
                return None;
            }
            let rel_path = e
                .path()
                .strip_prefix(root)
                .ok()?
                .to_string_lossy()
                .replace('\\', "/");
            Some(SourceFile { rel_path, content })
        })
        .collect()
}

fn render_repo_text(files: &[SourceFile]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str(&format!("--- START FILE: {} ---\n", file.rel_path));
        out.push_str(&file.content);
        if !file.content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("--- END FILE: {} ---\n\n", file.rel_path));
    }
    out
}

/// Only plain relative paths may be read out of a repository.
fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn query_terms(query: &str) -> Vec<String> {
    static WORD: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(word) = WORD.get_or_init(|| Regex::new(r"\w+").ok()) else {
        return Vec::new();
    };
    let mut terms: Vec<String> = word
        .find_iter(&query.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() >= 2)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= SNIPPET_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", cut)
    }
}

#[async_trait]
impl RepositoryIngestor for LocalWorkspace {
    async fn ingest(&self, repo_ref: &str) -> Result<IngestedRepo, CollaboratorError> {
        let repo_ref = repo_ref.trim();

        // A reference that names an existing ingestion is refreshed in place.
        let (repo_id, root) = if let Ok(root) = self.source_root(repo_ref).await {
            (repo_ref.to_string(), root)
        } else if is_git_url(repo_ref) {
            let repo_id = repo_id_for_url(repo_ref);
            let root = self.clone_repository(repo_ref, &repo_id).await?;
            (repo_id, root)
        } else {
            let root = tokio::fs::canonicalize(repo_ref).await.map_err(|_| {
                CollaboratorError::new(format!("Repository path {} does not exist", repo_ref))
            })?;
            (repo_id_for(&root), root)
        };
        if !root.is_dir() {
            return Err(CollaboratorError::new(format!(
                "Repository path {} is not a directory",
                root.display()
            )));
        }

        let files = Self::load_sources(root.clone()).await?;
        if files.is_empty() {
            return Err(CollaboratorError::new(format!(
                "No readable text files found in {}",
                root.display()
            )));
        }

        let text = render_repo_text(&files);
        let total_bytes: u64 = files.iter().map(|f| f.content.len() as u64).sum();
        let dir = self.repo_dir(&repo_id)?;
        let io_err = |e: std::io::Error| CollaboratorError::new(format!("ingest write failed: {}", e));
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        tokio::fs::write(dir.join(REPO_TEXT_FILE), text)
            .await
            .map_err(io_err)?;
        tokio::fs::write(
            dir.join(SOURCE_POINTER_FILE),
            root.to_string_lossy().as_bytes(),
        )
        .await
        .map_err(io_err)?;

        self.indexes.write().await.remove(&repo_id);

        tracing::info!(
            "Ingested {} as {} ({} files, {} bytes)",
            root.display(),
            repo_id,
            files.len(),
            total_bytes
        );

        Ok(IngestedRepo {
            repo_id,
            file_count: files.len(),
            total_bytes,
        })
    }

    async fn get_repo_text(&self, repo_id: &str) -> Result<String, CollaboratorError> {
        let path = self.repo_dir(repo_id)?.join(REPO_TEXT_FILE);
        tokio::fs::read_to_string(&path).await.map_err(|_| {
            CollaboratorError::new(format!(
                "Repository {} not found. Please ingest it first.",
                repo_id
            ))
        })
    }

    async fn read_file(&self, repo_id: &str, path: &str) -> Result<String, CollaboratorError> {
        if !is_safe_relative(path) {
            return Err(CollaboratorError::new(format!("Invalid file path: {}", path)));
        }
        let root = self.source_root(repo_id).await?;
        tokio::fs::read_to_string(root.join(path))
            .await
            .map_err(|_| {
                CollaboratorError::new(format!(
                    "File {} not found in repository {}",
                    path, repo_id
                ))
            })
    }
}

#[async_trait]
impl SemanticSearcher for LocalWorkspace {
    async fn index_repository(&self, repo_id: &str) -> Result<IndexSummary, CollaboratorError> {
        let root = self.source_root(repo_id).await?;
        let files = Self::load_sources(root).await?;

        let mut lines = Vec::new();
        for file in &files {
            for (idx, text) in file.content.lines().enumerate() {
                if text.trim().is_empty() {
                    continue;
                }
                lines.push(IndexedLine {
                    file_path: file.rel_path.clone(),
                    line: idx + 1,
                    text: text.to_string(),
                    lower: text.to_lowercase(),
                });
            }
        }

        let summary = IndexSummary {
            repo_id: repo_id.to_string(),
            files_indexed: files.len(),
            lines_indexed: lines.len(),
        };
        self.indexes
            .write()
            .await
            .insert(repo_id.to_string(), Arc::new(lines));

        tracing::info!(
            "Indexed {} ({} files, {} lines)",
            repo_id,
            summary.files_indexed,
            summary.lines_indexed
        );
        Ok(summary)
    }

    async fn run_semantic_search(
        &self,
        repo_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Err(CollaboratorError::new(
                "Search query must contain at least one word",
            ));
        }
        let phrase = query.trim().to_lowercase();
        let index = self.index_for(repo_id).await?;

        let mut hits: Vec<SearchHit> = index
            .iter()
            .filter_map(|line| {
                let matched = terms.iter().filter(|t| line.lower.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                let mut score = matched as f32 / terms.len() as f32;
                if terms.len() > 1 && line.lower.contains(&phrase) {
                    score += 0.5;
                }
                Some(SearchHit {
                    file_path: line.file_path.clone(),
                    line: line.line,
                    snippet: snippet(&line.text),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.file_path.cmp(&b.file_path))
                .then_with(|| a.line.cmp(&b.line))
        });
        hits.truncate(limit.clamp(1, MAX_SEARCH_RESULTS));
        Ok(hits)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static analysis rules
// ─────────────────────────────────────────────────────────────────────────────

struct RuleSpec {
    id: &'static str,
    severity: Severity,
    pattern: &'static str,
    message: &'static str,
    recommendation: &'static str,
    quality: bool,
}

const RULE_SPECS: &[RuleSpec] = &[
    RuleSpec {
        id: "generic/hardcoded-secret",
        severity: Severity::High,
        pattern: r#"(?i)\b(password|passwd|secret|api_key|apikey|token)\s*[:=]\s*["'][^"']{6,}["']"#,
        message: "Possible hardcoded credential",
        recommendation: "Load secrets from the environment or a secret manager",
        quality: false,
    },
    RuleSpec {
        id: "generic/shell-injection",
        severity: Severity::Critical,
        pattern: r"shell\s*=\s*True|os\.system\s*\(|child_process\.exec\s*\(",
        message: "Command executed through a shell",
        recommendation: "Pass an argument vector and avoid shell interpretation",
        quality: false,
    },
    RuleSpec {
        id: "generic/sql-concatenation",
        severity: Severity::Critical,
        pattern: r#"(?i)\b(select|insert|update|delete)\b[^\n]*["']\s*(\+|%|\.format\()"#,
        message: "SQL statement built from string concatenation",
        recommendation: "Use parameterized queries",
        quality: false,
    },
    RuleSpec {
        id: "generic/dynamic-eval",
        severity: Severity::High,
        pattern: r"\b(eval|exec)\s*\(",
        message: "Dynamic code evaluation",
        recommendation: "Avoid evaluating strings as code",
        quality: false,
    },
    RuleSpec {
        id: "generic/tls-verify-disabled",
        severity: Severity::High,
        pattern: r"verify\s*=\s*False|InsecureSkipVerify:\s*true|danger_accept_invalid_certs\(\s*true\s*\)",
        message: "TLS certificate verification disabled",
        recommendation: "Keep certificate verification enabled",
        quality: false,
    },
    RuleSpec {
        id: "generic/weak-hash",
        severity: Severity::Medium,
        pattern: r"(?i)\b(md5|sha1)\s*\(",
        message: "Weak hash function",
        recommendation: "Use SHA-256 or a password hashing function",
        quality: false,
    },
    RuleSpec {
        id: "rust/unsafe-block",
        severity: Severity::Low,
        pattern: r"\bunsafe\s*\{",
        message: "Unsafe block",
        recommendation: "Document the invariants the block relies on",
        quality: true,
    },
];

struct Rule {
    spec: &'static RuleSpec,
    pattern: Regex,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        RULE_SPECS
            .iter()
            .filter_map(|spec| match Regex::new(spec.pattern) {
                Ok(pattern) => Some(Rule { spec, pattern }),
                Err(e) => {
                    tracing::warn!("Skipping rule {}: {}", spec.id, e);
                    None
                }
            })
            .collect()
    })
}

fn extensions_for(language: &str) -> Result<Option<&'static [&'static str]>, CollaboratorError> {
    let exts: &'static [&'static str] = match language.trim().to_lowercase().as_str() {
        "" | "auto" => return Ok(None),
        "python" => &["py"],
        "javascript" | "typescript" => &["js", "jsx", "ts", "tsx", "mjs", "cjs"],
        "go" => &["go"],
        "java" => &["java"],
        "rust" => &["rs"],
        "ruby" => &["rb"],
        "cpp" => &["c", "cc", "cpp", "h", "hpp"],
        "csharp" => &["cs"],
        other => {
            return Err(CollaboratorError::new(format!(
                "Unsupported language: {}",
                other
            )))
        }
    };
    Ok(Some(exts))
}

fn security_rules(rule: &RuleSpec) -> bool {
    !rule.quality
}

fn all_rules(_: &RuleSpec) -> bool {
    true
}

fn high_severity_security_rules(rule: &RuleSpec) -> bool {
    !rule.quality && rule.severity <= Severity::High
}

fn suite_filter(suite: &str) -> Result<fn(&RuleSpec) -> bool, CollaboratorError> {
    match suite.trim() {
        "security-extended" => Ok(security_rules),
        "security-and-quality" => Ok(all_rules),
        "default" => Ok(high_severity_security_rules),
        other => Err(CollaboratorError::new(format!(
            "Unknown query suite: {}",
            other
        ))),
    }
}

fn scan_sources(
    files: &[SourceFile],
    extensions: Option<&[&str]>,
    include: fn(&RuleSpec) -> bool,
) -> Vec<Finding> {
    let active: Vec<&Rule> = rules().iter().filter(|r| include(r.spec)).collect();
    let mut findings = Vec::new();

    for file in files {
        if let Some(exts) = extensions {
            let ext = Path::new(&file.rel_path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if !exts.contains(&ext) {
                continue;
            }
        }
        for (idx, line) in file.content.lines().enumerate() {
            for rule in &active {
                if rule.pattern.is_match(line) {
                    findings.push(Finding {
                        rule_id: rule.spec.id.to_string(),
                        severity: rule.spec.severity,
                        message: rule.spec.message.to_string(),
                        file_path: file.rel_path.clone(),
                        start_line: idx + 1,
                        end_line: idx + 1,
                        recommendation: Some(rule.spec.recommendation.to_string()),
                    });
                }
            }
        }
    }

    findings.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    findings
}

#[async_trait]
impl StaticAnalyzer for LocalWorkspace {
    async fn run_static_analysis(
        &self,
        repo_id: &str,
        language: &str,
        suite: &str,
    ) -> Result<Vec<Finding>, CollaboratorError> {
        let extensions = extensions_for(language)?;
        let include = suite_filter(suite)?;
        let root = self.source_root(repo_id).await?;

        let findings = tokio::task::spawn_blocking(move || {
            let files = collect_sources(&root);
            scan_sources(&files, extensions, include)
        })
        .await
        .map_err(|e| CollaboratorError::new(format!("static analysis aborted: {}", e)))?;

        tracing::info!(
            "Static analysis of {} ({}, {}): {} findings",
            repo_id,
            language,
            suite,
            findings.len()
        );
        Ok(findings)
    }
}
