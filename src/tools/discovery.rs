//! Discovery tools: find repositories and packages on public registries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{
    optional_str, required_str, Tool, ANALYZE_REPOSITORY, SEARCH_GITHUB_REPOS,
    SEARCH_NPM_PACKAGES, SEARCH_PYPI_PACKAGES,
};

const GITHUB_API: &str = "https://api.github.com";
const NPM_REGISTRY: &str = "https://registry.npmjs.org";
const PYPI: &str = "https://pypi.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_RESULTS: u64 = 5;
const MAX_RESULTS: u64 = 10;

/// Manifests whose presence tells which ecosystem a repository builds with.
const DEPENDENCY_FILES: &[&str] = &[
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "Cargo.toml",
    "go.mod",
    "pom.xml",
];

/// HTTP access to GitHub, npm, and PyPI.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    github_api: String,
    npm_registry: String,
    pypi: String,
    github_token: Option<String>,
}

impl RegistryClient {
    pub fn new(github_token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("repo-orchestrator/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            github_api: GITHUB_API.to_string(),
            npm_registry: NPM_REGISTRY.to_string(),
            pypi: PYPI.to_string(),
            github_token,
        }
    }

    /// Serve every registry from one base URL.
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.github_api = base.to_string();
        self.npm_registry = base.to_string();
        self.pypi = base.to_string();
        self
    }

    /// GET a JSON document; `None` when the registry answers 404.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> anyhow::Result<Option<Value>> {
        let mut request = self.http.get(url).query(query);
        if url.starts_with(&self.github_api) {
            request = request.header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.github_token {
                request = request.bearer_auth(token);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("{} returned {}", url, status);
        }
        Ok(Some(response.json::<Value>().await?))
    }
}

fn max_results(args: &Value) -> usize {
    args["max_results"]
        .as_u64()
        .unwrap_or(DEFAULT_RESULTS)
        .clamp(1, MAX_RESULTS) as usize
}

/// `owner/repo` from a GitHub URL or a bare `owner/repo`.
fn parse_github_repo(reference: &str) -> Option<(String, String)> {
    let path = reference
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .trim_start_matches("github.com/")
        .trim_start_matches("git@github.com:");
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?.trim_end_matches(".git");
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if valid(owner) && valid(repo) && !owner.contains('.') {
        Some((owner.to_string(), repo.to_string()))
    } else {
        None
    }
}

/// Search GitHub repositories by topic.
pub struct SearchGithubRepos {
    client: RegistryClient,
}

impl SearchGithubRepos {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for SearchGithubRepos {
    fn name(&self) -> &str {
        SEARCH_GITHUB_REPOS
    }

    fn description(&self) -> &str {
        "Search GitHub for repositories related to a topic. Returns the most starred matches with description, language, and topics."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query (e.g. 'jwt middleware rust')"
                },
                "language": {
                    "type": "string",
                    "description": "Optional programming language filter"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results, 1-10 (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = required_str(&args, "query")?;
        let limit = max_results(&args);
        let q = match optional_str(&args, "language") {
            Some(language) => format!("{} language:{}", query, language),
            None => query.to_string(),
        };

        let url = format!("{}/search/repositories", self.client.github_api);
        let data = self
            .client
            .get_json(
                &url,
                &[
                    ("q", q),
                    ("sort", "stars".to_string()),
                    ("order", "desc".to_string()),
                    ("per_page", limit.to_string()),
                ],
            )
            .await?
            .unwrap_or(Value::Null);

        let repositories: Vec<Value> = data["items"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .take(limit)
            .map(|item| {
                json!({
                    "name": item["full_name"],
                    "url": item["html_url"],
                    "description": item["description"].as_str().unwrap_or("No description"),
                    "stars": item["stargazers_count"],
                    "language": item["language"],
                    "topics": item.get("topics").cloned().unwrap_or_else(|| json!([])),
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "count": repositories.len(),
            "repositories": repositories,
        }))
    }
}

/// Summarize a GitHub repository from its API metadata.
pub struct AnalyzeRepository {
    client: RegistryClient,
}

impl AnalyzeRepository {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for AnalyzeRepository {
    fn name(&self) -> &str {
        ANALYZE_REPOSITORY
    }

    fn description(&self) -> &str {
        "Look up a GitHub repository's metadata without cloning it: language, size, topics, root layout, and which dependency manifests it has."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_url": {
                    "type": "string",
                    "description": "GitHub repository URL (e.g. 'https://github.com/owner/repo')"
                },
                "focus_areas": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["architecture", "dependencies", "file_structure"] },
                    "description": "What to look at (default: ['architecture', 'dependencies'])"
                }
            },
            "required": ["repo_url"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let repo_url = required_str(&args, "repo_url")?;
        let (owner, repo) = parse_github_repo(repo_url)
            .ok_or_else(|| anyhow::anyhow!("Not a GitHub repository URL: {}", repo_url))?;
        let focus: Vec<&str> = match args["focus_areas"].as_array() {
            Some(areas) => areas.iter().filter_map(Value::as_str).collect(),
            None => vec!["architecture", "dependencies"],
        };

        let base = format!("{}/repos/{}/{}", self.client.github_api, owner, repo);
        let info = self
            .client
            .get_json(&base, &[])
            .await?
            .ok_or_else(|| anyhow::anyhow!("Repository {}/{} not found", owner, repo))?;

        let mut analysis = json!({
            "repository": format!("{}/{}", owner, repo),
            "description": info["description"],
            "language": info["language"],
            "size_kb": info["size"],
            "stars": info["stargazers_count"],
            "default_branch": info["default_branch"],
            "topics": info.get("topics").cloned().unwrap_or_else(|| json!([])),
        });

        if focus.contains(&"file_structure") {
            let contents = self
                .client
                .get_json(&format!("{}/contents", base), &[])
                .await?
                .unwrap_or_else(|| json!([]));
            let entries = contents.as_array().map(Vec::as_slice).unwrap_or_default();
            let names_of = |kind: &str| -> Vec<Value> {
                entries
                    .iter()
                    .filter(|e| e["type"] == kind)
                    .map(|e| e["name"].clone())
                    .collect()
            };
            analysis["root_files"] = Value::Array(names_of("file"));
            analysis["directories"] = Value::Array(names_of("dir"));
        }

        if focus.contains(&"dependencies") {
            let mut found = Vec::new();
            for file in DEPENDENCY_FILES {
                let url = format!("{}/contents/{}", base, file);
                if self.client.get_json(&url, &[]).await?.is_some() {
                    found.push(*file);
                }
            }
            analysis["dependency_files"] = json!(found);
        }

        Ok(analysis)
    }
}

/// Search the npm registry.
pub struct SearchNpmPackages {
    client: RegistryClient,
}

impl SearchNpmPackages {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for SearchNpmPackages {
    fn name(&self) -> &str {
        SEARCH_NPM_PACKAGES
    }

    fn description(&self) -> &str {
        "Search the npm registry for JavaScript/TypeScript packages providing some functionality."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Package search query (e.g. 'markdown parser')"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results, 1-10 (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = required_str(&args, "query")?;
        let limit = max_results(&args);

        let url = format!("{}/-/v1/search", self.client.npm_registry);
        let data = self
            .client
            .get_json(&url, &[("text", query.to_string()), ("size", limit.to_string())])
            .await?
            .unwrap_or(Value::Null);

        let packages: Vec<Value> = data["objects"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .take(limit)
            .map(|object| {
                let package = &object["package"];
                let author = match &package["author"] {
                    Value::Object(author) => author.get("name").cloned().unwrap_or(Value::Null),
                    Value::String(author) => json!(author),
                    _ => Value::Null,
                };
                json!({
                    "name": package["name"],
                    "description": package["description"].as_str().unwrap_or_default(),
                    "version": package["version"],
                    "author": author,
                    "npm_url": package["links"]["npm"],
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "count": packages.len(),
            "packages": packages,
        }))
    }
}

/// Look up Python packages on PyPI.
pub struct SearchPypiPackages {
    client: RegistryClient,
}

impl SearchPypiPackages {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for SearchPypiPackages {
    fn name(&self) -> &str {
        SEARCH_PYPI_PACKAGES
    }

    fn description(&self) -> &str {
        "Look up a Python package on PyPI. PyPI has no search API, so the query must be (close to) an exact project name such as 'fastapi'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Project name to look up"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = required_str(&args, "query")?;
        let name = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase();

        let url = format!("{}/pypi/{}/json", self.client.pypi, name);
        let Some(data) = self.client.get_json(&url, &[]).await? else {
            return Ok(json!({
                "query": query,
                "count": 0,
                "packages": [],
                "message": format!("No PyPI project named '{}'. Try an exact project name.", name),
            }));
        };

        let info = &data["info"];
        Ok(json!({
            "query": query,
            "count": 1,
            "packages": [{
                "name": info["name"],
                "version": info["version"],
                "summary": info["summary"],
                "pypi_url": info["package_url"],
            }],
        }))
    }
}
