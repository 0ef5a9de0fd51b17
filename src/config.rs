//! Configuration management for the orchestrator.
//!
//! Configuration can be set via environment variables:
//! - `ORCHESTRATOR_SECRET_KEY` - Required outside dev mode. HMAC secret for plan approvals.
//! - `WORKSPACE_DIR` - Optional. Root for persisted plans and ingested repositories. Defaults to `./workspace`.
//! - `PLAN_STORE` - Optional. `file` (default) or `memory`.
//! - `OPENROUTER_API_KEY` - Optional. Model API key. Model-driven steps fail without it.
//! - `DEFAULT_MODEL` - Optional. The LLM model to use. Defaults to `google/gemini-2.5-pro`.
//! - `GITHUB_TOKEN` - Optional. Raises GitHub API rate limits for the discovery tools.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `MAX_ITERATIONS` - Optional. Default agent iteration budget. Defaults to `15`.
//! - `MAX_ITERATIONS_CAP` - Optional. Largest budget a caller may request. Defaults to `50`.
//! - `REPO_TEXT_BUDGET` - Optional. Characters of repository text sent to the planner. Defaults to `60000`.
//! - `DEV_MODE` - Optional. Allows the default secret and exposes the signing helper.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Secret used when running in dev mode without `ORCHESTRATOR_SECRET_KEY`.
pub const DEV_SECRET_KEY: &str = "dev-secret-key-change-in-production";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Which backend holds persisted plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStoreKind {
    /// One JSON file per plan under `{workspace}/plans`
    File,
    /// Process-local map, lost on restart
    Memory,
}

impl FromStr for PlanStoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected 'file' or 'memory', got: {}", other)),
        }
    }
}

/// Model access configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// OpenRouter API key
    pub api_key: Option<String>,

    /// Model identifier (OpenRouter format)
    pub default_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: "google/gemini-2.5-pro".to_string(),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret for plan approval signatures
    pub secret_key: String,

    /// Workspace root for plans and ingested repositories
    pub workspace_dir: PathBuf,

    /// Plan persistence backend
    pub plan_store: PlanStoreKind,

    /// Model access
    pub model: ModelConfig,

    /// GitHub API token for repository discovery
    pub github_token: Option<String>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Default iteration budget for agent runs
    pub max_iterations: usize,

    /// Largest iteration budget accepted from a caller
    pub max_iterations_cap: usize,

    /// Characters of repository text handed to the planner
    pub repo_text_budget: usize,

    /// Development mode (default secret allowed, signing helper routed)
    pub dev_mode: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `ORCHESTRATOR_SECRET_KEY` is not set
    /// outside dev mode, and `ConfigError::InvalidValue` for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dev_mode = std::env::var("DEV_MODE")
            .ok()
            .map(|v| parse_bool(&v).map_err(|e| ConfigError::InvalidValue("DEV_MODE".to_string(), e)))
            .transpose()?
            // In debug builds, default to dev_mode=true; in release, default to false.
            .unwrap_or(cfg!(debug_assertions));

        let secret_key = match std::env::var("ORCHESTRATOR_SECRET_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ if dev_mode => DEV_SECRET_KEY.to_string(),
            _ => {
                return Err(ConfigError::MissingEnvVar(
                    "ORCHESTRATOR_SECRET_KEY".to_string(),
                ))
            }
        };

        let workspace_dir = std::env::var("WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./workspace"));

        let plan_store = std::env::var("PLAN_STORE")
            .ok()
            .map(|v| {
                v.parse::<PlanStoreKind>()
                    .map_err(|e| ConfigError::InvalidValue("PLAN_STORE".to_string(), e))
            })
            .transpose()?
            .unwrap_or(PlanStoreKind::File);

        let model = ModelConfig {
            api_key: std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            default_model: std::env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| ModelConfig::default().default_model),
        };

        let github_token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_env("PORT", 8000)?;
        let max_iterations = parse_env("MAX_ITERATIONS", 15)?;
        let max_iterations_cap = parse_env("MAX_ITERATIONS_CAP", 50)?;
        let repo_text_budget = parse_env("REPO_TEXT_BUDGET", 60_000)?;

        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if max_iterations_cap < max_iterations {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS_CAP".to_string(),
                format!("must be >= MAX_ITERATIONS ({})", max_iterations),
            ));
        }

        Ok(Self {
            secret_key,
            workspace_dir,
            plan_store,
            model,
            github_token,
            host,
            port,
            max_iterations,
            max_iterations_cap,
            repo_text_budget,
            dev_mode,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(secret_key: String, workspace_dir: PathBuf) -> Self {
        Self {
            secret_key,
            workspace_dir,
            plan_store: PlanStoreKind::Memory,
            model: ModelConfig::default(),
            github_token: None,
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_iterations: 15,
            max_iterations_cap: 50,
            repo_text_budget: 60_000,
            dev_mode: true,
        }
    }

    /// Directory holding one JSON record per plan.
    pub fn plans_dir(&self) -> PathBuf {
        self.workspace_dir.join("plans")
    }

    /// Directory holding ingested repository snapshots.
    pub fn ingest_dir(&self) -> PathBuf {
        self.workspace_dir.join("ingest")
    }

    /// Clamp a caller-supplied iteration budget into `1..=max_iterations_cap`.
    pub fn clamp_iterations(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.max_iterations)
            .clamp(1, self.max_iterations_cap)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool(" off "), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn plan_store_kind_parses_case_insensitively() {
        assert_eq!("FILE".parse::<PlanStoreKind>(), Ok(PlanStoreKind::File));
        assert_eq!("memory".parse::<PlanStoreKind>(), Ok(PlanStoreKind::Memory));
        assert!("sqlite".parse::<PlanStoreKind>().is_err());
    }

    #[test]
    fn clamp_iterations_respects_cap_and_floor() {
        let config = Config::new("secret".to_string(), PathBuf::from("/tmp/ws"));
        assert_eq!(config.clamp_iterations(None), 15);
        assert_eq!(config.clamp_iterations(Some(0)), 1);
        assert_eq!(config.clamp_iterations(Some(500)), 50);
        assert_eq!(config.clamp_iterations(Some(7)), 7);
    }

    #[test]
    fn workspace_subdirectories() {
        let config = Config::new("secret".to_string(), PathBuf::from("/srv/ws"));
        assert_eq!(config.plans_dir(), PathBuf::from("/srv/ws/plans"));
        assert_eq!(config.ingest_dir(), PathBuf::from("/srv/ws/ingest"));
    }
}
