//! # Repo Orchestrator
//!
//! Plan-gated repository analysis and an autonomous tool-calling agent.
//!
//! This library provides:
//! - A plan gate: analysis requests become persisted plans that only run after
//!   an HMAC approval signature over their canonical JSON checks out, at most once
//! - A sequential step executor mixing deterministic tool steps with
//!   model-driven `think`/`analyze` steps
//! - A "tools in a loop" agent driven by a language model
//! - A background job manager for long-running tools such as security scans
//! - An HTTP API over all of the above
//!
//! ## Example
//!
//! ```rust,ignore
//! use repo_orchestrator::{api, config::Config};
//!
//! let config = Config::from_env()?;
//! api::serve(config).await?;
//! ```

pub mod agent;
pub mod api;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod orchestrator;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::OrchestratorError;
