//! Repo Orchestrator - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes plans, the agent, and background jobs.

use repo_orchestrator::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repo_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={} plan_store={:?} workspace={}",
        config.model.default_model,
        config.plan_store,
        config.workspace_dir.display()
    );
    if config.model.api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY not set; model-driven steps and the agent will fail");
    }

    info!("Starting server on {}:{}", config.host, config.port);
    api::serve(config).await?;

    Ok(())
}
