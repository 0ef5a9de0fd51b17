//! Application state, router, and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::collaborators::{Collaborators, LocalWorkspace};
use crate::config::{Config, PlanStoreKind};
use crate::error::Result;
use crate::jobs::JobManager;
use crate::llm::{ModelClient, OpenRouterClient};
use crate::orchestrator::{
    ApprovalSigner, FilePlanStore, InMemoryPlanStore, PlanGate, PlanStore, StepExecutor,
};
use crate::tools;

use super::handlers;

/// Shared state for all handlers.
pub struct AppState {
    pub config: Config,
    pub gate: PlanGate,
    pub agent: Agent,
    pub jobs: Arc<JobManager>,
}

impl AppState {
    /// Wire the production collaborators, model client, and plan store.
    pub async fn from_config(config: Config) -> Result<Self> {
        let workspace = Arc::new(LocalWorkspace::new(config.ingest_dir()));
        let collaborators = Collaborators::from_shared(workspace);

        let model: Arc<dyn ModelClient> = Arc::new(OpenRouterClient::new(
            config.model.api_key.clone(),
            config.model.default_model.clone(),
        ));

        let store: Arc<dyn PlanStore> = match config.plan_store {
            PlanStoreKind::File => Arc::new(FilePlanStore::open(config.plans_dir()).await?),
            PlanStoreKind::Memory => Arc::new(InMemoryPlanStore::new()),
        };

        Ok(Self::new(config, collaborators, model, store))
    }

    /// Assemble the state from explicit parts.
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        model: Arc<dyn ModelClient>,
        store: Arc<dyn PlanStore>,
    ) -> Self {
        let jobs = Arc::new(JobManager::new(Arc::new(tools::job_tools(&collaborators))));
        let registries = tools::RegistryClient::new(config.github_token.clone());
        let registry = Arc::new(tools::agent_tools(
            &collaborators,
            Arc::clone(&jobs),
            &registries,
        ));

        let executor = StepExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&collaborators.ingestor),
            Arc::clone(&model),
            config.repo_text_budget,
        );
        let gate = PlanGate::new(store, ApprovalSigner::new(&config.secret_key), executor);
        let agent = Agent::new(model, registry);

        Self {
            config,
            gate,
            agent,
            jobs,
        }
    }
}

/// The HTTP router. The signing helper is only routed in dev mode.
pub fn app(state: Arc<AppState>) -> Router {
    let mut orchestrate = Router::new()
        .route("/plan", post(handlers::create_plan))
        .route("/plan/:plan_id", get(handlers::get_plan))
        .route("/execute", post(handlers::execute_plan));
    if state.config.dev_mode {
        orchestrate = orchestrate.route("/sign", post(handlers::sign_plan));
    }

    let api = Router::new()
        .nest("/orchestrate", orchestrate)
        .route("/agent/run", post(handlers::run_agent))
        .route("/jobs", post(handlers::submit_job).get(handlers::list_jobs))
        .route("/jobs/:job_id", get(handlers::job_status))
        .route("/health", get(handlers::health));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    if config.dev_mode {
        tracing::warn!("Dev mode enabled: signing helper is routed at /api/orchestrate/sign");
    }

    let state = Arc::new(AppState::from_config(config).await?);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}
