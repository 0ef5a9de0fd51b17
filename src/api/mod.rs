//! HTTP API.
//!
//! ## Endpoints
//!
//! - `POST /api/orchestrate/plan` - Compile and persist a pending plan
//! - `POST /api/orchestrate/execute` - Verify an approval signature and run the plan
//! - `GET /api/orchestrate/plan/:plan_id` - Fetch a plan
//! - `POST /api/orchestrate/sign` - Compute a signature (dev mode only)
//! - `POST /api/agent/run` - Run the autonomous agent
//! - `POST /api/jobs` - Run a tool as a background job
//! - `GET /api/jobs` - List jobs
//! - `GET /api/jobs/:job_id` - Poll a job
//! - `GET /api/health` - Health check

mod error;
mod handlers;
mod routes;
pub mod types;

pub use error::ApiError;
pub use routes::{app, serve, AppState};
