//! Approval-gated analysis plans.
//!
//! A request is compiled into an ordered action list and persisted as a
//! pending plan. An approver signs the plan's canonical JSON; the gate checks
//! the signature against the persisted bytes and then runs the actions through
//! the step executor, once.

pub mod canonical;
pub mod context;
pub mod executor;
pub mod gate;
pub mod plan;
mod prompts;
pub mod signature;
pub mod store;

pub use executor::{ActionResult, AnalysisFindings, ExecutionResults, InvestigationPlan, StepExecutor};
pub use gate::PlanGate;
pub use plan::{Action, ActionKind, ActionStatus, AnalysisKind, AnalysisRequest, Plan, PlanStatus};
pub use signature::ApprovalSigner;
pub use store::{FilePlanStore, InMemoryPlanStore, PlanStore};
