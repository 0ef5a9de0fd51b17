//! Plan authorization gate.
//!
//! Plans are compiled and persisted as pending, and only run after an approval
//! signature over their exact persisted bytes checks out. A completed plan is
//! never run again; re-executing returns the stored record.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{OrchestratorError, Result};

use super::canonical::to_canonical_json;
use super::executor::StepExecutor;
use super::plan::{timestamp, AnalysisRequest, Plan, PlanStatus};
use super::signature::ApprovalSigner;
use super::store::PlanStore;

pub struct PlanGate {
    store: Arc<dyn PlanStore>,
    signer: ApprovalSigner,
    executor: StepExecutor,
    /// One lock per plan id, so concurrent approvals of the same plan run it once.
    execution_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PlanGate {
    pub fn new(store: Arc<dyn PlanStore>, signer: ApprovalSigner, executor: StepExecutor) -> Self {
        Self {
            store,
            signer,
            executor,
            execution_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Compile, persist, and return a pending plan.
    pub async fn create_plan(&self, request: AnalysisRequest) -> Result<Plan> {
        request.validate()?;
        let plan = Plan::new(request);
        self.persist(&plan).await?;
        tracing::info!(
            "Plan created: {} with {} actions",
            plan.plan_id,
            plan.actions.len()
        );
        Ok(plan)
    }

    /// The signature an approver must submit for `plan`.
    pub fn compute_signature(&self, plan: &Plan, approver: &str) -> Result<String> {
        let canonical = to_canonical_json(plan)?;
        self.signer.sign(&canonical, approver)
    }

    /// Signature for the plan as currently persisted.
    pub async fn sign_stored(&self, plan_id: &str, approver: &str) -> Result<String> {
        let record = self.load_record(plan_id).await?;
        self.signer.sign(&record, approver)
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<Plan> {
        let record = self.load_record(plan_id).await?;
        Ok(serde_json::from_str(&record)?)
    }

    /// Verify the approval and run the plan once.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown plan, `PermissionDenied` when the signature
    /// does not match the persisted plan.
    pub async fn verify_and_execute(
        &self,
        plan_id: &str,
        approver: &str,
        signature: &str,
    ) -> Result<Plan> {
        let lock = self.execution_lock(plan_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.execute_locked(plan_id, approver, signature).await
        };
        self.release_lock(plan_id, lock).await;
        outcome
    }

    async fn execute_locked(&self, plan_id: &str, approver: &str, signature: &str) -> Result<Plan> {
        let record = self.load_record(plan_id).await?;
        let mut plan: Plan = serde_json::from_str(&record)?;

        if plan.is_completed() {
            tracing::info!("Plan {} already executed; returning stored results", plan_id);
            return Ok(plan);
        }

        if !self.signer.verify(&record, approver, signature)? {
            tracing::warn!("Invalid approval signature for plan {} from {}", plan_id, approver);
            return Err(OrchestratorError::PermissionDenied(
                "invalid approval signature".to_string(),
            ));
        }

        tracing::info!(
            "Executing plan {} ({} actions) approved by {}",
            plan_id,
            plan.actions.len(),
            approver
        );
        let results = self
            .executor
            .execute(&mut plan.actions, &plan.request)
            .await;

        plan.results = Some(results);
        plan.executed_at = Some(timestamp());
        plan.status = PlanStatus::Completed;
        self.persist(&plan).await?;

        tracing::info!("Plan {} execution completed", plan_id);
        Ok(plan)
    }

    async fn execution_lock(&self, plan_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.execution_locks.lock().await;
        Arc::clone(locks.entry(plan_id.to_string()).or_default())
    }

    /// Drop the lock entry once no other caller holds or waits on it.
    async fn release_lock(&self, plan_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.execution_locks.lock().await;
        // the map and `lock` itself
        if Arc::strong_count(&lock) == 2 {
            locks.remove(plan_id);
        }
    }

    async fn load_record(&self, plan_id: &str) -> Result<String> {
        self.store
            .get(plan_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Plan {} not found", plan_id)))
    }

    async fn persist(&self, plan: &Plan) -> Result<()> {
        let record = to_canonical_json(plan)?;
        self.store.put(&plan.plan_id, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::plan::AnalysisKind;
    use crate::orchestrator::store::InMemoryPlanStore;
    use crate::llm::ModelError;
    use crate::test_support::{FakeRepo, ScriptedModel};
    use crate::tools::job_tools;
    use tokio_test::assert_ok;

    struct Fixture {
        repo: Arc<FakeRepo>,
        model: Arc<ScriptedModel>,
        store: Arc<InMemoryPlanStore>,
        gate: PlanGate,
    }

    fn fixture() -> Fixture {
        fixture_with_model(ScriptedModel::new(vec![]))
    }

    fn fixture_with_model(model: Arc<ScriptedModel>) -> Fixture {
        let repo = Arc::new(FakeRepo::new());
        let collaborators = repo.collaborators();
        let executor = StepExecutor::new(
            Arc::new(job_tools(&collaborators)),
            collaborators.ingestor,
            model.clone(),
            60_000,
        );
        let store = Arc::new(InMemoryPlanStore::new());
        let gate = PlanGate::new(store.clone(), ApprovalSigner::new("test-secret"), executor);
        Fixture {
            repo,
            model,
            store,
            gate,
        }
    }

    fn security_request() -> AnalysisRequest {
        AnalysisRequest::new("/srv/app", AnalysisKind::Security, None).unwrap()
    }

    #[tokio::test]
    async fn approved_plan_executes_and_persists() {
        let f = fixture();
        let plan = f.gate.create_plan(security_request()).await.unwrap();
        let signature = f.gate.compute_signature(&plan, "alice").unwrap();

        let executed = f
            .gate
            .verify_and_execute(&plan.plan_id, "alice", &signature)
            .await
            .unwrap();

        assert_eq!(executed.status, PlanStatus::Completed);
        assert!(executed.executed_at.is_some());
        assert_eq!(executed.results.as_ref().unwrap().completed_actions, 3);
        assert_eq!(f.gate.get_plan(&plan.plan_id).await.unwrap(), executed);
    }

    #[tokio::test]
    async fn second_execution_is_a_no_op() {
        let f = fixture();
        let plan = f.gate.create_plan(security_request()).await.unwrap();
        let signature = f.gate.compute_signature(&plan, "alice").unwrap();

        let first = f
            .gate
            .verify_and_execute(&plan.plan_id, "alice", &signature)
            .await
            .unwrap();
        let second = f
            .gate
            .verify_and_execute(&plan.plan_id, "alice", &signature)
            .await
            .unwrap();

        assert_eq!(first.results, second.results);
        assert_eq!(first.executed_at, second.executed_at);
        assert_eq!(FakeRepo::count(&f.repo.ingest_calls), 1);
        assert_eq!(FakeRepo::count(&f.repo.analysis_calls), 1);
    }

    #[tokio::test]
    async fn concurrent_approvals_execute_once() {
        let f = fixture();
        let plan = f.gate.create_plan(security_request()).await.unwrap();
        let signature = f.gate.compute_signature(&plan, "alice").unwrap();

        let (a, b) = tokio::join!(
            f.gate.verify_and_execute(&plan.plan_id, "alice", &signature),
            f.gate.verify_and_execute(&plan.plan_id, "alice", &signature),
        );
        assert_eq!(a.unwrap().executed_at, b.unwrap().executed_at);
        assert_eq!(FakeRepo::count(&f.repo.ingest_calls), 1);
        assert!(f.gate.execution_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn execution_locks_are_released() {
        let f = fixture();
        let plan = f.gate.create_plan(security_request()).await.unwrap();
        let signature = f.gate.compute_signature(&plan, "alice").unwrap();

        assert!(f
            .gate
            .verify_and_execute(&plan.plan_id, "mallory", &signature)
            .await
            .is_err());
        assert!(f.gate.execution_locks.lock().await.is_empty());

        assert_ok!(
            f.gate
                .verify_and_execute(&plan.plan_id, "alice", &signature)
                .await
        );
        assert!(f.gate.execution_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_critical_step_still_completes_the_plan() {
        let f = fixture_with_model(ScriptedModel::new(vec![Err(ModelError(
            "provider returned 500: secret-body".into(),
        ))]));
        let request = AnalysisRequest::new(
            "/srv/app",
            AnalysisKind::Deep,
            Some("How is the session token stored?".into()),
        )
        .unwrap();
        let plan = f.gate.create_plan(request).await.unwrap();
        let signature = f.gate.compute_signature(&plan, "alice").unwrap();

        let executed = f
            .gate
            .verify_and_execute(&plan.plan_id, "alice", &signature)
            .await
            .unwrap();

        assert_eq!(executed.status, PlanStatus::Completed);
        let results = executed.results.as_ref().unwrap();
        assert!(results.aborted);
        assert_eq!(results.completed_actions, 2);
        assert_eq!(results.aborted_at_step, Some(3));
        assert_eq!(f.gate.get_plan(&plan.plan_id).await.unwrap(), executed);

        let record = f.store.get(&plan.plan_id).await.unwrap().unwrap();
        assert!(!record.contains("secret-body"));
        assert!(!record.contains("provider returned"));
        assert!(record.contains("collaborator failure"));

        let again = f
            .gate
            .verify_and_execute(&plan.plan_id, "alice", &signature)
            .await
            .unwrap();
        assert_eq!(again, executed);
        assert_eq!(f.model.calls(), 1);
    }

    #[tokio::test]
    async fn whitespace_in_persisted_record_invalidates_signature() {
        let f = fixture();
        let plan = f.gate.create_plan(security_request()).await.unwrap();
        let signature = f.gate.compute_signature(&plan, "alice").unwrap();

        let record = f.store.get(&plan.plan_id).await.unwrap().unwrap();
        f.store.put(&plan.plan_id, format!("{} ", record)).await.unwrap();

        let err = f
            .gate
            .verify_and_execute(&plan.plan_id, "alice", &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PermissionDenied(_)));
        assert_eq!(FakeRepo::count(&f.repo.ingest_calls), 0);
        assert_eq!(
            f.gate.get_plan(&plan.plan_id).await.unwrap().status,
            PlanStatus::PendingApproval
        );
    }

    #[tokio::test]
    async fn wrong_approver_or_signature_is_denied() {
        let f = fixture();
        let plan = f.gate.create_plan(security_request()).await.unwrap();
        let signature = f.gate.compute_signature(&plan, "alice").unwrap();

        for (approver, sig) in [("mallory", signature.as_str()), ("alice", "deadbeef")] {
            let err = f
                .gate
                .verify_and_execute(&plan.plan_id, approver, sig)
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::PermissionDenied(_)));
        }
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let f = fixture();
        let err = f
            .gate
            .verify_and_execute("plan_000000000000", "alice", "00")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
        assert!(matches!(
            f.gate.get_plan("plan_000000000000").await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stored_signature_matches_computed_signature() {
        let f = fixture();
        let plan = f.gate.create_plan(security_request()).await.unwrap();
        let from_store = f.gate.sign_stored(&plan.plan_id, "alice").await.unwrap();
        assert_eq!(from_store, f.gate.compute_signature(&plan, "alice").unwrap());
        assert_ok!(
            f.gate
                .verify_and_execute(&plan.plan_id, "alice", &from_store)
                .await
        );
    }
}
