//! Durable plan records, keyed by plan id.
//!
//! Stores hold the exact canonical bytes of each plan. Signatures are verified
//! against those bytes, so a store must hand back precisely what it was given.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{OrchestratorError, Result};

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Whether records survive a restart.
    fn is_persistent(&self) -> bool;

    /// The stored record for `plan_id`, if any.
    async fn get(&self, plan_id: &str) -> Result<Option<String>>;

    /// Insert or replace the record for `plan_id`.
    async fn put(&self, plan_id: &str, record: String) -> Result<()>;
}

/// Plan ids are generated as `plan_<hex>`; anything else never names a record.
fn is_valid_plan_id(plan_id: &str) -> bool {
    !plan_id.is_empty()
        && plan_id.len() <= 64
        && plan_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// In-memory plan store (non-persistent).
#[derive(Clone, Default)]
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn get(&self, plan_id: &str) -> Result<Option<String>> {
        Ok(self.plans.read().await.get(plan_id).cloned())
    }

    async fn put(&self, plan_id: &str, record: String) -> Result<()> {
        self.plans.write().await.insert(plan_id.to_string(), record);
        Ok(())
    }
}

/// One `<plan_id>.json` file per plan under a directory.
pub struct FilePlanStore {
    dir: PathBuf,
    // one writer at a time
    write_lock: tokio::sync::Mutex<()>,
}

impl FilePlanStore {
    /// Open (creating if needed) the plan directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            OrchestratorError::Storage(format!(
                "cannot create plan directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn record_path(&self, plan_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", plan_id))
    }
}

#[async_trait]
impl PlanStore for FilePlanStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, plan_id: &str) -> Result<Option<String>> {
        if !is_valid_plan_id(plan_id) {
            return Ok(None);
        }
        match tokio::fs::read_to_string(self.record_path(plan_id)).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, plan_id: &str, record: String) -> Result<()> {
        if !is_valid_plan_id(plan_id) {
            return Err(OrchestratorError::Validation(format!(
                "invalid plan id '{}'",
                plan_id
            )));
        }
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(plan_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", plan_id));
        tokio::fs::write(&tmp, record.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("Plan persisted: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_exact_bytes() {
        let store = InMemoryPlanStore::new();
        assert!(store.get("plan_1").await.unwrap().is_none());
        store.put("plan_1", "{\"a\":1}".to_string()).await.unwrap();
        assert_eq!(store.get("plan_1").await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(!store.is_persistent());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::open(dir.path().join("plans")).await.unwrap();
        store
            .put("plan_0123456789ab", "{\"status\":\"pending_approval\"}".to_string())
            .await
            .unwrap();

        let reopened = FilePlanStore::open(dir.path().join("plans")).await.unwrap();
        assert_eq!(
            reopened.get("plan_0123456789ab").await.unwrap().as_deref(),
            Some("{\"status\":\"pending_approval\"}")
        );
        assert!(dir.path().join("plans/plan_0123456789ab.json").exists());
    }

    #[tokio::test]
    async fn file_store_ignores_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::open(dir.path()).await.unwrap();
        assert!(store.get("../etc/passwd").await.unwrap().is_none());
        assert!(store.put("../escape", "{}".to_string()).await.is_err());
        assert!(store.get("plan_missing").await.unwrap().is_none());
    }
}
