//! Per-run scratch space shared by the steps of one plan execution.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Key the `ingest` step writes the collaborator's repository id under.
pub const REPO_ID: &str = "repo_id";
/// Key the `think` step writes its investigation plan under.
pub const INVESTIGATION_PLAN: &str = "investigation_plan";

/// Created fresh for each execution and dropped afterwards.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    values: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Value an earlier step must have written.
    ///
    /// # Errors
    ///
    /// `MissingPrerequisite` when no earlier step in this run produced `key`.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.values.get(key).ok_or_else(|| {
            OrchestratorError::MissingPrerequisite(format!(
                "'{}' was not produced by an earlier step in this run",
                key
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_reports_missing_prerequisite() {
        let mut ctx = ExecutionContext::new();
        let err = ctx.require(INVESTIGATION_PLAN).unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingPrerequisite(_)));

        ctx.insert(INVESTIGATION_PLAN, json!({"approach": "trace login"}));
        assert_eq!(ctx.require(INVESTIGATION_PLAN).unwrap()["approach"], "trace login");
    }
}
