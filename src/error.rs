//! Error taxonomy surfaced to callers.
//!
//! Every internal fault is converted into one of these variants at the nearest
//! boundary. Messages are meant for humans; raw collaborator output stays in logs.

use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::llm::ModelError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad request shape or unsupported analysis kind.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown plan or job id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Approval signature did not match the persisted plan.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A collaborator, tool, or model call failed.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// A step ran without the context value an earlier step must provide.
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// The plan store could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),
}

impl OrchestratorError {
    /// Short machine-readable label for the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Collaborator(_) => "collaborator_failure",
            Self::MissingPrerequisite(_) => "missing_prerequisite",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Message safe to hand to callers. Collaborator and storage detail is
    /// replaced with a fixed text; log the error itself for the detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::Collaborator(_) => "collaborator failure: an upstream service failed".to_string(),
            Self::Storage(_) => "storage error: plan store unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<CollaboratorError> for OrchestratorError {
    fn from(err: CollaboratorError) -> Self {
        Self::Collaborator(err.to_string())
    }
}

impl From<ModelError> for OrchestratorError {
    fn from(err: ModelError) -> Self {
        Self::Collaborator(err.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("malformed plan record: {}", err))
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_message_hides_upstream_detail() {
        let err = OrchestratorError::from(ModelError("provider returned 500: secret-body".into()));
        assert_eq!(err.kind(), "collaborator_failure");
        assert!(!err.public_message().contains("secret-body"));
        assert!(err.public_message().starts_with("collaborator failure"));
    }

    #[test]
    fn public_message_keeps_own_wording() {
        let err = OrchestratorError::MissingPrerequisite("investigation_plan".into());
        assert_eq!(err.public_message(), "missing prerequisite: investigation_plan");
    }
}
