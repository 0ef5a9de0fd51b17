//! Mapping from the error taxonomy to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::OrchestratorError;

use super::types::ErrorResponse;

/// Handler error. Internal detail of collaborator and storage failures is
/// logged, not returned.
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            OrchestratorError::Validation(_) | OrchestratorError::MissingPrerequisite(_) => {
                StatusCode::BAD_REQUEST
            }
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            OrchestratorError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        self.0.public_message()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.public_message(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (OrchestratorError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (OrchestratorError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (OrchestratorError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (OrchestratorError::Collaborator("x".into()), StatusCode::BAD_GATEWAY),
            (OrchestratorError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err = ApiError(OrchestratorError::Storage("/var/lib/plans: EACCES".into()));
        assert!(!err.public_message().contains("EACCES"));
    }
}
