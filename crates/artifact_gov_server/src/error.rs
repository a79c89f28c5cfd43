//! HTTP mapping of governance errors.
//!
//! Body shape: `{"kind": "...", "message": "...", "issues": [...]}`; `issues`
//! only appears for failed preflights.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use artifact_gov_core::error::{GovernanceError, PreflightIssue};

#[derive(Debug)]
pub struct AppError(pub GovernanceError);

impl From<GovernanceError> for AppError {
    fn from(e: GovernanceError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<PreflightIssue>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            kind: self.0.kind(),
            message: self.0.to_string(),
            issues: self.0.issues().to_vec(),
        };
        (status, Json(body)).into_response()
    }
}
