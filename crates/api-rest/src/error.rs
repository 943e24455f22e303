//! REST error mapping.
//!
//! Every handler returns [`ApiError`]; this is the only place engine errors become status codes.
//! Internal details are logged, never echoed.

use api_shared::AuthError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use careplan_core::CarePlanError;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error(transparent)]
    Engine(#[from] CarePlanError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(err) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", err.to_string())
            }
            ApiError::Engine(err) => engine_parts(err),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "REST internal error");
                internal()
            }
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL",
        "An internal error occurred".to_string(),
    )
}

fn engine_parts(err: &CarePlanError) -> (StatusCode, &'static str, String) {
    match err {
        CarePlanError::InvalidTransition(_) => {
            (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
        }
        CarePlanError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string()),
        CarePlanError::Validation(_) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
        }
        CarePlanError::TokenInvalid => (StatusCode::UNAUTHORIZED, "TOKEN_INVALID", err.to_string()),
        CarePlanError::AlreadyResponded(_) => {
            (StatusCode::CONFLICT, "ALREADY_RESPONDED", err.to_string())
        }
        CarePlanError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        CarePlanError::UpstreamFailure(upstream) => {
            tracing::error!(error = %upstream, "upstream collaborator failed");
            (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_FAILURE",
                "An upstream service failed".to_string(),
            )
        }
        CarePlanError::Config(_)
        | CarePlanError::ConfigRead(_)
        | CarePlanError::ConfigYaml(_)
        | CarePlanError::AuditSerialization(_)
        | CarePlanError::LockPoisoned => {
            tracing::error!(error = %err, "engine internal error");
            internal()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
