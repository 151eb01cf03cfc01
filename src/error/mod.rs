use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced across the connection provider's HTTP and WebSocket
/// surfaces. The four kinds from the error handling design — request,
/// authorization, protocol and operational faults — each map to exactly one
/// HTTP status, so they are folded into variants here rather than kept as a
/// separate taxonomy.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed client input — HTTP 400, reported verbatim, never retried
    /// server-side.
    #[error("{0}")]
    Request(String),

    /// Identity or connection-token verification failed, or a required
    /// capability is missing — HTTP 403.
    #[error("{0}")]
    Auth(String),

    /// The persistent store is unavailable or returned an error.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Anything else — HTTP 500. The message is logged but not leaked to
    /// the caller.
    #[error("internal error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, state, reason): (StatusCode, &str, String) = match self {
            AppError::Request(reason) => (StatusCode::BAD_REQUEST, "requestError", reason),
            AppError::Auth(reason) => (StatusCode::FORBIDDEN, "authError", reason),
            AppError::Store(e) => {
                tracing::error!(error = ?e, "persistent store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internalError",
                    "Store unavailable.".into(),
                )
            }
            AppError::Internal => {
                tracing::error!("internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internalError",
                    "Internal server error.".into(),
                )
            }
        };

        (status, Json(json!({ "state": state, "reason": reason }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
