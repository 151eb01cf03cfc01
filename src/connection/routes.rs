//! Read APIs (§4.9) and the Sender's HTTP route (§4.7, table in §6).
//! Grounded on the teacher's `handlers/*` conventions: thin axum handlers
//! that extract state and return `AppResult<impl IntoResponse>`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::capabilities::{self, Capabilities};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

use super::sender::OutboundPayload;

/// GET `/` — all records (§4.9).
pub async fn list_records(State(state): State<AppState>) -> AppResult<Response> {
    let records = state.registry.find_all().await?;
    Ok((StatusCode::OK, Json(records)).into_response())
}

/// GET `/:connectionId` — one record, or 204 if absent (§4.9, §9 open
/// question 3: the lookup is awaited in full before branching on presence).
pub async fn get_record(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
) -> AppResult<Response> {
    let record = state.registry.find_by_id(connection_id).await?;
    Ok(match record {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// POST `/:connectionId/send` — §4.7, §6.
pub async fn send_message(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
    capabilities: Capabilities,
    body: Option<Json<serde_json::Value>>,
) -> AppResult<Response> {
    if !capabilities.has(capabilities::CONNECTION_SEND) {
        return Err(AppError::Auth(
            "missing required capability 'connection.send'".into(),
        ));
    }

    let Json(body) = body.ok_or_else(|| AppError::Request("Missing request body.".into()))?;
    if !body
        .get("type")
        .map(|v| v.is_string())
        .unwrap_or(false)
    {
        return Err(AppError::Request("Missing or invalid 'type' field.".into()));
    }

    let result = state
        .sender
        .send(connection_id, OutboundPayload::from_json(&body))
        .await;

    match result.status {
        super::sender::SendOutcome::Success => {
            Ok((StatusCode::OK, Json(json!({ "status": "success" }))).into_response())
        }
        super::sender::SendOutcome::Failed(_) => Ok((
            StatusCode::OK,
            Json(json!({ "status": "failed", "reason": result.reason })),
        )
            .into_response()),
    }
}
