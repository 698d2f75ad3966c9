//! Gate scan endpoint.

use crate::gate::ScanOutcome;
use crate::server::error::ApiError;
use crate::server::extract::CurrentActor;
use crate::server::state::AppState;
use crate::types::{EventId, Role, ScannerContext};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

/// Request body for `POST /validate/scan`.
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// The ticket token from the QR code.
    pub qr_code: String,
    /// Event the scanner believes it is admitting for.
    pub event_id: Option<Uuid>,
}

/// `POST /validate/scan`
///
/// The verdict decides the status code: `VALID` 200, `NOT_FOUND` 404,
/// `NOT_ASSIGNED` 403, everything else 400. The body is the serialized
/// verdict either way.
pub async fn scan(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<ScanRequest>,
) -> Result<Response, ApiError> {
    let assigned_events = if actor.role == Role::Validator {
        state.store.validator_assignments(actor.user_id).await.map_err(
            |err| ApiError::internal(anyhow::anyhow!("assignment lookup failed: {err}")),
        )?
    } else {
        Vec::new()
    };
    let scanner = ScannerContext {
        actor,
        assigned_events,
    };
    let outcome = state
        .gate
        .scan(
            &body.qr_code,
            &scanner,
            body.event_id.map(EventId::from_uuid),
        )
        .await?;
    let status = match &outcome {
        ScanOutcome::Valid { .. } => StatusCode::OK,
        ScanOutcome::NotFound => StatusCode::NOT_FOUND,
        ScanOutcome::NotAssigned => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    };
    Ok((status, Json(outcome)).into_response())
}
