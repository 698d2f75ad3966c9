//! Transaction operations: listing, retry, refund.

use crate::engine::RetryOutcome;
use crate::server::error::ApiError;
use crate::server::extract::CurrentActor;
use crate::server::state::AppState;
use crate::types::{Money, Transaction, TransactionId};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response for `GET /transactions`.
#[derive(Debug, Serialize)]
pub struct TransactionList {
    /// The caller's most recent transactions, newest first.
    pub transactions: Vec<Transaction>,
}

/// `GET /transactions`
pub async fn list(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<TransactionList>, ApiError> {
    let transactions = state
        .store
        .transactions_for_user(actor.user_id, 50)
        .await
        .map_err(|err| ApiError::internal(anyhow::anyhow!("listing failed: {err}")))?;
    Ok(Json(TransactionList { transactions }))
}

/// `POST /transactions/:id/retry`
pub async fn retry(
    State(state): State<AppState>,
    CurrentActor(_actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryOutcome>, ApiError> {
    let outcome = state
        .engine
        .retry(TransactionId::from_uuid(id))
        .await?;
    Ok(Json(outcome))
}

/// Request body for `POST /transactions/:id/refund`.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Amount in minor units; omitted means the remaining net.
    pub amount: Option<u64>,
    /// Operator-supplied reason.
    pub reason: String,
}

/// Response for `POST /transactions/:id/refund`.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// The transaction after the refund.
    pub transaction: Transaction,
}

/// `POST /transactions/:id/refund`
pub async fn refund(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let transaction = state
        .engine
        .refund(
            TransactionId::from_uuid(id),
            body.amount.map(Money::from_minor),
            body.reason,
            actor.user_id,
        )
        .await?;
    Ok(Json(RefundResponse { transaction }))
}
