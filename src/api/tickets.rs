//! Purchase and verification endpoints.

use crate::engine::InitiateRequest;
use crate::server::error::ApiError;
use crate::server::extract::{ClientInfo, CurrentActor, IdempotencyKeyHeader};
use crate::server::state::AppState;
use crate::types::{EventId, Order, PaymentStatus, Ticket, TierId, Transaction};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for `POST /tickets/purchase`.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    /// Event to purchase.
    pub event_id: Uuid,
    /// Tier to purchase.
    pub tier_id: Uuid,
    /// Tickets requested.
    pub quantity: u32,
}

/// Response for `POST /tickets/purchase`.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    /// The created (or replayed) order.
    pub order: Order,
    /// The created (or replayed) transaction.
    pub transaction: Transaction,
    /// Hosted checkout URL.
    pub payment_url: String,
    /// Effective idempotency key; echo it to retry safely.
    pub idempotency_key: String,
    /// True when an existing transaction was replayed.
    pub is_idempotent: bool,
}

/// `POST /tickets/purchase`
pub async fn purchase(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ClientInfo(client): ClientInfo,
    IdempotencyKeyHeader(idempotency_key): IdempotencyKeyHeader,
    Json(body): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let outcome = state
        .engine
        .initiate(InitiateRequest {
            actor,
            event_id: EventId::from_uuid(body.event_id),
            tier_id: TierId::from_uuid(body.tier_id),
            quantity: body.quantity,
            idempotency_key,
            client,
        })
        .await?;
    Ok(Json(PurchaseResponse {
        order: outcome.order,
        transaction: outcome.transaction,
        payment_url: outcome.payment_url,
        idempotency_key: outcome.idempotency_key,
        is_idempotent: outcome.is_idempotent,
    }))
}

/// Request body for `POST /tickets/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// Gateway reference returned at purchase time.
    pub reference: String,
}

/// Order summary returned after verification.
#[derive(Debug, Serialize)]
pub struct VerifiedOrder {
    /// Order id.
    pub id: crate::types::OrderId,
    /// Payment status after verification.
    pub status: PaymentStatus,
    /// The order's tickets.
    pub tickets: Vec<Ticket>,
}

/// Response for `POST /tickets/verify`.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// The verified order.
    pub order: VerifiedOrder,
}

/// `POST /tickets/verify`
pub async fn verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let outcome = state.engine.verify(&body.reference).await?;
    Ok(Json(VerifyResponse {
        order: VerifiedOrder {
            id: outcome.order.id,
            status: outcome.order.payment_status,
            tickets: outcome.tickets,
        },
    }))
}
