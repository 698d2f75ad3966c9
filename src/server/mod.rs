//! HTTP server wiring.
//!
//! Builds the Axum router over [`state::AppState`]. Handlers live in
//! `crate::api`; this module only assembles routes.

pub mod error;
pub mod extract;
pub mod health;
pub mod state;

use crate::api::{tickets, transactions, validate, webhooks};
use axum::{
    routing::{get, post},
    Router,
};
use health::{health_check, readiness_check};
use state::AppState;

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health checks (no authentication)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Purchase flow
        .route("/tickets/purchase", post(tickets::purchase))
        .route("/tickets/verify", post(tickets::verify))
        // Gateway webhooks
        .route("/webhooks/paystack", post(webhooks::paystack))
        // Gate scanning
        .route("/validate/scan", post(validate::scan))
        // Transaction operations
        .route("/transactions", get(transactions::list))
        .route("/transactions/:id/retry", post(transactions::retry))
        .route("/transactions/:id/refund", post(transactions::refund))
        .with_state(state)
}
