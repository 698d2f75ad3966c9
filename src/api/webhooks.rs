//! Gateway webhook endpoint.
//!
//! Always answers 200: gateways treat non-2xx as a delivery failure and
//! retry, and a signature mismatch must not trigger a retry storm.

use crate::server::state::AppState;
use crate::webhook::WebhookAck;
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};

/// `POST /webhooks/paystack`
pub async fn paystack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookAck> {
    let signature = headers
        .get("x-paystack-signature")
        .and_then(|v| v.to_str().ok());
    Json(state.webhooks.ingest(&body, signature).await)
}
