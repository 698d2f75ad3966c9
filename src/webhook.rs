//! Gateway webhook ingestion.
//!
//! Signature-checked, deduplicating dispatch into the engine. The processor
//! never raises to its caller: gateways interpret non-2xx as "retry", so
//! every outcome (bad signature, malformed payload, handler fault) is an
//! acknowledgement body, and internal faults go to the audit stream as
//! `system.error`.
//!
//! Dedup needs no table of its own: completion is idempotent at the state
//! boundary and keyed by the gateway reference, so duplicate webhooks are
//! naturally absorbed.

use crate::audit::{AuditEmitter, AuditEvent};
use crate::engine::TransactionEngine;
use crate::error::EngineError;
use crate::gateway::{verify_webhook_signature, SubaccountShare, VerifiedPayment, VerifyStatus};
use crate::store::Store;
use crate::types::{CardAuthorization, Failure, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Acknowledgement returned to the gateway; always carried on a 200.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    /// Whether the event was processed without fault.
    pub success: bool,
    /// Whether a handler consumed the event.
    pub handled: bool,
    /// Operator-facing note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookAck {
    fn rejected(message: &str) -> Self {
        Self {
            success: false,
            handled: false,
            message: Some(message.to_string()),
        }
    }

    const fn ok(handled: bool) -> Self {
        Self {
            success: true,
            handled,
            message: None,
        }
    }
}

/// Webhook envelope: event name plus provider-shaped payload.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: ChargeData,
}

/// The charge fields the engine consumes from webhook payloads.
#[derive(Debug, Default, Deserialize)]
struct ChargeData {
    #[serde(default)]
    reference: String,
    #[serde(default)]
    amount: u64,
    fees: Option<u64>,
    channel: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    id: Option<u64>,
    authorization: Option<WireAuthorization>,
    subaccount: Option<WireSubaccount>,
    gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAuthorization {
    card_type: Option<String>,
    last4: Option<String>,
    bank: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSubaccount {
    #[serde(alias = "subaccount_code")]
    code: String,
    #[serde(alias = "share_amount", default)]
    shared_amount: u64,
}

impl ChargeData {
    fn into_verified_payment(self) -> VerifiedPayment {
        VerifiedPayment {
            status: VerifyStatus::Success,
            amount: Money::from_minor(self.amount),
            fees: self.fees.map(Money::from_minor),
            channel: self.channel,
            paid_at: self.paid_at,
            authorization: self.authorization.map(|a| CardAuthorization {
                card_type: a.card_type,
                last4: a.last4,
                bank: a.bank,
            }),
            subaccount: self.subaccount.map(|s| SubaccountShare {
                code: s.code,
                shared_amount: Money::from_minor(s.shared_amount),
            }),
            gateway_transaction_id: self.id.map(|id| id.to_string()),
        }
    }
}

/// Signature-checked webhook dispatcher.
pub struct WebhookProcessor {
    engine: Arc<TransactionEngine>,
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditEmitter>,
    secret: Option<Vec<u8>>,
}

impl WebhookProcessor {
    /// Create a processor. A `None` secret disables ingestion: every body is
    /// answered as unsigned.
    #[must_use]
    pub fn new(
        engine: Arc<TransactionEngine>,
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditEmitter>,
        secret: Option<Vec<u8>>,
    ) -> Self {
        Self {
            engine,
            store,
            audit,
            secret,
        }
    }

    /// Ingest one raw webhook delivery. Infallible by contract.
    pub async fn ingest(&self, raw_body: &[u8], signature: Option<&str>) -> WebhookAck {
        let Some(secret) = &self.secret else {
            tracing::warn!("webhook received but no payment secret is configured");
            self.audit.emit(AuditEvent::WebhookRejected);
            return WebhookAck::rejected("Invalid signature");
        };
        let signature_ok = signature
            .is_some_and(|sig| verify_webhook_signature(secret, raw_body, sig));
        if !signature_ok {
            tracing::warn!("webhook signature mismatch");
            self.audit.emit(AuditEvent::WebhookRejected);
            return WebhookAck::rejected("Invalid signature");
        }

        let envelope: Envelope = match serde_json::from_slice(raw_body) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "webhook payload did not parse");
                self.audit.emit(AuditEvent::SystemError {
                    component: "webhook".to_string(),
                    message: format!("malformed payload: {err}"),
                });
                return WebhookAck::rejected("Malformed payload");
            }
        };

        let event = envelope.event.clone();
        let ack = self.dispatch(envelope).await;
        self.audit.emit(AuditEvent::WebhookReceived {
            event,
            handled: ack.handled,
        });
        ack
    }

    async fn dispatch(&self, envelope: Envelope) -> WebhookAck {
        let event = envelope.event.clone();
        tracing::info!(event = %event, "webhook dispatch");
        match event.as_str() {
            "charge.success" => self.on_charge_success(envelope.data).await,
            "charge.failed" => self.on_charge_failed(envelope.data).await,
            "transfer.success" | "transfer.failed" | "refund.processed" => {
                // Audit-only in v1: no core state change.
                WebhookAck::ok(true)
            }
            _ => {
                tracing::debug!(event = %event, "unhandled webhook event");
                WebhookAck::ok(false)
            }
        }
    }

    async fn on_charge_success(&self, data: ChargeData) -> WebhookAck {
        let reference = data.reference.clone();
        let transaction = match self.store.transaction_by_reference(&reference).await {
            Ok(Some(transaction)) => transaction,
            Ok(None) => {
                tracing::warn!(reference = %reference, "charge.success for unknown reference");
                return WebhookAck {
                    success: false,
                    handled: true,
                    message: Some("Unknown reference".to_string()),
                };
            }
            Err(err) => return self.system_error("charge.success", &err.to_string()),
        };
        let payment = data.into_verified_payment();
        match self.engine.complete(transaction.id, &payment).await {
            Ok(outcome) => {
                tracing::info!(
                    transaction_id = %outcome.transaction.id,
                    already_completed = outcome.already_completed,
                    "charge.success applied"
                );
                WebhookAck::ok(true)
            }
            // A completion that lost the oversell race is a handled outcome,
            // not a processor fault.
            Err(EngineError::OversoldAtCompletion) => WebhookAck::ok(true),
            Err(err) => self.system_error("charge.success", &err.to_string()),
        }
    }

    async fn on_charge_failed(&self, data: ChargeData) -> WebhookAck {
        let reference = data.reference.clone();
        let transaction = match self.store.transaction_by_reference(&reference).await {
            Ok(Some(transaction)) => transaction,
            Ok(None) => {
                tracing::warn!(reference = %reference, "charge.failed for unknown reference");
                return WebhookAck {
                    success: false,
                    handled: true,
                    message: Some("Unknown reference".to_string()),
                };
            }
            Err(err) => return self.system_error("charge.failed", &err.to_string()),
        };
        let failure = Failure {
            reason: data
                .gateway_response
                .unwrap_or_else(|| "charge failed at gateway".to_string()),
            code: None,
            details: None,
        };
        match self.engine.fail(transaction.id, failure).await {
            Ok(_) => WebhookAck::ok(true),
            // Stale failure notice after the charge completed; drop it.
            Err(EngineError::InvalidTransition { .. }) => {
                tracing::info!(reference = %reference, "stale charge.failed ignored");
                WebhookAck::ok(true)
            }
            Err(err) => self.system_error("charge.failed", &err.to_string()),
        }
    }

    fn system_error(&self, component: &str, message: &str) -> WebhookAck {
        tracing::error!(component = %component, error = %message, "webhook handler fault");
        self.audit.emit(AuditEvent::SystemError {
            component: format!("webhook.{component}"),
            message: message.to_string(),
        });
        WebhookAck {
            success: false,
            handled: true,
            message: Some("Internal fault".to_string()),
        }
    }
}
