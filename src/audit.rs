//! Fire-and-forget audit events.
//!
//! The engine emits a typed event at every interesting transition. Emission
//! must never fail a caller: the production emitter writes structured
//! `tracing` records on the `audit` target and swallows nothing because it
//! has nothing to swallow; storage and search live outside the core.

use crate::types::{EventId, Money, OrderId, TicketId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Structured audit event.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A purchase was initiated.
    TransactionInitiated {
        /// Ledger row.
        transaction_id: TransactionId,
        /// Linked order.
        order_id: OrderId,
        /// Buyer.
        user_id: UserId,
        /// Charge in minor units.
        amount: Money,
    },
    /// A transaction reached `completed` and tickets were minted.
    TransactionCompleted {
        /// Ledger row.
        transaction_id: TransactionId,
        /// Tickets minted.
        ticket_count: u32,
    },
    /// A transaction entered `failed`.
    TransactionFailed {
        /// Ledger row.
        transaction_id: TransactionId,
        /// Failure reason.
        reason: String,
    },
    /// A failed transaction was reopened for another attempt.
    TransactionRetried {
        /// Ledger row.
        transaction_id: TransactionId,
        /// Attempt number after the increment.
        retry_count: u32,
    },
    /// A refund was applied.
    RefundProcessed {
        /// Ledger row.
        transaction_id: TransactionId,
        /// Refunded amount in minor units.
        amount: Money,
        /// Cumulative refunded amount.
        total_refunded: Money,
    },
    /// Completion found the tier oversold; a refund intent was recorded.
    OversellRecovered {
        /// Ledger row.
        transaction_id: TransactionId,
        /// Event whose tier was oversold.
        event_id: EventId,
    },
    /// A webhook was received and dispatched.
    WebhookReceived {
        /// Gateway event name.
        event: String,
        /// Whether a handler consumed it.
        handled: bool,
    },
    /// A webhook failed signature verification.
    WebhookRejected,
    /// A ticket was checked in at the gate.
    TicketCheckedIn {
        /// Admitted ticket.
        ticket_id: TicketId,
        /// Event admitted to.
        event_id: EventId,
        /// Winning scanner.
        checked_in_by: UserId,
        /// Check-in time.
        checked_in_at: DateTime<Utc>,
    },
    /// Internal fault that must reach operators but not callers.
    SystemError {
        /// Component that faulted.
        component: String,
        /// Fault description.
        message: String,
    },
}

/// Sink for audit events. Implementations must be infallible from the
/// caller's point of view.
pub trait AuditEmitter: Send + Sync {
    /// Emit one event. Never returns an error; never panics.
    fn emit(&self, event: AuditEvent);
}

/// Production emitter: structured tracing records on the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditEmitter;

impl AuditEmitter for TracingAuditEmitter {
    fn emit(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "audit", event = %json, "audit"),
            // Serialization of our own enum failing is a bug, but audit
            // must not surface it.
            Err(err) => tracing::warn!(target: "audit", error = %err, "audit serialization failed"),
        }
    }
}

/// Test emitter that records every event.
#[derive(Debug, Default)]
pub struct CollectingAuditEmitter {
    events: Mutex<Vec<AuditEvent>>,
}

impl CollectingAuditEmitter {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    #[allow(clippy::unwrap_used)]
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditEmitter for CollectingAuditEmitter {
    fn emit(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
