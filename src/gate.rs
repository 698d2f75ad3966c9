//! Gate validation: offline token verification plus atomic single-use
//! check-in.
//!
//! Every outcome is an O(1) lookup on the indexed token string. Single-use
//! is enforced by a compare-and-set on the ticket row, never a lock: N
//! concurrent scanners on one ticket produce exactly one `Valid`.

use crate::audit::{AuditEmitter, AuditEvent};
use crate::clock::Clock;
use crate::error::Result;
use crate::store::Store;
use crate::token::TicketTokenCodec;
use crate::types::{EventId, Role, ScannerContext, Ticket, TicketStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Holder summary returned with a successful scan.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AdmittedTicket {
    /// Ticket id.
    pub ticket_id: crate::types::TicketId,
    /// Event admitted to.
    pub event_id: EventId,
    /// Holder.
    pub user_id: crate::types::UserId,
    /// Tier name.
    pub tier_name: String,
    /// Check-in time.
    pub checked_in_at: DateTime<Utc>,
}

/// Every possible scan verdict.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "status")]
pub enum ScanOutcome {
    /// Admission granted; this scanner won the check-in.
    #[serde(rename = "VALID")]
    Valid {
        /// Holder summary.
        ticket: AdmittedTicket,
    },
    /// Token failed signature or shape checks.
    #[serde(rename = "INVALID")]
    Invalid,
    /// No ticket carries this token.
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// Ticket belongs to a different event than claimed.
    #[serde(rename = "WRONG_EVENT")]
    WrongEvent,
    /// Scanner is a validator without this event in their assignments.
    #[serde(rename = "NOT_ASSIGNED")]
    NotAssigned,
    /// Ticket was already used.
    #[serde(rename = "ALREADY_USED")]
    AlreadyUsed {
        /// When the earlier check-in happened.
        checked_in_at: Option<DateTime<Utc>>,
    },
    /// Ticket was cancelled (refund) or transferred away.
    #[serde(rename = "CANCELLED")]
    Cancelled,
    /// Another device won the check-in between our read and our write.
    #[serde(rename = "RACE_CONDITION")]
    RaceCondition,
}

impl ScanOutcome {
    /// The wire status code for this verdict.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Valid { .. } => "VALID",
            Self::Invalid => "INVALID",
            Self::NotFound => "NOT_FOUND",
            Self::WrongEvent => "WRONG_EVENT",
            Self::NotAssigned => "NOT_ASSIGNED",
            Self::AlreadyUsed { .. } => "ALREADY_USED",
            Self::Cancelled => "CANCELLED",
            Self::RaceCondition => "RACE_CONDITION",
        }
    }
}

/// Verifies ticket tokens and enforces single check-in.
pub struct GateValidator {
    store: Arc<dyn Store>,
    codec: TicketTokenCodec,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditEmitter>,
}

impl GateValidator {
    /// Wire up a validator from its ports.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        codec: TicketTokenCodec,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditEmitter>,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            audit,
        }
    }

    /// Scan a token. Short-circuits on the first failed check.
    ///
    /// # Errors
    ///
    /// Only storage faults; every domain verdict is a [`ScanOutcome`].
    pub async fn scan(
        &self,
        qr_code: &str,
        scanner: &ScannerContext,
        claimed_event: Option<EventId>,
    ) -> Result<ScanOutcome> {
        if self.codec.verify(qr_code).is_err() {
            return Ok(ScanOutcome::Invalid);
        }

        let Some(ticket) = self.store.ticket_by_qr(qr_code).await? else {
            return Ok(ScanOutcome::NotFound);
        };

        if let Some(claimed) = claimed_event {
            if claimed != ticket.event_id {
                return Ok(ScanOutcome::WrongEvent);
            }
        }

        if scanner.actor.role == Role::Validator
            && !scanner.assigned_events.contains(&ticket.event_id)
        {
            return Ok(ScanOutcome::NotAssigned);
        }

        match ticket.status {
            TicketStatus::Used => {
                return Ok(ScanOutcome::AlreadyUsed {
                    checked_in_at: ticket.checked_in_at,
                })
            }
            TicketStatus::Cancelled | TicketStatus::Transferred => {
                return Ok(ScanOutcome::Cancelled)
            }
            TicketStatus::Valid => {}
        }

        let now = self.clock.now();
        let won = self
            .store
            .checkin_ticket(ticket.id, now, scanner.actor.user_id)
            .await?;
        if !won {
            return Ok(ScanOutcome::RaceCondition);
        }

        self.audit.emit(AuditEvent::TicketCheckedIn {
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            checked_in_by: scanner.actor.user_id,
            checked_in_at: now,
        });
        tracing::info!(
            ticket_id = %ticket.id,
            event_id = %ticket.event_id,
            scanner = %scanner.actor.user_id,
            "ticket checked in"
        );
        Ok(ScanOutcome::Valid {
            ticket: admitted(&ticket, now),
        })
    }
}

fn admitted(ticket: &Ticket, checked_in_at: DateTime<Utc>) -> AdmittedTicket {
    AdmittedTicket {
        ticket_id: ticket.id,
        event_id: ticket.event_id,
        user_id: ticket.user_id,
        tier_name: ticket.tier_name.clone(),
        checked_in_at,
    }
}
