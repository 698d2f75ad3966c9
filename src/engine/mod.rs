//! The transaction engine: idempotent initiation, atomic completion,
//! failure, refund accounting, and retry.
//!
//! Every operation runs its mutations inside one store transaction. The
//! completion boundary is idempotent: a transaction already in `completed`
//! returns its existing result unchanged, which is what absorbs the
//! verifier/webhook race. Gateway calls never happen while uncommitted
//! state could leak: initiation commits the order/transaction pair first
//! and only then talks to the gateway.

pub mod state_machine;

use crate::audit::{AuditEmitter, AuditEvent};
use crate::clock::{Clock, IdSource};
use crate::error::{EngineError, Result};
use crate::gateway::{
    GatewayRefundRequest, InitializeRequest, PaymentGateway, VerifiedPayment, VerifyStatus,
};
use crate::retry::RetryPolicy;
use crate::splits::SplitsCalculator;
use crate::store::{Store, StoreTx, UniqueIndex};
use crate::token::TicketTokenCodec;
use crate::types::{
    Actor, ClientMeta, EventId, Failure, GatewayDetails, Money, Order, OrderId, Organizer,
    PaymentStatus, Refund, RefundOutboxEntry, Splits, Ticket, TicketId, TierId, Transaction,
    TransactionId, TransactionMetadata, TransactionStatus, UserId,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use self::state_machine::ensure_transition;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Ticket-token re-sign attempts before aborting completion.
const QR_SIGN_ATTEMPTS: i64 = 3;

/// Engine-level tunables.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Currency code stamped on transactions.
    pub currency: String,
    /// Gateway provider name stamped on transactions.
    pub provider: String,
    /// Deadline for gateway calls.
    pub gateway_timeout: Duration,
    /// Backoff policy for failed transactions.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "NGN".to_string(),
            provider: "paystack".to_string(),
            gateway_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

/// Request to initiate a purchase.
#[derive(Clone, Debug)]
pub struct InitiateRequest {
    /// Buyer.
    pub actor: Actor,
    /// Event to purchase.
    pub event_id: EventId,
    /// Tier to purchase.
    pub tier_id: TierId,
    /// Tickets requested; 1..=10.
    pub quantity: u32,
    /// Client-supplied idempotency key, if any.
    pub idempotency_key: Option<String>,
    /// Request metadata.
    pub client: ClientMeta,
}

/// Result of an initiation.
#[derive(Clone, Debug, Serialize)]
pub struct InitiateOutcome {
    /// The created (or replayed) order.
    pub order: Order,
    /// The created (or replayed) transaction.
    pub transaction: Transaction,
    /// Hosted checkout URL; empty when initialization failed earlier.
    pub payment_url: String,
    /// The effective idempotency key.
    pub idempotency_key: String,
    /// True when an existing transaction was replayed.
    pub is_idempotent: bool,
}

/// Result of a completion.
#[derive(Clone, Debug, Serialize)]
pub struct CompleteOutcome {
    /// The completed transaction.
    pub transaction: Transaction,
    /// The completed order.
    pub order: Order,
    /// The order's tickets.
    pub tickets: Vec<Ticket>,
    /// True when the transaction had already completed and the existing
    /// result was returned unchanged.
    pub already_completed: bool,
}

/// Result of a retry.
#[derive(Clone, Debug, Serialize)]
pub struct RetryOutcome {
    /// The reopened transaction.
    pub transaction: Transaction,
    /// Fresh hosted checkout URL.
    pub payment_url: String,
}

/// The payment-order-ticket transaction engine.
pub struct TransactionEngine {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
    codec: TicketTokenCodec,
    audit: Arc<dyn AuditEmitter>,
    splits: SplitsCalculator,
    config: EngineConfig,
}

impl TransactionEngine {
    /// Wire up an engine from its ports.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
        codec: TicketTokenCodec,
        audit: Arc<dyn AuditEmitter>,
        splits: SplitsCalculator,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            ids,
            codec,
            audit,
            splits,
            config,
        }
    }

    /// The engine's current time; the retry scheduler shares it.
    #[must_use]
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Storage invariant surprise. The HTTP layer redacts these, so the
    /// `system.error` audit record is the only account of what failed.
    fn integrity(&self, component: &str, message: String) -> EngineError {
        self.audit.emit(AuditEvent::SystemError {
            component: component.to_string(),
            message: message.clone(),
        });
        tracing::error!(component = %component, error = %message, "integrity violation");
        EngineError::Integrity(message)
    }

    /// The engine's own machinery broke an invariant it enforces.
    fn fatal(&self, component: &str, message: String) -> EngineError {
        self.audit.emit(AuditEvent::SystemError {
            component: component.to_string(),
            message: message.clone(),
        });
        tracing::error!(component = %component, error = %message, "fatal engine fault");
        EngineError::Fatal(message)
    }

    // ════════════════════════════════════════════════════════════════
    // Initiate
    // ════════════════════════════════════════════════════════════════

    /// Initiate a purchase: validate, create the order/transaction pair,
    /// then open a hosted checkout at the gateway.
    ///
    /// Identical idempotency keys replay the original transaction without a
    /// second gateway call.
    ///
    /// # Errors
    ///
    /// Validation errors for bad quantity, unpublished events, sold-out
    /// tiers and per-user limits; gateway errors when checkout
    /// initialization fails (the transaction is left `failed` and scheduled
    /// for retry).
    pub async fn initiate(&self, request: InitiateRequest) -> Result<InitiateOutcome> {
        if !(1..=10).contains(&request.quantity) {
            return Err(EngineError::InvalidQuantity {
                quantity: request.quantity,
            });
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let event = tx
            .event(request.event_id)
            .await?
            .ok_or(EngineError::EventNotFound(request.event_id))?;
        if !event.is_purchasable() {
            return Err(EngineError::EventNotPurchasable(event.id));
        }
        let tier = event
            .tier(request.tier_id)
            .ok_or(EngineError::TierNotFound(request.tier_id))?;
        if !tier.on_sale(now) {
            return Err(EngineError::EventNotPurchasable(event.id));
        }
        if tier.remaining() < request.quantity {
            return Err(EngineError::TierSoldOut {
                remaining: tier.remaining(),
                requested: request.quantity,
            });
        }
        let held = tx
            .count_user_tier_tickets(event.id, tier.id, request.actor.user_id)
            .await?;
        if held + request.quantity > tier.max_per_user {
            return Err(EngineError::TierLimitExceeded {
                max_per_user: tier.max_per_user,
            });
        }

        // The idempotent path is authoritative: no gateway call, no new rows.
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = tx.find_transaction_by_idempotency_key(key).await? {
                let outcome = self.replay_existing(tx, existing, key.clone()).await?;
                return Ok(outcome);
            }
        }

        let idempotency_key = request.idempotency_key.clone().unwrap_or_else(|| {
            format!(
                "txn_{}_{}_{}_{}",
                request.actor.user_id,
                event.id,
                tier.id,
                self.clock.now_ns()
            )
        });
        let reference = format!("order_{}_{}", self.clock.now_ns(), request.actor.user_id);

        let unit_price = tier.price;
        let total_amount = unit_price
            .checked_mul(request.quantity)
            .ok_or_else(|| self.integrity("engine.initiate", "order total overflow".to_string()))?;

        let order = Order {
            id: OrderId::from_uuid(self.ids.mint()),
            user_id: request.actor.user_id,
            event_id: event.id,
            tier_id: tier.id,
            tier_name: tier.name.clone(),
            quantity: request.quantity,
            unit_price,
            total_amount,
            payment_status: PaymentStatus::Pending,
            tickets: Vec::new(),
            splits: None,
            gateway_reference: Some(reference.clone()),
            created_at: now,
            updated_at: now,
        };
        let transaction = Transaction {
            id: TransactionId::from_uuid(self.ids.mint()),
            idempotency_key: idempotency_key.clone(),
            status: TransactionStatus::Initiated,
            user_id: request.actor.user_id,
            order_id: order.id,
            event_id: event.id,
            amount: total_amount,
            currency: self.config.currency.clone(),
            gateway: GatewayDetails {
                provider: self.config.provider.clone(),
                reference: reference.clone(),
                ..GatewayDetails::default()
            },
            splits: None,
            retry_count: 0,
            max_retries: self.config.retry.max_attempts,
            last_retry_at: None,
            next_retry_at: None,
            failure: None,
            refunds: Vec::new(),
            total_refunded: Money::ZERO,
            initiated_at: now,
            processing_at: None,
            completed_at: None,
            failed_at: None,
            metadata: TransactionMetadata {
                ip: request.client.ip.clone(),
                user_agent: request.client.user_agent.clone(),
                tier_name: tier.name.clone(),
                quantity: request.quantity,
                buyer_email: Some(request.actor.email.clone()),
            },
        };

        let organizer = tx.organizer(event.organizer_id).await?;
        let subaccount_code = organizer.and_then(|o| o.subaccount_code);

        tx.insert_order(&order).await?;
        match tx.insert_transaction(&transaction).await {
            Ok(()) => {}
            Err(err) if err.is_unique_violation(UniqueIndex::IdempotencyKey) => {
                // A concurrent initiate with the same key won; replay it.
                tx.rollback().await?;
                return self.replay_winner(&idempotency_key).await;
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit().await?;

        self.audit.emit(AuditEvent::TransactionInitiated {
            transaction_id: transaction.id,
            order_id: order.id,
            user_id: transaction.user_id,
            amount: transaction.amount,
        });
        tracing::info!(
            transaction_id = %transaction.id,
            order_id = %order.id,
            amount = transaction.amount.minor(),
            "purchase initiated"
        );

        // Gateway call strictly after commit.
        let init = InitializeRequest {
            email: request.actor.email.clone(),
            amount: total_amount,
            reference: reference.clone(),
            subaccount_code,
            metadata: serde_json::json!({
                "order_id": order.id,
                "event_id": event.id,
                "tier": tier.name,
                "quantity": request.quantity,
            }),
        };
        match timeout(self.config.gateway_timeout, self.gateway.initialize(init)).await {
            Ok(Ok(response)) => {
                let transaction = self
                    .record_checkout(
                        transaction.id,
                        &response.authorization_url,
                        &response.access_code,
                    )
                    .await?;
                Ok(InitiateOutcome {
                    payment_url: response.authorization_url,
                    order,
                    transaction,
                    idempotency_key,
                    is_idempotent: false,
                })
            }
            Ok(Err(err)) => {
                self.fail_for_retry(transaction.id, Failure::reason("init failed"), 0)
                    .await?;
                Err(EngineError::GatewayInit(err.to_string()))
            }
            Err(_elapsed) => {
                self.fail_for_retry(transaction.id, Failure::reason("timeout"), 0)
                    .await?;
                Err(EngineError::GatewayTimeout)
            }
        }
    }

    /// Replay an existing transaction found under the caller's idempotency
    /// key, inside the already-open store transaction.
    async fn replay_existing(
        &self,
        mut tx: Box<dyn StoreTx>,
        existing: Transaction,
        idempotency_key: String,
    ) -> Result<InitiateOutcome> {
        let order = tx
            .order_for_update(existing.order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(existing.order_id))?;
        tx.rollback().await?;
        let payment_url = existing
            .gateway
            .authorization_url
            .clone()
            .unwrap_or_default();
        Ok(InitiateOutcome {
            order,
            transaction: existing,
            payment_url,
            idempotency_key,
            is_idempotent: true,
        })
    }

    /// After losing an idempotency-key insert race, reload and replay the
    /// winning row.
    async fn replay_winner(&self, idempotency_key: &str) -> Result<InitiateOutcome> {
        let mut tx = self.store.begin().await?;
        let winner = tx
            .find_transaction_by_idempotency_key(idempotency_key)
            .await?
            .ok_or_else(|| {
                self.integrity(
                    "engine.initiate",
                    format!("idempotency key {idempotency_key} conflicted but has no row"),
                )
            })?;
        self.replay_existing(tx, winner, idempotency_key.to_string())
            .await
    }

    /// Persist the hosted-checkout echo on the transaction.
    async fn record_checkout(
        &self,
        id: TransactionId,
        authorization_url: &str,
        access_code: &str,
    ) -> Result<Transaction> {
        let mut tx = self.store.begin().await?;
        let mut transaction = tx
            .transaction_for_update(id)
            .await?
            .ok_or(EngineError::TransactionNotFound(id))?;
        transaction.gateway.authorization_url = Some(authorization_url.to_string());
        transaction.gateway.access_code = Some(access_code.to_string());
        tx.update_transaction(&transaction).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    // ════════════════════════════════════════════════════════════════
    // Complete
    // ════════════════════════════════════════════════════════════════

    /// Complete a transaction whose payment is already verified successful.
    ///
    /// Idempotent at the completion boundary: verifier and webhook may both
    /// call this; the later caller observes `completed` and gets the
    /// existing result back.
    ///
    /// # Errors
    ///
    /// `EngineError::OversoldAtCompletion` when the tier can no longer cover
    /// the order (the transaction is failed and a refund intent recorded);
    /// `EngineError::InvalidTransition` when called on a failed or refunded
    /// transaction.
    pub async fn complete(
        &self,
        id: TransactionId,
        payment: &VerifiedPayment,
    ) -> Result<CompleteOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut transaction = tx
            .transaction_for_update(id)
            .await?
            .ok_or(EngineError::TransactionNotFound(id))?;

        if transaction.status == TransactionStatus::Completed {
            let order = tx
                .order_for_update(transaction.order_id)
                .await?
                .ok_or_else(|| {
                    self.integrity(
                        "engine.complete",
                        format!("completed transaction {id} has no order"),
                    )
                })?;
            let tickets = tx.tickets_for_order(order.id).await?;
            tx.rollback().await?;
            return Ok(CompleteOutcome {
                transaction,
                order,
                tickets,
                already_completed: true,
            });
        }

        // An initiated transaction passes through processing on its way to
        // completed; both timestamps land in this same store transaction.
        if transaction.status == TransactionStatus::Initiated {
            ensure_transition(transaction.status, TransactionStatus::Processing)?;
            transaction.status = TransactionStatus::Processing;
            transaction.processing_at = Some(now);
        }
        ensure_transition(transaction.status, TransactionStatus::Completed)?;

        let mut order = tx
            .order_for_update(transaction.order_id)
            .await?
            .ok_or_else(|| {
                self.integrity("engine.complete", format!("transaction {id} has no order"))
            })?;
        let event = tx
            .event_for_update(transaction.event_id)
            .await?
            .ok_or_else(|| {
                self.integrity(
                    "engine.complete",
                    format!("transaction {id} references a missing event"),
                )
            })?;
        let tier = event.tier(order.tier_id).ok_or_else(|| {
            self.integrity(
                "engine.complete",
                format!("order {} references a missing tier", order.id),
            )
        })?;

        if tier.sold_count + order.quantity > tier.quantity {
            return self
                .recover_oversell(tx, transaction, order, event.id, now)
                .await;
        }

        let applied = tx
            .apply_tier_sale(
                event.id,
                tier.id,
                tier.sold_count,
                order.quantity,
                order.total_amount,
            )
            .await?;
        if !applied {
            // The event row lock makes a miss impossible unless the
            // machinery itself is broken.
            tx.rollback().await?;
            return Err(self.fatal(
                "engine.complete",
                format!("tier sale compare-and-set missed under the event lock for {id}"),
            ));
        }

        let fees = payment.fees.unwrap_or(Money::ZERO);
        let organizer = tx.organizer(event.organizer_id).await?;
        let splits = self.settle_splits(&transaction, payment, organizer, fees);
        transaction.splits = Some(splits.clone());
        order.splits = Some(splits);

        transaction.gateway.transaction_id = payment.gateway_transaction_id.clone();
        transaction.gateway.channel = payment.channel.clone();
        transaction.gateway.authorization = payment.authorization.clone();
        transaction.gateway.fees = payment.fees;
        transaction.status = TransactionStatus::Completed;
        transaction.completed_at = Some(now);
        transaction.next_retry_at = None;
        transaction.failure = None;

        let tickets = self
            .mint_tickets(&mut tx, &order, &transaction, now)
            .await?;
        order.tickets = tickets.iter().map(|t| t.id).collect();
        order.payment_status = PaymentStatus::Completed;
        order.updated_at = now;

        tx.update_transaction(&transaction).await?;
        tx.update_order(&order).await?;
        tx.commit().await?;

        self.audit.emit(AuditEvent::TransactionCompleted {
            transaction_id: transaction.id,
            ticket_count: order.quantity,
        });
        tracing::info!(
            transaction_id = %transaction.id,
            tickets = order.quantity,
            "transaction completed"
        );

        Ok(CompleteOutcome {
            transaction,
            order,
            tickets,
            already_completed: false,
        })
    }

    /// Oversell discovered at completion: never persist it. The transaction
    /// fails, the order fails, and a refund intent goes on the outbox.
    async fn recover_oversell(
        &self,
        mut tx: Box<dyn StoreTx>,
        mut transaction: Transaction,
        mut order: Order,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<CompleteOutcome> {
        ensure_transition(transaction.status, TransactionStatus::Failed)?;
        transaction.status = TransactionStatus::Failed;
        transaction.failed_at = Some(now);
        transaction.failure = Some(Failure::reason("oversold at completion"));
        order.payment_status = PaymentStatus::Failed;
        order.updated_at = now;
        tx.update_transaction(&transaction).await?;
        tx.update_order(&order).await?;
        tx.append_refund_outbox(&RefundOutboxEntry {
            transaction_id: transaction.id,
            amount: transaction.amount,
            reason: "oversold at completion".to_string(),
            created_at: now,
        })
        .await?;
        tx.commit().await?;

        self.audit.emit(AuditEvent::OversellRecovered {
            transaction_id: transaction.id,
            event_id,
        });
        self.audit.emit(AuditEvent::TransactionFailed {
            transaction_id: transaction.id,
            reason: "oversold at completion".to_string(),
        });
        tracing::warn!(
            transaction_id = %transaction.id,
            event_id = %event_id,
            "oversell recovered at completion"
        );
        Err(EngineError::OversoldAtCompletion)
    }

    /// Splits at settlement: adopt the gateway's withheld platform share
    /// when present, else compute from the organizer's percentage.
    fn settle_splits(
        &self,
        transaction: &Transaction,
        payment: &VerifiedPayment,
        organizer: Option<Organizer>,
        fees: Money,
    ) -> Splits {
        if let Some(share) = &payment.subaccount {
            return SplitsCalculator::from_shared_amount(
                transaction.amount,
                share.shared_amount,
                fees,
                Some(share.code.clone()),
            );
        }
        let (organizer_percent, subaccount_code) = organizer
            .map(|o| (Some(100u32.saturating_sub(o.platform_fee_percent)), o.subaccount_code))
            .unwrap_or((None, None));
        self.splits
            .compute(transaction.amount, organizer_percent, fees, subaccount_code)
    }

    /// Mint the order's tickets, re-signing on token collisions.
    async fn mint_tickets(
        &self,
        tx: &mut Box<dyn StoreTx>,
        order: &Order,
        transaction: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let mut tickets = Vec::with_capacity(order.quantity as usize);
        for _ in 0..order.quantity {
            let ticket_id = TicketId::from_uuid(self.ids.mint());
            let mut attempt: i64 = 0;
            loop {
                let iat_ms = now.timestamp_millis() + attempt;
                let qr_code = self.codec.sign(
                    &ticket_id.to_string(),
                    &transaction.event_id.to_string(),
                    iat_ms,
                );
                let ticket = Ticket {
                    id: ticket_id,
                    order_id: order.id,
                    event_id: transaction.event_id,
                    user_id: order.user_id,
                    tier_id: order.tier_id,
                    tier_name: order.tier_name.clone(),
                    price: order.unit_price,
                    qr_code,
                    status: crate::types::TicketStatus::Valid,
                    checked_in_at: None,
                    checked_in_by: None,
                    created_at: now,
                };
                match tx.insert_ticket(&ticket).await {
                    Ok(()) => {
                        tickets.push(ticket);
                        break;
                    }
                    Err(err) if err.is_unique_violation(UniqueIndex::QrCode) => {
                        attempt += 1;
                        if attempt >= QR_SIGN_ATTEMPTS {
                            return Err(self.integrity(
                                "engine.mint_tickets",
                                format!(
                                    "duplicate ticket token after {QR_SIGN_ATTEMPTS} re-sign attempts for order {}",
                                    order.id
                                ),
                            ));
                        }
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(tickets)
    }

    // ════════════════════════════════════════════════════════════════
    // Verify (gateway verification path)
    // ════════════════════════════════════════════════════════════════

    /// Verify a gateway reference and complete or fail the transaction on
    /// the verdict.
    ///
    /// # Errors
    ///
    /// `EngineError::ReferenceNotFound` for unknown references;
    /// `EngineError::VerificationFailed` when the gateway reports the charge
    /// failed (the transaction is failed and scheduled for retry).
    pub async fn verify(&self, reference: &str) -> Result<CompleteOutcome> {
        let transaction = self
            .store
            .transaction_by_reference(reference)
            .await?
            .ok_or_else(|| EngineError::ReferenceNotFound(reference.to_string()))?;

        let payment =
            match timeout(self.config.gateway_timeout, self.gateway.verify(reference)).await {
                Ok(Ok(payment)) => payment,
                Ok(Err(err)) => return Err(EngineError::GatewayVerify(err.to_string())),
                Err(_elapsed) => {
                    self.fail_for_retry(
                        transaction.id,
                        Failure::reason("timeout"),
                        transaction.retry_count,
                    )
                    .await?;
                    return Err(EngineError::GatewayTimeout);
                }
            };

        match payment.status {
            VerifyStatus::Success => self.complete(transaction.id, &payment).await,
            VerifyStatus::Failed => {
                self.fail_for_retry(
                    transaction.id,
                    Failure::reason("charge failed at gateway"),
                    transaction.retry_count,
                )
                .await?;
                Err(EngineError::VerificationFailed(reference.to_string()))
            }
        }
    }

    // ════════════════════════════════════════════════════════════════
    // Fail
    // ════════════════════════════════════════════════════════════════

    /// Transition a transaction to `failed` and its order to
    /// `payment_status = failed`. Idempotent: failing an already-failed
    /// transaction is a no-op returning the current row.
    ///
    /// # Errors
    ///
    /// `EngineError::InvalidTransition` when the transaction has already
    /// completed or refunded.
    pub async fn fail(&self, id: TransactionId, failure: Failure) -> Result<Transaction> {
        self.fail_inner(id, failure, None).await
    }

    /// Fail and stamp a `next_retry_at` so the scheduler reopens the row.
    async fn fail_for_retry(
        &self,
        id: TransactionId,
        failure: Failure,
        retry_count: u32,
    ) -> Result<Transaction> {
        let next_retry_at = self.clock.now()
            + chrono_backoff(&self.config.retry, retry_count);
        self.fail_inner(id, failure, Some(next_retry_at)).await
    }

    async fn fail_inner(
        &self,
        id: TransactionId,
        failure: Failure,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<Transaction> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut transaction = tx
            .transaction_for_update(id)
            .await?
            .ok_or(EngineError::TransactionNotFound(id))?;

        if transaction.status == TransactionStatus::Failed {
            tx.rollback().await?;
            return Ok(transaction);
        }
        ensure_transition(transaction.status, TransactionStatus::Failed)?;

        let reason = failure.reason.clone();
        transaction.status = TransactionStatus::Failed;
        transaction.failed_at = Some(now);
        transaction.failure = Some(failure);
        transaction.next_retry_at = next_retry_at;

        let mut order = tx
            .order_for_update(transaction.order_id)
            .await?
            .ok_or_else(|| {
                self.integrity("engine.fail", format!("transaction {id} has no order"))
            })?;
        order.payment_status = PaymentStatus::Failed;
        order.updated_at = now;

        tx.update_transaction(&transaction).await?;
        tx.update_order(&order).await?;
        tx.commit().await?;

        self.audit.emit(AuditEvent::TransactionFailed {
            transaction_id: transaction.id,
            reason: reason.clone(),
        });
        tracing::info!(transaction_id = %transaction.id, reason = %reason, "transaction failed");
        Ok(transaction)
    }

    // ════════════════════════════════════════════════════════════════
    // Refund
    // ════════════════════════════════════════════════════════════════

    /// Refund a completed (or partially refunded) transaction. Omitting the
    /// amount refunds the remaining net. Tickets are cancelled only when the
    /// refund exhausts the full amount; tier counters never decrement.
    ///
    /// # Errors
    ///
    /// `EngineError::NotRefundable` outside `completed`/`partially_refunded`
    /// or with nothing left to refund; `EngineError::InvalidRefundAmount`
    /// when the requested amount exceeds the net;
    /// `EngineError::GatewayRefund` when the gateway refuses (nothing is
    /// recorded).
    pub async fn refund(
        &self,
        id: TransactionId,
        amount: Option<Money>,
        reason: String,
        processed_by: UserId,
    ) -> Result<Transaction> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut transaction = tx
            .transaction_for_update(id)
            .await?
            .ok_or(EngineError::TransactionNotFound(id))?;

        if !matches!(
            transaction.status,
            TransactionStatus::Completed | TransactionStatus::PartiallyRefunded
        ) {
            return Err(EngineError::NotRefundable(transaction.status));
        }
        let net = transaction.refundable();
        if net.is_zero() {
            return Err(EngineError::NotRefundable(transaction.status));
        }
        let refund_amount = amount.unwrap_or(net);
        if refund_amount.is_zero() || refund_amount > net {
            return Err(EngineError::InvalidRefundAmount { net: net.minor() });
        }

        // The money has to move before the ledger records it; a gateway
        // refusal rolls everything back.
        let gateway_refund = match timeout(
            self.config.gateway_timeout,
            self.gateway.refund(GatewayRefundRequest {
                transaction_reference: transaction.gateway.reference.clone(),
                amount: refund_amount,
            }),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tx.rollback().await?;
                return Err(EngineError::GatewayRefund(err.to_string()));
            }
            Err(_elapsed) => {
                tx.rollback().await?;
                return Err(EngineError::GatewayRefund("timeout".to_string()));
            }
        };

        transaction.refunds.push(Refund {
            amount: refund_amount,
            reason,
            processed_by,
            processed_at: now,
            gateway_refund_id: Some(gateway_refund.gateway_refund_id),
        });
        transaction.total_refunded = transaction
            .total_refunded
            .checked_add(refund_amount)
            .ok_or_else(|| self.integrity("engine.refund", "refund total overflow".to_string()))?;

        let new_status = if transaction.total_refunded == transaction.amount {
            TransactionStatus::Refunded
        } else {
            TransactionStatus::PartiallyRefunded
        };
        if new_status != transaction.status {
            ensure_transition(transaction.status, new_status)?;
            transaction.status = new_status;
        }

        if transaction.status == TransactionStatus::Refunded {
            let mut order = tx
                .order_for_update(transaction.order_id)
                .await?
                .ok_or_else(|| {
                    self.integrity("engine.refund", format!("transaction {id} has no order"))
                })?;
            order.payment_status = PaymentStatus::Refunded;
            order.updated_at = now;
            tx.update_order(&order).await?;
            tx.cancel_order_tickets(order.id).await?;
        }

        tx.update_transaction(&transaction).await?;
        tx.commit().await?;

        self.audit.emit(AuditEvent::RefundProcessed {
            transaction_id: transaction.id,
            amount: refund_amount,
            total_refunded: transaction.total_refunded,
        });
        tracing::info!(
            transaction_id = %transaction.id,
            amount = refund_amount.minor(),
            total_refunded = transaction.total_refunded.minor(),
            "refund processed"
        );
        Ok(transaction)
    }

    // ════════════════════════════════════════════════════════════════
    // Retry
    // ════════════════════════════════════════════════════════════════

    /// Reopen a failed transaction for another gateway attempt.
    ///
    /// # Errors
    ///
    /// `EngineError::NotRetryable` outside `failed`;
    /// `EngineError::RetryExhausted` when the retry budget is spent;
    /// gateway errors when re-initialization fails (the transaction returns
    /// to `failed` with a fresh `next_retry_at`).
    pub async fn retry(&self, id: TransactionId) -> Result<RetryOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut transaction = tx
            .transaction_for_update(id)
            .await?
            .ok_or(EngineError::TransactionNotFound(id))?;

        if transaction.status != TransactionStatus::Failed {
            return Err(EngineError::NotRetryable(transaction.status));
        }
        if transaction.retry_count >= transaction.max_retries {
            return Err(EngineError::RetryExhausted);
        }
        ensure_transition(transaction.status, TransactionStatus::Processing)?;

        transaction.status = TransactionStatus::Processing;
        transaction.processing_at = Some(now);
        transaction.retry_count += 1;
        transaction.last_retry_at = Some(now);
        transaction.next_retry_at = None;
        let reference = format!(
            "retry_{}_{}_{}",
            transaction.retry_count,
            self.clock.now_ns(),
            transaction.user_id
        );
        transaction.gateway.reference = reference.clone();
        transaction.gateway.authorization_url = None;
        transaction.gateway.access_code = None;

        let event = tx.event(transaction.event_id).await?;
        let subaccount_code = match &event {
            Some(event) => tx
                .organizer(event.organizer_id)
                .await?
                .and_then(|o| o.subaccount_code),
            None => None,
        };

        tx.update_transaction(&transaction).await?;
        tx.commit().await?;

        self.audit.emit(AuditEvent::TransactionRetried {
            transaction_id: transaction.id,
            retry_count: transaction.retry_count,
        });

        let init = InitializeRequest {
            email: transaction
                .metadata
                .buyer_email
                .clone()
                .unwrap_or_default(),
            amount: transaction.amount,
            reference,
            subaccount_code,
            metadata: serde_json::json!({
                "order_id": transaction.order_id,
                "retry_count": transaction.retry_count,
            }),
        };
        match timeout(self.config.gateway_timeout, self.gateway.initialize(init)).await {
            Ok(Ok(response)) => {
                let transaction = self
                    .record_checkout(
                        transaction.id,
                        &response.authorization_url,
                        &response.access_code,
                    )
                    .await?;
                Ok(RetryOutcome {
                    transaction,
                    payment_url: response.authorization_url,
                })
            }
            Ok(Err(err)) => {
                self.fail_for_retry(
                    transaction.id,
                    Failure::reason("retry init failed"),
                    transaction.retry_count,
                )
                .await?;
                Err(EngineError::GatewayInit(err.to_string()))
            }
            Err(_elapsed) => {
                self.fail_for_retry(
                    transaction.id,
                    Failure::reason("timeout"),
                    transaction.retry_count,
                )
                .await?;
                Err(EngineError::GatewayTimeout)
            }
        }
    }
}

/// Backoff as a chrono duration for `next_retry_at` stamps.
fn chrono_backoff(policy: &RetryPolicy, retry_count: u32) -> ChronoDuration {
    let delay = policy.backoff_delay(retry_count);
    ChronoDuration::milliseconds(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}
