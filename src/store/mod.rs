//! Transactional persistence port.
//!
//! The engine performs every multi-row mutation inside a [`StoreTx`]:
//! snapshot-isolated, with read-for-update on the rows it is about to
//! mutate. Single-statement optimistic operations (ticket check-in) and
//! plain reads live on [`Store`] directly.
//!
//! Two implementations ship: [`postgres::PgStore`] for production and
//! [`memory::InMemoryStore`] for tests and local development. Both enforce
//! the same unique indices and the same compare-and-set semantics.

pub mod memory;
pub mod postgres;

use crate::types::{
    Event, EventId, Money, Order, OrderId, Organizer, OrganizerId, RefundOutboxEntry, Ticket,
    TicketId, TierId, Transaction, TransactionId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The unique indices the store enforces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueIndex {
    /// `Transaction.idempotency_key`.
    IdempotencyKey,
    /// `Ticket.qr_code`.
    QrCode,
}

impl fmt::Display for UniqueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdempotencyKey => f.write_str("idempotency_key"),
            Self::QrCode => f.write_str("qr_code"),
        }
    }
}

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert hit a unique index. Callers that can recover (idempotent
    /// initiate, token re-sign) match on the index.
    #[error("unique constraint violated on {0}")]
    UniqueViolation(UniqueIndex),
    /// Backend fault (connection, serialization, corrupt row).
    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when this is a violation of the given unique index.
    #[must_use]
    pub fn is_unique_violation(&self, index: UniqueIndex) -> bool {
        matches!(self, Self::UniqueViolation(i) if *i == index)
    }
}

/// One open database transaction. Reads marked `for_update` take row locks
/// held until commit or rollback; dropping the box without either rolls
/// back.
#[async_trait]
pub trait StoreTx: Send {
    // ── Transactions ────────────────────────────────────────────────

    /// Look up a transaction by idempotency key.
    async fn find_transaction_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<Transaction>>;

    /// Load a transaction, locking the row.
    async fn transaction_for_update(
        &mut self,
        id: TransactionId,
    ) -> StoreResult<Option<Transaction>>;

    /// Insert a new transaction. Fails with
    /// `UniqueViolation(IdempotencyKey)` on a duplicate key.
    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    /// Persist a mutated transaction.
    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    // ── Orders ──────────────────────────────────────────────────────

    /// Load an order, locking the row.
    async fn order_for_update(&mut self, id: OrderId) -> StoreResult<Option<Order>>;

    /// Insert a new order.
    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Persist a mutated order.
    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;

    // ── Events & tiers ──────────────────────────────────────────────

    /// Read an event with its tiers without locking. Initiate uses this:
    /// holding the tier lock during checkout would throttle purchases.
    async fn event(&mut self, id: EventId) -> StoreResult<Option<Event>>;

    /// Load an event with its tiers, locking the event row.
    async fn event_for_update(&mut self, id: EventId) -> StoreResult<Option<Event>>;

    /// Record a sale against a tier: increments `sold_count` by `quantity`
    /// iff it still equals `expected_sold_count`, and on success bumps the
    /// event's `total_tickets_sold` and `total_revenue`.
    ///
    /// Returns `false` when the compare-and-set misses. The caller holds the
    /// event row lock, so a miss means the invariant machinery itself is
    /// being violated.
    async fn apply_tier_sale(
        &mut self,
        event_id: EventId,
        tier_id: TierId,
        expected_sold_count: u32,
        quantity: u32,
        revenue: Money,
    ) -> StoreResult<bool>;

    // ── Tickets ─────────────────────────────────────────────────────

    /// Insert a minted ticket. Fails with `UniqueViolation(QrCode)` when the
    /// token string already exists.
    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()>;

    /// Tickets belonging to an order.
    async fn tickets_for_order(&mut self, order_id: OrderId) -> StoreResult<Vec<Ticket>>;

    /// Count a user's non-cancelled tickets in `(event, tier)`.
    async fn count_user_tier_tickets(
        &mut self,
        event_id: EventId,
        tier_id: TierId,
        user_id: UserId,
    ) -> StoreResult<u32>;

    /// Cancel every ticket of an order; returns how many flipped.
    async fn cancel_order_tickets(&mut self, order_id: OrderId) -> StoreResult<u32>;

    // ── Organizer & refund outbox ───────────────────────────────────

    /// Read the organizer subset.
    async fn organizer(&mut self, id: OrganizerId) -> StoreResult<Option<Organizer>>;

    /// Append a refund intent for the payout process.
    async fn append_refund_outbox(&mut self, entry: &RefundOutboxEntry) -> StoreResult<()>;

    // ── Terminal ────────────────────────────────────────────────────

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// The persistence port.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a snapshot-isolated read-write transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    // ── Plain reads (no locks) ──────────────────────────────────────

    /// Read a transaction.
    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    /// Read a transaction by its gateway reference.
    async fn transaction_by_reference(&self, reference: &str)
        -> StoreResult<Option<Transaction>>;

    /// A user's most recent transactions, newest first.
    async fn transactions_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> StoreResult<Vec<Transaction>>;

    /// Read an order.
    async fn order(&self, id: OrderId) -> StoreResult<Option<Order>>;

    /// Read an event.
    async fn event(&self, id: EventId) -> StoreResult<Option<Event>>;

    /// Read a ticket by its QR token string.
    async fn ticket_by_qr(&self, qr_code: &str) -> StoreResult<Option<Ticket>>;

    /// Tickets belonging to an order.
    async fn tickets_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Ticket>>;

    /// Events a user may scan with the `validator` role.
    async fn validator_assignments(&self, user_id: UserId) -> StoreResult<Vec<EventId>>;

    /// Refund intents not yet consumed by the payout process.
    async fn refund_outbox(&self) -> StoreResult<Vec<RefundOutboxEntry>>;

    // ── Single-statement optimistic operations ──────────────────────

    /// Atomically flip a ticket `valid → used`, stamping the check-in.
    /// Returns `false` when another scanner won the race.
    async fn checkin_ticket(
        &self,
        id: TicketId,
        at: DateTime<Utc>,
        by: UserId,
    ) -> StoreResult<bool>;

    // ── Retry scheduler scan ────────────────────────────────────────

    /// Failed transactions whose `next_retry_at` has passed and whose retry
    /// budget is not exhausted, oldest due first.
    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<TransactionId>>;

    // ── Upstream-owned rows the engine reads ────────────────────────
    // Events and organizers are owned by the upstream CRUD module; these
    // upserts exist for seeding and tests.

    /// Upsert an event with its tiers.
    async fn put_event(&self, event: &Event) -> StoreResult<()>;

    /// Upsert an organizer subset row.
    async fn put_organizer(&self, organizer: &Organizer) -> StoreResult<()>;
}
