//! Domain types for the payment-order-ticket transaction engine.
//!
//! This module contains the identifier newtypes, the `Money` value object
//! (integer minor units), and the persistent entities: `Transaction`,
//! `Order`, `Event`, `Ticket`, and the organizer subset the engine reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a user (buyer, organizer staff, or scanner).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket tier within an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierId(Uuid);

impl TierId {
    /// Creates a new random `TierId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TierId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random `OrderId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OrderId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ledger transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new random `TransactionId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TransactionId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an organizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizerId(Uuid);

impl OrganizerId {
    /// Creates a new random `OrganizerId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OrganizerId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OrganizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (integer minor units, never floating point)
// ============================================================================

/// An amount of money in integer minor units (kobo, cents).
///
/// All internal arithmetic happens in minor units; conversion to display
/// units happens only at presentation boundaries.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units.
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Subtracts two amounts (`None` if the result would be negative).
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Subtracts, clamping at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiplies by a quantity with overflow checking.
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Floor share of this amount at `percent` (0..=100).
    ///
    /// `Money::from_minor(10_000).percent_floor(90)` is `9_000`; the rounding
    /// residue stays with the caller's complement.
    #[must_use]
    pub const fn percent_floor(self, percent: u32) -> Self {
        Self(self.0 * percent as u64 / 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Ledger transaction status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, gateway not yet confirmed.
    Initiated,
    /// Payment in flight at the gateway.
    Processing,
    /// Paid; tickets minted.
    Completed,
    /// Gateway failure or oversell recovery.
    Failed,
    /// Fully refunded (terminal).
    Refunded,
    /// Refunded for less than the full amount.
    PartiallyRefunded,
}

impl TransactionStatus {
    /// Stable wire/database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(Self::Initiated),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            "partially_refunded" => Some(Self::PartiallyRefunded),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status of an order, as seen by the buyer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting payment.
    Pending,
    /// Paid; tickets attached.
    Completed,
    /// Payment failed.
    Failed,
    /// Fully refunded.
    Refunded,
}

impl PaymentStatus {
    /// Stable wire/database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// Event lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Being configured; not purchasable.
    Draft,
    /// On sale.
    Published,
    /// Cancelled by the organizer.
    Cancelled,
    /// The event has taken place.
    Completed,
}

impl EventStatus {
    /// Stable wire/database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Ticket admission status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Good for entry.
    Valid,
    /// Checked in at the gate.
    Used,
    /// Cancelled (full refund).
    Cancelled,
    /// Transferred to another holder; this instance no longer admits.
    Transferred,
}

impl TicketStatus {
    /// Stable wire/database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
            Self::Transferred => "transferred",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(Self::Valid),
            "used" => Some(Self::Used),
            "cancelled" => Some(Self::Cancelled),
            "transferred" => Some(Self::Transferred),
            _ => None,
        }
    }
}

// ============================================================================
// Actor (constructed at the HTTP boundary, consumed everywhere)
// ============================================================================

/// Role of an authenticated principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular buyer.
    User,
    /// Event organizer.
    Organizer,
    /// Gate scanner restricted to assigned events.
    Validator,
    /// Back-office administrator.
    Admin,
}

impl Role {
    /// Parse the wire representation, defaulting unknown values to `User`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "organizer" => Self::Organizer,
            "validator" => Self::Validator,
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }
}

/// The single identity value the engine sees, regardless of how the
/// upstream auth layer spelled it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user identifier.
    pub user_id: UserId,
    /// Email used for gateway receipts.
    pub email: String,
    /// Authorization role.
    pub role: Role,
    /// True for engine-internal actors (scheduler, webhook ingestion).
    pub is_system: bool,
}

impl Actor {
    /// An engine-internal system actor.
    #[must_use]
    pub fn system() -> Self {
        Self {
            user_id: UserId::from_uuid(Uuid::nil()),
            email: String::new(),
            role: Role::Admin,
            is_system: true,
        }
    }
}

/// Request-level client metadata recorded on the transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    /// Client IP, if known.
    pub ip: Option<String>,
    /// User-Agent header, if present.
    pub user_agent: Option<String>,
}

/// Scanner identity plus the events a `validator` role may admit for.
#[derive(Clone, Debug)]
pub struct ScannerContext {
    /// The scanning principal.
    pub actor: Actor,
    /// Events assigned to this scanner (checked for `Role::Validator` only).
    pub assigned_events: Vec<EventId>,
}

// ============================================================================
// Transaction (the ledger row)
// ============================================================================

/// Gateway-facing details of a transaction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayDetails {
    /// Gateway provider name, e.g. `"paystack"`.
    pub provider: String,
    /// Our reference at the gateway; unique per initiation attempt.
    pub reference: String,
    /// The gateway's own transaction identifier, once known.
    pub transaction_id: Option<String>,
    /// Payment channel (card, bank, ussd, ...).
    pub channel: Option<String>,
    /// Card authorization metadata echoed by the gateway.
    pub authorization: Option<CardAuthorization>,
    /// Gateway fees in minor units, when reported.
    pub fees: Option<Money>,
    /// Hosted checkout URL returned by `Initialize`.
    pub authorization_url: Option<String>,
    /// Gateway access code for the hosted checkout.
    pub access_code: Option<String>,
}

/// Card authorization metadata from the gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAuthorization {
    /// Card scheme/type.
    pub card_type: Option<String>,
    /// Last four digits.
    pub last4: Option<String>,
    /// Issuing bank.
    pub bank: Option<String>,
}

/// Revenue split between platform and organizer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Splits {
    /// Platform share in minor units (keeps the rounding residue).
    pub platform_amount: Money,
    /// Organizer share in minor units, net of reported gateway fees.
    pub organizer_amount: Money,
    /// Organizer's gateway subaccount, when routed.
    pub organizer_subaccount_code: Option<String>,
    /// Gateway fees deducted from the organizer share.
    pub fees: Money,
}

/// Failure details recorded on a failed transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Human-readable reason.
    pub reason: String,
    /// Machine-readable code, when available.
    pub code: Option<String>,
    /// Raw gateway payload or context.
    pub details: Option<serde_json::Value>,
}

impl Failure {
    /// A failure with only a reason.
    #[must_use]
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            code: None,
            details: None,
        }
    }
}

/// One refund applied to a transaction. Refunds append; nothing is deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    /// Refunded amount in minor units; always positive.
    pub amount: Money,
    /// Operator-supplied reason.
    pub reason: String,
    /// Who processed the refund.
    pub processed_by: UserId,
    /// When the refund was applied.
    pub processed_at: DateTime<Utc>,
    /// Gateway refund identifier, once the gateway accepted it.
    pub gateway_refund_id: Option<String>,
}

/// Purchase metadata snapshotted at initiation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Client IP at purchase time.
    pub ip: Option<String>,
    /// Client User-Agent at purchase time.
    pub user_agent: Option<String>,
    /// Tier name snapshot.
    pub tier_name: String,
    /// Tickets purchased.
    pub quantity: u32,
    /// Buyer email snapshot; retries re-initialize the gateway with it.
    pub buyer_email: Option<String>,
}

/// The ledger row: one per order, for the life of the order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// Idempotency key; unique across all transactions.
    pub idempotency_key: String,
    /// Current state-machine state.
    pub status: TransactionStatus,
    /// Buyer.
    pub user_id: UserId,
    /// The 1:1 linked order.
    pub order_id: OrderId,
    /// Event purchased.
    pub event_id: EventId,
    /// Total charge in minor units.
    pub amount: Money,
    /// ISO currency code; single-currency deployment.
    pub currency: String,
    /// Gateway-facing details.
    pub gateway: GatewayDetails,
    /// Revenue split, set at completion.
    pub splits: Option<Splits>,
    /// Retries performed so far.
    pub retry_count: u32,
    /// Retry ceiling.
    pub max_retries: u32,
    /// Last retry attempt time.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// When the scheduler should next pick this row up.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Failure details, when failed.
    pub failure: Option<Failure>,
    /// Applied refunds, append-only.
    pub refunds: Vec<Refund>,
    /// Sum of `refunds[].amount`; never exceeds `amount`.
    pub total_refunded: Money,
    /// State-machine timestamps.
    pub initiated_at: DateTime<Utc>,
    /// Set on entering `processing`.
    pub processing_at: Option<DateTime<Utc>>,
    /// Set on entering `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on entering `failed`.
    pub failed_at: Option<DateTime<Utc>>,
    /// Purchase metadata snapshot.
    pub metadata: TransactionMetadata,
}

impl Transaction {
    /// Remaining refundable amount.
    #[must_use]
    pub fn refundable(&self) -> Money {
        self.amount.saturating_sub(self.total_refunded)
    }
}

// ============================================================================
// Order
// ============================================================================

/// Buyer intent: what was bought, for how much, and its payment status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    pub id: OrderId,
    /// Buyer.
    pub user_id: UserId,
    /// Event purchased.
    pub event_id: EventId,
    /// Tier purchased.
    pub tier_id: TierId,
    /// Tier name snapshot.
    pub tier_name: String,
    /// Tickets purchased; between 1 and 10.
    pub quantity: u32,
    /// Price per ticket in minor units.
    pub unit_price: Money,
    /// `unit_price * quantity`.
    pub total_amount: Money,
    /// Buyer-visible payment status.
    pub payment_status: PaymentStatus,
    /// Ticket ids, populated only on completion.
    pub tickets: Vec<TicketId>,
    /// Revenue split echo, set at completion.
    pub splits: Option<Splits>,
    /// Gateway reference echo.
    pub gateway_reference: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Event & tiers
// ============================================================================

/// A priced admission tier with bounded inventory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketTier {
    /// Tier identifier, unique within the event.
    pub id: TierId,
    /// Display name.
    pub name: String,
    /// Price per ticket in minor units.
    pub price: Money,
    /// Total inventory; at least 1.
    pub quantity: u32,
    /// Tickets sold; `0 <= sold_count <= quantity`.
    pub sold_count: u32,
    /// Per-user purchase ceiling for this tier.
    pub max_per_user: u32,
    /// Sale window start, if bounded.
    pub sale_start: Option<DateTime<Utc>>,
    /// Sale window end, if bounded.
    pub sale_end: Option<DateTime<Utc>>,
}

impl TicketTier {
    /// Seats still available in this tier.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.sold_count)
    }

    /// True if the sale window (when set) contains `now`.
    #[must_use]
    pub fn on_sale(&self, now: DateTime<Utc>) -> bool {
        self.sale_start.map_or(true, |s| now >= s) && self.sale_end.map_or(true, |e| now <= e)
    }
}

/// Product definition: an event with its tiers and sales counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Owning organizer.
    pub organizer_id: OrganizerId,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Scheduled date.
    pub event_date: DateTime<Utc>,
    /// Admission tiers.
    pub tiers: Vec<TicketTier>,
    /// Sum of `tiers[].sold_count`.
    pub total_tickets_sold: u32,
    /// Sum of completed-order totals in minor units.
    pub total_revenue: Money,
    /// Users allowed to scan this event with the `validator` role.
    pub validators: Vec<UserId>,
    /// Soft-delete marker; soft-deleted events are not purchasable.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Find a tier by id.
    #[must_use]
    pub fn tier(&self, id: TierId) -> Option<&TicketTier> {
        self.tiers.iter().find(|t| t.id == id)
    }

    /// Find a tier by id, mutably.
    pub fn tier_mut(&mut self, id: TierId) -> Option<&mut TicketTier> {
        self.tiers.iter_mut().find(|t| t.id == id)
    }

    /// Published and not soft-deleted.
    #[must_use]
    pub const fn is_purchasable(&self) -> bool {
        matches!(self.status, EventStatus::Published) && self.deleted_at.is_none()
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// One seat of admission. Created exclusively inside the Complete transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket identifier.
    pub id: TicketId,
    /// Owning order (non-owning back-reference).
    pub order_id: OrderId,
    /// Event admitted to.
    pub event_id: EventId,
    /// Holder.
    pub user_id: UserId,
    /// Tier purchased.
    pub tier_id: TierId,
    /// Tier name snapshot.
    pub tier_name: String,
    /// Paid price in minor units.
    pub price: Money,
    /// Signed ticket token; globally unique.
    pub qr_code: String,
    /// Admission status.
    pub status: TicketStatus,
    /// Set when checked in.
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Scanner that won the check-in.
    pub checked_in_by: Option<UserId>,
    /// Mint time.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Organizer subset & refund outbox
// ============================================================================

/// The organizer fields the engine reads; owned by the upstream module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    /// Unique organizer identifier.
    pub id: OrganizerId,
    /// Gateway subaccount directing the organizer's share.
    pub subaccount_code: Option<String>,
    /// Platform fee in percent; organizer share is the complement.
    pub platform_fee_percent: u32,
}

/// Refund intent appended by the oversell-at-complete recovery path and
/// consumed by a payout process outside the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundOutboxEntry {
    /// Transaction to refund.
    pub transaction_id: TransactionId,
    /// Amount to return in minor units.
    pub amount: Money,
    /// Why the refund is owed.
    pub reason: String,
    /// When the intent was recorded.
    pub created_at: DateTime<Utc>,
}
