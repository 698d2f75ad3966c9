//! Error taxonomy for the transaction engine.
//!
//! Every engine operation returns `Result<_, EngineError>`; the HTTP layer
//! maps `EngineError::kind()` to a status code and never inspects variants
//! beyond that.

use crate::store::StoreError;
use crate::types::{EventId, OrderId, TierId, TransactionId, TransactionStatus};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Broad classification used for HTTP mapping and audit severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Field-level precondition failure; the caller can fix the request.
    Validation,
    /// Unknown entity.
    NotFound,
    /// State machine or idempotency conflict.
    Conflict,
    /// Remote gateway non-success or timeout.
    Gateway,
    /// Storage-level surprise (uniqueness after retries, missing linked row).
    Integrity,
    /// Programmer error inside the engine itself; always reported as a
    /// `system.error` audit event at the raise site.
    Fatal,
}

/// Comprehensive error taxonomy for the payment-order-ticket engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ═══════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════
    /// Quantity outside the allowed 1..=10 range.
    #[error("invalid quantity {quantity}: must be between 1 and 10")]
    InvalidQuantity {
        /// The rejected quantity.
        quantity: u32,
    },

    /// Event is not published, is soft-deleted, or otherwise not on sale.
    #[error("event {0} is not purchasable")]
    EventNotPurchasable(EventId),

    /// Tier inventory cannot cover the requested quantity.
    #[error("tier sold out: {remaining} remaining, {requested} requested")]
    TierSoldOut {
        /// Seats still available.
        remaining: u32,
        /// Seats requested.
        requested: u32,
    },

    /// The purchase would exceed the tier's per-user ceiling.
    #[error("tier limit exceeded: at most {max_per_user} tickets per user")]
    TierLimitExceeded {
        /// The tier's ceiling.
        max_per_user: u32,
    },

    /// Refund amount is zero, negative, or exceeds the refundable net.
    #[error("invalid refund amount: {net} refundable")]
    InvalidRefundAmount {
        /// Remaining refundable amount in minor units.
        net: u64,
    },

    /// The gateway reports the charge did not succeed.
    #[error("verification failed for reference {0}")]
    VerificationFailed(String),

    // ═══════════════════════════════════════════════════════════
    // Not found
    // ═══════════════════════════════════════════════════════════
    /// Unknown event.
    #[error("event {0} not found")]
    EventNotFound(EventId),

    /// Unknown tier within the event.
    #[error("tier {0} not found")]
    TierNotFound(TierId),

    /// Unknown transaction.
    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Unknown order.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// No transaction carries this gateway reference.
    #[error("no transaction for reference {0}")]
    ReferenceNotFound(String),

    // ═══════════════════════════════════════════════════════════
    // Conflict
    // ═══════════════════════════════════════════════════════════
    /// The requested state transition is not in the transition table.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: TransactionStatus,
        /// Requested state.
        to: TransactionStatus,
    },

    /// Completion found the tier oversold; the transaction was failed and a
    /// refund intent recorded.
    #[error("oversold at completion")]
    OversoldAtCompletion,

    /// Refund requested on a transaction that is not refundable.
    #[error("transaction is not refundable in status {0}")]
    NotRefundable(TransactionStatus),

    /// Retry requested on a transaction that is not in `failed`.
    #[error("transaction is not retryable in status {0}")]
    NotRetryable(TransactionStatus),

    /// Retry ceiling reached.
    #[error("retry limit exhausted")]
    RetryExhausted,

    // ═══════════════════════════════════════════════════════════
    // Gateway
    // ═══════════════════════════════════════════════════════════
    /// Gateway initialization failed.
    #[error("gateway initialization failed: {0}")]
    GatewayInit(String),

    /// Gateway verification failed.
    #[error("gateway verification failed: {0}")]
    GatewayVerify(String),

    /// Gateway refund failed; the refund was rolled back.
    #[error("gateway refund failed: {0}")]
    GatewayRefund(String),

    /// Gateway call exceeded its deadline.
    #[error("gateway timeout")]
    GatewayTimeout,

    // ═══════════════════════════════════════════════════════════
    // Integrity & storage
    // ═══════════════════════════════════════════════════════════
    /// Storage invariant surprise (e.g. duplicate ticket token after retries,
    /// or a transaction whose linked order is missing).
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The engine's own machinery violated an invariant it enforces, such as
    /// a tier compare-and-set missing under the event row lock.
    #[error("fatal engine fault: {0}")]
    Fatal(String),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Classify for HTTP mapping and audit severity.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQuantity { .. }
            | Self::EventNotPurchasable(_)
            | Self::TierSoldOut { .. }
            | Self::TierLimitExceeded { .. }
            | Self::InvalidRefundAmount { .. }
            | Self::VerificationFailed(_) => ErrorKind::Validation,

            Self::EventNotFound(_)
            | Self::TierNotFound(_)
            | Self::TransactionNotFound(_)
            | Self::OrderNotFound(_)
            | Self::ReferenceNotFound(_) => ErrorKind::NotFound,

            Self::InvalidTransition { .. }
            | Self::OversoldAtCompletion
            | Self::NotRefundable(_)
            | Self::NotRetryable(_)
            | Self::RetryExhausted => ErrorKind::Conflict,

            Self::GatewayInit(_)
            | Self::GatewayVerify(_)
            | Self::GatewayRefund(_)
            | Self::GatewayTimeout => ErrorKind::Gateway,

            Self::Integrity(_) | Self::Store(_) => ErrorKind::Integrity,

            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// True when the failure is safe to surface verbatim to the caller.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict
        )
    }
}
