//! Transaction state machine.
//!
//! The transition table is exhaustive; anything not listed is rejected.
//! `refunded` is terminal.

use crate::error::EngineError;
use crate::types::TransactionStatus;

/// True when `from → to` is an allowed transition.
#[must_use]
pub const fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus::{
        Completed, Failed, Initiated, PartiallyRefunded, Processing, Refunded,
    };
    matches!(
        (from, to),
        (Initiated, Processing)
            | (Initiated, Failed)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Completed, PartiallyRefunded)
            | (Completed, Refunded)
            | (PartiallyRefunded, Refunded)
            | (Failed, Processing)
    )
}

/// Validate a transition, producing the canonical error on rejection.
///
/// # Errors
///
/// `EngineError::InvalidTransition` when `from → to` is not in the table.
pub const fn ensure_transition(
    from: TransactionStatus,
    to: TransactionStatus,
) -> Result<(), EngineError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::{
        Completed, Failed, Initiated, PartiallyRefunded, Processing, Refunded,
    };

    const ALL: [TransactionStatus; 6] = [
        Initiated,
        Processing,
        Completed,
        Failed,
        Refunded,
        PartiallyRefunded,
    ];

    const ALLOWED: [(TransactionStatus, TransactionStatus); 8] = [
        (Initiated, Processing),
        (Initiated, Failed),
        (Processing, Completed),
        (Processing, Failed),
        (Completed, PartiallyRefunded),
        (Completed, Refunded),
        (PartiallyRefunded, Refunded),
        (Failed, Processing),
    ];

    #[test]
    fn every_listed_transition_is_allowed() {
        for (from, to) in ALLOWED {
            assert!(can_transition(from, to), "{from} -> {to} should be allowed");
        }
    }

    #[test]
    fn every_unlisted_pair_is_rejected() {
        for from in ALL {
            for to in ALL {
                let listed = ALLOWED.contains(&(from, to));
                assert_eq!(
                    can_transition(from, to),
                    listed,
                    "{from} -> {to} disagreement with the table"
                );
                if !listed {
                    assert!(matches!(
                        ensure_transition(from, to),
                        Err(EngineError::InvalidTransition { .. })
                    ));
                }
            }
        }
    }

    #[test]
    fn refunded_is_terminal() {
        for to in ALL {
            assert!(!can_transition(Refunded, to));
        }
    }
}
