//! Deterministic revenue splits.
//!
//! The organizer receives the floor of their percentage share; the platform
//! keeps the rounding residue. Gateway fees, when reported, come out of the
//! organizer amount per the provider contract.

use crate::types::{Money, Splits};

/// Computes platform/organizer revenue splits.
#[derive(Clone, Copy, Debug)]
pub struct SplitsCalculator {
    /// Default organizer share in percent when no organizer record overrides.
    default_organizer_percent: u32,
}

impl SplitsCalculator {
    /// Create a calculator with the configured default organizer share.
    #[must_use]
    pub const fn new(default_organizer_percent: u32) -> Self {
        Self {
            default_organizer_percent,
        }
    }

    /// Split `total` with the given organizer percentage (falling back to the
    /// configured default), deducting reported gateway `fees` from the
    /// organizer amount.
    #[must_use]
    pub fn compute(
        &self,
        total: Money,
        organizer_percent: Option<u32>,
        fees: Money,
        subaccount_code: Option<String>,
    ) -> Splits {
        let percent = organizer_percent
            .unwrap_or(self.default_organizer_percent)
            .min(100);
        let organizer_gross = total.percent_floor(percent);
        let platform = total.saturating_sub(organizer_gross);
        Self::finish(total, platform, fees, subaccount_code)
    }

    /// Split `total` adopting a gateway-reported platform share verbatim
    /// (the `subaccount.shared_amount` the gateway already withheld).
    #[must_use]
    pub fn from_shared_amount(
        total: Money,
        platform_amount: Money,
        fees: Money,
        subaccount_code: Option<String>,
    ) -> Splits {
        let platform = if platform_amount > total {
            total
        } else {
            platform_amount
        };
        Self::finish(total, platform, fees, subaccount_code)
    }

    fn finish(
        total: Money,
        platform: Money,
        fees: Money,
        subaccount_code: Option<String>,
    ) -> Splits {
        let organizer = total.saturating_sub(platform).saturating_sub(fees);
        Splits {
            platform_amount: platform,
            organizer_amount: organizer,
            organizer_subaccount_code: subaccount_code,
            fees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ninety_ten() {
        let calc = SplitsCalculator::new(90);
        let splits = calc.compute(Money::from_minor(10_000), None, Money::ZERO, None);
        assert_eq!(splits.organizer_amount.minor(), 9_000);
        assert_eq!(splits.platform_amount.minor(), 1_000);
    }

    #[test]
    fn rounding_residue_goes_to_platform() {
        let calc = SplitsCalculator::new(90);
        let splits = calc.compute(Money::from_minor(9_999), None, Money::ZERO, None);
        assert_eq!(splits.organizer_amount.minor(), 8_999);
        assert_eq!(splits.platform_amount.minor(), 1_000);
        assert_eq!(
            splits.organizer_amount.minor() + splits.platform_amount.minor(),
            9_999
        );
    }

    #[test]
    fn organizer_percent_override_wins() {
        let calc = SplitsCalculator::new(90);
        let splits = calc.compute(Money::from_minor(10_000), Some(80), Money::ZERO, None);
        assert_eq!(splits.organizer_amount.minor(), 8_000);
        assert_eq!(splits.platform_amount.minor(), 2_000);
    }

    #[test]
    fn fees_come_out_of_the_organizer_share() {
        let calc = SplitsCalculator::new(90);
        let splits = calc.compute(
            Money::from_minor(10_000),
            None,
            Money::from_minor(150),
            None,
        );
        assert_eq!(splits.platform_amount.minor(), 1_000);
        assert_eq!(splits.organizer_amount.minor(), 8_850);
        assert_eq!(splits.fees.minor(), 150);
    }

    #[test]
    fn shared_amount_is_adopted_as_platform_share() {
        let splits = SplitsCalculator::from_shared_amount(
            Money::from_minor(10_000),
            Money::from_minor(1_000),
            Money::ZERO,
            Some("ACCT_x".to_string()),
        );
        assert_eq!(splits.platform_amount.minor(), 1_000);
        assert_eq!(splits.organizer_amount.minor(), 9_000);
        assert_eq!(splits.organizer_subaccount_code.as_deref(), Some("ACCT_x"));
    }
}
