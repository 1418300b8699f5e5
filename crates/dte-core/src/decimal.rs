//! # Decimal Comparison
//!
//! Tolerant comparison and rounding helpers for monetary amounts.
//!
//! ## Why a Tolerance?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Issuers compute per-item amounts and round each one, the authority    │
//! │  recomputes totals from those rounded amounts. Sums drift by at most   │
//! │  a cent, so every cross-check compares with an absolute epsilon:       │
//! │                                                                         │
//! │     |declared - derived| <= 0.01   →  equal                             │
//! │     |declared - derived| >  0.01   →  rule violation                    │
//! │                                                                         │
//! │  Amounts are rust_decimal::Decimal everywhere. No floats.              │
//! │  Sums and products are checked: an overflow is reported by the rule    │
//! │  that computed it, never a panic.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Absolute epsilon for every monetary comparison.
pub const TOLERANCE: Decimal = dec!(0.01);

/// Number of decimal places a monetary amount may carry.
pub const MONEY_SCALE: u32 = 2;

/// Returns true when `a` and `b` differ by no more than [`TOLERANCE`].
///
/// ## Example
/// ```rust
/// use dte_core::decimal::equal_with_tolerance;
/// use rust_decimal_macros::dec;
///
/// assert!(equal_with_tolerance(dec!(100.00), dec!(100.01)));
/// assert!(!equal_with_tolerance(dec!(100.00), dec!(100.02)));
/// ```
pub fn equal_with_tolerance(a: Decimal, b: Decimal) -> bool {
    a.checked_sub(b).is_some_and(|diff| diff.abs() <= TOLERANCE)
}

/// Returns true when `value` carries at most two decimal digits.
pub fn is_multiple_of_cent(value: Decimal) -> bool {
    value.round_dp(MONEY_SCALE) == value
}

/// Commercial rounding to cents (half away from zero).
///
/// Used to report expected values in error parameters, never to mutate a
/// declared amount.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Sums an iterator of amounts, `None` on overflow.
pub fn checked_sum<I>(values: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tolerance_boundary() {
        assert!(equal_with_tolerance(dec!(10.00), dec!(10.00)));
        assert!(equal_with_tolerance(dec!(10.00), dec!(10.01)));
        assert!(equal_with_tolerance(dec!(10.01), dec!(10.00)));
        assert!(!equal_with_tolerance(dec!(10.00), dec!(10.011)));
        assert!(!equal_with_tolerance(dec!(10.00), dec!(9.98)));
    }

    #[test]
    fn test_multiple_of_cent() {
        assert!(is_multiple_of_cent(dec!(1)));
        assert!(is_multiple_of_cent(dec!(1.5)));
        assert!(is_multiple_of_cent(dec!(1.25)));
        assert!(is_multiple_of_cent(dec!(1.250)));
        assert!(!is_multiple_of_cent(dec!(1.255)));
        assert!(!is_multiple_of_cent(dec!(0.001)));
    }

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(2.344)), dec!(2.34));
        assert_eq!(round_money(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn test_checked_sum() {
        assert_eq!(checked_sum(vec![dec!(1.10), dec!(2.20), dec!(3.30)]), Some(dec!(6.60)));
        assert_eq!(checked_sum(Vec::<Decimal>::new()), Some(Decimal::ZERO));
        assert_eq!(checked_sum(vec![Decimal::MAX, dec!(1)]), None);
    }

    #[test]
    fn test_tolerance_at_the_edges_of_the_range() {
        assert!(!equal_with_tolerance(Decimal::MAX, Decimal::MIN));
        assert!(!equal_with_tolerance(Decimal::MIN, Decimal::MAX));
        assert!(equal_with_tolerance(Decimal::MAX, Decimal::MAX));
    }

    proptest! {
        #[test]
        fn tolerance_is_symmetric(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            let a = Decimal::new(a, 2);
            let b = Decimal::new(b, 2);
            prop_assert_eq!(equal_with_tolerance(a, b), equal_with_tolerance(b, a));
        }

        #[test]
        fn rounded_amounts_are_cent_multiples(cents in -10_000_000i64..10_000_000, extra in 0i64..10) {
            let value = Decimal::new(cents * 10 + extra, 3);
            let rounded = round_money(value);
            prop_assert!(is_multiple_of_cent(rounded));
            prop_assert!(equal_with_tolerance(rounded, value));
        }
    }
}
