use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round a monetary amount to whole cents, half-up.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert an amount to the integer minor units payment providers expect.
/// Returns `None` when the amount does not fit an `i64` cent count.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Inverse of [`to_minor_units`]: an integer cent count as a decimal amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_cents(Decimal::new(79165, 3)), Decimal::new(7917, 2)); // 79.165 -> 79.17
        assert_eq!(round_cents(Decimal::new(79164, 3)), Decimal::new(7916, 2)); // 79.164 -> 79.16
        assert_eq!(round_cents(Decimal::new(125, 3)), Decimal::new(13, 2)); // 0.125 -> 0.13
    }

    #[test]
    fn minor_units_round_trip() {
        assert_eq!(to_minor_units(Decimal::new(9500, 2)), Some(9500));
        assert_eq!(to_minor_units(Decimal::new(4999, 2)), Some(4999));
        assert_eq!(from_minor_units(4999), Decimal::new(4999, 2));
    }
}
