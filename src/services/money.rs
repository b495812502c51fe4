//! Minor-unit conversions at the processor boundary.
//!
//! All internal amounts are decimal major units. Integer cents exist only in
//! requests to and payloads from the processor. Rounding happens exactly
//! once, on the outbound conversion.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Convert a major-unit price to integer minor units, rounding half-up.
pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Convert integer minor units back to a major-unit decimal.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
