//! Minor-unit money helpers.
//!
//! Every amount inside the engine is an `i64` count of minor units (fils for
//! AED). Major-unit decimals only appear at the HTTP boundary, in provider
//! payloads that ask for them, and in logs.

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};

/// Minor units per major unit for every currency the platform sells in.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Largest accepted drift between a stored snapshot and a recomputed price (0.01 major units).
pub const PRICE_TOLERANCE_MINOR: i64 = 1;

/// Converts a major-unit decimal into minor units, rounding half-up at the second decimal.
pub fn major_to_minor(amount: &BigDecimal) -> Option<i64> {
    let scaled = amount * BigDecimal::from(MINOR_UNITS_PER_MAJOR);
    scaled.with_scale_round(0, RoundingMode::HalfUp).to_i64()
}

/// Major-unit float for JSON responses and log fields.
pub fn minor_to_major_f64(amount_minor: i64) -> f64 {
    amount_minor as f64 / MINOR_UNITS_PER_MAJOR as f64
}

/// Fixed two-decimal rendering, e.g. `45000` -> `"450.00"`.
pub fn format_major(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!(
        "{}{}.{:02}",
        sign,
        abs / MINOR_UNITS_PER_MAJOR as u64,
        abs % MINOR_UNITS_PER_MAJOR as u64
    )
}

/// True when two minor-unit amounts agree within [`PRICE_TOLERANCE_MINOR`].
pub fn within_tolerance(a: i64, b: i64) -> bool {
    (a - b).abs() <= PRICE_TOLERANCE_MINOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn converts_major_decimal_to_minor_units() {
        let value = BigDecimal::from_str("450.00").unwrap();
        assert_eq!(major_to_minor(&value), Some(45_000));

        let rounded = BigDecimal::from_str("99.995").unwrap();
        assert_eq!(major_to_minor(&rounded), Some(10_000));
    }

    #[test]
    fn formats_minor_units_as_major_string() {
        assert_eq!(format_major(45_000), "450.00");
        assert_eq!(format_major(5), "0.05");
        assert_eq!(format_major(-1_250), "-12.50");
    }

    #[test]
    fn tolerance_accepts_one_minor_unit_of_drift() {
        assert!(within_tolerance(30_000, 30_001));
        assert!(!within_tolerance(30_000, 30_002));
    }
}
