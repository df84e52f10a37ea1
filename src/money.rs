//! Overflow-checked arithmetic on minor-unit amounts.
//!
//! Overflow clamps to `i64::MAX` / `i64::MIN` and logs a warning instead
//! of wrapping.

use tracing::warn;

use crate::types::MinorUnits;

pub fn add(a: MinorUnits, b: MinorUnits) -> MinorUnits {
    match a.checked_add(b) {
        Some(v) => v,
        None => {
            warn!(a, b, "Monetary addition overflowed, clamping");
            a.saturating_add(b)
        }
    }
}

pub fn sub(a: MinorUnits, b: MinorUnits) -> MinorUnits {
    match a.checked_sub(b) {
        Some(v) => v,
        None => {
            warn!(a, b, "Monetary subtraction overflowed, clamping");
            a.saturating_sub(b)
        }
    }
}

pub fn mul(a: MinorUnits, b: i64) -> MinorUnits {
    match a.checked_mul(b) {
        Some(v) => v,
        None => {
            warn!(a, b, "Monetary multiplication overflowed, clamping");
            a.saturating_mul(b)
        }
    }
}

/// Narrow a wide intermediate back into minor units.
pub fn narrow(v: i128) -> MinorUnits {
    match MinorUnits::try_from(v) {
        Ok(n) => n,
        Err(_) => {
            warn!(value = %v, "Monetary value out of range, clamping");
            if v > 0 { MinorUnits::MAX } else { MinorUnits::MIN }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_in_range() {
        assert_eq!(add(1_000, 2_500), 3_500);
    }

    #[test]
    fn test_add_clamps_high() {
        assert_eq!(add(i64::MAX - 1, 10), i64::MAX);
    }

    #[test]
    fn test_sub_clamps_low() {
        assert_eq!(sub(i64::MIN + 1, 10), i64::MIN);
    }

    #[test]
    fn test_mul_clamps_by_sign() {
        assert_eq!(mul(i64::MAX / 2, 3), i64::MAX);
        assert_eq!(mul(i64::MAX / 2, -3), i64::MIN);
    }

    #[test]
    fn test_narrow() {
        assert_eq!(narrow(42), 42);
        assert_eq!(narrow(i128::from(i64::MAX) * 4), i64::MAX);
        assert_eq!(narrow(i128::from(i64::MIN) * 4), i64::MIN);
    }
}
