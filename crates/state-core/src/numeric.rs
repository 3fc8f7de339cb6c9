//! Arithmetic over JSON numbers for increment/decrement sugar.
//!
//! Integer math is preserved while both operands are integral; everything
//! else falls back to `f64`.

use serde_json::{Number, Value};

/// Whether a tree node is numeric.
pub fn is_numeric(value: &Value) -> bool {
    value.is_number()
}

/// Sum of two JSON numbers.
///
/// Uses checked `i64` addition when both operands are integral, falling back
/// to `f64` on overflow or fractional operands. Non-finite float results are
/// clamped to the `f64` range.
pub fn add(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64())
        && let Some(sum) = x.checked_add(y)
    {
        return Number::from(sum);
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    let clamped = if sum.is_finite() {
        sum
    } else {
        f64::MAX.copysign(sum)
    };
    Number::from_f64(clamped).unwrap_or_else(|| Number::from(0))
}

/// Additive inverse of a JSON number.
pub fn negate(n: &Number) -> Number {
    if let Some(x) = n.as_i64()
        && let Some(neg) = x.checked_neg()
    {
        return Number::from(neg);
    }
    Number::from_f64(-n.as_f64().unwrap_or(0.0)).unwrap_or_else(|| Number::from(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_add_stays_integral() {
        let sum = add(&Number::from(100), &Number::from(50));
        assert_eq!(sum.as_i64(), Some(150));
    }

    #[test]
    fn test_fractional_add_uses_float() {
        let sum = add(&Number::from_f64(1.5).unwrap(), &Number::from(1));
        assert_eq!(sum.as_f64(), Some(2.5));
        assert_eq!(sum.as_i64(), None);
    }

    #[test]
    fn test_overflow_falls_back_to_float() {
        let sum = add(&Number::from(i64::MAX), &Number::from(1));
        assert!(sum.as_f64().unwrap() > i64::MAX as f64 - 2.0);
    }

    #[test]
    fn test_add_negate_round_trip() {
        for (start, delta) in [(100i64, 50i64), (0, 1), (-7, 13)] {
            let start = Number::from(start);
            let delta = Number::from(delta);
            let up = add(&start, &delta);
            let back = add(&up, &negate(&delta));
            assert_eq!(back, start);
        }
        let start = Number::from_f64(2.75).unwrap();
        let delta = Number::from_f64(0.25).unwrap();
        assert_eq!(add(&add(&start, &delta), &negate(&delta)), start);
    }
}
