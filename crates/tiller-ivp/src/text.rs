//! Number formatting shared by the domain text form and the wire codec.
//!
//! Both formats are consumed by downstream tooling that expects exact
//! strings, so the rules here are fixed:
//!
//! - [`compact`] prints with five fractional digits, then strips trailing
//!   zeros and a dangling decimal point (`100.00000` becomes `100`).
//! - [`coefficient`] rounds to four fractional digits and strips trailing
//!   zeros but keeps the decimal point (`3.0` becomes `3.`, `0.5` stays
//!   `0.5`). Exact zero is written as a bare `0`.

use std::num::FpCategory;

/// Number of fractional digits kept by [`coefficient`].
const COEFFICIENT_DIGITS: usize = 4;

/// Scale applied before rounding a coefficient to an integer.
const COEFFICIENT_SCALE: f64 = 10_000.0;

/// Format a value with five fractional digits, then strip trailing zeros
/// and a trailing decimal point.
pub fn compact(value: f64) -> String {
    let fixed = format!("{value:.5}");
    if !fixed.contains('.') {
        return fixed;
    }
    let trimmed = fixed.trim_end_matches('0');
    trimmed.strip_suffix('.').unwrap_or(trimmed).to_owned()
}

/// Format a piece coefficient for the wire format.
pub fn coefficient(value: f64) -> String {
    let mut out = String::new();
    let mut magnitude = value;
    if magnitude < 0.0 {
        out.push('-');
        magnitude = -magnitude;
    }
    if magnitude.classify() == FpCategory::Zero {
        out.push('0');
        return out;
    }

    // Values are bounded utilities; rounding to an integer count of
    // ten-thousandths cannot overflow an i64 for any finite piece.
    #[allow(clippy::cast_possible_truncation)]
    let scaled = magnitude.mul_add(COEFFICIENT_SCALE, 0.5) as i64;
    if scaled == 0 {
        out.push_str("0.0000");
        return out;
    }

    let digits = format!("{scaled:05}");
    let split = digits.len().saturating_sub(COEFFICIENT_DIGITS);
    let whole = digits.get(..split).unwrap_or("0");
    let fraction = digits.get(split..).unwrap_or("").trim_end_matches('0');
    out.push_str(whole);
    out.push('.');
    out.push_str(fraction);
    out
}
