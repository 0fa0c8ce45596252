//! Local recovery for malformed numeric input.
//!
//! Ingestion never fails: bad values are replaced with safe defaults and a
//! warning is logged, then processing continues.

/// Returns `value` if finite and non-negative, otherwise 0.0.
#[must_use]
pub fn non_negative(field: &'static str, value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        tracing::warn!(field, value, "clipping invalid non-negative input to 0");
        0.0
    }
}

/// Returns `value` if finite, otherwise `fallback`.
#[must_use]
pub fn finite_or(field: &'static str, value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        tracing::warn!(field, value, fallback, "replacing non-finite input");
        fallback
    }
}

/// Returns `value` if it is a usable price (finite and > 0), otherwise the
/// fallback price if one exists.
#[must_use]
pub fn price_or(field: &'static str, value: f64, fallback: Option<f64>) -> Option<f64> {
    if value.is_finite() && value > 0.0 {
        return Some(value);
    }
    match fallback {
        Some(prev) => {
            tracing::warn!(field, value, fallback = prev, "replacing invalid price");
            Some(prev)
        }
        None => {
            tracing::warn!(field, value, "invalid price with no fallback, dropping");
            None
        }
    }
}
