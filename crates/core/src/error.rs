//! Error types for the confluence engine.
//!
//! Only misconfiguration is an error. Thin or malformed market data is
//! resolved locally into neutral results and sanitised values, so nothing
//! in here is ever produced by a `compute()` call.

use thiserror::Error;

/// Tolerance used when checking that a weight table sums to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// Fatal construction-time configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// The confluence weight table has no entries.
    #[error("confluence weight table is empty")]
    EmptyWeights,

    /// A single weight is negative or not finite.
    #[error("confluence weight `{key}` is invalid: {value}")]
    InvalidWeight {
        /// Feature key of the offending weight.
        key: String,
        /// The rejected value.
        value: f64,
    },

    /// Weights do not sum to 1.0 within tolerance.
    #[error("confluence weights sum to {sum:.6}, expected 1.0 ± {tolerance}")]
    WeightSum {
        /// Actual sum of the table.
        sum: f64,
        /// Accepted absolute deviation from 1.0.
        tolerance: f64,
    },

    /// A numeric option lies outside its documented range.
    #[error("{field} = {value} is outside its valid range {range}")]
    OutOfRange {
        /// Dotted path of the option, e.g. `divergence.threshold`.
        field: &'static str,
        /// The rejected value.
        value: f64,
        /// Human readable description of the valid range.
        range: &'static str,
    },

    /// Two options that must be strictly ordered are not.
    #[error("{lower} ({lower_value}) must be strictly below {upper} ({upper_value})")]
    InvalidOrdering {
        /// Option expected to be the smaller one.
        lower: &'static str,
        /// Its value.
        lower_value: f64,
        /// Option expected to be the larger one.
        upper: &'static str,
        /// Its value.
        upper_value: f64,
    },

    /// Configuration sources could not be read or deserialised.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl From<figment::Error> for ConfigurationError {
    fn from(err: figment::Error) -> Self {
        Self::Load(err.to_string())
    }
}

/// Checks that `value` lies in `[min, max]`.
///
/// # Errors
/// Returns `OutOfRange` when the value is outside the interval or not finite.
pub fn ensure_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    range: &'static str,
) -> Result<(), ConfigurationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::OutOfRange {
            field,
            value,
            range,
        })
    }
}

/// Checks that `lower < upper`.
///
/// # Errors
/// Returns `InvalidOrdering` otherwise.
pub fn ensure_ordered(
    lower: &'static str,
    lower_value: f64,
    upper: &'static str,
    upper_value: f64,
) -> Result<(), ConfigurationError> {
    if lower_value < upper_value {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidOrdering {
            lower,
            lower_value,
            upper,
            upper_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_range_accepts_bounds() {
        assert!(ensure_range("x", 0.0, 0.0, 1.0, "[0, 1]").is_ok());
        assert!(ensure_range("x", 1.0, 0.0, 1.0, "[0, 1]").is_ok());
    }

    #[test]
    fn ensure_range_rejects_nan_and_outside() {
        assert!(ensure_range("x", f64::NAN, 0.0, 1.0, "[0, 1]").is_err());
        let err = ensure_range("divergence.threshold", 1.5, 0.0, 1.0, "[0, 1]").unwrap_err();
        assert_eq!(
            err.to_string(),
            "divergence.threshold = 1.5 is outside its valid range [0, 1]"
        );
    }

    #[test]
    fn ensure_ordered_requires_strict_order() {
        assert!(ensure_ordered("low", 1.0, "high", 2.0).is_ok());
        assert!(ensure_ordered("low", 2.0, "high", 2.0).is_err());
    }

    #[test]
    fn weight_sum_message_mentions_tolerance() {
        let err = ConfigurationError::WeightSum {
            sum: 0.9,
            tolerance: WEIGHT_SUM_TOLERANCE,
        };
        assert!(err.to_string().contains("0.900000"));
    }
}
