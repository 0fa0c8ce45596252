//! Numeric helpers shared by the detectors.
//!
//! All functions are total: empty or degenerate input yields a documented
//! neutral value instead of NaN.

use serde::{Deserialize, Serialize};

/// Ordinary least-squares fit of `y` against `x = 0, 1, 2, ...`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    /// Slope of the fitted line per step
    pub slope: f64,
    /// Intercept at `x = 0`
    pub intercept: f64,
    /// Coefficient of determination in [0, 1]
    pub r_squared: f64,
}

/// Fits a least-squares line through `values` indexed by position.
///
/// Uses centred sums so long price series around 4500.0 do not lose
/// precision. Returns a zero fit for fewer than 3 points or any non-finite
/// value; a flat series has slope 0 and R² 0.
pub fn linear_regression<I>(values: I) -> LinearFit
where
    I: IntoIterator<Item = f64>,
    I::IntoIter: Clone + ExactSizeIterator,
{
    let iter = values.into_iter();
    let n = iter.len();
    if n < 3 {
        return LinearFit::default();
    }

    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;

    let mut y_sum = 0.0;
    for y in iter.clone() {
        if !y.is_finite() {
            return LinearFit::default();
        }
        y_sum += y;
    }
    let y_mean = y_sum / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, y) in iter.enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx <= f64::EPSILON {
        return LinearFit::default();
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let r_squared = if syy <= f64::EPSILON {
        0.0
    } else {
        ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0)
    };

    LinearFit {
        slope,
        intercept,
        r_squared,
    }
}

/// Arithmetic mean, `None` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`), 0.0 for fewer than 2 values.
#[must_use]
pub fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let m = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Percentile rank of `current` within `history`, in [0, 100].
///
/// Counts the values strictly below `current`, so the minimum of a series
/// ranks at 0. Returns 50.0 when fewer than 2 values are available.
#[must_use]
pub fn percentile_rank(history: &[f64], current: f64) -> f64 {
    if history.len() < 2 {
        return 50.0;
    }
    let below = history.iter().filter(|&&v| v < current).count();
    (below as f64 / history.len() as f64 * 100.0).clamp(0.0, 100.0)
}

/// Annualised volatility of log returns, in percent.
///
/// `closes` must be strictly positive; returns `None` if fewer than 2 usable
/// closes exist.
#[must_use]
pub fn annualized_log_return_vol(closes: &[f64], periods_per_year: f64) -> Option<f64> {
    if closes.len() < 2 || closes.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return None;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    Some(population_std(&returns) * periods_per_year.sqrt() * 100.0)
}

/// Clamps to [0, 1], mapping NaN to 0.
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Clamps to [-1, 1], mapping NaN to 0.
#[must_use]
pub fn clamp_signed_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================
    // Regression Tests
    // ============================================

    #[test]
    fn perfect_line_has_unit_r_squared() {
        let ys: Vec<f64> = (0..10).map(|i| 4500.0 - 0.5 * i as f64).collect();
        let fit = linear_regression(ys.iter().copied());

        assert!((fit.slope + 0.5).abs() < 1e-9, "slope {}", fit.slope);
        assert!((fit.intercept - 4500.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn flat_series_has_zero_slope_and_r_squared() {
        let fit = linear_regression([5.0; 8]);
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r_squared, 0.0);
    }

    #[test]
    fn noisy_series_has_partial_r_squared() {
        let ys = [1.0, 3.0, 2.0, 4.0, 3.0, 5.0];
        let fit = linear_regression(ys);
        assert!(fit.slope > 0.0);
        assert!(fit.r_squared > 0.0 && fit.r_squared < 1.0);
    }

    #[test]
    fn regression_needs_three_points() {
        assert_eq!(linear_regression([1.0, 2.0]), LinearFit::default());
    }

    #[test]
    fn regression_rejects_non_finite() {
        assert_eq!(
            linear_regression([1.0, f64::NAN, 3.0, 4.0]),
            LinearFit::default()
        );
    }

    // ============================================
    // Moment / Rank Tests
    // ============================================

    #[test]
    fn mean_and_std() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
        // Population std of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2.
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std(&values) - 2.0).abs() < 1e-12);
        assert_eq!(population_std(&[3.0]), 0.0);
    }

    #[test]
    fn percentile_rank_counts_strictly_below() {
        let history = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile_rank(&history, 10.0), 0.0);
        assert_eq!(percentile_rank(&history, 35.0), 75.0);
        assert_eq!(percentile_rank(&history, 100.0), 100.0);
        assert_eq!(percentile_rank(&[1.0], 5.0), 50.0);
    }

    #[test]
    fn constant_closes_have_zero_realized_vol() {
        let vol = annualized_log_return_vol(&[100.0; 20], 252.0);
        assert_eq!(vol, Some(0.0));
        assert_eq!(annualized_log_return_vol(&[100.0, 0.0], 252.0), None);
    }

    #[test]
    fn clamps_map_nan_to_zero() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_signed_unit(-3.0), -1.0);
        assert_eq!(clamp_signed_unit(f64::NAN), 0.0);
    }
}
