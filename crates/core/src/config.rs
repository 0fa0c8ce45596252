use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_ordered, ensure_range, ConfigurationError, WEIGHT_SUM_TOLERANCE};

/// Feature key of the divergence entry signal in the confluence weight table.
pub const DIVERGENCE_FEATURE: &str = "divergence";
/// Feature key of the order book pressure score.
pub const ORDER_BOOK_FEATURE: &str = "order_book";
/// Feature key of the volatility regime score.
pub const VOLATILITY_REGIME_FEATURE: &str = "volatility_regime";
/// Caller-supplied trend strength feature.
pub const TREND_STRENGTH_FEATURE: &str = "trend_strength";
/// Caller-supplied session context feature.
pub const SESSION_CONTEXT_FEATURE: &str = "session_context";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub divergence: DivergenceConfig,
    pub regime: RegimeConfig,
    pub book: BookPressureConfig,
    pub confluence: ConfluenceConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Validates every section.
    ///
    /// # Errors
    /// Returns the first `ConfigurationError` found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.divergence.validate()?;
        self.regime.validate()?;
        self.book.validate()?;
        self.confluence.validate()?;
        self.cache.validate()
    }
}

/// Price/flow divergence detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Default regression window
    pub lookback: usize,
    /// Smallest window a caller may request
    pub min_lookback: usize,
    /// Largest window a caller may request
    pub max_lookback: usize,
    /// Strength a divergence must exceed to be classified
    pub threshold: f64,
    /// Volume confirmation below which the entry signal is halved
    pub volume_confirmation_threshold: f64,
    /// Minimum |slope| for a trend to count
    pub min_slope: f64,
    /// Minimum R² for a trend to count
    pub min_r_squared: f64,
    /// Samples retained per instrument
    pub history_capacity: usize,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            lookback: 10,
            min_lookback: 5,
            max_lookback: 20,
            threshold: 0.7,
            volume_confirmation_threshold: 0.5,
            min_slope: 0.1,
            min_r_squared: 0.3,
            history_capacity: 100,
        }
    }
}

impl DivergenceConfig {
    /// Clamps a requested window into `[min_lookback, max_lookback]`.
    #[must_use]
    pub fn clamp_lookback(&self, lookback: usize) -> usize {
        lookback.clamp(self.min_lookback, self.max_lookback)
    }

    /// Validates this section.
    ///
    /// # Errors
    /// Returns the first out-of-range or mis-ordered option.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ensure_range(
            "divergence.min_lookback",
            self.min_lookback as f64,
            3.0,
            self.max_lookback as f64,
            "[3, max_lookback]",
        )?;
        ensure_range(
            "divergence.lookback",
            self.lookback as f64,
            self.min_lookback as f64,
            self.max_lookback as f64,
            "[min_lookback, max_lookback]",
        )?;
        ensure_range(
            "divergence.history_capacity",
            self.history_capacity as f64,
            self.max_lookback as f64,
            1_000_000.0,
            "[max_lookback, 1000000]",
        )?;
        ensure_range("divergence.threshold", self.threshold, 0.0, 1.0, "[0, 1]")?;
        ensure_range(
            "divergence.volume_confirmation_threshold",
            self.volume_confirmation_threshold,
            0.0,
            1.0,
            "[0, 1]",
        )?;
        ensure_range("divergence.min_slope", self.min_slope, 0.0, f64::MAX, "[0, inf)")?;
        ensure_range("divergence.min_r_squared", self.min_r_squared, 0.0, 1.0, "[0, 1]")
    }
}

/// Volatility regime classification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// True-range samples averaged for the ATR
    pub atr_period: usize,
    /// Volatility-index readings required before classifying
    pub min_vix_readings: usize,
    /// Reading below which (with a low ATR ratio) the regime is low
    pub vix_low_threshold: f64,
    /// Reading above which the regime is high
    pub vix_high_threshold: f64,
    /// Reading above which the regime is extreme
    pub vix_extreme_threshold: f64,
    /// ATR ratio below which (with a low reading) the regime is low
    pub atr_low_ratio: f64,
    /// ATR ratio above which the regime is high
    pub atr_high_ratio: f64,
    /// ATR ratio above which the regime is extreme
    pub atr_extreme_ratio: f64,
    /// Base long entry threshold before regime scaling
    pub base_long_threshold: f64,
    /// Base short entry threshold before regime scaling
    pub base_short_threshold: f64,
    /// Base position size multiplier
    pub base_size_multiplier: f64,
    /// Concurrent positions allowed in a normal regime
    pub base_max_positions: u32,
    /// Bars retained per instrument
    pub history_capacity: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            atr_period: 20,
            min_vix_readings: 10,
            vix_low_threshold: 15.0,
            vix_high_threshold: 25.0,
            vix_extreme_threshold: 35.0,
            atr_low_ratio: 0.8,
            atr_high_ratio: 1.5,
            atr_extreme_ratio: 2.0,
            base_long_threshold: 0.25,
            base_short_threshold: -0.25,
            base_size_multiplier: 1.0,
            base_max_positions: 3,
            history_capacity: 500,
        }
    }
}

impl RegimeConfig {
    /// Validates this section.
    ///
    /// # Errors
    /// Returns the first out-of-range or mis-ordered option.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ensure_range(
            "regime.atr_period",
            self.atr_period as f64,
            5.0,
            self.history_capacity as f64,
            "[5, history_capacity]",
        )?;
        ensure_range(
            "regime.min_vix_readings",
            self.min_vix_readings as f64,
            5.0,
            self.history_capacity as f64,
            "[5, history_capacity]",
        )?;
        ensure_range("regime.vix_low_threshold", self.vix_low_threshold, 0.0, 1000.0, "[0, 1000]")?;
        ensure_ordered(
            "regime.vix_low_threshold",
            self.vix_low_threshold,
            "regime.vix_high_threshold",
            self.vix_high_threshold,
        )?;
        ensure_ordered(
            "regime.vix_high_threshold",
            self.vix_high_threshold,
            "regime.vix_extreme_threshold",
            self.vix_extreme_threshold,
        )?;
        ensure_range("regime.atr_low_ratio", self.atr_low_ratio, 0.0, 100.0, "[0, 100]")?;
        ensure_ordered(
            "regime.atr_low_ratio",
            self.atr_low_ratio,
            "regime.atr_high_ratio",
            self.atr_high_ratio,
        )?;
        ensure_ordered(
            "regime.atr_high_ratio",
            self.atr_high_ratio,
            "regime.atr_extreme_ratio",
            self.atr_extreme_ratio,
        )?;
        ensure_range("regime.base_long_threshold", self.base_long_threshold, 0.0, 1.0, "[0, 1]")?;
        ensure_range(
            "regime.base_short_threshold",
            self.base_short_threshold,
            -1.0,
            0.0,
            "[-1, 0]",
        )?;
        ensure_range(
            "regime.base_size_multiplier",
            self.base_size_multiplier,
            0.0,
            10.0,
            "[0, 10]",
        )?;
        ensure_range(
            "regime.base_max_positions",
            f64::from(self.base_max_positions),
            2.0,
            100.0,
            "[2, 100]",
        )
    }
}

/// Largest number of levels per side the book calculator will weigh.
pub const MAX_DEPTH_LEVELS: usize = 100;

/// Order book pressure settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookPressureConfig {
    /// Levels per side included in the weighted volume
    pub depth_levels: usize,
    /// Geometric weight decay per level
    pub decay: f64,
    /// Visible size at which the liquidity volume score saturates
    pub reference_size: f64,
    /// Spread (bps) beyond which the directional signal is penalised
    pub wide_spread_bps: f64,
}

impl Default for BookPressureConfig {
    fn default() -> Self {
        Self {
            depth_levels: 5,
            decay: 0.8,
            reference_size: 1000.0,
            wide_spread_bps: 50.0,
        }
    }
}

impl BookPressureConfig {
    /// Validates this section.
    ///
    /// # Errors
    /// Returns the first out-of-range or mis-ordered option.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ensure_range(
            "book.depth_levels",
            self.depth_levels as f64,
            1.0,
            MAX_DEPTH_LEVELS as f64,
            "[1, 100]",
        )?;
        ensure_range("book.decay", self.decay, f64::MIN_POSITIVE, 1.0, "(0, 1]")?;
        ensure_range(
            "book.reference_size",
            self.reference_size,
            f64::MIN_POSITIVE,
            f64::MAX,
            "(0, inf)",
        )?;
        ensure_range("book.wide_spread_bps", self.wide_spread_bps, 0.0, 10_000.0, "[0, 10000]")
    }
}

/// Confluence weights and tier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    /// Feature key -> weight; must sum to 1.0
    pub weights: BTreeMap<String, f64>,
    /// Composite score at or above which the tier is premium
    pub premium_threshold: f64,
    /// Composite score at or above which the tier is strong
    pub strong_threshold: f64,
    /// Composite score at or above which the tier is weak
    pub weak_threshold: f64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            premium_threshold: 0.85,
            strong_threshold: 0.70,
            weak_threshold: 0.60,
        }
    }
}

/// Default confluence weight table.
#[must_use]
pub fn default_weights() -> BTreeMap<String, f64> {
    [
        (DIVERGENCE_FEATURE, 0.30),
        (ORDER_BOOK_FEATURE, 0.25),
        (VOLATILITY_REGIME_FEATURE, 0.20),
        (TREND_STRENGTH_FEATURE, 0.15),
        (SESSION_CONTEXT_FEATURE, 0.10),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Checks a weight table: non-empty, every weight finite and non-negative,
/// sum equal to 1.0 within `WEIGHT_SUM_TOLERANCE`.
///
/// # Errors
/// Returns the matching `ConfigurationError` variant.
pub fn validate_weights(weights: &BTreeMap<String, f64>) -> Result<(), ConfigurationError> {
    if weights.is_empty() {
        return Err(ConfigurationError::EmptyWeights);
    }
    if let Some((key, &value)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(ConfigurationError::InvalidWeight {
            key: key.clone(),
            value,
        });
    }
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigurationError::WeightSum {
            sum,
            tolerance: WEIGHT_SUM_TOLERANCE,
        });
    }
    Ok(())
}

impl ConfluenceConfig {
    /// Validates this section.
    ///
    /// # Errors
    /// Returns the first out-of-range or mis-ordered option.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_weights(&self.weights)?;
        ensure_range(
            "confluence.weak_threshold",
            self.weak_threshold,
            f64::MIN_POSITIVE,
            1.0,
            "(0, 1]",
        )?;
        ensure_range(
            "confluence.premium_threshold",
            self.premium_threshold,
            f64::MIN_POSITIVE,
            1.0,
            "(0, 1]",
        )?;
        ensure_ordered(
            "confluence.weak_threshold",
            self.weak_threshold,
            "confluence.strong_threshold",
            self.strong_threshold,
        )?;
        ensure_ordered(
            "confluence.strong_threshold",
            self.strong_threshold,
            "confluence.premium_threshold",
            self.premium_threshold,
        )
    }
}

/// Result cache settings shared by every detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached result
    pub ttl_seconds: f64,
    /// Maximum cached results per detector
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3.0,
            max_entries: 30,
        }
    }
}

impl CacheConfig {
    /// TTL as a `Duration`.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.ttl_seconds.max(0.0))
    }

    /// Validates this section.
    ///
    /// # Errors
    /// Returns the first out-of-range or mis-ordered option.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ensure_range("cache.ttl_seconds", self.ttl_seconds, 0.0, 3600.0, "[0, 3600]")?;
        ensure_range(
            "cache.max_entries",
            self.max_entries as f64,
            1.0,
            10_000.0,
            "[1, 10000]",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn default_weights_sum_to_one() {
        let sum: f64 = default_weights().values().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weights_summing_to_point_nine_are_rejected() {
        let mut weights = default_weights();
        weights.insert(SESSION_CONTEXT_FEATURE.to_string(), 0.0);

        match validate_weights(&weights) {
            Err(ConfigurationError::WeightSum { sum, .. }) => {
                assert!((sum - 0.9).abs() < 1e-9);
            }
            other => panic!("expected WeightSum, got {other:?}"),
        }
    }

    #[test]
    fn weights_within_tolerance_are_accepted() {
        let mut weights = default_weights();
        weights.insert(SESSION_CONTEXT_FEATURE.to_string(), 0.1009);
        assert!(validate_weights(&weights).is_ok());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut weights = BTreeMap::new();
        weights.insert("a".to_string(), 1.2);
        weights.insert("b".to_string(), -0.2);
        assert!(matches!(
            validate_weights(&weights),
            Err(ConfigurationError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn empty_weights_are_rejected() {
        assert_eq!(
            validate_weights(&BTreeMap::new()),
            Err(ConfigurationError::EmptyWeights)
        );
    }

    #[test]
    fn inverted_vix_thresholds_are_rejected() {
        let mut config = EngineConfig::default();
        config.regime.vix_low_threshold = 30.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidOrdering { .. })
        ));
    }

    #[test]
    fn divergence_threshold_out_of_range_is_rejected() {
        let mut config = EngineConfig::default();
        config.divergence.threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::OutOfRange {
                field: "divergence.threshold",
                ..
            })
        ));
    }

    #[test]
    fn zero_decay_is_rejected() {
        let mut config = EngineConfig::default();
        config.book.decay = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tier_thresholds_must_be_ordered() {
        let mut config = EngineConfig::default();
        config.confluence.strong_threshold = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn lookback_clamped_to_bounds() {
        let config = DivergenceConfig::default();
        assert_eq!(config.clamp_lookback(2), 5);
        assert_eq!(config.clamp_lookback(12), 12);
        assert_eq!(config.clamp_lookback(50), 20);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "divergence": { "threshold": 0.6 }, "cache": { "max_entries": 8 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.divergence.threshold, 0.6);
        assert_eq!(config.divergence.lookback, 10);
        assert_eq!(config.cache.max_entries, 8);
        assert_eq!(config.regime, RegimeConfig::default());
    }
}
