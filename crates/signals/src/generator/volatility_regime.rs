//! Volatility regime classifier.
//!
//! Combines the ATR ratio (current true range over its rolling mean) with an
//! external volatility-index reading to classify the market into a regime,
//! then scales entry thresholds, sizing and exits for that regime.
//!
//! Regime persistence is measured on bar timestamps so that replaying the
//! same bars always yields the same `days_in_regime`.

use chrono::{DateTime, Utc};
use confluence_core::cache::{CacheStats, TtlCache};
use confluence_core::config::{CacheConfig, RegimeConfig};
use confluence_core::stats::{
    annualized_log_return_vol, clamp_unit, linear_regression, mean, percentile_rank,
    population_std,
};
use confluence_core::{ConfigurationError, OhlcBar, RingBuffer};
use serde::{Deserialize, Serialize};

/// Reading assumed when no valid volatility-index value has been seen.
pub const DEFAULT_VOLATILITY_INDEX: f64 = 20.0;

/// Classified regimes kept for transition and stability scoring.
const REGIME_HISTORY_CAPACITY: usize = 50;
/// Closes used for realised volatility.
const REALIZED_VOL_WINDOW: usize = 20;
/// Readings used for volatility of volatility.
const VOL_OF_VOL_WINDOW: usize = 10;
/// Samples used for the trend slopes.
const TREND_WINDOW: usize = 5;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
    /// The last few classifications disagree
    Transitioning,
}

impl VolatilityRegime {
    /// Multipliers applied to the base thresholds: `(entry, size, stop, take_profit)`.
    #[must_use]
    pub const fn multipliers(&self) -> (f64, f64, f64, f64) {
        match self {
            Self::Low => (0.8, 1.2, 0.8, 0.9),
            Self::Normal => (1.0, 1.0, 1.0, 1.0),
            Self::High => (1.4, 0.8, 1.5, 1.5),
            Self::Extreme => (2.0, 0.5, 2.0, 2.0),
            Self::Transitioning => (1.2, 0.7, 1.2, 1.1),
        }
    }

    /// Exposure factor before the volatility-of-volatility adjustment.
    #[must_use]
    pub const fn base_risk_factor(&self) -> f64 {
        match self {
            Self::Low => 1.2,
            Self::Normal => 1.0,
            Self::High => 0.8,
            Self::Extreme => 0.5,
            Self::Transitioning => 0.7,
        }
    }

    /// How favourable the regime is for taking a signal, in [0, 1].
    #[must_use]
    pub const fn trading_bias(&self) -> f64 {
        match self {
            Self::Low => 0.8,
            Self::Normal => 0.5,
            Self::Transitioning => 0.35,
            Self::High => 0.2,
            Self::Extreme => 0.0,
        }
    }
}

/// Direction of recent volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityTrend {
    Decreasing,
    Stable,
    Increasing,
    Explosive,
}

impl VolatilityTrend {
    /// Classifies a combined slope.
    #[must_use]
    pub fn from_slope(slope: f64) -> Self {
        if slope > 2.0 {
            Self::Explosive
        } else if slope > 0.5 {
            Self::Increasing
        } else if slope < -0.5 {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }
}

/// Raw volatility measurements behind a classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    /// Latest true range
    pub current_atr: f64,
    /// Mean true range over `atr_period`
    pub average_atr: f64,
    /// `current_atr / average_atr`
    pub atr_ratio: f64,
    /// Latest volatility-index reading
    pub current_vix: f64,
    /// Rank of the latest reading within retained history, in [0, 100]
    pub vix_percentile: f64,
    /// Annualised realised volatility of closes, in percent
    pub realized_vol: f64,
    /// Standard deviation of recent readings
    pub vol_of_vol: f64,
}

impl Default for VolatilityMetrics {
    fn default() -> Self {
        Self {
            current_atr: 1.0,
            average_atr: 1.0,
            atr_ratio: 1.0,
            current_vix: DEFAULT_VOLATILITY_INDEX,
            vix_percentile: 50.0,
            realized_vol: DEFAULT_VOLATILITY_INDEX,
            vol_of_vol: 0.0,
        }
    }
}

/// Regime-adapted trading parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingThresholds {
    /// Minimum signal for a long entry
    pub long_threshold: f64,
    /// Maximum (negative) signal for a short entry
    pub short_threshold: f64,
    pub position_size_multiplier: f64,
    pub stop_loss_multiplier: f64,
    pub take_profit_multiplier: f64,
    /// Concurrent positions allowed
    pub max_positions: u32,
}

impl TradingThresholds {
    /// Scales the configured base values for `regime`.
    ///
    /// The size multiplier is further scaled by the ATR ratio clipped to
    /// `[0.7, 1.5]`.
    #[must_use]
    pub fn for_regime(regime: VolatilityRegime, atr_ratio: f64, config: &RegimeConfig) -> Self {
        let (entry, size, stop, take_profit) = regime.multipliers();
        let base_positions = config.base_max_positions;
        let max_positions = match regime {
            VolatilityRegime::Low => base_positions + 1,
            VolatilityRegime::Normal => base_positions,
            VolatilityRegime::High | VolatilityRegime::Transitioning => {
                base_positions.saturating_sub(1).max(1)
            }
            VolatilityRegime::Extreme => 1,
        };
        let atr_adjustment = if atr_ratio.is_finite() {
            atr_ratio.clamp(0.7, 1.5)
        } else {
            1.0
        };

        Self {
            long_threshold: config.base_long_threshold * entry,
            short_threshold: config.base_short_threshold * entry,
            position_size_multiplier: config.base_size_multiplier * size * atr_adjustment,
            stop_loss_multiplier: stop,
            take_profit_multiplier: take_profit,
            max_positions,
        }
    }
}

/// Current regime classification with adapted thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: VolatilityRegime,
    pub trend: VolatilityTrend,
    pub metrics: VolatilityMetrics,
    pub thresholds: TradingThresholds,
    /// Distance of the metrics past the regime's boundary, in [0, 1]
    pub confidence: f64,
    /// Consistency of recent classifications, in [0, 1]
    pub stability: f64,
    /// Exposure factor in [0.5, 2.0]
    pub risk_adjustment: f64,
    /// Whole days (bar time) since the regime last changed
    pub days_in_regime: u64,
    /// Timestamp of the latest bar, if any
    pub timestamp: Option<DateTime<Utc>>,
}

impl RegimeState {
    /// State reported before enough bars have been seen.
    #[must_use]
    pub fn baseline(config: &RegimeConfig) -> Self {
        Self {
            regime: VolatilityRegime::Normal,
            trend: VolatilityTrend::Stable,
            metrics: VolatilityMetrics::default(),
            thresholds: TradingThresholds::for_regime(VolatilityRegime::Normal, 1.0, config),
            confidence: 0.5,
            stability: 0.5,
            risk_adjustment: 1.0,
            days_in_regime: 0,
            timestamp: None,
        }
    }
}

/// Counters reported by [`VolatilityRegimeClassifier::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub bars_ingested: u64,
    pub bars_dropped: u64,
    /// Classifications computed from history
    pub computations: u64,
    pub regime_changes: u64,
    pub cache: CacheStats,
}

/// Rolling bar and volatility-index history with a regime classifier.
#[derive(Debug, Clone)]
pub struct VolatilityRegimeClassifier {
    config: RegimeConfig,
    true_ranges: RingBuffer<f64>,
    vix: RingBuffer<f64>,
    closes: RingBuffer<f64>,
    prev_close: Option<f64>,
    last_vix: Option<f64>,
    last_timestamp: Option<DateTime<Utc>>,
    /// Bars accepted since creation or reset
    bars_seen: u64,
    /// `bars_seen` when the regime history was last appended
    tracked_bars: u64,
    regime_history: RingBuffer<VolatilityRegime>,
    current_regime: Option<VolatilityRegime>,
    regime_start: Option<DateTime<Utc>>,
    cache: TtlCache<u64, RegimeState>,
    stats: RegimeStats,
}

impl VolatilityRegimeClassifier {
    /// Creates a classifier after validating its configuration.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if either section is out of range.
    pub fn new(config: RegimeConfig, cache: &CacheConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        cache.validate()?;

        tracing::info!(
            atr_period = config.atr_period,
            vix_low = config.vix_low_threshold,
            vix_high = config.vix_high_threshold,
            capacity = config.history_capacity,
            "volatility regime classifier created"
        );

        Ok(Self {
            true_ranges: RingBuffer::with_capacity(config.history_capacity),
            vix: RingBuffer::with_capacity(config.history_capacity),
            closes: RingBuffer::with_capacity(config.history_capacity),
            prev_close: None,
            last_vix: None,
            last_timestamp: None,
            bars_seen: 0,
            tracked_bars: 0,
            regime_history: RingBuffer::with_capacity(REGIME_HISTORY_CAPACITY),
            current_regime: None,
            regime_start: None,
            cache: TtlCache::new(cache.ttl(), cache.max_entries),
            stats: RegimeStats::default(),
            config,
        })
    }

    /// Appends a bar with its volatility-index reading.
    ///
    /// Returns false if the bar had no usable close and no previous close to
    /// fall back to.
    pub fn add_bar(&mut self, bar: &OhlcBar, volatility_index: f64) -> bool {
        let Some(bar) = bar.sanitized(self.prev_close) else {
            self.stats.bars_dropped += 1;
            return false;
        };

        let reading = if volatility_index.is_finite() && volatility_index >= 0.0 {
            volatility_index
        } else {
            let fallback = self.last_vix.unwrap_or(DEFAULT_VOLATILITY_INDEX);
            tracing::warn!(volatility_index, fallback, "replacing invalid volatility reading");
            fallback
        };

        self.true_ranges.push(bar.true_range(self.prev_close));
        self.vix.push(reading);
        self.closes.push(bar.close);
        self.prev_close = Some(bar.close);
        self.last_vix = Some(reading);
        self.last_timestamp = Some(bar.timestamp);
        self.bars_seen += 1;
        self.stats.bars_ingested += 1;
        self.cache.clear();
        true
    }

    /// Classifies the current regime.
    ///
    /// Returns [`RegimeState::baseline`] until `atr_period` bars and
    /// `min_vix_readings` readings are available.
    pub fn compute(&mut self) -> RegimeState {
        let key = self.bars_seen;
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(bars = key, "regime cache hit");
            return cached;
        }

        if self.true_ranges.len() < self.config.atr_period
            || self.vix.len() < self.config.min_vix_readings
        {
            return RegimeState {
                timestamp: self.last_timestamp,
                ..RegimeState::baseline(&self.config)
            };
        }

        let metrics = self.metrics();
        let regime = self.classify(&metrics);
        let trend = self.trend();
        let thresholds = TradingThresholds::for_regime(regime, metrics.atr_ratio, &self.config);
        let confidence = self.confidence(regime, &metrics);
        let risk_adjustment = risk_adjustment(regime, metrics.vol_of_vol);

        let days_in_regime = self.track_regime(regime);
        let stability = self.stability(regime, days_in_regime);
        if self.tracked_bars != self.bars_seen {
            self.regime_history.push(regime);
            self.tracked_bars = self.bars_seen;
        }

        let state = RegimeState {
            regime,
            trend,
            metrics,
            thresholds,
            confidence,
            stability,
            risk_adjustment,
            days_in_regime,
            timestamp: self.last_timestamp,
        };

        self.stats.computations += 1;
        tracing::debug!(
            regime = ?state.regime,
            trend = ?state.trend,
            atr_ratio = metrics.atr_ratio,
            vix = metrics.current_vix,
            confidence,
            "regime computed"
        );

        self.cache.insert(key, state);
        state
    }

    /// Clears all history, regime tracking, the cache and the counters.
    pub fn reset(&mut self) {
        self.true_ranges.clear();
        self.vix.clear();
        self.closes.clear();
        self.prev_close = None;
        self.last_vix = None;
        self.last_timestamp = None;
        self.bars_seen = 0;
        self.tracked_bars = 0;
        self.regime_history.clear();
        self.current_regime = None;
        self.regime_start = None;
        self.cache.reset();
        self.stats = RegimeStats::default();
    }

    /// Regime of the last classification, if any.
    #[must_use]
    pub fn current_regime(&self) -> Option<VolatilityRegime> {
        self.current_regime
    }

    /// Number of bars held.
    #[must_use]
    pub fn bar_count(&self) -> usize {
        self.true_ranges.len()
    }

    #[must_use]
    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> RegimeStats {
        RegimeStats {
            cache: self.cache.stats(),
            ..self.stats
        }
    }

    fn metrics(&self) -> VolatilityMetrics {
        let current_atr = self.true_ranges.last().unwrap_or(0.0);
        let window: Vec<f64> = self.true_ranges.last_n(self.config.atr_period).collect();
        let average_atr = mean(&window).unwrap_or(0.0);
        let atr_ratio = if average_atr > 0.0 {
            current_atr / average_atr
        } else {
            1.0
        };

        let current_vix = self.vix.last().unwrap_or(DEFAULT_VOLATILITY_INDEX);
        let readings: Vec<f64> = self.vix.iter().collect();
        let vix_percentile = percentile_rank(&readings, current_vix);

        let realized_vol = if self.closes.len() >= REALIZED_VOL_WINDOW {
            let closes: Vec<f64> = self.closes.last_n(REALIZED_VOL_WINDOW).collect();
            annualized_log_return_vol(&closes, TRADING_DAYS_PER_YEAR).unwrap_or(current_vix)
        } else {
            current_vix
        };

        let recent: Vec<f64> = self.vix.last_n(VOL_OF_VOL_WINDOW).collect();
        let vol_of_vol = population_std(&recent);

        VolatilityMetrics {
            current_atr,
            average_atr,
            atr_ratio,
            current_vix,
            vix_percentile,
            realized_vol,
            vol_of_vol,
        }
    }

    fn classify(&self, metrics: &VolatilityMetrics) -> VolatilityRegime {
        let config = &self.config;
        let (vix, ratio) = (metrics.current_vix, metrics.atr_ratio);

        if vix > config.vix_extreme_threshold || ratio > config.atr_extreme_ratio {
            return VolatilityRegime::Extreme;
        }
        if vix > config.vix_high_threshold || ratio > config.atr_high_ratio {
            return VolatilityRegime::High;
        }
        if vix < config.vix_low_threshold && ratio < config.atr_low_ratio {
            return VolatilityRegime::Low;
        }
        if self.is_transitioning() {
            return VolatilityRegime::Transitioning;
        }
        VolatilityRegime::Normal
    }

    /// True when the last three classifications are not all the same.
    fn is_transitioning(&self) -> bool {
        if self.regime_history.len() < 3 {
            return false;
        }
        let mut recent = self.regime_history.last_n(3);
        let first = recent.next();
        recent.any(|r| Some(r) != first)
    }

    fn trend(&self) -> VolatilityTrend {
        if self.vix.len() < TREND_WINDOW {
            return VolatilityTrend::Stable;
        }
        let vix_slope = linear_regression(self.vix.last_n(TREND_WINDOW)).slope;
        let atr_slope = linear_regression(self.true_ranges.last_n(TREND_WINDOW)).slope;
        VolatilityTrend::from_slope((vix_slope + atr_slope * 10.0) / 2.0)
    }

    fn confidence(&self, regime: VolatilityRegime, metrics: &VolatilityMetrics) -> f64 {
        let config = &self.config;
        let (vix, ratio) = (metrics.current_vix, metrics.atr_ratio);

        let confidence = match regime {
            VolatilityRegime::Low => {
                let vix_distance = (config.vix_low_threshold - vix) / config.vix_low_threshold;
                let atr_distance = (config.atr_low_ratio - ratio) / config.atr_low_ratio;
                (vix_distance + atr_distance) / 2.0
            }
            VolatilityRegime::High => {
                let vix_distance = (vix - config.vix_high_threshold) / config.vix_high_threshold;
                let atr_distance = (ratio - config.atr_high_ratio) / config.atr_high_ratio;
                (vix_distance + atr_distance) / 2.0
            }
            VolatilityRegime::Extreme => 0.9,
            VolatilityRegime::Normal | VolatilityRegime::Transitioning => 0.6,
        };
        clamp_unit(confidence)
    }

    /// Blends agreement of the last five classifications with time in regime.
    fn stability(&self, regime: VolatilityRegime, days_in_regime: u64) -> f64 {
        if self.regime_history.len() < 5 {
            return 0.5;
        }
        let matching = self.regime_history.last_n(5).filter(|r| *r == regime).count();
        let consistency = matching as f64 / 5.0;
        let time_bonus = (days_in_regime as f64 / 5.0).min(1.0);
        clamp_unit(consistency * 0.7 + time_bonus * 0.3)
    }

    /// Updates the regime start on change and returns whole days in regime.
    fn track_regime(&mut self, regime: VolatilityRegime) -> u64 {
        let now = self.last_timestamp;
        match self.current_regime {
            Some(current) if current == regime => {}
            Some(previous) => {
                self.stats.regime_changes += 1;
                tracing::info!(from = ?previous, to = ?regime, "volatility regime changed");
                self.current_regime = Some(regime);
                self.regime_start = now;
            }
            None => {
                tracing::info!(regime = ?regime, "initial volatility regime");
                self.current_regime = Some(regime);
                self.regime_start = now;
            }
        }

        match (self.regime_start, now) {
            (Some(start), Some(now)) => u64::try_from((now - start).num_days()).unwrap_or(0),
            _ => 0,
        }
    }
}

/// Exposure factor for `regime`, reduced as volatility of volatility rises.
///
/// Always in `[0.5, 2.0]`.
#[must_use]
pub fn risk_adjustment(regime: VolatilityRegime, vol_of_vol: f64) -> f64 {
    let vol_of_vol_factor = if vol_of_vol.is_finite() {
        (1.0 - vol_of_vol / 20.0).clamp(0.5, 1.2)
    } else {
        0.5
    };
    (regime.base_risk_factor() * vol_of_vol_factor).clamp(0.5, 2.0)
}
