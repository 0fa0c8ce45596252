//! Price / cumulative-flow divergence detector.
//!
//! Detects when the price trend and the cumulative order-flow trend disagree.
//! - Bullish divergence: price falling while cumulative flow rises
//! - Bearish divergence: price rising while cumulative flow falls
//! - Hidden variants: both trending the same way, one at least twice as fast
//!
//! Trends are ordinary least-squares fits over the last `lookback` samples;
//! both fits must be steep and clean enough before a divergence is scored.

use confluence_core::cache::{CacheStats, TtlCache};
use confluence_core::config::{CacheConfig, DivergenceConfig};
use confluence_core::stats::{clamp_signed_unit, clamp_unit, linear_regression, mean};
use confluence_core::{ConfigurationError, LinearFit, MarketSample, RingBuffer};
use serde::{Deserialize, Serialize};

/// Guards the divergence ratio against two zero slopes.
const SLOPE_EPSILON: f64 = 0.001;

/// Strength multiplier applied to hidden divergences.
const HIDDEN_STRENGTH_SCALE: f64 = 0.7;

/// Slope ratio that qualifies a same-direction move as a hidden divergence.
const HIDDEN_SLOPE_RATIO: f64 = 2.0;

/// Number of recent samples compared against the window for volume confirmation.
const RECENT_VOLUME_SAMPLES: usize = 3;

/// Weight of secondary-timeframe agreement in the reversal probability.
const AGREEMENT_WEIGHT: f64 = 0.2;

/// Weight of volume confirmation in the reversal probability.
const VOLUME_WEIGHT: f64 = 0.15;

/// Kind of divergence between price and cumulative flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceType {
    /// Price falling, flow rising
    Bullish,
    /// Price rising, flow falling
    Bearish,
    /// Both falling, flow at least twice as fast
    HiddenBullish,
    /// Both rising, price at least twice as fast
    HiddenBearish,
    /// No divergence detected
    None,
}

impl DivergenceType {
    /// +1.0 for the bullish variants, -1.0 for the bearish ones, 0.0 for none.
    #[must_use]
    pub const fn direction(&self) -> f64 {
        match self {
            Self::Bullish | Self::HiddenBullish => 1.0,
            Self::Bearish | Self::HiddenBearish => -1.0,
            Self::None => 0.0,
        }
    }

    #[must_use]
    pub const fn is_hidden(&self) -> bool {
        matches!(self, Self::HiddenBullish | Self::HiddenBearish)
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Coarse band of a divergence strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceQuality {
    VeryStrong,
    Strong,
    Moderate,
    Weak,
    VeryWeak,
}

impl DivergenceQuality {
    /// Bands: > 0.8, > 0.6, > 0.4, > 0.2, else very weak.
    #[must_use]
    pub fn from_strength(strength: f64) -> Self {
        if strength > 0.8 {
            Self::VeryStrong
        } else if strength > 0.6 {
            Self::Strong
        } else if strength > 0.4 {
            Self::Moderate
        } else if strength > 0.2 {
            Self::Weak
        } else {
            Self::VeryWeak
        }
    }
}

/// Divergence detected over a single lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergenceSignal {
    /// Detected kind
    #[serde(rename = "type")]
    pub divergence_type: DivergenceType,
    /// Divergence strength in [0, 1]; 0 when the type is none
    pub strength: f64,
    /// `strength × volume_confirmation`
    pub confidence: f64,
    /// Band of `strength`
    pub quality: DivergenceQuality,
    /// Price slope per sample
    pub price_slope: f64,
    /// Cumulative flow slope per sample
    pub flow_slope: f64,
    /// R² of the price fit
    pub price_r_squared: f64,
    /// R² of the cumulative flow fit
    pub flow_r_squared: f64,
    /// Volume support for the divergence in [0, 1]
    pub volume_confirmation: f64,
    /// Window the signal was computed over
    pub lookback_periods: usize,
}

impl DivergenceSignal {
    /// Signal with no divergence.
    #[must_use]
    pub fn neutral(lookback_periods: usize) -> Self {
        Self {
            divergence_type: DivergenceType::None,
            strength: 0.0,
            confidence: 0.0,
            quality: DivergenceQuality::VeryWeak,
            price_slope: 0.0,
            flow_slope: 0.0,
            price_r_squared: 0.0,
            flow_r_squared: 0.0,
            volume_confirmation: 0.0,
            lookback_periods,
        }
    }
}

/// Full multi-timeframe divergence analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceResult {
    /// Signal over the requested lookback
    pub primary: DivergenceSignal,
    /// Non-neutral signals over the shorter and longer windows
    pub secondary: Vec<DivergenceSignal>,
    /// Strength of the primary signal
    pub divergence_strength: f64,
    /// Probability of a reversal in [0, 1]
    pub reversal_probability: f64,
    /// Directional entry signal in [-1, 1]
    pub entry_signal: f64,
    /// Volume confirmation of the primary signal
    pub volume_confirmation: f64,
    /// Samples held when the analysis ran
    pub data_points_analyzed: usize,
}

impl DivergenceResult {
    /// Analysis with nothing detected.
    #[must_use]
    pub fn neutral(lookback_periods: usize, data_points_analyzed: usize) -> Self {
        Self {
            primary: DivergenceSignal::neutral(lookback_periods),
            secondary: Vec::new(),
            divergence_strength: 0.0,
            reversal_probability: 0.0,
            entry_signal: 0.0,
            volume_confirmation: 0.0,
            data_points_analyzed,
        }
    }
}

/// Counters reported by [`DivergenceDetector::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DivergenceStats {
    /// Samples accepted into the buffers
    pub samples_ingested: u64,
    /// Samples dropped for lack of a usable price
    pub samples_dropped: u64,
    /// Analyses computed (cache misses that ran the regressions)
    pub computations: u64,
    pub bullish: u64,
    pub bearish: u64,
    pub hidden_bullish: u64,
    pub hidden_bearish: u64,
    /// Result cache counters
    pub cache: CacheStats,
}

/// Rolling price/flow history with a regression-based divergence detector.
#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    config: DivergenceConfig,
    prices: RingBuffer<f64>,
    cumulative_flow: RingBuffer<f64>,
    volumes: RingBuffer<f64>,
    /// Running total of net flow since creation or reset
    cumulative: f64,
    last_price: Option<f64>,
    cache: TtlCache<(usize, usize), DivergenceResult>,
    stats: DivergenceStats,
}

impl DivergenceDetector {
    /// Creates a detector after validating its configuration.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if either section is out of range.
    pub fn new(config: DivergenceConfig, cache: &CacheConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        cache.validate()?;

        tracing::info!(
            lookback = config.lookback,
            threshold = config.threshold,
            capacity = config.history_capacity,
            "divergence detector created"
        );

        Ok(Self {
            prices: RingBuffer::with_capacity(config.history_capacity),
            cumulative_flow: RingBuffer::with_capacity(config.history_capacity),
            volumes: RingBuffer::with_capacity(config.history_capacity),
            cumulative: 0.0,
            last_price: None,
            cache: TtlCache::new(cache.ttl(), cache.max_entries),
            stats: DivergenceStats::default(),
            config,
        })
    }

    /// Appends a sample, returning false if it had no usable price.
    ///
    /// Malformed fields are replaced rather than rejected; cached results are
    /// invalidated.
    pub fn add_sample(&mut self, sample: &MarketSample) -> bool {
        let Some(sample) = sample.sanitized(self.last_price) else {
            self.stats.samples_dropped += 1;
            return false;
        };

        self.cumulative += sample.net_flow_delta;
        self.prices.push(sample.price);
        self.cumulative_flow.push(self.cumulative);
        self.volumes.push(sample.volume);
        self.last_price = Some(sample.price);
        self.stats.samples_ingested += 1;
        self.cache.clear();
        true
    }

    /// Primary divergence signal over `lookback` (default from config).
    pub fn compute(&mut self, lookback: Option<usize>) -> DivergenceSignal {
        self.analyze(lookback).primary
    }

    /// Full analysis over `lookback` and its secondary timeframes.
    ///
    /// The lookback is clamped into the configured bounds. Fewer samples than
    /// the lookback yields a neutral result.
    pub fn analyze(&mut self, lookback: Option<usize>) -> DivergenceResult {
        let lookback = self
            .config
            .clamp_lookback(lookback.unwrap_or(self.config.lookback));
        let key = (lookback, self.prices.len());

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(lookback, "divergence cache hit");
            return cached;
        }

        let result = self.analyze_uncached(lookback);
        self.record(&result.primary);
        tracing::debug!(
            lookback,
            divergence = ?result.primary.divergence_type,
            strength = result.primary.strength,
            entry_signal = result.entry_signal,
            "divergence computed"
        );

        self.cache.insert(key, result.clone());
        result
    }

    /// Clears all history, the cache and the counters.
    pub fn reset(&mut self) {
        self.prices.clear();
        self.cumulative_flow.clear();
        self.volumes.clear();
        self.cumulative = 0.0;
        self.last_price = None;
        self.cache.reset();
        self.stats = DivergenceStats::default();
    }

    /// Number of samples held.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.prices.len()
    }

    /// Running cumulative flow.
    #[must_use]
    pub fn cumulative_flow(&self) -> f64 {
        self.cumulative
    }

    #[must_use]
    pub fn config(&self) -> &DivergenceConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> DivergenceStats {
        DivergenceStats {
            cache: self.cache.stats(),
            ..self.stats
        }
    }

    fn analyze_uncached(&self, lookback: usize) -> DivergenceResult {
        let data_points = self.prices.len();
        if data_points < lookback {
            return DivergenceResult::neutral(lookback, data_points);
        }

        let primary = self.signal_over(lookback);
        let secondary = self.secondary_signals(lookback);

        if primary.divergence_type.is_none() {
            return DivergenceResult {
                primary,
                secondary,
                ..DivergenceResult::neutral(lookback, data_points)
            };
        }

        let direction = primary.divergence_type.direction();
        let agreement = if secondary.is_empty() {
            0.0
        } else {
            let agreeing = secondary
                .iter()
                .filter(|s| s.divergence_type.direction() == direction)
                .count();
            agreeing as f64 / secondary.len() as f64
        };

        let reversal_probability = clamp_unit(
            primary.strength * primary.confidence
                + AGREEMENT_WEIGHT * agreement
                + VOLUME_WEIGHT * primary.volume_confirmation,
        );

        let mut entry_signal = direction * reversal_probability;
        if primary.volume_confirmation < self.config.volume_confirmation_threshold {
            entry_signal *= 0.5;
        }

        DivergenceResult {
            divergence_strength: primary.strength,
            reversal_probability,
            entry_signal: clamp_signed_unit(entry_signal),
            volume_confirmation: primary.volume_confirmation,
            primary,
            secondary,
            data_points_analyzed: data_points,
        }
    }

    /// Shorter and longer windows around `lookback`, kept only if they diverge.
    fn secondary_signals(&self, lookback: usize) -> Vec<DivergenceSignal> {
        let shorter = (lookback / 2).max(self.config.min_lookback);
        let longer = (lookback * 2).min(self.config.max_lookback);

        [shorter, longer]
            .into_iter()
            .filter(|&tf| tf != lookback && tf <= self.prices.len())
            .map(|tf| self.signal_over(tf))
            .filter(|s| !s.divergence_type.is_none())
            .collect()
    }

    fn signal_over(&self, lookback: usize) -> DivergenceSignal {
        let price_fit = linear_regression(self.prices.last_n(lookback));
        let flow_fit = linear_regression(self.cumulative_flow.last_n(lookback));

        let (divergence_type, strength) = classify_divergence(&price_fit, &flow_fit, &self.config);

        let volumes: Vec<f64> = self.volumes.last_n(lookback).collect();
        let cumulative: Vec<f64> = self.cumulative_flow.last_n(lookback).collect();
        let volume_confirmation = volume_confirmation(&volumes, &cumulative, divergence_type);

        DivergenceSignal {
            divergence_type,
            strength,
            confidence: clamp_unit(strength * volume_confirmation),
            quality: DivergenceQuality::from_strength(strength),
            price_slope: price_fit.slope,
            flow_slope: flow_fit.slope,
            price_r_squared: price_fit.r_squared,
            flow_r_squared: flow_fit.r_squared,
            volume_confirmation,
            lookback_periods: lookback,
        }
    }

    fn record(&mut self, signal: &DivergenceSignal) {
        self.stats.computations += 1;
        match signal.divergence_type {
            DivergenceType::Bullish => self.stats.bullish += 1,
            DivergenceType::Bearish => self.stats.bearish += 1,
            DivergenceType::HiddenBullish => self.stats.hidden_bullish += 1,
            DivergenceType::HiddenBearish => self.stats.hidden_bearish += 1,
            DivergenceType::None => {}
        }
    }
}

/// Classifies a pair of fits and returns the type with its strength.
///
/// Both slopes must clear `min_slope` and both fits `min_r_squared`. The
/// strength is the normalised slope difference scaled by the mean R², and
/// must exceed `threshold` before hidden divergences are scaled down.
#[must_use]
pub fn classify_divergence(
    price: &LinearFit,
    flow: &LinearFit,
    config: &DivergenceConfig,
) -> (DivergenceType, f64) {
    let (ps, fs) = (price.slope, flow.slope);

    if ps.abs() < config.min_slope
        || fs.abs() < config.min_slope
        || price.r_squared < config.min_r_squared
        || flow.r_squared < config.min_r_squared
    {
        return (DivergenceType::None, 0.0);
    }

    let raw = (ps - fs).abs() / (ps.abs() + fs.abs() + SLOPE_EPSILON);
    let strength = clamp_unit(raw * (price.r_squared + flow.r_squared) / 2.0);

    let divergence_type = if ps > 0.0 && fs < 0.0 {
        DivergenceType::Bearish
    } else if ps < 0.0 && fs > 0.0 {
        DivergenceType::Bullish
    } else if ps > 0.0 && fs > 0.0 && ps.abs() >= HIDDEN_SLOPE_RATIO * fs.abs() {
        DivergenceType::HiddenBearish
    } else if ps < 0.0 && fs < 0.0 && fs.abs() >= HIDDEN_SLOPE_RATIO * ps.abs() {
        DivergenceType::HiddenBullish
    } else {
        DivergenceType::None
    };

    if divergence_type.is_none() || strength <= config.threshold {
        return (DivergenceType::None, 0.0);
    }

    if divergence_type.is_hidden() {
        (divergence_type, strength * HIDDEN_STRENGTH_SCALE)
    } else {
        (divergence_type, strength)
    }
}

/// Scores how well recent volume supports a divergence, in [0, 1].
///
/// Compares the mean of the last three volumes against the window mean, and
/// checks that the cumulative flow moved the way the divergence points over
/// the same three samples.
#[must_use]
pub fn volume_confirmation(
    volumes: &[f64],
    cumulative_flow: &[f64],
    divergence_type: DivergenceType,
) -> f64 {
    let n = volumes.len().min(cumulative_flow.len());
    if n < RECENT_VOLUME_SAMPLES || divergence_type.is_none() {
        return 0.0;
    }

    let window_mean = mean(&volumes[..n]).unwrap_or(0.0);
    if window_mean <= 0.0 {
        return 0.0;
    }
    let recent_mean = mean(&volumes[n - RECENT_VOLUME_SAMPLES..n]).unwrap_or(0.0);
    let ratio = (recent_mean / window_mean).min(1.0);

    let flow_change = cumulative_flow[n - 1] - cumulative_flow[n - RECENT_VOLUME_SAMPLES];

    let agreement = match divergence_type {
        DivergenceType::Bullish if flow_change > 0.0 => 1.0,
        DivergenceType::Bearish if flow_change < 0.0 => 1.0,
        DivergenceType::Bullish | DivergenceType::Bearish => 0.5,
        DivergenceType::HiddenBullish | DivergenceType::HiddenBearish => 0.7,
        DivergenceType::None => 0.0,
    };

    clamp_unit(ratio * agreement)
}
