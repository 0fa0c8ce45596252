//! Order book pressure calculator.
//!
//! Turns a depth snapshot into a directional pressure signal. Sizes are
//! weighted geometrically by level so the touch dominates, and the result is
//! damped by thin books and wide spreads.
//!
//! Sign convention: `imbalance = (bid − ask) / (bid + ask)`, positive means
//! resting buy interest dominates.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use confluence_core::cache::{CacheStats, TtlCache};
use confluence_core::config::{BookPressureConfig, CacheConfig, MAX_DEPTH_LEVELS};
use confluence_core::stats::{clamp_signed_unit, clamp_unit};
use confluence_core::{ConfigurationError, DepthSnapshot, PriceLevel};
use serde::{Deserialize, Serialize};

/// Pressure measurements of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookPressure {
    /// Decay-weighted imbalance over the top levels, in [-1, 1]
    pub imbalance: f64,
    /// Imbalance of the best level alone, in [-1, 1]
    pub level1_imbalance: f64,
    /// Spread in basis points of the mid price
    pub spread_bps: f64,
    /// Depth and size of the visible book, in [0, 1]
    pub liquidity_score: f64,
    /// Share of visible size on the bid, in [0, 1]
    pub volume_ratio: f64,
    /// Imbalance damped by liquidity and spread, in [-1, 1]
    pub signal_strength: f64,
    pub bid_weighted_volume: f64,
    pub ask_weighted_volume: f64,
    /// Levels per side that were considered
    pub depth_levels: usize,
    pub timestamp: DateTime<Utc>,
}

impl BookPressure {
    /// Pressure of an empty book.
    #[must_use]
    pub fn neutral(timestamp: DateTime<Utc>, depth_levels: usize) -> Self {
        Self {
            imbalance: 0.0,
            level1_imbalance: 0.0,
            spread_bps: 0.0,
            liquidity_score: 0.0,
            volume_ratio: 0.5,
            signal_strength: 0.0,
            bid_weighted_volume: 0.0,
            ask_weighted_volume: 0.0,
            depth_levels,
            timestamp,
        }
    }

    /// `signal_strength` remapped to [0, 1] for confluence scoring.
    #[must_use]
    pub fn feature_score(&self) -> f64 {
        clamp_unit((self.signal_strength + 1.0) / 2.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BookPressureStats {
    /// Snapshots passed to `compute`
    pub snapshots_evaluated: u64,
    /// Snapshots that had to be computed
    pub computations: u64,
    pub cache: CacheStats,
}

type PressureKey = (i64, usize, u64, u64);

/// Stateless pressure calculator with a short result cache.
#[derive(Debug, Clone)]
pub struct OrderBookPressureCalculator {
    config: BookPressureConfig,
    cache: TtlCache<PressureKey, BookPressure>,
    stats: BookPressureStats,
}

impl OrderBookPressureCalculator {
    /// # Errors
    /// Returns `ConfigurationError` if either section is out of range.
    pub fn new(
        config: BookPressureConfig,
        cache: &CacheConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        cache.validate()?;

        tracing::info!(
            depth_levels = config.depth_levels,
            decay = config.decay,
            "order book pressure calculator created"
        );

        Ok(Self {
            cache: TtlCache::new(cache.ttl(), cache.max_entries),
            stats: BookPressureStats::default(),
            config,
        })
    }

    /// Pressure of `snapshot` with the configured depth and decay.
    pub fn compute(&mut self, snapshot: &DepthSnapshot) -> BookPressure {
        self.compute_with(snapshot, self.config.depth_levels, self.config.decay)
    }

    /// Pressure of `snapshot` over `depth_levels` levels with weight `decay^i`.
    ///
    /// Out-of-range parameters fall back to the configured values.
    pub fn compute_with(
        &mut self,
        snapshot: &DepthSnapshot,
        depth_levels: usize,
        decay: f64,
    ) -> BookPressure {
        self.stats.snapshots_evaluated += 1;

        let depth_levels = if (1..=MAX_DEPTH_LEVELS).contains(&depth_levels) {
            depth_levels
        } else {
            tracing::warn!(depth_levels, "depth_levels outside [1, 100], using configured value");
            self.config.depth_levels
        };
        let decay = if decay.is_finite() && decay > 0.0 && decay <= 1.0 {
            decay
        } else {
            tracing::warn!(decay, "decay outside (0, 1], using configured value");
            self.config.decay
        };

        let key = (
            snapshot.timestamp.timestamp_millis(),
            depth_levels,
            decay.to_bits(),
            fingerprint(snapshot, depth_levels),
        );
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!("book pressure cache hit");
            return cached;
        }

        let pressure = calculate_pressure(&snapshot.sanitized(), depth_levels, decay, &self.config);
        self.stats.computations += 1;
        tracing::debug!(
            imbalance = pressure.imbalance,
            spread_bps = pressure.spread_bps,
            liquidity = pressure.liquidity_score,
            "book pressure computed"
        );

        self.cache.insert(key, pressure);
        pressure
    }

    /// Clears the cache and counters.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.stats = BookPressureStats::default();
    }

    #[must_use]
    pub fn config(&self) -> &BookPressureConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> BookPressureStats {
        BookPressureStats {
            cache: self.cache.stats(),
            ..self.stats
        }
    }
}

/// Hash of the top `depth_levels` of both sides.
fn fingerprint(snapshot: &DepthSnapshot, depth_levels: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    for side in [&snapshot.bids, &snapshot.asks] {
        side.len().min(depth_levels).hash(&mut hasher);
        for level in side.iter().take(depth_levels) {
            level.price.to_bits().hash(&mut hasher);
            level.size.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Computes pressure for an already sanitised snapshot.
#[must_use]
pub fn calculate_pressure(
    snapshot: &DepthSnapshot,
    depth_levels: usize,
    decay: f64,
    config: &BookPressureConfig,
) -> BookPressure {
    if snapshot.bids.is_empty() && snapshot.asks.is_empty() {
        return BookPressure::neutral(snapshot.timestamp, depth_levels);
    }

    let bid_weighted = weighted_volume(&snapshot.bids, depth_levels, decay);
    let ask_weighted = weighted_volume(&snapshot.asks, depth_levels, decay);
    let imbalance = calculate_imbalance(bid_weighted, ask_weighted);

    let level1_imbalance = calculate_imbalance(
        snapshot.bids.first().map_or(0.0, |l| l.size),
        snapshot.asks.first().map_or(0.0, |l| l.size),
    );

    let bid_total = visible_size(&snapshot.bids, depth_levels);
    let ask_total = visible_size(&snapshot.asks, depth_levels);
    let volume_ratio = if bid_total + ask_total > 0.0 {
        bid_total / (bid_total + ask_total)
    } else {
        0.5
    };

    let spread_bps = spread_bps(snapshot);
    let liquidity_score = liquidity_score(snapshot, depth_levels, config.reference_size);

    let spread_penalty = if spread_bps > config.wide_spread_bps {
        (1.0 - (spread_bps - config.wide_spread_bps) / 100.0).max(0.5)
    } else {
        1.0
    };
    let signal_strength = clamp_signed_unit(imbalance * liquidity_score * spread_penalty);

    BookPressure {
        imbalance,
        level1_imbalance,
        spread_bps,
        liquidity_score,
        volume_ratio,
        signal_strength,
        bid_weighted_volume: bid_weighted,
        ask_weighted_volume: ask_weighted,
        depth_levels,
        timestamp: snapshot.timestamp,
    }
}

/// `Σ size_i × decay^i` over the first `depth_levels` levels present.
#[must_use]
pub fn weighted_volume(levels: &[PriceLevel], depth_levels: usize, decay: f64) -> f64 {
    let mut weight = 1.0;
    let mut total = 0.0;
    for level in levels.iter().take(depth_levels) {
        total += level.size * weight;
        weight *= decay;
    }
    total
}

/// `(bid − ask) / (bid + ask)`, 0 when both sides are empty.
#[must_use]
pub fn calculate_imbalance(bid: f64, ask: f64) -> f64 {
    let total = bid + ask;
    if total <= 0.0 {
        return 0.0;
    }
    clamp_signed_unit((bid - ask) / total)
}

fn visible_size(levels: &[PriceLevel], depth_levels: usize) -> f64 {
    levels.iter().take(depth_levels).map(|l| l.size).sum()
}

/// Spread in basis points of the mid, 0 for one-sided or crossed books.
fn spread_bps(snapshot: &DepthSnapshot) -> f64 {
    let (Some(bid), Some(ask), Some(mid)) =
        (snapshot.best_bid(), snapshot.best_ask(), snapshot.mid_price())
    else {
        return 0.0;
    };
    if ask < bid {
        tracing::warn!(bid, ask, "crossed book, treating spread as 0");
        return 0.0;
    }
    (ask - bid) / mid * 10_000.0
}

/// Blend of visible size (70%) and populated levels (30%), in [0, 1].
fn liquidity_score(snapshot: &DepthSnapshot, depth_levels: usize, reference_size: f64) -> f64 {
    let visible =
        visible_size(&snapshot.bids, depth_levels) + visible_size(&snapshot.asks, depth_levels);
    let active = [&snapshot.bids, &snapshot.asks]
        .iter()
        .map(|side| side.iter().take(depth_levels).filter(|l| l.size > 0.0).count())
        .sum::<usize>();

    let size_score = (visible / reference_size).min(1.0);
    let depth_score = active as f64 / depth_levels.saturating_mul(2).max(1) as f64;
    clamp_unit(0.7 * size_score + 0.3 * depth_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn calculator() -> OrderBookPressureCalculator {
        OrderBookPressureCalculator::new(BookPressureConfig::default(), &CacheConfig::default())
            .unwrap()
    }

    fn snapshot(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> DepthSnapshot {
        DepthSnapshot::from_pairs(DateTime::<Utc>::UNIX_EPOCH, bids, asks)
    }

    fn deep_book(bid_size: f64, ask_size: f64) -> DepthSnapshot {
        let bids: Vec<(f64, f64)> = (0..5).map(|i| (4500.0 - 0.25 * i as f64, bid_size)).collect();
        let asks: Vec<(f64, f64)> = (0..5).map(|i| (4500.25 + 0.25 * i as f64, ask_size)).collect();
        snapshot(&bids, &asks)
    }

    // ============================================
    // Imbalance Tests
    // ============================================

    #[test]
    fn equal_single_levels_are_balanced() {
        let p = calculator().compute(&snapshot(&[(100.0, 50.0)], &[(101.0, 50.0)]));
        assert_eq!(p.imbalance, 0.0);
        assert_eq!(p.level1_imbalance, 0.0);
        assert_eq!(p.volume_ratio, 0.5);
    }

    #[test]
    fn larger_bid_is_buy_pressure() {
        let p = calculator().compute(&snapshot(&[(100.0, 100.0)], &[(101.0, 50.0)]));
        assert!(p.imbalance > 0.0);
        assert!((p.imbalance - 1.0 / 3.0).abs() < 1e-12);
        assert!(p.signal_strength > 0.0);
    }

    #[test]
    fn larger_ask_is_sell_pressure() {
        let p = calculator().compute(&deep_book(100.0, 300.0));
        assert!((p.imbalance + 0.5).abs() < 1e-12);
        assert!(p.signal_strength < 0.0);
        assert!(p.feature_score() < 0.5);
    }

    #[test]
    fn weighted_volume_decays_by_level() {
        let levels: Vec<PriceLevel> = [(100.0, 10.0), (99.0, 10.0), (98.0, 10.0)]
            .into_iter()
            .map(PriceLevel::from)
            .collect();
        assert!((weighted_volume(&levels, 5, 0.8) - (10.0 + 8.0 + 6.4)).abs() < 1e-12);
        assert!((weighted_volume(&levels, 2, 0.8) - 18.0).abs() < 1e-12);
    }

    #[test]
    fn deep_levels_count_less_than_the_touch() {
        // Same totals, bid size concentrated at the touch
        let p = calculator().compute(&snapshot(
            &[(100.0, 30.0), (99.0, 10.0)],
            &[(101.0, 10.0), (102.0, 30.0)],
        ));
        assert!(p.imbalance > 0.0);
        assert_eq!(p.volume_ratio, 0.5);
        assert!((p.level1_imbalance - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_book_is_neutral() {
        let p = calculator().compute(&snapshot(&[], &[]));
        assert_eq!(p.imbalance, 0.0);
        assert_eq!(p.signal_strength, 0.0);
        assert_eq!(p.feature_score(), 0.5);
    }

    #[test]
    fn one_sided_book_is_full_imbalance() {
        let p = calculator().compute(&snapshot(&[(100.0, 10.0)], &[]));
        assert_eq!(p.imbalance, 1.0);
        assert_eq!(p.spread_bps, 0.0);
    }

    // ============================================
    // Spread and Liquidity Tests
    // ============================================

    #[test]
    fn spread_in_basis_points() {
        let p = calculator().compute(&snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)]));
        assert!((p.spread_bps - 1.0 / 100.5 * 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn full_deep_book_has_full_liquidity() {
        let p = calculator().compute(&deep_book(200.0, 200.0));
        assert!((p.liquidity_score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn thin_book_has_low_liquidity() {
        // 20 visible of 1000, 2 of 10 levels populated
        let p = calculator().compute(&snapshot(&[(100.0, 10.0)], &[(100.25, 10.0)]));
        assert!((p.liquidity_score - (0.7 * 0.02 + 0.3 * 0.2)).abs() < 1e-12);
    }

    #[test]
    fn wide_spread_damps_signal() {
        let mut calc = calculator();
        let tight = calc.compute(&snapshot(&[(100.0, 900.0)], &[(100.01, 100.0)]));
        // 150 bps is 100 bps past the limit, hitting the 0.5 floor
        let wide = calc.compute(&snapshot(&[(100.0, 900.0)], &[(101.51, 100.0)]));

        assert_eq!(tight.imbalance, wide.imbalance);
        assert!(wide.spread_bps > 140.0);
        assert!((wide.signal_strength - tight.signal_strength * 0.5).abs() < 1e-9);
    }

    // ============================================
    // Cache and Input Tests
    // ============================================

    #[test]
    fn same_snapshot_is_served_from_cache() {
        let mut calc = calculator();
        let book = deep_book(100.0, 50.0);
        let first = calc.compute(&book);
        let second = calc.compute(&book);

        assert_eq!(first, second);
        assert_eq!(calc.stats().computations, 1);
        assert_eq!(calc.stats().snapshots_evaluated, 2);
        assert_eq!(calc.stats().cache.hits, 1);
    }

    #[test]
    fn different_books_with_same_timestamp_are_not_confused() {
        let mut calc = calculator();
        let buy = calc.compute(&deep_book(100.0, 50.0));
        let sell = calc.compute(&deep_book(50.0, 100.0));
        assert!(buy.imbalance > 0.0);
        assert!(sell.imbalance < 0.0);
    }

    #[test]
    fn cache_key_includes_parameters() {
        let mut calc = calculator();
        let mut book = deep_book(100.0, 50.0);
        book.timestamp += Duration::seconds(1);

        let five = calc.compute_with(&book, 5, 0.8);
        let one = calc.compute_with(&book, 1, 0.8);
        assert_eq!(five.depth_levels, 5);
        assert_eq!(one.depth_levels, 1);
        assert_eq!(calc.stats().computations, 2);
    }

    #[test]
    fn malformed_sizes_are_clipped() {
        let p = calculator().compute(&snapshot(
            &[(100.0, f64::NAN), (99.0, 10.0)],
            &[(101.0, -5.0)],
        ));
        assert!(p.imbalance.is_finite());
        assert_eq!(p.level1_imbalance, 0.0);
        assert_eq!(p.imbalance, 1.0);
    }

    #[test]
    fn invalid_parameters_fall_back_to_config() {
        let p = calculator().compute_with(&deep_book(100.0, 50.0), 0, f64::NAN);
        assert_eq!(p.depth_levels, 5);
    }

    #[test]
    fn oversized_depth_falls_back_to_config() {
        let mut calc = calculator();
        let book = deep_book(100.0, 50.0);

        let p = calc.compute_with(&book, usize::MAX, 0.8);
        assert_eq!(p.depth_levels, 5);
        assert_eq!(p, calc.compute(&book));

        let p = calc.compute_with(&book, MAX_DEPTH_LEVELS + 1, 0.8);
        assert_eq!(p.depth_levels, 5);
    }

    #[test]
    fn unbounded_depth_in_free_function_stays_finite() {
        let config = BookPressureConfig::default();
        let p = calculate_pressure(&deep_book(100.0, 50.0), usize::MAX, 0.8, &config);
        assert!(p.liquidity_score.is_finite());
        assert!((0.0..=1.0).contains(&p.liquidity_score));
        assert!(p.imbalance > 0.0);
    }
}
