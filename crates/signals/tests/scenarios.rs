//! End-to-end scenarios through the `SignalEngine` facade.

use chrono::{DateTime, Duration, Utc};
use confluence_core::config::{
    default_weights, EngineConfig, ORDER_BOOK_FEATURE, SESSION_CONTEXT_FEATURE,
    TREND_STRENGTH_FEATURE,
};
use confluence_core::{ConfigurationError, DepthSnapshot, OhlcBar};
use confluence_signals::{
    DivergenceType, FeatureVector, SignalEngine, SignalTier, VolatilityRegime,
};

fn engine() -> SignalEngine {
    SignalEngine::new(EngineConfig::default()).unwrap()
}

fn ts(minutes: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minutes)
}

fn flat_bar(i: i64, range: f64) -> OhlcBar {
    OhlcBar::new(ts(i), 4500.0, 4500.0 + range / 2.0, 4500.0 - range / 2.0, 4500.0, 1_000.0)
}

fn feed_bullish_divergence(engine: &SignalEngine, points: i64) {
    for i in 0..points {
        engine.add_sample(4500.0 - 0.5 * i as f64, 2.0, 100.0, ts(i));
    }
}

// ============================================
// Configuration
// ============================================

#[test]
fn weights_summing_to_point_nine_are_fatal() {
    let mut config = EngineConfig::default();
    config.confluence.weights = default_weights();
    config
        .confluence
        .weights
        .insert(SESSION_CONTEXT_FEATURE.to_string(), 0.0);

    match SignalEngine::new(config) {
        Err(ConfigurationError::WeightSum { sum, .. }) => assert!((sum - 0.9).abs() < 1e-9),
        other => panic!("expected WeightSum error, got {other:?}"),
    }
}

// ============================================
// Divergence
// ============================================

#[test]
fn thin_history_is_neutral() {
    let e = engine();
    feed_bullish_divergence(&e, 3);

    let signal = e.get_divergence(Some(10));
    assert_eq!(signal.divergence_type, DivergenceType::None);
    assert_eq!(signal.strength, 0.0);
}

#[test]
fn linear_price_down_flow_up_is_bullish() {
    let e = engine();
    feed_bullish_divergence(&e, 20);

    let signal = e.get_divergence(Some(20));
    assert_eq!(signal.divergence_type, DivergenceType::Bullish);
    assert!(signal.strength > 0.6);

    let analysis = e.get_divergence_analysis(Some(10));
    assert!(analysis.entry_signal > 0.5);
    assert!(!analysis.secondary.is_empty());
}

// ============================================
// Order Book
// ============================================

#[test]
fn imbalance_symmetry() {
    let e = engine();

    let balanced = DepthSnapshot::from_pairs(ts(0), &[(100.0, 50.0)], &[(101.0, 50.0)]);
    assert_eq!(e.get_book_pressure(&balanced).imbalance, 0.0);

    let bid_heavy = DepthSnapshot::from_pairs(ts(1), &[(100.0, 100.0)], &[(101.0, 50.0)]);
    assert!(e.get_book_pressure(&bid_heavy).imbalance > 0.0);
}

// ============================================
// Volatility Regime
// ============================================

#[test]
fn calm_index_and_narrow_ranges_are_low_regime() {
    let e = engine();
    for i in 0..29 {
        e.add_bar(&flat_bar(i, 2.0), 12.0);
    }
    e.add_bar(&flat_bar(29, 1.0), 12.0);

    let regime = e.get_regime();
    assert_eq!(regime.regime, VolatilityRegime::Low);
    assert!(regime.metrics.atr_ratio < 0.8);
}

#[test]
fn elevated_index_is_extreme_regime() {
    let e = engine();
    for i in 0..30 {
        e.add_bar(&flat_bar(i, 2.0), 45.0);
    }

    let regime = e.get_regime();
    assert_eq!(regime.regime, VolatilityRegime::Extreme);
    assert_eq!(regime.thresholds.long_threshold, 0.5);
    assert_eq!(regime.thresholds.max_positions, 1);
    assert!((0.5..=2.0).contains(&regime.risk_adjustment));
}

// ============================================
// Confluence
// ============================================

#[test]
fn aligned_detectors_reach_a_tradeable_tier() {
    let e = engine();
    feed_bullish_divergence(&e, 40);
    for i in 0..29 {
        e.add_bar(&flat_bar(i, 2.0), 12.0);
    }
    e.add_bar(&flat_bar(29, 1.0), 12.0);

    let bids: Vec<(f64, f64)> = (0..5).map(|i| (4499.75 - 0.25 * i as f64, 600.0)).collect();
    let asks: Vec<(f64, f64)> = (0..5).map(|i| (4500.0 + 0.25 * i as f64, 50.0)).collect();
    e.add_depth_snapshot(&DepthSnapshot::from_pairs(ts(40), &bids, &asks));

    let extra = FeatureVector::new()
        .with(TREND_STRENGTH_FEATURE, 0.9)
        .with(SESSION_CONTEXT_FEATURE, 0.8);
    let result = e.get_confluence(&extra);

    assert!(result.composite_score >= 0.7, "score {}", result.composite_score);
    assert!(result.tier.is_tradeable());
    assert_eq!(result.component_breakdown.len(), 5);
    assert!(result.contribution(ORDER_BOOK_FEATURE).unwrap().value > 0.75);
    assert_eq!(result.timestamp, ts(40));
}

#[test]
fn hostile_regime_keeps_score_below_trade_tiers() {
    let e = engine();
    for i in 0..30 {
        e.add_bar(&flat_bar(i, 2.0), 45.0);
    }

    let result = e.get_confluence(&FeatureVector::new());
    assert_eq!(result.tier, SignalTier::NoTrade);
    assert!(result.composite_score < 0.5);
}

#[test]
fn reset_returns_engine_to_neutral() {
    let e = engine();
    feed_bullish_divergence(&e, 20);
    let before = e.get_confluence(&FeatureVector::new());

    e.reset();
    let after = e.get_confluence(&FeatureVector::new());

    assert!(before.composite_score > after.composite_score);
    assert!((after.composite_score - 0.5).abs() < 1e-12);
}
