//! Boundedness properties over arbitrary (including malformed) input.

use chrono::{DateTime, Duration, Utc};
use confluence_core::config::{
    EngineConfig, SESSION_CONTEXT_FEATURE, TREND_STRENGTH_FEATURE,
};
use confluence_core::{DepthSnapshot, OhlcBar};
use confluence_signals::{
    risk_adjustment, FeatureVector, SignalEngine, VolatilityRegime,
};
use proptest::prelude::*;

fn ts(i: usize) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(i as i64)
}

/// Mostly sane values with occasional NaN, infinities and negatives.
fn market_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => 1.0f64..10_000.0,
        1 => -1_000.0f64..1_000.0,
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
        1 => Just(0.0),
    ]
}

fn levels() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((market_value(), market_value()), 0..8)
}

proptest! {
    #[test]
    fn divergence_strength_and_entry_are_bounded(
        samples in prop::collection::vec((market_value(), market_value(), market_value()), 0..60),
        lookback in 0usize..40,
    ) {
        let engine = SignalEngine::new(EngineConfig::default()).unwrap();
        for (i, (price, flow, volume)) in samples.into_iter().enumerate() {
            engine.add_sample(price, flow, volume, ts(i));
        }

        let analysis = engine.get_divergence_analysis(Some(lookback));
        let primary = analysis.primary;
        prop_assert!((0.0..=1.0).contains(&primary.strength));
        prop_assert!((0.0..=1.0).contains(&primary.confidence));
        prop_assert!((0.0..=1.0).contains(&primary.volume_confirmation));
        prop_assert!((-1.0..=1.0).contains(&analysis.entry_signal));
        prop_assert!((0.0..=1.0).contains(&analysis.reversal_probability));
        if primary.divergence_type.is_none() {
            prop_assert_eq!(primary.strength, 0.0);
        }
    }

    #[test]
    fn regime_risk_adjustment_is_bounded(
        bars in prop::collection::vec(
            (market_value(), market_value(), market_value(), market_value()),
            0..80,
        ),
    ) {
        let engine = SignalEngine::new(EngineConfig::default()).unwrap();
        for (i, (high, low, close, vix)) in bars.into_iter().enumerate() {
            engine.add_bar(&OhlcBar::new(ts(i), close, high, low, close, 1.0), vix);
        }

        let regime = engine.get_regime();
        prop_assert!((0.5..=2.0).contains(&regime.risk_adjustment));
        prop_assert!((0.0..=1.0).contains(&regime.confidence));
        prop_assert!((0.0..=1.0).contains(&regime.stability));
        prop_assert!((0.0..=100.0).contains(&regime.metrics.vix_percentile));
    }

    #[test]
    fn book_pressure_is_bounded(bids in levels(), asks in levels()) {
        let engine = SignalEngine::new(EngineConfig::default()).unwrap();
        let pressure = engine.get_book_pressure(&DepthSnapshot::from_pairs(ts(0), &bids, &asks));

        prop_assert!((-1.0..=1.0).contains(&pressure.imbalance));
        prop_assert!((-1.0..=1.0).contains(&pressure.signal_strength));
        prop_assert!((0.0..=1.0).contains(&pressure.liquidity_score));
        prop_assert!((0.0..=1.0).contains(&pressure.volume_ratio));
        prop_assert!(pressure.spread_bps.is_finite() && pressure.spread_bps >= 0.0);
    }

    #[test]
    fn composite_score_is_bounded(
        trend in market_value(),
        session in market_value(),
        bids in levels(),
        asks in levels(),
    ) {
        let engine = SignalEngine::new(EngineConfig::default()).unwrap();
        engine.add_depth_snapshot(&DepthSnapshot::from_pairs(ts(0), &bids, &asks));

        let extra = FeatureVector::new()
            .with(TREND_STRENGTH_FEATURE, trend)
            .with(SESSION_CONTEXT_FEATURE, session);
        let result = engine.get_confluence(&extra);
        prop_assert!((0.0..=1.0).contains(&result.composite_score));
    }

    #[test]
    fn risk_adjustment_bounded_for_any_vol_of_vol(vol_of_vol in -100.0f64..100.0) {
        for regime in [
            VolatilityRegime::Low,
            VolatilityRegime::Normal,
            VolatilityRegime::High,
            VolatilityRegime::Extreme,
            VolatilityRegime::Transitioning,
        ] {
            let r = risk_adjustment(regime, vol_of_vol);
            prop_assert!((0.5..=2.0).contains(&r));
        }
    }
}
