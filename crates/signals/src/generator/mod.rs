//! Signal generators of the confluence engine.
//!
//! Three detectors each own their rolling history and result cache; the
//! scorer combines their normalised outputs. Detectors never read each
//! other's state.

mod book_pressure;
mod confluence;
mod divergence;
mod volatility_regime;

pub use book_pressure::{
    calculate_imbalance, calculate_pressure, weighted_volume, BookPressure, BookPressureStats,
    OrderBookPressureCalculator,
};
pub use confluence::{
    ConfluenceResult, ConfluenceScorer, ConfluenceStats, FeatureContribution, FeatureVector,
    SignalTier, NEUTRAL_FEATURE,
};
pub use divergence::{
    classify_divergence, volume_confirmation, DivergenceDetector, DivergenceQuality,
    DivergenceResult, DivergenceSignal, DivergenceStats, DivergenceType,
};
pub use volatility_regime::{
    risk_adjustment, RegimeState, RegimeStats, TradingThresholds, VolatilityMetrics,
    VolatilityRegime, VolatilityRegimeClassifier, VolatilityTrend, DEFAULT_VOLATILITY_INDEX,
};
