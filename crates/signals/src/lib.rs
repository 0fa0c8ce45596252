pub mod engine;
pub mod feed;
pub mod generator;

// Re-export signal generators for convenience
pub use generator::{
    calculate_imbalance, calculate_pressure, classify_divergence, risk_adjustment,
    volume_confirmation, weighted_volume, BookPressure, BookPressureStats, ConfluenceResult,
    ConfluenceScorer, ConfluenceStats, DivergenceDetector, DivergenceQuality, DivergenceResult,
    DivergenceSignal, DivergenceStats, DivergenceType, FeatureContribution, FeatureVector,
    OrderBookPressureCalculator, RegimeState, RegimeStats, SignalTier, TradingThresholds,
    VolatilityMetrics, VolatilityRegime, VolatilityRegimeClassifier, VolatilityTrend,
    DEFAULT_VOLATILITY_INDEX, NEUTRAL_FEATURE,
};

// Re-export the engine facade and feed bridge
pub use engine::{regime_feature, EngineStats, SharedSignalEngine, SignalEngine};
pub use feed::{spawn_feed, FeedSummary};
