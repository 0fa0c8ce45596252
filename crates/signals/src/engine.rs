//! Per-instrument signal engine.
//!
//! Owns one instance of each detector and the scorer behind a single mutex.
//! Every public method takes `&self`, so one engine can be shared between
//! the feed task and any number of readers through [`SharedSignalEngine`].
//! Run one engine per instrument; engines share nothing.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use confluence_core::config::{
    EngineConfig, DIVERGENCE_FEATURE, ORDER_BOOK_FEATURE, VOLATILITY_REGIME_FEATURE,
};
use confluence_core::{ConfigLoader, ConfigurationError, DepthSnapshot, MarketSample, OhlcBar};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::generator::{
    BookPressure, BookPressureStats, ConfluenceResult, ConfluenceScorer, ConfluenceStats,
    DivergenceDetector, DivergenceResult, DivergenceSignal, DivergenceStats, FeatureVector,
    OrderBookPressureCalculator, RegimeState, RegimeStats, VolatilityRegimeClassifier,
};

/// Engine shared across threads.
pub type SharedSignalEngine = Arc<SignalEngine>;

/// Counters of every component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub divergence: DivergenceStats,
    pub regime: RegimeStats,
    pub book: BookPressureStats,
    pub confluence: ConfluenceStats,
}

#[derive(Debug)]
struct EngineState {
    divergence: DivergenceDetector,
    regime: VolatilityRegimeClassifier,
    book: OrderBookPressureCalculator,
    scorer: ConfluenceScorer,
    /// Pressure of the most recent depth snapshot
    latest_book: Option<BookPressure>,
    /// Newest data timestamp seen on any input
    latest_timestamp: Option<DateTime<Utc>>,
}

impl EngineState {
    fn observe(&mut self, timestamp: DateTime<Utc>) {
        self.latest_timestamp = Some(match self.latest_timestamp {
            Some(latest) if latest > timestamp => latest,
            _ => timestamp,
        });
    }
}

/// Divergence, regime and book-pressure detectors plus the confluence scorer
/// for one instrument.
#[derive(Debug)]
pub struct SignalEngine {
    config: EngineConfig,
    state: Mutex<EngineState>,
}

impl SignalEngine {
    /// Builds every component from a validated configuration.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if any section is invalid, including a
    /// weight table that does not sum to 1.0.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let state = EngineState {
            divergence: DivergenceDetector::new(config.divergence.clone(), &config.cache)?,
            regime: VolatilityRegimeClassifier::new(config.regime.clone(), &config.cache)?,
            book: OrderBookPressureCalculator::new(config.book.clone(), &config.cache)?,
            scorer: ConfluenceScorer::new(config.confluence.clone(), &config.cache)?,
            latest_book: None,
            latest_timestamp: None,
        };

        tracing::info!(
            lookback = config.divergence.lookback,
            atr_period = config.regime.atr_period,
            depth_levels = config.book.depth_levels,
            cache_ttl = config.cache.ttl_seconds,
            "signal engine created"
        );

        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Builds an engine wrapped for sharing.
    ///
    /// # Errors
    /// See [`SignalEngine::new`].
    pub fn shared(config: EngineConfig) -> Result<SharedSignalEngine, ConfigurationError> {
        Self::new(config).map(Arc::new)
    }

    /// Loads layered configuration from `dir` and builds a shared engine.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn load_shared(
        dir: impl AsRef<Path>,
        profile: Option<&str>,
    ) -> anyhow::Result<SharedSignalEngine> {
        let dir = dir.as_ref();
        let config = ConfigLoader::new(dir)
            .extract(profile)
            .with_context(|| format!("loading configuration from {}", dir.display()))?;
        let engine = Self::new(config).context("building signal engine")?;
        Ok(Arc::new(engine))
    }

    /// Ingests one tick or bar of price and flow.
    ///
    /// Returns false if the sample was dropped for lack of any usable price.
    pub fn add_sample(
        &self,
        price: f64,
        net_flow_delta: f64,
        volume: f64,
        timestamp: DateTime<Utc>,
    ) -> bool {
        self.add_market_sample(&MarketSample::new(timestamp, price, net_flow_delta, volume))
    }

    /// Ingests a [`MarketSample`].
    pub fn add_market_sample(&self, sample: &MarketSample) -> bool {
        let mut state = self.state.lock();
        let accepted = state.divergence.add_sample(sample);
        if accepted {
            state.observe(sample.timestamp);
        }
        accepted
    }

    /// Ingests an OHLC bar with its volatility-index reading.
    pub fn add_bar(&self, bar: &OhlcBar, volatility_index: f64) -> bool {
        let mut state = self.state.lock();
        let accepted = state.regime.add_bar(bar, volatility_index);
        if accepted {
            state.observe(bar.timestamp);
        }
        accepted
    }

    /// Ingests a depth snapshot; its pressure feeds the next confluence score.
    pub fn add_depth_snapshot(&self, snapshot: &DepthSnapshot) -> BookPressure {
        let mut state = self.state.lock();
        let pressure = state.book.compute(snapshot);
        state.latest_book = Some(pressure);
        state.observe(snapshot.timestamp);
        pressure
    }

    /// Primary divergence over `lookback` (default from config).
    pub fn get_divergence(&self, lookback: Option<usize>) -> DivergenceSignal {
        self.state.lock().divergence.compute(lookback)
    }

    /// Full multi-timeframe divergence analysis.
    pub fn get_divergence_analysis(&self, lookback: Option<usize>) -> DivergenceResult {
        self.state.lock().divergence.analyze(lookback)
    }

    pub fn get_regime(&self) -> RegimeState {
        self.state.lock().regime.compute()
    }

    /// Pressure of `snapshot` without recording it as the latest book.
    pub fn get_book_pressure(&self, snapshot: &DepthSnapshot) -> BookPressure {
        self.state.lock().book.compute(snapshot)
    }

    /// Latest book pressure, if a snapshot has been ingested.
    pub fn latest_book_pressure(&self) -> Option<BookPressure> {
        self.state.lock().latest_book
    }

    /// Scores the current detector outputs together with `extra_features`.
    ///
    /// Detector features (`divergence`, `order_book`, `volatility_regime`)
    /// replace caller-supplied values under the same keys. Before the first
    /// depth snapshot a supplied `order_book` value is kept, otherwise that
    /// feature scores neutral. The result is stamped with the newest data
    /// timestamp seen.
    pub fn get_confluence(&self, extra_features: &FeatureVector) -> ConfluenceResult {
        let mut state = self.state.lock();

        let divergence = state.divergence.analyze(None);
        let regime = state.regime.compute();

        let mut features = extra_features.clone();
        let mut detector_features = vec![
            (DIVERGENCE_FEATURE, divergence.entry_signal),
            (VOLATILITY_REGIME_FEATURE, regime_feature(&regime)),
        ];
        if let Some(book) = state.latest_book {
            detector_features.push((ORDER_BOOK_FEATURE, book.feature_score()));
        }
        for (key, value) in detector_features {
            if features.insert(key, value).is_some() {
                tracing::debug!(feature = key, "detector feature overrides supplied value");
            }
        }

        let timestamp = state.latest_timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        state.scorer.score(&features, timestamp)
    }

    /// Clears all history, caches and counters.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.divergence.reset();
        state.regime.reset();
        state.book.reset();
        state.scorer.reset();
        state.latest_book = None;
        state.latest_timestamp = None;
        tracing::info!("signal engine reset");
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats {
            divergence: state.divergence.stats(),
            regime: state.regime.stats(),
            book: state.book.stats(),
            confluence: state.scorer.stats(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Regime favourability pulled towards neutral by low classification confidence.
#[must_use]
pub fn regime_feature(state: &RegimeState) -> f64 {
    let bias = state.regime.trading_bias();
    0.5 + (bias - 0.5) * state.confidence
}
