//! Weighted confluence scorer.
//!
//! Combines normalised features into one composite score with a fixed,
//! validated weight table, then maps the score onto a signal tier. Features
//! missing from the vector count as neutral (0.5), so a silent detector
//! neither helps nor hurts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use confluence_core::cache::{CacheStats, TtlCache};
use confluence_core::config::{CacheConfig, ConfluenceConfig, DIVERGENCE_FEATURE};
use confluence_core::stats::{clamp_signed_unit, clamp_unit};
use confluence_core::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Value used for absent or non-finite features.
pub const NEUTRAL_FEATURE: f64 = 0.5;

/// Quality tier of a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTier {
    Premium,
    Strong,
    Weak,
    NoTrade,
}

impl SignalTier {
    /// Maps a composite score onto a tier using the configured cut-offs.
    #[must_use]
    pub fn from_score(score: f64, config: &ConfluenceConfig) -> Self {
        if score >= config.premium_threshold {
            Self::Premium
        } else if score >= config.strong_threshold {
            Self::Strong
        } else if score >= config.weak_threshold {
            Self::Weak
        } else {
            Self::NoTrade
        }
    }

    /// Returns true for every tier except `NoTrade`.
    #[must_use]
    pub const fn is_tradeable(&self) -> bool {
        !matches!(self, Self::NoTrade)
    }
}

/// Named feature values passed to the scorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(BTreeMap<String, f64>);

impl FeatureVector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(key.into(), value)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, f64>> for FeatureVector {
    fn from(map: BTreeMap<String, f64>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FeatureVector {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One feature's share of the composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    /// Value as supplied, before normalisation
    pub raw_value: Option<f64>,
    /// Normalised value in [0, 1] that was weighted
    pub value: f64,
    pub weight: f64,
    /// `weight × value`
    pub contribution: f64,
}

/// Composite score with its tier and per-feature breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceResult {
    /// Weighted composite in [0, 1]
    pub composite_score: f64,
    pub tier: SignalTier,
    /// One entry per configured weight, in key order
    pub component_breakdown: Vec<FeatureContribution>,
    pub timestamp: DateTime<Utc>,
}

impl ConfluenceResult {
    /// Contribution of `feature`, if it has a weight.
    #[must_use]
    pub fn contribution(&self, feature: &str) -> Option<&FeatureContribution> {
        self.component_breakdown.iter().find(|c| c.feature == feature)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceStats {
    pub evaluations: u64,
    pub computations: u64,
    pub premium: u64,
    pub strong: u64,
    pub weak: u64,
    pub no_trade: u64,
    pub cache: CacheStats,
}

type ScoreKey = (i64, Vec<(String, u64)>);

/// Fixed-weight confluence scorer.
#[derive(Debug, Clone)]
pub struct ConfluenceScorer {
    config: ConfluenceConfig,
    cache: TtlCache<ScoreKey, ConfluenceResult>,
    stats: ConfluenceStats,
}

impl ConfluenceScorer {
    /// Creates a scorer; the weight table must sum to 1.0.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the weights or tier cut-offs are invalid.
    pub fn new(config: ConfluenceConfig, cache: &CacheConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        cache.validate()?;

        tracing::info!(
            features = config.weights.len(),
            premium = config.premium_threshold,
            strong = config.strong_threshold,
            weak = config.weak_threshold,
            "confluence scorer created"
        );

        Ok(Self {
            cache: TtlCache::new(cache.ttl(), cache.max_entries),
            stats: ConfluenceStats::default(),
            config,
        })
    }

    /// Scores `features` as of `timestamp`.
    ///
    /// The `divergence` feature is an entry signal in [-1, 1] and is remapped
    /// to [0, 1]; every other feature is clipped to [0, 1].
    pub fn score(
        &mut self,
        features: &FeatureVector,
        timestamp: DateTime<Utc>,
    ) -> ConfluenceResult {
        self.stats.evaluations += 1;

        let key: ScoreKey = (
            timestamp.timestamp_millis(),
            features.iter().map(|(k, v)| (k.to_string(), v.to_bits())).collect(),
        );
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!("confluence cache hit");
            return cached;
        }

        let component_breakdown: Vec<FeatureContribution> = self
            .config
            .weights
            .iter()
            .map(|(feature, &weight)| {
                let raw_value = features.get(feature);
                let value = normalize_feature(feature, raw_value);
                FeatureContribution {
                    feature: feature.clone(),
                    raw_value,
                    value,
                    weight,
                    contribution: weight * value,
                }
            })
            .collect();

        for (feature, _) in features.iter() {
            if !self.config.weights.contains_key(feature) {
                tracing::debug!(feature, "ignoring feature without a weight");
            }
        }

        let composite_score = clamp_unit(component_breakdown.iter().map(|c| c.contribution).sum());
        let tier = SignalTier::from_score(composite_score, &self.config);

        self.stats.computations += 1;
        match tier {
            SignalTier::Premium => self.stats.premium += 1,
            SignalTier::Strong => self.stats.strong += 1,
            SignalTier::Weak => self.stats.weak += 1,
            SignalTier::NoTrade => self.stats.no_trade += 1,
        }
        tracing::debug!(composite_score, tier = ?tier, "confluence scored");

        let result = ConfluenceResult {
            composite_score,
            tier,
            component_breakdown,
            timestamp,
        };
        self.cache.insert(key, result.clone());
        result
    }

    /// Clears the cache and counters.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.stats = ConfluenceStats::default();
    }

    #[must_use]
    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.config.weights
    }

    #[must_use]
    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> ConfluenceStats {
        ConfluenceStats {
            cache: self.cache.stats(),
            ..self.stats
        }
    }
}

/// Maps a raw feature value into [0, 1].
fn normalize_feature(feature: &str, raw: Option<f64>) -> f64 {
    match raw {
        Some(v) if v.is_finite() => {
            if feature == DIVERGENCE_FEATURE {
                (clamp_signed_unit(v) + 1.0) / 2.0
            } else {
                clamp_unit(v)
            }
        }
        Some(v) => {
            tracing::warn!(feature, value = v, "non-finite feature, using neutral value");
            NEUTRAL_FEATURE
        }
        None => NEUTRAL_FEATURE,
    }
}
