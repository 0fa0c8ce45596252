//! Market data records consumed by the detectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sanitize;

/// One ingested tick or bar worth of price and order flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSample {
    /// Time of the sample
    pub timestamp: DateTime<Utc>,
    /// Traded or mid price
    pub price: f64,
    /// Buyer-initiated minus seller-initiated volume
    pub net_flow_delta: f64,
    /// Total traded volume
    pub volume: f64,
}

impl MarketSample {
    /// Creates a sample.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, price: f64, net_flow_delta: f64, volume: f64) -> Self {
        Self {
            timestamp,
            price,
            net_flow_delta,
            volume,
        }
    }

    /// Returns a copy with malformed fields replaced.
    ///
    /// An invalid price falls back to `last_price`; `None` means the sample
    /// has no usable price and must be dropped.
    #[must_use]
    pub fn sanitized(&self, last_price: Option<f64>) -> Option<Self> {
        let price = sanitize::price_or("sample.price", self.price, last_price)?;
        Some(Self {
            timestamp: self.timestamp,
            price,
            net_flow_delta: sanitize::finite_or("sample.net_flow_delta", self.net_flow_delta, 0.0),
            volume: sanitize::non_negative("sample.volume", self.volume),
        })
    }
}

/// OHLC bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    /// Opening price
    pub open: f64,
    /// Highest price
    pub high: f64,
    /// Lowest price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

impl OhlcBar {
    /// Creates a bar.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Returns a copy with malformed fields replaced.
    ///
    /// The close falls back to `prev_close`; the other prices fall back to
    /// the close. `high < low` is swapped. `None` means no usable close.
    #[must_use]
    pub fn sanitized(&self, prev_close: Option<f64>) -> Option<Self> {
        let close = sanitize::price_or("bar.close", self.close, prev_close)?;
        let open = sanitize::price_or("bar.open", self.open, Some(close))?;
        let mut high = sanitize::price_or("bar.high", self.high, Some(close))?;
        let mut low = sanitize::price_or("bar.low", self.low, Some(close))?;
        if high < low {
            tracing::warn!(high, low, "bar high below low, swapping");
            std::mem::swap(&mut high, &mut low);
        }
        Some(Self {
            timestamp: self.timestamp,
            open,
            high,
            low,
            close,
            volume: sanitize::non_negative("bar.volume", self.volume),
        })
    }

    /// True range against the previous close, or `high - low` for the first bar.
    #[must_use]
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let range = self.high - self.low;
        match prev_close {
            Some(pc) => range
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => range,
        }
    }
}

/// Resting size at one price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price at this level
    pub price: f64,
    /// Quantity at this level
    pub size: f64,
}

impl PriceLevel {
    /// Creates a level.
    #[must_use]
    pub const fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

impl From<(f64, f64)> for PriceLevel {
    fn from((price, size): (f64, f64)) -> Self {
        Self { price, size }
    }
}

/// Depth-of-book snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Time of the snapshot
    pub timestamp: DateTime<Utc>,
    /// Bid levels (best, i.e. highest, price first)
    pub bids: Vec<PriceLevel>,
    /// Ask levels (best, i.e. lowest, price first)
    pub asks: Vec<PriceLevel>,
}

impl DepthSnapshot {
    /// Builds a snapshot from `(price, size)` pairs.
    #[must_use]
    pub fn from_pairs(
        timestamp: DateTime<Utc>,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
    ) -> Self {
        Self {
            timestamp,
            bids: bids.iter().copied().map(PriceLevel::from).collect(),
            asks: asks.iter().copied().map(PriceLevel::from).collect(),
        }
    }

    /// Returns a copy with unusable levels dropped and bad sizes clipped to 0.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        fn clean(levels: &[PriceLevel], side: &'static str) -> Vec<PriceLevel> {
            levels
                .iter()
                .filter_map(|level| {
                    if !level.price.is_finite() || level.price <= 0.0 {
                        tracing::warn!(
                            side,
                            price = level.price,
                            "dropping level with invalid price"
                        );
                        return None;
                    }
                    Some(PriceLevel {
                        price: level.price,
                        size: crate::sanitize::non_negative("level.size", level.size),
                    })
                })
                .collect()
        }

        Self {
            timestamp: self.timestamp,
            bids: clean(&self.bids, "bid"),
            asks: clean(&self.asks, "ask"),
        }
    }

    /// Returns the best bid price (highest bid).
    #[must_use]
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    /// Returns the best ask price (lowest ask).
    #[must_use]
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Calculates the mid price.
    #[must_use]
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}
