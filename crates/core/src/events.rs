use serde::{Deserialize, Serialize};

use crate::market::{DepthSnapshot, MarketSample, OhlcBar};

/// Events delivered by the market-data push interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A new tick/bar worth of price and flow.
    Sample(MarketSample),
    /// A new OHLC bar with the volatility-index reading observed with it.
    Bar {
        bar: OhlcBar,
        volatility_index: f64,
    },
    /// A new depth-of-book snapshot.
    Depth(DepthSnapshot),
    /// Clear all rolling history (backtest boundary).
    Reset,
    /// Stop consuming events.
    Shutdown,
}

impl MarketEvent {
    /// Short label used in logs and counters.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Sample(_) => "sample",
            Self::Bar { .. } => "bar",
            Self::Depth(_) => "depth",
            Self::Reset => "reset",
            Self::Shutdown => "shutdown",
        }
    }
}
