pub mod cache;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod market;
pub mod ring_buffer;
pub mod sanitize;
pub mod stats;

pub use cache::{CacheStats, TtlCache};
pub use config::{
    default_weights, validate_weights, BookPressureConfig, CacheConfig, ConfluenceConfig,
    DivergenceConfig, EngineConfig, RegimeConfig, DIVERGENCE_FEATURE, MAX_DEPTH_LEVELS,
    ORDER_BOOK_FEATURE, SESSION_CONTEXT_FEATURE, TREND_STRENGTH_FEATURE, VOLATILITY_REGIME_FEATURE,
};
pub use config_loader::ConfigLoader;
pub use error::ConfigurationError;
pub use events::MarketEvent;
pub use market::{DepthSnapshot, MarketSample, OhlcBar, PriceLevel};
pub use ring_buffer::RingBuffer;
pub use stats::LinearFit;
