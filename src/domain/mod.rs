//! Domain layer - feed-core business logic and models.
//!
//! Pure types and incremental computations: ticks, bars, backoff
//! policy, and the two indicator engines. No I/O here (hexagonal
//! architecture inner ring); everything is serializable and testable
//! in isolation.

pub mod backoff;
pub mod bias;
pub mod indicator;
pub mod super_trend;
pub mod tick;

// Re-export core types for convenience
pub use backoff::{Backoff, BackoffConfig};
pub use bias::MarketBias;
pub use indicator::{Indicator, IndicatorKind, IndicatorState, IndicatorValue};
pub use super_trend::SuperTrend;
pub use tick::{Bar, BarAggregator, Instrument, SourceId, Tick};
