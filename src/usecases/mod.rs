//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the feed's core workflows. Each use case is a self-contained
//! long-running task wired together in `main`.
//!
//! Use cases:
//! - `FailoverController`: Provider supervision and automatic failover
//! - `ChartCacheManager`: Bounded per-instrument tick windows
//! - `IndicatorStateManager`: Incremental indicators with persistence

pub mod chart_cache;
pub mod failover;
pub mod indicator;

pub use chart_cache::{CacheConfig, ChartCache, ChartCacheManager, WindowSpec};
pub use failover::{FailoverConfig, FailoverController, FeedStatus};
pub use indicator::{IndicatorReader, IndicatorStateManager};
