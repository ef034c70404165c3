//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `SourceAdapter`: upstream price providers (terminal, socket, simulator)
//! - `IndicatorStore`: atomic persistence of derived indicator state

pub mod indicator_store;
pub mod source;

pub use indicator_store::{IndicatorStore, SNAPSHOT_VERSION};
pub use source::{BoxedSource, FeedError, SourceAdapter, SourceFactory};
