//! Persistence Adapters - Atomic JSON File Storage
//!
//! Implements the IndicatorStore port with per-kind JSON snapshot
//! files and write-new-then-rename atomicity. No database dependency;
//! lightweight and crash-recoverable.

pub mod state;

pub use state::StateStore;
