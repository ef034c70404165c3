//! Indicator Store Port - Derived-State Persistence Interface
//!
//! The state managers persist their full rolling state (not just the
//! derived values) so a restart resumes without recomputing from
//! history. The payload is an already-serialized JSON document; the
//! store only guarantees atomic, versioned, per-kind storage.

use async_trait::async_trait;

use crate::domain::indicator::IndicatorKind;

/// Persisted snapshot format version. Bump when the layout changes;
/// loaders reject snapshots from a different version and start fresh.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Trait for indicator-state persistence providers.
///
/// One document per indicator kind, keyed internally per instrument.
/// Writes must be atomic (write-new-then-rename or equivalent) so a
/// crash never leaves a partially written snapshot.
#[async_trait]
pub trait IndicatorStore: Send + Sync + 'static {
    /// Persist the latest snapshot for `kind`, replacing any previous one.
    async fn save(&self, kind: IndicatorKind, snapshot: &serde_json::Value)
        -> anyhow::Result<()>;

    /// Load the last persisted snapshot for `kind`, or `None` on first run.
    async fn load(&self, kind: IndicatorKind) -> anyhow::Result<Option<serde_json::Value>>;

    /// Check that the backing storage is usable (directory writable).
    async fn is_healthy(&self) -> bool;
}
