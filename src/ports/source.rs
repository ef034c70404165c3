//! Source Adapter Port - Upstream Price Provider Interface
//!
//! Every provider (terminal gateway, WebSocket feed, simulator)
//! implements this trait, normalizing its own protocol and quirks
//! into the common `Tick` shape and the shared error taxonomy. The
//! failover controller only ever talks to this interface.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::tick::{SourceId, Tick};

/// Shared upstream error taxonomy.
///
/// None of these is fatal to the process: connect failures are
/// retried with backoff, protocol errors drop the offending message,
/// staleness and closure trigger failover to the next provider.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport or handshake failure while establishing a session.
    /// The field is `id`, not `source`: thiserror reserves `source`
    /// for the error-chain cause.
    #[error("{id} connect failed: {reason}")]
    Connect { id: SourceId, reason: String },

    /// Malformed upstream data; the message is dropped.
    #[error("malformed upstream message: {0}")]
    Protocol(String),

    /// No tick within the staleness bound.
    #[error("no tick received for {elapsed_ms} ms")]
    Stale { elapsed_ms: u64 },

    /// The provider ended the stream (EOF, close frame, disconnect).
    #[error("upstream closed the stream")]
    Closed,
}

impl FeedError {
    /// Protocol errors are recoverable in place; everything else
    /// tears down the session.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

/// Uniform capability set of an upstream price provider.
///
/// Contract: `connect` before `next_tick`; `next_tick` suspends until
/// a tick arrives or the session fails; `disconnect` is idempotent.
/// Adapters own per-session state only; a disconnected adapter can
/// be reconnected or dropped freely.
#[async_trait]
pub trait SourceAdapter: Send + 'static {
    /// Stable identity of this provider.
    fn id(&self) -> SourceId;

    /// Establish a session. Errors map to `FeedError::Connect`.
    async fn connect(&mut self) -> Result<(), FeedError>;

    /// Tear the session down. Safe to call when not connected.
    async fn disconnect(&mut self);

    /// Next normalized tick. `FeedError::Closed` on end of stream.
    async fn next_tick(&mut self) -> Result<Tick, FeedError>;
}

/// Boxed adapter as handled by the controller.
pub type BoxedSource = Box<dyn SourceAdapter>;

/// Factory producing a fresh adapter instance per session attempt.
///
/// The controller needs new instances for background probing while an
/// older session is still streaming, so providers are registered as
/// factories rather than single adapters.
pub type SourceFactory = Box<dyn Fn() -> BoxedSource + Send + Sync>;
