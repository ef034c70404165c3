//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (TCP sessions, WebSockets, file I/O). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `sources`: upstream price providers (terminal, socket, simulator)
//! - `persistence`: atomic JSON indicator-state snapshots

pub mod persistence;
pub mod sources;
