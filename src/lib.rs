//! FX Failover Feed - Library Root
//!
//! Exposes every layer for the binary and the integration tests.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod stream;
pub mod usecases;
