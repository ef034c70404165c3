//! Configuration Module - TOML-based Feed Configuration
//!
//! Loads and validates configuration from `config.toml`. Endpoints,
//! instrument lists and failover thresholds are externalized here -
//! nothing is hardcoded in the domain layer. Sections that belong to
//! a specific adapter or use case deserialize into that module's own
//! config struct.

pub mod loader;

use serde::Deserialize;

use crate::adapters::sources::simulated::SimulatedConfig;
use crate::adapters::sources::socket::SocketConfig;
use crate::adapters::sources::terminal::TerminalConfig;
use crate::domain::tick::{Instrument, SourceId};
use crate::usecases::chart_cache::CacheConfig;
use crate::usecases::failover::FailoverConfig;

/// Top-level feed configuration.
///
/// Loaded from `config.toml` at startup and validated before any
/// task is spawned.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Service identity and logging.
    #[serde(default)]
    pub app: ServiceConfig,
    /// Provider priority, instruments and failover thresholds.
    pub feed: FeedConfig,
    /// Terminal gateway endpoint.
    #[serde(default)]
    pub terminal: TerminalConfig,
    /// WebSocket feed endpoint.
    #[serde(default)]
    pub socket: SocketConfig,
    /// Simulator parameters.
    #[serde(default)]
    pub simulated: SimulatedConfig,
    /// Price stream sizing.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Chart cache bounds.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Indicator bar interval and engine parameters.
    #[serde(default)]
    pub indicators: IndicatorConfig,
    /// State snapshot storage.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Human-readable service name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Feed composition: which providers, in which order, for which pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Providers in descending priority. The simulator must be last:
    /// it is the only provider that cannot fail.
    #[serde(default = "default_priority")]
    pub priority: Vec<SourceId>,
    /// Currency pairs to subscribe, e.g. "EURUSD".
    pub instruments: Vec<Instrument>,
    /// Staleness/failover thresholds and reconnect backoff.
    #[serde(flatten)]
    pub failover: FailoverConfig,
}

fn default_priority() -> Vec<SourceId> {
    vec![SourceId::Terminal, SourceId::Socket, SourceId::Simulated]
}

/// Price stream sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Per-subscriber buffer; overflow drops that subscriber's oldest.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    4_096
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// Indicator pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    /// Bar interval the indicators run on, in seconds.
    #[serde(default = "default_bar_interval_secs")]
    pub bar_interval_secs: u64,
    /// Heikin-Ashi primary smoothing length.
    #[serde(default = "default_bias_primary_len")]
    pub bias_primary_len: u32,
    /// Heikin-Ashi secondary smoothing length.
    #[serde(default = "default_bias_secondary_len")]
    pub bias_secondary_len: u32,
    /// ATR lookback for the super trend.
    #[serde(default = "default_atr_period")]
    pub atr_period: u32,
    /// ATR band multiplier for the super trend.
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
}

fn default_bar_interval_secs() -> u64 {
    900
}

fn default_bias_primary_len() -> u32 {
    300
}

fn default_bias_secondary_len() -> u32 {
    30
}

fn default_atr_period() -> u32 {
    10
}

fn default_atr_multiplier() -> f64 {
    3.0
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            bar_interval_secs: default_bar_interval_secs(),
            bias_primary_len: default_bias_primary_len(),
            bias_secondary_len: default_bias_secondary_len(),
            atr_period: default_atr_period(),
            atr_multiplier: default_atr_multiplier(),
        }
    }
}

/// State snapshot storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory for indicator state snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Shutdown grace for in-flight state writes, in milliseconds.
    #[serde(default = "default_write_grace_ms")]
    pub write_grace_ms: u64,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_write_grace_ms() -> u64 {
    2_000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            write_grace_ms: default_write_grace_ms(),
        }
    }
}

fn default_name() -> String {
    "fx-failover-feed".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
