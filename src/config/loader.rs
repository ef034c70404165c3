//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters, and
//! providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::tick::SourceId;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns a detailed error if the file cannot be read, the TOML does
/// not parse, or a validation rule is violated.
pub fn load_config(path: &str) -> Result<AppConfig> {
    let path = Path::new(path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = from_toml_str(&content)?;

    info!(
        name = %config.app.name,
        instruments = config.feed.instruments.len(),
        priority = ?config.feed.priority,
        "Configuration loaded successfully"
    );

    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn from_toml_str(content: &str) -> Result<AppConfig> {
    let config: AppConfig =
        toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
    // Instrument validation
    anyhow::ensure!(
        !config.feed.instruments.is_empty(),
        "At least one instrument must be configured"
    );
    for inst in &config.feed.instruments {
        anyhow::ensure!(
            inst.len() == 6 && inst.bytes().all(|b| b.is_ascii_uppercase()),
            "Instrument '{}' must be a six-letter uppercase pair like EURUSD",
            inst
        );
    }

    // Priority validation
    anyhow::ensure!(
        !config.feed.priority.is_empty(),
        "Provider priority list must not be empty"
    );
    anyhow::ensure!(
        config.feed.priority.last() == Some(&SourceId::Simulated),
        "The simulated provider must be last in the priority list"
    );
    for (i, id) in config.feed.priority.iter().enumerate() {
        anyhow::ensure!(
            !config.feed.priority[..i].contains(id),
            "Provider {} appears twice in the priority list",
            id
        );
    }

    // Failover threshold validation
    let failover = &config.feed.failover;
    anyhow::ensure!(
        failover.stale_after_ms > 0,
        "stale_after_ms must be positive"
    );
    anyhow::ensure!(
        failover.stale_after_ms < failover.failover_after_ms,
        "stale_after_ms ({}) must be below failover_after_ms ({})",
        failover.stale_after_ms,
        failover.failover_after_ms
    );
    anyhow::ensure!(
        failover.probe_interval_secs > 0,
        "probe_interval_secs must be positive"
    );
    anyhow::ensure!(
        failover.backoff.base_ms > 0 && failover.backoff.base_ms <= failover.backoff.max_ms,
        "backoff base_ms must be in (0, max_ms], got base {} max {}",
        failover.backoff.base_ms,
        failover.backoff.max_ms
    );
    anyhow::ensure!(
        failover.backoff.multiplier >= 1.0,
        "backoff multiplier must be at least 1.0, got {}",
        failover.backoff.multiplier
    );
    anyhow::ensure!(
        failover.backoff.max_attempts >= 1,
        "backoff max_attempts must be at least 1"
    );

    // Stream and cache validation
    anyhow::ensure!(
        config.stream.capacity > 0,
        "stream capacity must be positive"
    );
    anyhow::ensure!(
        config.cache.max_ticks > 0,
        "cache max_ticks must be positive"
    );
    anyhow::ensure!(
        config.cache.max_age_secs > 0,
        "cache max_age_secs must be positive"
    );

    // Indicator validation
    let ind = &config.indicators;
    anyhow::ensure!(
        ind.bar_interval_secs > 0,
        "bar_interval_secs must be positive"
    );
    anyhow::ensure!(
        ind.bias_secondary_len > 0 && ind.bias_secondary_len < ind.bias_primary_len,
        "bias_secondary_len ({}) must be in (0, bias_primary_len = {})",
        ind.bias_secondary_len,
        ind.bias_primary_len
    );
    anyhow::ensure!(ind.atr_period > 0, "atr_period must be positive");
    anyhow::ensure!(
        ind.atr_multiplier > 0.0,
        "atr_multiplier must be positive, got {}",
        ind.atr_multiplier
    );

    // Persistence validation
    anyhow::ensure!(
        !config.persistence.data_dir.is_empty(),
        "persistence data_dir must not be empty"
    );
    anyhow::ensure!(
        config.simulated.tick_interval_ms > 0,
        "simulated tick_interval_ms must be positive"
    );

    Ok(())
}
