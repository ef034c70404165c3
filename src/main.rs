//! FX Failover Feed - Entry Point
//!
//! Initializes configuration, logging, the provider stack, and the
//! long-running feed tasks. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create the price stream and the state store
//! 4. Build provider factories in configured priority order
//! 5. Load persisted indicator state (resume without recomputation)
//! 6. Spawn chart cache + indicator managers + failover controller
//! 7. Wait for SIGINT → graceful shutdown (signal→drain→flush→exit)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use fx_failover_feed::adapters::persistence::StateStore;
use fx_failover_feed::adapters::sources::simulated::SimulatedFeed;
use fx_failover_feed::adapters::sources::socket::SocketFeed;
use fx_failover_feed::adapters::sources::terminal::TerminalFeed;
use fx_failover_feed::config::{self, AppConfig};
use fx_failover_feed::domain::bias::MarketBias;
use fx_failover_feed::domain::indicator::IndicatorKind;
use fx_failover_feed::domain::super_trend::SuperTrend;
use fx_failover_feed::domain::tick::SourceId;
use fx_failover_feed::ports::indicator_store::IndicatorStore;
use fx_failover_feed::ports::source::SourceFactory;
use fx_failover_feed::stream::PriceStream;
use fx_failover_feed::usecases::chart_cache::ChartCacheManager;
use fx_failover_feed::usecases::failover::FailoverController;
use fx_failover_feed::usecases::indicator::IndicatorStateManager;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config = config::loader::load_config("config.toml")
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.app.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.app.name,
        version = env!("CARGO_PKG_VERSION"),
        instruments = config.feed.instruments.len(),
        priority = ?config.feed.priority,
        "Starting FX failover feed"
    );

    // ── 3. Shutdown channel, price stream, state store ──────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let price_stream = PriceStream::new(config.stream.capacity);
    let store = Arc::new(
        StateStore::new(&config.persistence.data_dir)
            .await
            .context("Failed to open state store")?,
    );

    // ── 4. Provider factories in priority order ─────────────
    let sources = build_sources(&config);

    // ── 5. Indicator managers, resuming persisted state ─────
    let bar_interval = Duration::from_secs(config.indicators.bar_interval_secs);
    let (bias_primary, bias_secondary) = (
        config.indicators.bias_primary_len,
        config.indicators.bias_secondary_len,
    );
    let mut bias_manager = IndicatorStateManager::new(
        IndicatorKind::MarketBias,
        move || MarketBias::new(bias_primary, bias_secondary),
        bar_interval,
        Arc::clone(&store) as Arc<dyn IndicatorStore>,
    );
    bias_manager
        .load_persisted()
        .await
        .context("Failed to load market-bias state")?;

    let (atr_period, atr_multiplier) = (
        config.indicators.atr_period,
        config.indicators.atr_multiplier,
    );
    let mut trend_manager = IndicatorStateManager::new(
        IndicatorKind::SuperTrend,
        move || SuperTrend::new(atr_period, atr_multiplier),
        bar_interval,
        Arc::clone(&store) as Arc<dyn IndicatorStore>,
    );
    trend_manager
        .load_persisted()
        .await
        .context("Failed to load super-trend state")?;

    // ── 6. Spawn the feed tasks ─────────────────────────────
    let cache_manager = ChartCacheManager::new(config.cache.clone());
    let cache_handle = tokio::spawn(
        cache_manager.run(price_stream.subscribe(), shutdown_tx.subscribe()),
    );

    let bias_sub = price_stream.subscribe();
    let bias_shutdown = shutdown_tx.subscribe();
    let bias_handle = tokio::spawn(async move {
        if let Err(e) = bias_manager.run(bias_sub, bias_shutdown).await {
            error!(error = %e, "Market-bias manager failed");
        }
    });

    let trend_sub = price_stream.subscribe();
    let trend_shutdown = shutdown_tx.subscribe();
    let trend_handle = tokio::spawn(async move {
        if let Err(e) = trend_manager.run(trend_sub, trend_shutdown).await {
            error!(error = %e, "Super-trend manager failed");
        }
    });

    let controller = FailoverController::new(
        config.feed.failover.clone(),
        sources,
        price_stream.clone(),
    );
    let controller_shutdown = shutdown_tx.subscribe();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(controller_shutdown).await {
            error!(error = %e, "Failover controller failed");
        }
    });

    info!("All tasks spawned, feed is running");

    // ── 7. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c()
        .await
        .context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    // Signal every task, then bound the waits: the controller first
    // so the stream stops, then the consumers so final bars and state
    // writes can land.
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(5), controller_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), cache_handle).await;

    let write_grace = Duration::from_millis(config.persistence.write_grace_ms);
    let _ = tokio::time::timeout(write_grace, bias_handle).await;
    let _ = tokio::time::timeout(write_grace, trend_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Build one factory per configured provider, in priority order.
fn build_sources(config: &AppConfig) -> Vec<(SourceId, SourceFactory)> {
    let instruments = config.feed.instruments.clone();
    config
        .feed
        .priority
        .iter()
        .map(|id| {
            let factory: SourceFactory = match id {
                SourceId::Terminal => {
                    let cfg = config.terminal.clone();
                    let instruments = instruments.clone();
                    Box::new(move || Box::new(TerminalFeed::new(instruments.clone(), &cfg)))
                }
                SourceId::Socket => {
                    let cfg = config.socket.clone();
                    let instruments = instruments.clone();
                    Box::new(move || Box::new(SocketFeed::new(instruments.clone(), &cfg)))
                }
                SourceId::Simulated => {
                    let cfg = config.simulated.clone();
                    let instruments = instruments.clone();
                    Box::new(move || Box::new(SimulatedFeed::new(instruments.clone(), &cfg)))
                }
            };
            (*id, factory)
        })
        .collect()
}
