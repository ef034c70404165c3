//! Chart Cache - Bounded Per-Instrument Tick Windows
//!
//! Maintains one time-ordered window of ticks per instrument for
//! chart consumers, evicting by age and by count (whichever bites
//! first). Reads are copy-on-read snapshots taken under a short lock,
//! so chart views never block the writer task and multiple views
//! share the same storage.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::tick::{Bar, BarAggregator, Instrument, Tick};
use crate::stream::StreamSubscription;

/// Cache sizing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum ticks retained per instrument.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: usize,
    /// Maximum age of retained ticks, relative to the newest tick.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_max_ticks() -> usize {
    10_000
}

fn default_max_age_secs() -> u64 {
    3_600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

/// Read-side selector for `ChartCache::ticks`.
#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    /// Keep only the newest N ticks of the window.
    pub max_points: Option<usize>,
    /// Keep only ticks younger than this, relative to the newest tick.
    pub max_age: Option<Duration>,
}

/// Per-instrument usage summary for monitoring surfaces.
#[derive(Debug, Clone)]
pub struct CacheSummary {
    pub instrument: Instrument,
    pub ticks: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

type Windows = Arc<RwLock<HashMap<Instrument, VecDeque<Tick>>>>;

/// Shared, cloneable read handle over the cache storage.
#[derive(Clone)]
pub struct ChartCache {
    windows: Windows,
}

impl ChartCache {
    /// Snapshot of the window for `instrument`, oldest first.
    /// Non-blocking for practical purposes: clones under a read lock.
    pub fn ticks(&self, instrument: &str, spec: &WindowSpec) -> Vec<Tick> {
        let windows = match self.windows.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(window) = windows.get(instrument) else {
            return Vec::new();
        };

        let mut out: Vec<Tick> = match (spec.max_age, window.back()) {
            (Some(age), Some(newest)) => {
                let cutoff = newest.ts
                    - ChronoDuration::milliseconds(age.as_millis().min(i64::MAX as u128) as i64);
                window.iter().filter(|t| t.ts >= cutoff).cloned().collect()
            }
            _ => window.iter().cloned().collect(),
        };
        if let Some(n) = spec.max_points {
            if out.len() > n {
                out.drain(..out.len() - n);
            }
        }
        out
    }

    /// Aggregate the cached window into fixed-interval OHLC bars.
    pub fn bars(&self, instrument: &str, interval: Duration) -> Vec<Bar> {
        let ticks = self.ticks(instrument, &WindowSpec::default());
        let mut agg = BarAggregator::new(interval);
        let mut bars = Vec::new();
        for tick in &ticks {
            if let Some(bar) = agg.on_tick(tick) {
                bars.push(bar);
            }
        }
        if let Some(open) = agg.in_progress() {
            bars.push(open.clone());
        }
        bars
    }

    /// Usage summary across all cached instruments.
    pub fn summary(&self) -> Vec<CacheSummary> {
        let windows = match self.windows.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out: Vec<CacheSummary> = windows
            .iter()
            .map(|(instrument, window)| CacheSummary {
                instrument: instrument.clone(),
                ticks: window.len(),
                oldest: window.front().map(|t| t.ts),
                newest: window.back().map(|t| t.ts),
            })
            .collect();
        out.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        out
    }
}

/// Owns the cache storage and the single writer task.
pub struct ChartCacheManager {
    cfg: CacheConfig,
    windows: Windows,
}

impl ChartCacheManager {
    pub fn new(cfg: CacheConfig) -> Self {
        Self {
            cfg,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read handle shared with chart views.
    pub fn cache(&self) -> ChartCache {
        ChartCache {
            windows: Arc::clone(&self.windows),
        }
    }

    /// Append one tick and evict anything out of bounds.
    /// Exposed for tests; the writer task calls this per received tick.
    pub fn append(&self, tick: Tick) {
        let mut windows = match self.windows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows.entry(tick.instrument.clone()).or_default();
        window.push_back(tick);

        while window.len() > self.cfg.max_ticks {
            window.pop_front();
        }
        if let Some(newest) = window.back().map(|t| t.ts) {
            let cutoff = newest - ChronoDuration::seconds(self.cfg.max_age_secs as i64);
            while window.front().is_some_and(|t| t.ts < cutoff) {
                window.pop_front();
            }
        }
    }

    /// Consume the stream until shutdown, appending every tick.
    pub async fn run(
        self,
        mut sub: StreamSubscription,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            max_ticks = self.cfg.max_ticks,
            max_age_secs = self.cfg.max_age_secs,
            "chart cache task started"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("chart cache shutting down");
                    return;
                }
                tick = sub.recv() => match tick {
                    Some(tick) => self.append(tick),
                    None => {
                        debug!("price stream closed, chart cache exiting");
                        return;
                    }
                }
            }
        }
    }
}
