//! Indicator State Manager - Incremental Derived-State Pipeline
//!
//! Drives one indicator engine per instrument off the price stream:
//! ticks are rolled into fixed-interval bars, each closed bar updates
//! the engine in O(1), and value changes are published as events and
//! scheduled for persistence. Persistence is asynchronous and
//! coalesced: a dedicated writer always stores the latest snapshot,
//! so rapid updates collapse into one write and a failed write is
//! retried without ever blocking tick processing.
//!
//! On startup the manager loads its persisted snapshot (engines plus
//! derived state) and resumes without recomputation; the first change
//! event after such a resume carries `resumed_with_gap` since the
//! stream gap is tolerated, not back-filled.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::domain::indicator::{Indicator, IndicatorKind, IndicatorState};
use crate::domain::tick::{Bar, BarAggregator, Instrument, Tick};
use crate::ports::indicator_store::{IndicatorStore, SNAPSHOT_VERSION};
use crate::stream::StreamSubscription;

/// Delay before retrying a failed persistence write.
const WRITE_RETRY: Duration = Duration::from_secs(2);

/// Full persisted document for one indicator kind: engine internals
/// and derived state per instrument, versioned.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndicatorSnapshot<I> {
    pub version: u32,
    pub kind: IndicatorKind,
    pub saved_at: DateTime<Utc>,
    pub entries: HashMap<Instrument, SnapshotEntry<I>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotEntry<I> {
    pub engine: I,
    pub state: IndicatorState,
}

type SharedStates = Arc<RwLock<HashMap<Instrument, IndicatorState>>>;

/// Non-blocking read handle over an indicator's derived state.
#[derive(Clone)]
pub struct IndicatorReader {
    kind: IndicatorKind,
    states: SharedStates,
}

impl IndicatorReader {
    pub fn kind(&self) -> IndicatorKind {
        self.kind
    }

    /// Latest derived state for one instrument, if any bar closed yet.
    pub fn state(&self, instrument: &str) -> Option<IndicatorState> {
        let states = match self.states.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        states.get(instrument).cloned()
    }

    /// All instruments' derived state, sorted by instrument.
    pub fn all(&self) -> Vec<IndicatorState> {
        let states = match self.states.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out: Vec<IndicatorState> = states.values().cloned().collect();
        out.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        out
    }
}

/// One indicator pipeline (market bias or super trend).
///
/// Single-writer over its engines and states: only the task running
/// [`IndicatorStateManager::run`] mutates them.
pub struct IndicatorStateManager<I> {
    kind: IndicatorKind,
    make: Box<dyn Fn() -> I + Send + Sync>,
    bar_interval: Duration,
    engines: HashMap<Instrument, I>,
    aggregators: HashMap<Instrument, BarAggregator>,
    states: SharedStates,
    /// Instruments resumed from disk that have not re-emitted yet.
    gap_pending: HashSet<Instrument>,
    store: Arc<dyn IndicatorStore>,
    events_tx: broadcast::Sender<IndicatorState>,
    latest_snapshot: Arc<Mutex<Option<serde_json::Value>>>,
    dirty: Arc<Notify>,
}

impl<I> IndicatorStateManager<I>
where
    I: Indicator + Clone + Serialize + DeserializeOwned,
{
    pub fn new(
        kind: IndicatorKind,
        make: impl Fn() -> I + Send + Sync + 'static,
        bar_interval: Duration,
        store: Arc<dyn IndicatorStore>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            kind,
            make: Box::new(make),
            bar_interval,
            engines: HashMap::new(),
            aggregators: HashMap::new(),
            states: Arc::new(RwLock::new(HashMap::new())),
            gap_pending: HashSet::new(),
            store,
            events_tx,
            latest_snapshot: Arc::new(Mutex::new(None)),
            dirty: Arc::new(Notify::new()),
        }
    }

    /// Load the persisted snapshot, if any. Call before `run`.
    ///
    /// A snapshot from a different format version, or one that fails
    /// to read or deserialize, is discarded and the manager starts
    /// fresh. Bad state on disk must never prevent startup.
    pub async fn load_persisted(&mut self) -> Result<()> {
        let loaded = match self.store.load(self.kind).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "snapshot unreadable, starting fresh");
                return Ok(());
            }
        };
        let Some(value) = loaded else {
            return Ok(());
        };

        match serde_json::from_value::<IndicatorSnapshot<I>>(value) {
            Ok(snap) if snap.version == SNAPSHOT_VERSION => {
                let mut states = match self.states.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for (instrument, entry) in snap.entries {
                    self.gap_pending.insert(instrument.clone());
                    self.engines.insert(instrument.clone(), entry.engine);
                    states.insert(instrument, entry.state);
                }
                info!(
                    kind = %self.kind,
                    instruments = states.len(),
                    saved_at = %snap.saved_at,
                    "resumed indicator state from snapshot"
                );
            }
            Ok(snap) => {
                warn!(
                    kind = %self.kind,
                    found = snap.version,
                    expected = SNAPSHOT_VERSION,
                    "snapshot version mismatch, starting fresh"
                );
            }
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "unreadable snapshot, starting fresh");
            }
        }
        Ok(())
    }

    /// Read handle for external consumers.
    pub fn reader(&self) -> IndicatorReader {
        IndicatorReader {
            kind: self.kind,
            states: Arc::clone(&self.states),
        }
    }

    /// Subscribe to state-changed events.
    pub fn events(&self) -> broadcast::Receiver<IndicatorState> {
        self.events_tx.subscribe()
    }

    /// Feed one tick through the bar aggregator and, on a closed bar,
    /// through the indicator engine.
    pub fn on_tick(&mut self, tick: &Tick) {
        let interval = self.bar_interval;
        let agg = self
            .aggregators
            .entry(tick.instrument.clone())
            .or_insert_with(|| BarAggregator::new(interval));
        if let Some(bar) = agg.on_tick(tick) {
            self.apply_bar(tick.instrument.clone(), &bar);
        }
    }

    fn apply_bar(&mut self, instrument: Instrument, bar: &Bar) {
        let engine = self
            .engines
            .entry(instrument.clone())
            .or_insert_with(|| (self.make)());
        let Some(value) = engine.on_bar(bar) else {
            return;
        };

        let mut states = match self.states.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let prev = states.get(&instrument);
        let changed = prev.map_or(true, |s| s.value != value);
        let bars_used = prev.map_or(0, |s| s.bars_used) + 1;

        let state = IndicatorState {
            instrument: instrument.clone(),
            kind: self.kind,
            value,
            last_updated: bar.end,
            bars_used,
            resumed_with_gap: changed && self.gap_pending.contains(&instrument),
        };
        states.insert(instrument.clone(), state.clone());
        drop(states);

        if changed {
            self.gap_pending.remove(&instrument);
            debug!(
                kind = %self.kind,
                instrument = %instrument,
                value = ?state.value,
                "indicator state changed"
            );
            let _ = self.events_tx.send(state);
            self.refresh_snapshot();
            self.dirty.notify_one();
        }
    }

    /// Serialize the full pipeline into the shared latest-snapshot
    /// slot for the writer task to pick up.
    fn refresh_snapshot(&self) {
        let states = match self.states.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entries: HashMap<Instrument, SnapshotEntry<&I>> = self
            .engines
            .iter()
            .filter_map(|(instrument, engine)| {
                states.get(instrument).map(|state| {
                    (
                        instrument.clone(),
                        SnapshotEntry {
                            engine,
                            state: state.clone(),
                        },
                    )
                })
            })
            .collect();
        drop(states);

        let snap = IndicatorSnapshot {
            version: SNAPSHOT_VERSION,
            kind: self.kind,
            saved_at: Utc::now(),
            entries,
        };
        match serde_json::to_value(&snap) {
            Ok(doc) => {
                let mut latest = match self.latest_snapshot.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *latest = Some(doc);
            }
            Err(e) => warn!(kind = %self.kind, error = %e, "snapshot serialization failed"),
        }
    }

    /// Consume the stream until shutdown. Spawns the coalescing
    /// writer task; in-flight writes finish during shutdown (the
    /// caller bounds the grace period).
    pub async fn run(
        mut self,
        mut sub: StreamSubscription,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let writer = tokio::spawn(writer_loop(
            self.kind,
            Arc::clone(&self.store),
            Arc::clone(&self.latest_snapshot),
            Arc::clone(&self.dirty),
        ));

        info!(
            kind = %self.kind,
            bar_interval_secs = self.bar_interval.as_secs(),
            "indicator manager started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(kind = %self.kind, "indicator manager shutting down");
                    break;
                }
                tick = sub.recv() => match tick {
                    Some(tick) => self.on_tick(&tick),
                    None => {
                        debug!(kind = %self.kind, "price stream closed");
                        break;
                    }
                }
            }
        }

        // Stop the coalescing writer first, then write the final
        // snapshot from this task: refreshing after the writer is gone
        // means the shutdown write cannot race an in-flight coalesced
        // write and always carries the last bar.
        writer.abort();
        let _ = writer.await;
        self.refresh_snapshot();
        flush(self.kind, &*self.store, &self.latest_snapshot).await;
        Ok(())
    }
}

/// Coalescing persistence loop: each wakeup stores whatever snapshot
/// is newest at that moment, so bursts of changes collapse into one
/// write. Failed writes re-arm the dirty flag and back off briefly.
/// Runs until aborted by the manager, which then performs the final
/// flush itself.
async fn writer_loop(
    kind: IndicatorKind,
    store: Arc<dyn IndicatorStore>,
    latest: Arc<Mutex<Option<serde_json::Value>>>,
    dirty: Arc<Notify>,
) {
    loop {
        dirty.notified().await;
        if !try_flush(kind, &*store, &latest).await {
            dirty.notify_one();
            tokio::time::sleep(WRITE_RETRY).await;
        }
    }
}

async fn try_flush(
    kind: IndicatorKind,
    store: &dyn IndicatorStore,
    latest: &Mutex<Option<serde_json::Value>>,
) -> bool {
    let doc = {
        let guard = match latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    };
    let Some(doc) = doc else {
        return true;
    };
    match store.save(kind, &doc).await {
        Ok(()) => true,
        Err(e) => {
            warn!(kind = %kind, error = %e, "state write failed, will retry");
            false
        }
    }
}

async fn flush(
    kind: IndicatorKind,
    store: &dyn IndicatorStore,
    latest: &Mutex<Option<serde_json::Value>>,
) {
    if !try_flush(kind, store, latest).await {
        warn!(kind = %kind, "final state write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::StateStore;
    use crate::domain::bias::MarketBias;
    use crate::domain::indicator::IndicatorValue;
    use crate::domain::tick::SourceId;
    use chrono::TimeZone;

    fn tick(secs: i64, price: f64) -> Tick {
        Tick {
            instrument: "EURUSD".to_string(),
            bid: price,
            ask: price + 0.0002,
            ts: Utc.timestamp_opt(secs, 0).single().expect("valid ts"),
            seq: secs as u64,
            source: SourceId::Simulated,
        }
    }

    async fn manager(dir: &tempfile::TempDir) -> IndicatorStateManager<MarketBias> {
        let store = Arc::new(
            StateStore::new(dir.path().to_str().expect("utf8"))
                .await
                .expect("store"),
        );
        IndicatorStateManager::new(
            IndicatorKind::MarketBias,
            || MarketBias::new(4, 2),
            Duration::from_secs(60),
            store,
        )
    }

    #[tokio::test]
    async fn emits_change_events_once_warmed_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut mgr = manager(&dir).await;
        let mut events = mgr.events();

        // Rising minute bars; the warm-up is 4 bars.
        for minute in 0..8 {
            mgr.on_tick(&tick(minute * 60, 1.10 + f64::from(minute as i32) * 0.002));
        }

        let event = events.try_recv().expect("state change emitted");
        assert_eq!(event.kind, IndicatorKind::MarketBias);
        assert!(matches!(event.value, IndicatorValue::Bias { bias: 1, .. }));
        assert!(!event.resumed_with_gap);

        let state = mgr.reader().state("EURUSD").expect("state present");
        assert!(state.bars_used >= 4);
    }

    #[tokio::test]
    async fn unchanged_value_does_not_re_emit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut mgr = manager(&dir).await;
        let mut events = mgr.events();

        for minute in 0..20 {
            mgr.on_tick(&tick(minute * 60, 1.10 + f64::from(minute as i32) * 0.002));
        }

        let mut count = 0;
        while events.try_recv().is_ok() {
            count += 1;
        }
        // 19 bars closed, 16 of them past warm-up. Identical consecutive
        // values are suppressed, so at most one event per emitting bar.
        assert!(count <= 16);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flush_carries_the_last_bar() {
        use crate::stream::PriceStream;

        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(&dir).await;
        let reader = mgr.reader();

        let stream = PriceStream::new(256);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(mgr.run(stream.subscribe(), shutdown_tx.subscribe()));

        for minute in 0..8 {
            stream.publish(tick(minute * 60, 1.10 + f64::from(minute as i32) * 0.002));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let live = reader.state("EURUSD").expect("warmed up");

        shutdown_tx.send(()).expect("manager listening");
        handle.await.expect("join").expect("clean exit");

        // What landed on disk must be the very last derived state.
        let store = StateStore::new(dir.path().to_str().expect("utf8"))
            .await
            .expect("store");
        let doc = store
            .load(IndicatorKind::MarketBias)
            .await
            .expect("load")
            .expect("snapshot written");
        let snap: IndicatorSnapshot<MarketBias> =
            serde_json::from_value(doc).expect("snapshot parses");
        let entry = snap.entries.get("EURUSD").expect("instrument persisted");
        assert_eq!(entry.state.bars_used, live.bars_used);
        assert_eq!(entry.state.last_updated, live.last_updated);
        assert_eq!(entry.state.value, live.value);
    }

    #[tokio::test]
    async fn snapshot_survives_restart_and_flags_gap() {
        let dir = tempfile::tempdir().expect("tempdir");

        {
            let mut mgr = manager(&dir).await;
            for minute in 0..10 {
                mgr.on_tick(&tick(minute * 60, 1.10 + f64::from(minute as i32) * 0.002));
            }
            mgr.refresh_snapshot();
            let flushed = try_flush(
                IndicatorKind::MarketBias,
                &*Arc::clone(&mgr.store),
                &mgr.latest_snapshot,
            )
            .await;
            assert!(flushed);
        }

        let mut restarted = manager(&dir).await;
        restarted.load_persisted().await.expect("load");

        let resumed = restarted.reader().state("EURUSD").expect("resumed state");
        assert!(resumed.bars_used >= 4);

        // Feed bars after a gap; the first change event carries the flag.
        let mut events = restarted.events();
        for minute in 100..110 {
            restarted.on_tick(&tick(minute * 60, 1.05 - f64::from(minute as i32) * 0.002));
        }
        let event = events.try_recv().expect("post-restart change");
        assert!(event.resumed_with_gap);

        // And only the first one.
        if let Ok(next) = events.try_recv() {
            assert!(!next.resumed_with_gap);
        }
    }
}
