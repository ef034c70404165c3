//! Failover Controller - Provider Supervision and Switchover
//!
//! Owns the single session to the currently active price provider and
//! is the only producer on the price stream. Providers are registered
//! in priority order (terminal gateway, then socket feed, then the
//! simulator); the controller walks down the list when a session dies
//! or goes silent, and probes back up in the background so a recovered
//! higher-priority provider takes over without interrupting the stream.
//!
//! Published ticks are normalized here: a monotonic sequence number is
//! stamped, timestamps are clamped non-decreasing per instrument (the
//! watermark survives provider switches, so a fallback with a lagging
//! clock can never move time backwards for a subscriber), and
//! incoherent ticks are dropped and counted. Consumers observe
//! provider changes through the status watch and the transition log,
//! never through a gap in the stream.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::backoff::{Backoff, BackoffConfig};
use crate::domain::tick::{Instrument, SourceId, Tick};
use crate::ports::source::{BoxedSource, FeedError, SourceFactory};
use crate::stream::PriceStream;

/// Granularity of the staleness watchdog.
const WATCHDOG_PERIOD: Duration = Duration::from_secs(1);

/// Bound on the retained transition history.
const TRANSITION_LOG_CAP: usize = 64;

/// Pause between full sweeps when every provider refused to connect.
const ALL_DOWN_PAUSE: Duration = Duration::from_secs(1);

/// Failover thresholds and reconnection policy.
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    /// Silence after which the active provider is flagged stale.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Silence after which the controller switches providers.
    #[serde(default = "default_failover_after_ms")]
    pub failover_after_ms: u64,
    /// How often to probe higher-priority providers while degraded.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_stale_after_ms() -> u64 {
    5_000
}

fn default_failover_after_ms() -> u64 {
    15_000
}

fn default_probe_interval_secs() -> u64 {
    30
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
            failover_after_ms: default_failover_after_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl FailoverConfig {
    fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    fn failover_after(&self) -> Duration {
        Duration::from_millis(self.failover_after_ms)
    }

    fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// Health of the active provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceHealth {
    Connecting,
    Live,
    /// Session open but silent beyond the staleness bound.
    Stale,
    /// Last-resort provider is itself silent; nothing left to switch to.
    Failed,
}

/// Snapshot of the feed published on the status watch.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub active: Option<SourceId>,
    pub health: SourceHealth,
    /// When the current (active, health) pair was entered.
    pub since: DateTime<Utc>,
    /// Provider switches since startup.
    pub failovers: u64,
}

/// One provider switch, kept in the bounded transition log.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub from: Option<SourceId>,
    pub to: SourceId,
    pub reason: String,
}

/// Shared read handle over the transition history.
#[derive(Clone)]
pub struct TransitionLog {
    inner: Arc<Mutex<VecDeque<Transition>>>,
}

impl TransitionLog {
    /// Retained transitions, oldest first.
    pub fn recent(&self) -> Vec<Transition> {
        let log = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.iter().cloned().collect()
    }
}

enum ProbeOutcome {
    /// A higher-priority provider connected and produced a first tick.
    Promoted {
        idx: usize,
        source: BoxedSource,
        first: Tick,
    },
    NoneAvailable,
}

/// Supervises provider sessions and feeds the price stream.
pub struct FailoverController {
    cfg: FailoverConfig,
    /// Providers in descending priority; the last one must be the
    /// simulator so the walk always terminates on a working session.
    sources: Arc<Vec<(SourceId, SourceFactory)>>,
    stream: PriceStream,
    status_tx: watch::Sender<FeedStatus>,
    transitions: Arc<Mutex<VecDeque<Transition>>>,
    seq: u64,
    /// Highest timestamp published per instrument. Kept across
    /// provider switches so timestamps never regress for a subscriber.
    watermarks: HashMap<Instrument, DateTime<Utc>>,
    malformed: u64,
    failovers: u64,
}

impl FailoverController {
    pub fn new(
        cfg: FailoverConfig,
        sources: Vec<(SourceId, SourceFactory)>,
        stream: PriceStream,
    ) -> Self {
        let (status_tx, _) = watch::channel(FeedStatus {
            active: None,
            health: SourceHealth::Connecting,
            since: Utc::now(),
            failovers: 0,
        });
        Self {
            cfg,
            sources: Arc::new(sources),
            stream,
            status_tx,
            transitions: Arc::new(Mutex::new(VecDeque::new())),
            seq: 0,
            watermarks: HashMap::new(),
            malformed: 0,
            failovers: 0,
        }
    }

    /// Watch over the active provider and its health.
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    /// Read handle over the provider transition history.
    pub fn transition_log(&self) -> TransitionLog {
        TransitionLog {
            inner: Arc::clone(&self.transitions),
        }
    }

    fn publish_status(&self, active: Option<SourceId>, health: SourceHealth) {
        self.status_tx.send_if_modified(|status| {
            if status.active == active && status.health == health {
                return false;
            }
            status.active = active;
            status.health = health;
            status.since = Utc::now();
            true
        });
    }

    fn record_transition(&mut self, from: Option<SourceId>, to: SourceId, reason: &str) {
        if from.is_some() {
            self.failovers += 1;
        }
        info!(from = ?from, to = %to, reason, "provider transition");

        let mut log = match self.transitions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.push_back(Transition {
            at: Utc::now(),
            from,
            to,
            reason: reason.to_string(),
        });
        if log.len() > TRANSITION_LOG_CAP {
            log.pop_front();
        }
        drop(log);

        let failovers = self.failovers;
        self.status_tx.send_modify(|status| {
            status.active = Some(to);
            status.health = SourceHealth::Live;
            status.since = Utc::now();
            status.failovers = failovers;
        });
    }

    /// Normalize and publish one tick: stamp the global sequence and
    /// clamp the timestamp to the per-instrument watermark, which
    /// survives provider switches.
    fn publish_tick(&mut self, mut tick: Tick) {
        if !tick.is_coherent() {
            self.malformed += 1;
            debug!(
                instrument = %tick.instrument,
                bid = tick.bid,
                ask = tick.ask,
                "dropping incoherent tick"
            );
            return;
        }
        if let Some(prev) = self.watermarks.get(&tick.instrument) {
            if tick.ts < *prev {
                tick.ts = *prev;
            }
        }
        self.watermarks.insert(tick.instrument.clone(), tick.ts);

        tick.seq = self.seq;
        self.seq += 1;
        self.stream.publish(tick);
    }

    /// Walk the priority list from `start` until a session opens.
    /// Retries each provider with backoff before moving on; sweeps the
    /// whole list again from the top if everything refused. Returns
    /// `None` only on shutdown.
    async fn acquire(
        &mut self,
        start: usize,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<(usize, BoxedSource)> {
        let mut from = start.min(self.sources.len());
        loop {
            for i in from..self.sources.len() {
                let id = self.sources[i].0;
                let mut source = (self.sources[i].1)();
                let mut backoff = Backoff::new(self.cfg.backoff.clone());
                self.publish_status(Some(id), SourceHealth::Connecting);

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => return None,
                        res = source.connect() => match res {
                            Ok(()) => {
                                info!(
                                    source = %id,
                                    attempts = backoff.attempts() + 1,
                                    "provider session established"
                                );
                                self.publish_status(Some(id), SourceHealth::Live);
                                return Some((i, source));
                            }
                            Err(e) => {
                                warn!(source = %id, error = %e, "connect attempt failed");
                                let delay = backoff.next_delay();
                                if backoff.exhausted() {
                                    warn!(
                                        source = %id,
                                        attempts = backoff.attempts(),
                                        "provider retry budget spent, moving on"
                                    );
                                    break;
                                }
                                tokio::select! {
                                    biased;
                                    _ = shutdown.recv() => return None,
                                    () = tokio::time::sleep(delay) => {}
                                }
                            }
                        }
                    }
                }
            }
            if from == 0 {
                warn!("all providers unavailable, sweeping the priority list again");
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => return None,
                    () = tokio::time::sleep(ALL_DOWN_PAUSE) => {}
                }
            }
            from = 0;
        }
    }

    /// Try every provider above the active one, best first. The probe
    /// only counts as a recovery once a first tick arrives, so the
    /// active session is never torn down for a half-open candidate.
    fn spawn_probe(&self, upto: usize, tx: mpsc::Sender<ProbeOutcome>) {
        let sources = Arc::clone(&self.sources);
        let first_tick_bound = self.cfg.stale_after();

        tokio::spawn(async move {
            for i in 0..upto {
                let id = sources[i].0;
                let mut candidate = (sources[i].1)();
                debug!(source = %id, "probing higher-priority provider");

                if let Err(e) = candidate.connect().await {
                    debug!(source = %id, error = %e, "probe connect failed");
                    continue;
                }
                match tokio::time::timeout(first_tick_bound, candidate.next_tick()).await {
                    Ok(Ok(first)) => {
                        let _ = tx
                            .send(ProbeOutcome::Promoted {
                                idx: i,
                                source: candidate,
                                first,
                            })
                            .await;
                        return;
                    }
                    Ok(Err(e)) => {
                        debug!(source = %id, error = %e, "probe session failed before first tick");
                        candidate.disconnect().await;
                    }
                    Err(_) => {
                        let e = FeedError::Stale {
                            elapsed_ms: first_tick_bound.as_millis() as u64,
                        };
                        debug!(source = %id, error = %e, "probe produced no tick in time");
                        candidate.disconnect().await;
                    }
                }
            }
            let _ = tx.send(ProbeOutcome::NoneAvailable).await;
        });
    }

    /// Supervise provider sessions until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(providers = self.sources.len(), "failover controller starting");

        let Some((mut idx, mut active)) = self.acquire(0, &mut shutdown).await else {
            info!("shutdown during initial provider acquisition");
            return Ok(());
        };
        self.record_transition(None, self.sources[idx].0, "startup");

        let (probe_tx, mut probe_rx) = mpsc::channel::<ProbeOutcome>(1);
        let mut probe_inflight = false;
        let mut last_tick = Instant::now();

        let mut watchdog = interval_at(Instant::now() + WATCHDOG_PERIOD, WATCHDOG_PERIOD);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probe_timer = interval_at(
            Instant::now() + self.cfg.probe_interval(),
            self.cfg.probe_interval(),
        );
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(
                        published = self.seq,
                        malformed = self.malformed,
                        failovers = self.failovers,
                        "failover controller shutting down"
                    );
                    active.disconnect().await;
                    return Ok(());
                }
                Some(outcome) = probe_rx.recv() => {
                    probe_inflight = false;
                    match outcome {
                        ProbeOutcome::Promoted { idx: new_idx, source, first } if new_idx < idx => {
                            let from = self.sources[idx].0;
                            active.disconnect().await;
                            idx = new_idx;
                            active = source;
                            last_tick = Instant::now();
                            self.record_transition(
                                Some(from),
                                self.sources[idx].0,
                                "higher-priority provider recovered",
                            );
                            self.publish_tick(first);
                        }
                        ProbeOutcome::Promoted { mut source, .. } => {
                            // A failover raced the probe; the extra session is redundant.
                            source.disconnect().await;
                        }
                        ProbeOutcome::NoneAvailable => {}
                    }
                }
                result = active.next_tick() => match result {
                    Ok(tick) => {
                        last_tick = Instant::now();
                        self.publish_status(Some(self.sources[idx].0), SourceHealth::Live);
                        self.publish_tick(tick);
                    }
                    Err(e) if e.is_session_fatal() => {
                        let from = self.sources[idx].0;
                        warn!(source = %from, error = %e, "provider session lost");
                        active.disconnect().await;
                        let Some((ni, na)) = self.acquire(idx + 1, &mut shutdown).await else {
                            return Ok(());
                        };
                        idx = ni;
                        active = na;
                        last_tick = Instant::now();
                        self.record_transition(Some(from), self.sources[idx].0, "session lost");
                    }
                    Err(e) => {
                        self.malformed += 1;
                        debug!(error = %e, "malformed upstream message dropped");
                    }
                },
                _ = watchdog.tick() => {
                    let silent = last_tick.elapsed();
                    if silent >= self.cfg.failover_after() {
                        let from = self.sources[idx].0;
                        if idx + 1 < self.sources.len() {
                            warn!(
                                source = %from,
                                silent_ms = silent.as_millis() as u64,
                                "provider silent beyond failover bound"
                            );
                            active.disconnect().await;
                            let Some((ni, na)) = self.acquire(idx + 1, &mut shutdown).await else {
                                return Ok(());
                            };
                            idx = ni;
                            active = na;
                            last_tick = Instant::now();
                            self.record_transition(
                                Some(from),
                                self.sources[idx].0,
                                "silent beyond failover bound",
                            );
                        } else {
                            self.publish_status(Some(from), SourceHealth::Failed);
                        }
                    } else if silent >= self.cfg.stale_after() {
                        self.publish_status(Some(self.sources[idx].0), SourceHealth::Stale);
                    }
                }
                _ = probe_timer.tick(), if idx > 0 && !probe_inflight => {
                    probe_inflight = true;
                    self.spawn_probe(idx, probe_tx.clone());
                }
            }
        }
    }
}
