//! Core price-feed domain types.
//!
//! Defines the normalized tick shape every source adapter must emit,
//! the bar type consumed by indicators, and the aggregator that rolls
//! ticks into fixed-interval OHLC bars.
//!
//! Exposes two API surfaces:
//! - `Tick` for the live stream (created by adapters, never mutated)
//! - `Bar` / `BarAggregator` for indicator and chart consumers

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Lightweight currency-pair identifier used at the ports boundary.
pub type Instrument = String;

/// Identity of an upstream price provider.
///
/// Ordering of the variants is not meaningful; failover priority
/// comes from configuration, not from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Proprietary terminal gateway (local TCP session).
    Terminal,
    /// Streaming WebSocket feed.
    Socket,
    /// Built-in random-walk simulator. Never fails.
    Simulated,
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal => write!(f, "terminal"),
            Self::Socket => write!(f, "socket"),
            Self::Simulated => write!(f, "simulated"),
        }
    }
}

/// One normalized bid/ask observation for an instrument.
///
/// Created by a source adapter, stamped with a process-wide sequence
/// number by the failover controller when published, and copied (never
/// mutated) by every downstream reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Currency pair, e.g. "EURUSD".
    pub instrument: Instrument,
    /// Best bid. Invariant: `bid <= ask`.
    pub bid: f64,
    /// Best ask (the original wire format calls this "offer").
    pub ask: f64,
    /// Wall-clock timestamp from the provider (or receipt time).
    pub ts: DateTime<Utc>,
    /// Monotonic publish sequence, assigned by the producer. Zero
    /// until the tick has been published on the stream.
    pub seq: u64,
    /// Which provider produced this tick.
    pub source: SourceId,
}

impl Tick {
    /// Mid price between bid and ask.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// True when the two-way price is internally consistent.
    pub fn is_coherent(&self) -> bool {
        self.bid.is_finite() && self.ask.is_finite() && self.bid <= self.ask
    }
}

/// One fixed-interval OHLC bar built from mid prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Inclusive start of the bar interval.
    pub start: DateTime<Utc>,
    /// Exclusive end of the bar interval.
    pub end: DateTime<Utc>,
}

/// Rolls a tick stream into fixed-interval OHLC bars for one instrument.
///
/// A bar closes when a tick arrives whose timestamp falls past the
/// current interval boundary; the closed bar is returned and a new one
/// opened. Gaps produce no synthetic bars (no gap-filling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarAggregator {
    interval_secs: i64,
    current: Option<Bar>,
}

impl BarAggregator {
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            // Sub-second intervals round up to one second.
            interval_secs: (interval.as_secs() as i64).max(1),
            current: None,
        }
    }

    /// Feed one tick; returns the bar that just closed, if any.
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Bar> {
        let mid = tick.mid();
        let start = match tick
            .ts
            .duration_trunc(ChronoDuration::seconds(self.interval_secs))
        {
            Ok(t) => t,
            // Out-of-range timestamps cannot open a bar.
            Err(_) => return None,
        };
        let end = start + ChronoDuration::seconds(self.interval_secs);

        match self.current.as_mut() {
            Some(bar) if tick.ts < bar.end => {
                bar.high = bar.high.max(mid);
                bar.low = bar.low.min(mid);
                bar.close = mid;
                None
            }
            _ => {
                let closed = self.current.take();
                self.current = Some(Bar {
                    open: mid,
                    high: mid,
                    low: mid,
                    close: mid,
                    start,
                    end,
                });
                closed
            }
        }
    }

    /// The bar currently being built, if any.
    pub fn in_progress(&self) -> Option<&Bar> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tick(instrument: &str, bid: f64, ask: f64, secs: i64) -> Tick {
        Tick {
            instrument: instrument.to_string(),
            bid,
            ask,
            ts: Utc.timestamp_opt(secs, 0).single().expect("valid ts"),
            seq: 0,
            source: SourceId::Simulated,
        }
    }

    #[test]
    fn mid_and_coherence() {
        let t = tick("EURUSD", 1.0950, 1.0952, 0);
        assert!((t.mid() - 1.0951).abs() < 1e-9);
        assert!(t.is_coherent());

        let crossed = tick("EURUSD", 1.10, 1.09, 0);
        assert!(!crossed.is_coherent());
    }

    #[test]
    fn aggregator_closes_bar_on_boundary() {
        let mut agg = BarAggregator::new(std::time::Duration::from_secs(60));

        assert!(agg.on_tick(&tick("EURUSD", 1.0, 1.0, 10)).is_none());
        assert!(agg.on_tick(&tick("EURUSD", 1.2, 1.2, 20)).is_none());
        assert!(agg.on_tick(&tick("EURUSD", 0.9, 0.9, 30)).is_none());

        // First tick of the next minute closes the bar.
        let bar = agg
            .on_tick(&tick("EURUSD", 1.1, 1.1, 61))
            .expect("bar should close");
        assert!((bar.open - 1.0).abs() < 1e-9);
        assert!((bar.high - 1.2).abs() < 1e-9);
        assert!((bar.low - 0.9).abs() < 1e-9);
        assert!((bar.close - 0.9).abs() < 1e-9);
        assert_eq!(bar.end - bar.start, ChronoDuration::seconds(60));
    }

    #[test]
    fn aggregator_skips_gaps_without_synthetic_bars() {
        let mut agg = BarAggregator::new(std::time::Duration::from_secs(60));
        assert!(agg.on_tick(&tick("EURUSD", 1.0, 1.0, 10)).is_none());
        // Three minutes of silence, then one tick: exactly one close.
        let bar = agg.on_tick(&tick("EURUSD", 1.0, 1.0, 200));
        assert!(bar.is_some());
        assert!(agg.in_progress().is_some());
    }
}
