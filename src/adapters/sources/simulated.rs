//! Simulated Feed - Guaranteed Terminal Fallback
//!
//! Generates ticks from a seeded pseudo-random walk around realistic
//! per-pair mid prices, at a fixed interval, and never fails. This is
//! the last entry in every failover priority list: when all real
//! providers are down the stream keeps producing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::info;

use crate::domain::tick::{Instrument, SourceId, Tick};
use crate::ports::source::{FeedError, SourceAdapter};

/// Simulator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedConfig {
    /// Milliseconds between generated ticks (round-robin over pairs).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Fixed RNG seed for deterministic runs; omit for entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_tick_interval_ms() -> u64 {
    50
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            seed: None,
        }
    }
}

/// Per-pair random-walk state.
#[derive(Debug, Clone)]
struct PairState {
    mid: f64,
    spread: f64,
    trend: f64,
    volatility: f64,
}

/// Random-walk FX simulator implementing the source port.
pub struct SimulatedFeed {
    instruments: Vec<Instrument>,
    interval: Duration,
    seed: Option<u64>,
    rng: StdRng,
    pairs: Vec<(Instrument, PairState)>,
    cursor: usize,
    ticker: Option<tokio::time::Interval>,
}

impl SimulatedFeed {
    pub fn new(instruments: Vec<Instrument>, cfg: &SimulatedConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            instruments,
            interval: Duration::from_millis(cfg.tick_interval_ms.max(1)),
            seed: cfg.seed,
            rng,
            pairs: Vec::new(),
            cursor: 0,
            ticker: None,
        }
    }

    /// Realistic seed mid price for well-known pairs; random for the rest.
    fn base_price(rng: &mut StdRng, pair: &str) -> f64 {
        match pair {
            "EURUSD" => 1.1618,
            "USDJPY" => 148.79,
            "GBPUSD" => 1.3395,
            "AUDUSD" => 0.6519,
            "USDCAD" => 1.3714,
            "NZDUSD" => 0.5949,
            "USDCHF" => 0.8005,
            "EURGBP" => 0.8673,
            "EURJPY" => 172.86,
            "GBPJPY" => 199.35,
            "AUDJPY" => 97.00,
            "AUDNZD" => 1.0959,
            "EURCHF" => 0.9300,
            "USDSGD" => 1.2849,
            "USDCNH" => 7.1743,
            _ => rng.random_range(0.8..1.5),
        }
    }

    /// Spread by liquidity class, in price units.
    fn base_spread(pair: &str) -> f64 {
        if matches!(pair, "EURUSD" | "USDJPY" | "GBPUSD") {
            if pair.contains("JPY") { 0.008 } else { 0.00006 }
        } else if pair.contains("JPY") {
            0.008
        } else if matches!(pair, "AUDUSD" | "USDCAD" | "NZDUSD" | "USDCHF") {
            0.00010
        } else {
            0.00020
        }
    }

    fn step(rng: &mut StdRng, state: &mut PairState) {
        // Occasional trend regime change.
        if rng.random_range(0.0..1.0) < 0.02 {
            state.trend = rng.random_range(-0.00002..0.00002);
        }
        // Rare volatility shock, otherwise decay.
        if rng.random_range(0.0..1.0) < 0.001 {
            state.volatility = rng.random_range(0.00005..0.00020);
        } else {
            state.volatility *= 0.99;
        }

        let drift = state.trend + rng.random_range(-state.volatility..=state.volatility);
        state.mid = (state.mid * (1.0 + drift)).max(0.0001);
    }
}

#[async_trait]
impl SourceAdapter for SimulatedFeed {
    fn id(&self) -> SourceId {
        SourceId::Simulated
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        let mut pairs = Vec::with_capacity(self.instruments.len());
        for inst in &self.instruments {
            let mid = Self::base_price(&mut self.rng, inst);
            pairs.push((
                inst.clone(),
                PairState {
                    mid,
                    spread: Self::base_spread(inst),
                    trend: 0.0,
                    volatility: self.rng.random_range(0.00001..0.00005),
                },
            ));
        }
        self.pairs = pairs;
        self.cursor = 0;
        self.ticker = Some(tokio::time::interval(self.interval));

        info!(
            pairs = self.pairs.len(),
            interval_ms = self.interval.as_millis() as u64,
            seeded = self.seed.is_some(),
            "simulated feed started"
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.ticker = None;
        self.pairs.clear();
    }

    async fn next_tick(&mut self) -> Result<Tick, FeedError> {
        let ticker = self.ticker.as_mut().ok_or(FeedError::Closed)?;
        ticker.tick().await;

        if self.pairs.is_empty() {
            return Err(FeedError::Closed);
        }
        let idx = self.cursor % self.pairs.len();
        self.cursor = self.cursor.wrapping_add(1);

        let (instrument, state) = &mut self.pairs[idx];
        Self::step(&mut self.rng, state);

        Ok(Tick {
            instrument: instrument.clone(),
            bid: state.mid - state.spread / 2.0,
            ask: state.mid + state.spread / 2.0,
            ts: Utc::now(),
            seq: 0,
            source: SourceId::Simulated,
        })
    }
}

/// Deterministic replay helper for tests: collects the walk offline.
#[cfg(test)]
pub fn walk_preview(seed: u64, pair: &str, steps: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = PairState {
        mid: SimulatedFeed::base_price(&mut rng, pair),
        spread: SimulatedFeed::base_spread(pair),
        trend: 0.0,
        volatility: rng.random_range(0.00001..0.00005),
    };
    let mut out = Vec::with_capacity(steps);
    for _ in 0..steps {
        SimulatedFeed::step(&mut rng, &mut state);
        out.push(state.mid);
    }
    out
}
