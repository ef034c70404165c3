//! Shared indicator contract and derived-state types.
//!
//! Both indicator engines (market bias, super trend) implement the
//! [`Indicator`] trait so the state manager can drive them identically.
//! Internal rolling state is serializable: persisting it lets a restart
//! resume without replaying tick history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tick::{Bar, Instrument};

/// Which derived indicator a state record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    MarketBias,
    SuperTrend,
}

impl IndicatorKind {
    /// Persistence file name for this kind's state snapshot.
    pub fn state_file(self) -> &'static str {
        match self {
            Self::MarketBias => "bias_state.json",
            Self::SuperTrend => "trend_state.json",
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarketBias => write!(f, "market_bias"),
            Self::SuperTrend => write!(f, "super_trend"),
        }
    }
}

/// Derived value emitted by an indicator when its state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "indicator", rename_all = "snake_case")]
pub enum IndicatorValue {
    /// Heikin-Ashi market bias: +1 bullish, -1 bearish, with the
    /// separation of the smoothed candle bodies as strength percent.
    Bias { bias: i8, strength: f64 },
    /// Super trend: +1 up / -1 down, the trend line level, and the
    /// distance of the close from the line in percent.
    Trend {
        direction: i8,
        line: f64,
        distance_pct: f64,
    },
}

/// Current derived state for one (instrument, kind) pair.
///
/// Single-writer: only the owning state manager mutates this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorState {
    pub instrument: Instrument,
    pub kind: IndicatorKind,
    pub value: IndicatorValue,
    /// End timestamp of the bar that produced this value.
    pub last_updated: DateTime<Utc>,
    /// Bars consumed for this instrument since the engine was created.
    pub bars_used: u64,
    /// Set once on the first change event after a restart resumed from
    /// a persisted snapshot with a stream gap in between.
    #[serde(default)]
    pub resumed_with_gap: bool,
}

/// Incremental indicator engine for a single instrument.
///
/// `on_bar` must be O(1): engines keep rolling state (EMAs, Wilder
/// ATR) instead of re-scanning history. Returns `None` while warming
/// up, then the current value after every closed bar.
pub trait Indicator: Send + 'static {
    fn kind(&self) -> IndicatorKind;
    fn on_bar(&mut self, bar: &Bar) -> Option<IndicatorValue>;
}
