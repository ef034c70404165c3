//! Property-Based Tests - Indicator and Aggregation Invariants
//!
//! Uses `proptest` to verify that the incremental engines and the bar
//! aggregator maintain their invariants across random inputs.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;

use fx_failover_feed::domain::bias::MarketBias;
use fx_failover_feed::domain::indicator::{Indicator, IndicatorValue};
use fx_failover_feed::domain::super_trend::SuperTrend;
use fx_failover_feed::domain::tick::{Bar, BarAggregator, SourceId, Tick};

fn bar_seq(closes: &[f64]) -> Vec<Bar> {
    let t0 = Utc.timestamp_opt(0, 0).single().expect("epoch");
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            open: c,
            high: c + 0.0005,
            low: c - 0.0005,
            close: c,
            start: t0 + ChronoDuration::seconds(i as i64 * 900),
            end: t0 + ChronoDuration::seconds((i as i64 + 1) * 900),
        })
        .collect()
}

/// Batch reference for the market bias: textbook EMA arrays over the
/// whole history, evaluated at the last bar.
fn batch_bias(bars: &[Bar], primary: u32, secondary: u32) -> Option<IndicatorValue> {
    fn ema(values: &[f64], period: u32) -> Vec<f64> {
        let alpha = 2.0 / (f64::from(period) + 1.0);
        let mut out = Vec::with_capacity(values.len());
        for (i, &v) in values.iter().enumerate() {
            if i == 0 {
                out.push(v);
            } else {
                out.push(alpha * v + (1.0 - alpha) * out[i - 1]);
            }
        }
        out
    }

    if bars.len() < primary as usize {
        return None;
    }
    let eo = ema(&bars.iter().map(|b| b.open).collect::<Vec<_>>(), primary);
    let eh = ema(&bars.iter().map(|b| b.high).collect::<Vec<_>>(), primary);
    let el = ema(&bars.iter().map(|b| b.low).collect::<Vec<_>>(), primary);
    let ec = ema(&bars.iter().map(|b| b.close).collect::<Vec<_>>(), primary);

    let n = bars.len();
    let mut ha_close = vec![0.0; n];
    let mut ha_open = vec![0.0; n];
    for i in 0..n {
        ha_close[i] = (eo[i] + eh[i] + el[i] + ec[i]) / 4.0;
        ha_open[i] = if i == 0 {
            (eo[0] + ec[0]) / 2.0
        } else {
            (ha_open[i - 1] + ha_close[i - 1]) / 2.0
        };
    }
    let o2 = ema(&ha_open, secondary);
    let c2 = ema(&ha_close, secondary);

    let bias = if c2[n - 1] > o2[n - 1] { 1 } else { -1 };
    let strength = ((c2[n - 1] - o2[n - 1]).abs() / o2[n - 1] * 100.0 * 100.0).round() / 100.0;
    Some(IndicatorValue::Bias { bias, strength })
}

// ── Market Bias Properties ──────────────────────────────────

proptest! {
    /// Silent during warm-up, then a valid reading on every bar.
    #[test]
    fn bias_warms_up_then_always_reads(
        primary in 3u32..30,
        secondary in 1u32..10,
        closes in proptest::collection::vec(0.5f64..2.0, 40..80),
    ) {
        let mut mb = MarketBias::new(primary, secondary);
        for (i, b) in bar_seq(&closes).iter().enumerate() {
            match mb.on_bar(b) {
                None => prop_assert!(
                    (i as u32) + 1 < primary,
                    "silent after warm-up at bar {i}"
                ),
                Some(IndicatorValue::Bias { bias, strength }) => {
                    prop_assert!(bias == 1 || bias == -1, "bias must be +/-1, got {bias}");
                    prop_assert!(strength.is_finite() && strength >= 0.0);
                }
                Some(other) => prop_assert!(false, "wrong value kind {other:?}"),
            }
        }
    }

    /// The O(1) incremental engine must agree with the batch recomputation.
    #[test]
    fn incremental_bias_matches_batch(
        primary in 3u32..20,
        secondary in 1u32..8,
        closes in proptest::collection::vec(0.5f64..2.0, 25..60),
    ) {
        let bars = bar_seq(&closes);
        let mut mb = MarketBias::new(primary, secondary);
        let mut last = None;
        for b in &bars {
            if let Some(v) = mb.on_bar(b) {
                last = Some(v);
            }
        }
        prop_assert_eq!(last, batch_bias(&bars, primary, secondary));
    }
}

// ── Super Trend Properties ──────────────────────────────────

proptest! {
    /// Silent during the ATR seed window, then a coherent reading.
    #[test]
    fn super_trend_readings_are_coherent(
        period in 2u32..15,
        multiplier in 0.5f64..4.0,
        closes in proptest::collection::vec(0.5f64..2.0, 30..60),
    ) {
        let mut st = SuperTrend::new(period, multiplier);
        for (i, b) in bar_seq(&closes).iter().enumerate() {
            match st.on_bar(b) {
                None => prop_assert!(
                    (i as u32) + 1 < period,
                    "silent after seed window at bar {i}"
                ),
                Some(IndicatorValue::Trend { direction, line, distance_pct }) => {
                    prop_assert!(direction == 1 || direction == -1);
                    prop_assert!(line.is_finite());
                    prop_assert!(distance_pct >= 0.0);
                }
                Some(other) => prop_assert!(false, "wrong value kind {other:?}"),
            }
        }
    }
}

// ── Bar Aggregator Properties ───────────────────────────────

proptest! {
    /// Closed bars bound their constituent ticks and their intervals.
    #[test]
    fn bars_bound_their_ticks(
        mids in proptest::collection::vec(0.5f64..2.0, 10..120),
        step_secs in 1i64..200,
    ) {
        let t0 = Utc.timestamp_opt(0, 0).single().expect("epoch");
        let mut agg = BarAggregator::new(Duration::from_secs(60));
        let mut bars = Vec::new();

        for (i, &mid) in mids.iter().enumerate() {
            let tick = Tick {
                instrument: "EURUSD".to_string(),
                bid: mid - 0.0001,
                ask: mid + 0.0001,
                ts: t0 + ChronoDuration::seconds(i as i64 * step_secs),
                seq: i as u64,
                source: SourceId::Simulated,
            };
            if let Some(bar) = agg.on_tick(&tick) {
                bars.push(bar);
            }
        }

        let mut prev_end = None;
        for bar in &bars {
            prop_assert!(bar.high >= bar.open && bar.high >= bar.close);
            prop_assert!(bar.low <= bar.open && bar.low <= bar.close);
            prop_assert!(bar.start < bar.end);
            if let Some(end) = prev_end {
                prop_assert!(bar.start >= end, "bars must not overlap");
            }
            prev_end = Some(bar.end);
        }
    }
}
