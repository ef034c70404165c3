//! Heikin-Ashi market bias, computed incrementally.
//!
//! The pipeline mirrors the classical smoothed-Heikin-Ashi bias:
//! 1. EMA-smooth open/high/low/close over the primary window.
//! 2. Build Heikin-Ashi style candles from the smoothed series.
//! 3. EMA-smooth the HA open/close again over the secondary window.
//! 4. Bias is the sign of (smoothed close - smoothed open); strength
//!    is their separation as a percentage of the smoothed open.
//!
//! Every step is a recurrence over the previous value, so one bar
//! costs O(1) and the engine never re-reads history.

use serde::{Deserialize, Serialize};

use super::indicator::{Indicator, IndicatorKind, IndicatorValue};
use super::tick::Bar;

/// One exponential moving average with the standard 2/(n+1) alpha.
///
/// Seeded with the first observation, matching a batch EMA whose
/// first output equals the first input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: u32) -> Self {
        Self {
            alpha: 2.0 / (f64::from(period) + 1.0),
            value: None,
        }
    }

    /// Feed one observation and return the updated average.
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Incremental market-bias engine for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBias {
    primary_len: u32,
    ema_open: Ema,
    ema_high: Ema,
    ema_low: Ema,
    ema_close: Ema,
    /// Previous Heikin-Ashi candle body, carried across bars.
    ha_open_prev: Option<f64>,
    ha_close_prev: Option<f64>,
    smooth_open: Ema,
    smooth_close: Ema,
    bars_seen: u64,
}

impl MarketBias {
    /// `primary_len` smooths the raw OHLC series (classically 300 bars
    /// of 15-minute data); `secondary_len` smooths the HA candles.
    pub fn new(primary_len: u32, secondary_len: u32) -> Self {
        Self {
            primary_len,
            ema_open: Ema::new(primary_len),
            ema_high: Ema::new(primary_len),
            ema_low: Ema::new(primary_len),
            ema_close: Ema::new(primary_len),
            ha_open_prev: None,
            ha_close_prev: None,
            smooth_open: Ema::new(secondary_len),
            smooth_close: Ema::new(secondary_len),
            bars_seen: 0,
        }
    }
}

impl Indicator for MarketBias {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::MarketBias
    }

    fn on_bar(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let eo = self.ema_open.update(bar.open);
        let eh = self.ema_high.update(bar.high);
        let el = self.ema_low.update(bar.low);
        let ec = self.ema_close.update(bar.close);

        let ha_close = (eo + eh + el + ec) / 4.0;
        let ha_open = match (self.ha_open_prev, self.ha_close_prev) {
            (Some(o), Some(c)) => (o + c) / 2.0,
            _ => (eo + ec) / 2.0,
        };
        self.ha_open_prev = Some(ha_open);
        self.ha_close_prev = Some(ha_close);

        let o2 = self.smooth_open.update(ha_open);
        let c2 = self.smooth_close.update(ha_close);

        self.bars_seen += 1;
        // The smoothed series is meaningless before a full primary window.
        if self.bars_seen < u64::from(self.primary_len) {
            return None;
        }

        let bias = if c2 > o2 { 1 } else { -1 };
        let strength = ((c2 - o2).abs() / o2 * 100.0 * 100.0).round() / 100.0;
        Some(IndicatorValue::Bias { bias, strength })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        let t0 = Utc.timestamp_opt(0, 0).single().expect("epoch");
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                open: c,
                high: c + 0.0002,
                low: c - 0.0002,
                close: c,
                start: t0 + Duration::seconds(i as i64 * 900),
                end: t0 + Duration::seconds((i as i64 + 1) * 900),
            })
            .collect()
    }

    /// Batch reference: EMA arrays computed the textbook way.
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
        let strength =
            ((c2[n - 1] - o2[n - 1]).abs() / o2[n - 1] * 100.0 * 100.0).round() / 100.0;
        Some(IndicatorValue::Bias { bias, strength })
    }

    #[test]
    fn warms_up_before_emitting() {
        let mut mb = MarketBias::new(10, 3);
        let data = bars(&[1.10; 9]);
        for b in &data {
            assert!(mb.on_bar(b).is_none());
        }
    }

    #[test]
    fn uptrend_reads_bullish() {
        let mut mb = MarketBias::new(10, 3);
        let closes: Vec<f64> = (0..60).map(|i| 1.10 + f64::from(i) * 0.001).collect();
        let mut last = None;
        for b in bars(&closes) {
            if let Some(v) = mb.on_bar(&b) {
                last = Some(v);
            }
        }
        match last.expect("warmed up") {
            IndicatorValue::Bias { bias, strength } => {
                assert_eq!(bias, 1);
                assert!(strength > 0.0);
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn incremental_matches_batch() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 1.25 + (f64::from(i) * 0.7).sin() * 0.01)
            .collect();
        let data = bars(&closes);

        let mut mb = MarketBias::new(20, 5);
        let mut last = None;
        for b in &data {
            if let Some(v) = mb.on_bar(b) {
                last = Some(v);
            }
        }
        assert_eq!(last, batch_bias(&data, 20, 5));
    }
}
