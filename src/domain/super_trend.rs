//! Super-trend indicator, computed incrementally.
//!
//! Classic ATR-band construction: a Wilder-smoothed average true
//! range places an upper and lower band around the bar midpoint; the
//! trend line rides the band on the active side and flips direction
//! when the close crosses it. One closed bar costs O(1).

use serde::{Deserialize, Serialize};

use super::indicator::{Indicator, IndicatorKind, IndicatorValue};
use super::tick::Bar;

/// Incremental super-trend engine for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperTrend {
    atr_period: u32,
    multiplier: f64,
    prev_close: Option<f64>,
    /// Sum of true ranges during the seeding window.
    tr_seed_sum: f64,
    atr: Option<f64>,
    final_upper: f64,
    final_lower: f64,
    /// +1 up, -1 down, 0 before the first reading.
    direction: i8,
    bars_seen: u64,
}

impl SuperTrend {
    pub fn new(atr_period: u32, multiplier: f64) -> Self {
        Self {
            atr_period,
            multiplier,
            prev_close: None,
            tr_seed_sum: 0.0,
            atr: None,
            final_upper: f64::INFINITY,
            final_lower: f64::NEG_INFINITY,
            direction: 0,
            bars_seen: 0,
        }
    }

    fn true_range(&self, bar: &Bar) -> f64 {
        let hl = bar.high - bar.low;
        match self.prev_close {
            Some(pc) => hl.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
            None => hl,
        }
    }
}

impl Indicator for SuperTrend {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::SuperTrend
    }

    fn on_bar(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let tr = self.true_range(bar);
        self.bars_seen += 1;

        let atr = match self.atr {
            // Wilder smoothing once seeded.
            Some(prev) => {
                let p = f64::from(self.atr_period);
                (prev * (p - 1.0) + tr) / p
            }
            None => {
                self.tr_seed_sum += tr;
                if self.bars_seen < u64::from(self.atr_period) {
                    self.prev_close = Some(bar.close);
                    return None;
                }
                self.tr_seed_sum / f64::from(self.atr_period)
            }
        };
        self.atr = Some(atr);

        let mid = (bar.high + bar.low) / 2.0;
        let basic_upper = mid + self.multiplier * atr;
        let basic_lower = mid - self.multiplier * atr;

        let prev_close = self.prev_close.unwrap_or(bar.close);
        // Bands only ratchet toward price unless the close broke out.
        self.final_upper = if basic_upper < self.final_upper || prev_close > self.final_upper {
            basic_upper
        } else {
            self.final_upper
        };
        self.final_lower = if basic_lower > self.final_lower || prev_close < self.final_lower {
            basic_lower
        } else {
            self.final_lower
        };

        self.direction = if bar.close > self.final_upper {
            1
        } else if bar.close < self.final_lower {
            -1
        } else if self.direction == 0 {
            // First reading: side of the midpoint decides.
            if bar.close >= mid { 1 } else { -1 }
        } else {
            self.direction
        };

        let line = if self.direction == 1 {
            self.final_lower
        } else {
            self.final_upper
        };
        self.prev_close = Some(bar.close);

        // The line can sit below zero when the ATR band is wide, so
        // normalize by its magnitude.
        let distance_pct = if line.is_finite() && line != 0.0 {
            (((bar.close - line).abs() / line.abs()) * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        let line = (line * 100_000.0).round() / 100_000.0;

        Some(IndicatorValue::Trend {
            direction: self.direction,
            line,
            distance_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let t0 = Utc.timestamp_opt(0, 0).single().expect("epoch");
        Bar {
            open,
            high,
            low,
            close,
            start: t0 + Duration::seconds(i * 900),
            end: t0 + Duration::seconds((i + 1) * 900),
        }
    }

    fn trending(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i as i64, c, c + 0.001, c - 0.001, c))
            .collect()
    }

    #[test]
    fn no_reading_during_seed_window() {
        let mut st = SuperTrend::new(10, 3.0);
        for b in trending(&[1.10; 9]) {
            assert!(st.on_bar(&b).is_none());
        }
    }

    #[test]
    fn sustained_rally_reads_up() {
        let mut st = SuperTrend::new(10, 3.0);
        let closes: Vec<f64> = (0..80).map(|i| 1.10 + f64::from(i) * 0.002).collect();
        let mut last = None;
        for b in trending(&closes) {
            if let Some(v) = st.on_bar(&b) {
                last = Some(v);
            }
        }
        match last.expect("seeded") {
            IndicatorValue::Trend {
                direction, line, ..
            } => {
                assert_eq!(direction, 1);
                assert!(line < *closes.last().expect("non-empty"));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn reversal_flips_direction() {
        let mut st = SuperTrend::new(5, 1.0);
        let mut closes: Vec<f64> = (0..40).map(|i| 1.10 + f64::from(i) * 0.002).collect();
        closes.extend((0..40).map(|i| 1.18 - f64::from(i) * 0.004));

        let mut directions = Vec::new();
        for b in trending(&closes) {
            if let Some(IndicatorValue::Trend { direction, .. }) = st.on_bar(&b) {
                directions.push(direction);
            }
        }
        assert!(directions.contains(&1));
        assert_eq!(*directions.last().expect("non-empty"), -1);
    }

    #[test]
    fn distance_stays_non_negative_when_the_line_goes_negative() {
        // An early spike widens the ATR band enough to push the lower
        // band below zero at low price levels; the distance is still
        // a magnitude.
        let mut st = SuperTrend::new(4, 3.32);
        for b in trending(&[1.9, 0.5, 0.5, 0.5]) {
            if let Some(IndicatorValue::Trend {
                line, distance_pct, ..
            }) = st.on_bar(&b)
            {
                assert!(line < 0.0, "band must undershoot zero, got {line}");
                assert!(distance_pct >= 0.0, "got {distance_pct}");
            }
        }
    }

    #[test]
    fn line_stays_below_price_in_uptrend() {
        let mut st = SuperTrend::new(5, 2.0);
        let closes: Vec<f64> = (0..60).map(|i| 1.0 + f64::from(i) * 0.003).collect();
        for b in trending(&closes) {
            if let Some(IndicatorValue::Trend {
                direction: 1,
                line,
                ..
            }) = st.on_bar(&b)
            {
                assert!(line <= b.close, "line {line} above close {}", b.close);
            }
        }
    }
}
