// =============================================================================
// Indicator Library — incremental, stateful technical indicators
// =============================================================================
//
// Every indicator is a small state machine fed one close price at a time.
// Feeding the same series always produces bit-identical output; `reset()`
// returns an instance to its initial state. Values are `f64` because they
// are analytics, not currency; monetary math elsewhere stays in Decimal.
// =============================================================================

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use std::collections::HashMap;

pub use ema::Ema;
pub use macd::{Macd, MacdValue};
pub use rsi::Rsi;
pub use sma::Sma;

/// Common contract for scalar-valued indicators.
pub trait Indicator: Send {
    /// Snapshot key, e.g. "sma_10" or "rsi_14".
    fn name(&self) -> String;

    /// Feed one close price; returns the new value once warmed up.
    fn update(&mut self, price: f64) -> Option<f64>;

    /// Most recent value without feeding new data.
    fn current(&self) -> Option<f64>;

    /// Clear all internal state.
    fn reset(&mut self);

    /// Minimum number of samples before `update` yields a value.
    fn required_data_points(&self) -> usize;

    /// Evaluate the whole series at once. The result is aligned with the
    /// input: index i holds the indicator value after sample i, with a
    /// `None` prefix while warming up. Resets state before and after.
    fn calculate_all(&mut self, series: &[f64]) -> Vec<Option<f64>> {
        self.reset();
        let out = series.iter().map(|&price| self.update(price)).collect();
        self.reset();
        out
    }
}

/// True when `series` holds at least `required` samples, all finite.
pub fn validate_data(series: &[f64], required: usize) -> bool {
    series.len() >= required && series.iter().all(|v| v.is_finite())
}

// =============================================================================
// IndicatorBank -- the fixed set a trader computes every tick
// =============================================================================

/// Periods used by the standard signal pipeline.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorPeriods {
    pub sma_short: usize,
    pub sma_long: usize,
    pub rsi: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            sma_short: 10,
            sma_long: 30,
            rsi: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

/// The indicator set the trader runtime maintains per symbol. One bank per
/// trader; `compute` is deterministic for a given close series.
pub struct IndicatorBank {
    periods: IndicatorPeriods,
    sma_short: Sma,
    sma_long: Sma,
    rsi: Rsi,
    macd: Macd,
}

impl IndicatorBank {
    pub fn new(periods: IndicatorPeriods) -> Self {
        Self {
            periods,
            sma_short: Sma::new(periods.sma_short),
            sma_long: Sma::new(periods.sma_long),
            rsi: Rsi::new(periods.rsi),
            macd: Macd::new(periods.macd_fast, periods.macd_slow, periods.macd_signal),
        }
    }

    /// Candles needed before every indicator in the bank has warmed up.
    pub fn required_candles(&self) -> usize {
        let macd_need = self.periods.macd_slow + self.periods.macd_signal - 1;
        self.periods
            .sma_long
            .max(self.periods.rsi + 1)
            .max(macd_need)
    }

    /// Recompute the snapshot from a full close series. Keys:
    /// `sma_<n>`, `rsi_<n>`, `macd`, `macd_signal`, `macd_histogram`,
    /// plus the previous-bar SMAs (`sma_<n>_prev`) used for crossover
    /// detection.
    pub fn compute(&mut self, closes: &[f64]) -> HashMap<String, f64> {
        let mut snapshot = HashMap::new();

        let short_series = self.sma_short.calculate_all(closes);
        let long_series = self.sma_long.calculate_all(closes);
        Self::insert_last_two(
            &mut snapshot,
            &format!("sma_{}", self.periods.sma_short),
            &short_series,
        );
        Self::insert_last_two(
            &mut snapshot,
            &format!("sma_{}", self.periods.sma_long),
            &long_series,
        );

        self.rsi.reset();
        let mut rsi_last = None;
        for &price in closes {
            rsi_last = self.rsi.update(price);
        }
        self.rsi.reset();
        if let Some(value) = rsi_last {
            snapshot.insert(format!("rsi_{}", self.periods.rsi), value);
        }

        self.macd.reset();
        let mut macd_last = None;
        for &price in closes {
            macd_last = self.macd.update(price);
        }
        self.macd.reset();
        if let Some(value) = macd_last {
            snapshot.insert("macd".to_string(), value.macd);
            snapshot.insert("macd_signal".to_string(), value.signal);
            snapshot.insert("macd_histogram".to_string(), value.histogram);
        }

        snapshot
    }

    fn insert_last_two(snapshot: &mut HashMap<String, f64>, key: &str, series: &[Option<f64>]) {
        let values: Vec<f64> = series.iter().filter_map(|v| *v).collect();
        if let Some(last) = values.last() {
            snapshot.insert(key.to_string(), *last);
        }
        if values.len() >= 2 {
            snapshot.insert(format!("{key}_prev"), values[values.len() - 2]);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_data_checks_length_and_finiteness() {
        assert!(validate_data(&[1.0, 2.0, 3.0], 3));
        assert!(!validate_data(&[1.0, 2.0], 3));
        assert!(!validate_data(&[1.0, f64::NAN, 3.0], 3));
    }

    #[test]
    fn bank_required_candles_covers_macd_warmup() {
        let bank = IndicatorBank::new(IndicatorPeriods::default());
        // MACD(12,26,9) needs 26 + 9 - 1 = 34 samples, more than SMA-30.
        assert_eq!(bank.required_candles(), 34);
    }

    #[test]
    fn bank_snapshot_has_expected_keys() {
        let mut bank = IndicatorBank::new(IndicatorPeriods::default());
        let closes: Vec<f64> = (1..=60).map(|i| 100.0 + i as f64).collect();
        let snapshot = bank.compute(&closes);
        for key in [
            "sma_10",
            "sma_10_prev",
            "sma_30",
            "sma_30_prev",
            "rsi_14",
            "macd",
            "macd_signal",
            "macd_histogram",
        ] {
            assert!(snapshot.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn bank_is_deterministic() {
        let closes: Vec<f64> = (1..=60).map(|i| (i as f64 * 0.7).sin() * 10.0 + 100.0).collect();
        let mut bank = IndicatorBank::new(IndicatorPeriods::default());
        let first = bank.compute(&closes);
        let second = bank.compute(&closes);
        assert_eq!(first, second);
    }

    #[test]
    fn bank_empty_input_yields_empty_snapshot() {
        let mut bank = IndicatorBank::new(IndicatorPeriods::default());
        assert!(bank.compute(&[]).is_empty());
    }
}
