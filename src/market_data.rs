// =============================================================================
// Market Data — candles, rolling windows, processed snapshots
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::TimeFrame;

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// A single OHLCV bar for a fixed interval.
/// Invariants: `low <= open, close <= high` and `close_time > open_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: TimeFrame,
    /// Milliseconds since epoch.
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

impl Candle {
    /// Check the OHLC ordering and time-span invariants. Connectors drop
    /// candles that fail this with a warning instead of propagating them.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.close_time > self.open_time
    }

    /// Close price as `f64` for indicator analytics. Monetary math stays in
    /// `Decimal`; this conversion exists only at the analytics boundary.
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// CandleWindow -- rolling window of closed candles per trader
// ---------------------------------------------------------------------------

/// Bounded, ordered window of the most recent closed candles. The trader
/// runtime refreshes it every tick; duplicates (same `open_time`) replace
/// the stored candle so stream corrections are absorbed in place.
#[derive(Debug)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleWindow {
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles + 1),
            max_candles,
        }
    }

    /// Insert a closed candle, keeping the window ordered by `open_time`
    /// and trimmed to `max_candles`.
    pub fn push(&mut self, candle: Candle) {
        if let Some(last) = self.candles.back() {
            if last.open_time == candle.open_time {
                self.candles.pop_back();
            } else if last.open_time > candle.open_time {
                // Out-of-order candle: ignore rather than corrupt the series.
                return;
            }
        }
        self.candles.push_back(candle);
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
    }

    /// Replace the whole window from a REST snapshot (oldest-first input).
    pub fn replace_all(&mut self, candles: Vec<Candle>) {
        self.candles.clear();
        for candle in candles {
            self.push(candle);
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Oldest-first snapshot of the window.
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    /// Oldest-first close prices as `f64` for the indicator library.
    pub fn closes_f64(&self) -> Vec<f64> {
        self.candles.iter().map(Candle::close_f64).collect()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.candles.back().map(|c| c.close)
    }
}

// ---------------------------------------------------------------------------
// ProcessedMarketData
// ---------------------------------------------------------------------------

/// Everything the strategy needs for one evaluation: the candle window, the
/// indicator snapshot computed from it, and the latest price.
#[derive(Debug, Clone)]
pub struct ProcessedMarketData {
    pub symbol: String,
    pub candles: Vec<Candle>,
    /// Indicator values keyed by name ("sma_10", "rsi_14", "macd", ...).
    pub indicators: HashMap<String, f64>,
    pub latest_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl ProcessedMarketData {
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_candle(open_time: i64, close: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval: TimeFrame::M1,
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(100),
            quote_volume: dec!(200),
        }
    }

    #[test]
    fn candle_invariants() {
        let candle = sample_candle(0, dec!(100));
        assert!(candle.is_valid());

        let mut broken = sample_candle(0, dec!(100));
        broken.low = dec!(101);
        assert!(!broken.is_valid());

        let mut inverted = sample_candle(0, dec!(100));
        inverted.close_time = inverted.open_time;
        assert!(!inverted.is_valid());
    }

    #[test]
    fn window_trims_to_capacity() {
        let mut window = CandleWindow::new(3);
        for i in 0..5 {
            window.push(sample_candle(i * 60_000, dec!(100) + Decimal::from(i)));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.last_close(), Some(dec!(104)));
        assert_eq!(window.candles()[0].close, dec!(102));
    }

    #[test]
    fn window_replaces_same_open_time() {
        let mut window = CandleWindow::new(10);
        window.push(sample_candle(0, dec!(100)));
        window.push(sample_candle(0, dec!(101)));
        assert_eq!(window.len(), 1);
        assert_eq!(window.last_close(), Some(dec!(101)));
    }

    #[test]
    fn window_drops_out_of_order() {
        let mut window = CandleWindow::new(10);
        window.push(sample_candle(60_000, dec!(100)));
        window.push(sample_candle(0, dec!(99)));
        assert_eq!(window.len(), 1);
        assert_eq!(window.last_close(), Some(dec!(100)));
    }

    #[test]
    fn replace_all_resets_window() {
        let mut window = CandleWindow::new(10);
        window.push(sample_candle(0, dec!(1)));
        window.replace_all(vec![
            sample_candle(60_000, dec!(2)),
            sample_candle(120_000, dec!(3)),
        ]);
        assert_eq!(window.len(), 2);
        assert_eq!(window.closes_f64(), vec![2.0, 3.0]);
    }
}
