// =============================================================================
// Moving Average Convergence/Divergence (MACD)
// =============================================================================
//
//   macd      = EMA_fast(price) - EMA_slow(price)
//   signal    = EMA_signal(macd)
//   histogram = macd - signal
//
// Standard periods are 12/26/9. The output is a triple rather than a single
// scalar, so MACD carries its own value type instead of the scalar
// `Indicator` trait; the bank flattens it into the snapshot under "macd",
// "macd_signal" and "macd_histogram".
// =============================================================================

use super::{Ema, Indicator};

/// One MACD evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    current: Option<MacdValue>,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
            signal: Ema::new(signal_period),
            current: None,
        }
    }

    /// Conventional 12/26/9 configuration.
    pub fn standard() -> Self {
        Self::new(12, 26, 9)
    }

    /// Feed one close price. Yields a value once the slow EMA and the
    /// signal EMA over the MACD line have both warmed up.
    pub fn update(&mut self, price: f64) -> Option<MacdValue> {
        let fast = self.fast.update(price);
        let slow = self.slow.update(price);

        let (fast, slow) = match (fast, slow) {
            (Some(f), Some(s)) => (f, s),
            _ => return self.current,
        };

        let macd_line = fast - slow;
        let signal = self.signal.update(macd_line)?;

        self.current = Some(MacdValue {
            macd: macd_line,
            signal,
            histogram: macd_line - signal,
        });
        self.current
    }

    pub fn current(&self) -> Option<MacdValue> {
        self.current
    }

    pub fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
        self.current = None;
    }

    /// Closes needed before the first value: the slow EMA warm-up plus the
    /// signal EMA warm-up over MACD samples.
    pub fn required_data_points(&self) -> usize {
        self.slow.required_data_points() + self.signal.required_data_points() - 1
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_length() {
        let macd = Macd::standard();
        assert_eq!(macd.required_data_points(), 34);
    }

    #[test]
    fn none_until_warm_then_some() {
        let mut macd = Macd::new(3, 5, 3);
        let mut first_at = None;
        for i in 0..20 {
            if macd.update(100.0 + i as f64).is_some() && first_at.is_none() {
                first_at = Some(i + 1);
            }
        }
        // slow(5) + signal(3) - 1 = 7 samples.
        assert_eq!(first_at, Some(7));
    }

    #[test]
    fn constant_series_gives_zero_lines() {
        let mut macd = Macd::new(3, 5, 3);
        let mut last = None;
        for _ in 0..30 {
            last = macd.update(50.0);
        }
        let value = last.unwrap();
        assert!(value.macd.abs() < 1e-12);
        assert!(value.signal.abs() < 1e-12);
        assert!(value.histogram.abs() < 1e-12);
    }

    #[test]
    fn rising_series_has_positive_macd() {
        let mut macd = Macd::standard();
        let mut last = None;
        for i in 0..60 {
            last = macd.update(100.0 + i as f64 * 2.0);
        }
        let value = last.unwrap();
        // Fast EMA tracks a rising series more closely than the slow one.
        assert!(value.macd > 0.0);
    }

    #[test]
    fn histogram_is_macd_minus_signal() {
        let mut macd = Macd::new(3, 6, 4);
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.5).cos() * 8.0).collect();
        for &c in &closes {
            if let Some(v) = macd.update(c) {
                assert!((v.histogram - (v.macd - v.signal)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn reset_clears_all_stages() {
        let mut macd = Macd::new(2, 3, 2);
        for i in 0..10 {
            macd.update(i as f64);
        }
        assert!(macd.current().is_some());
        macd.reset();
        assert!(macd.current().is_none());
        assert!(macd.update(1.0).is_none());
    }
}
