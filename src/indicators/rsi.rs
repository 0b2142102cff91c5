// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Price deltas between consecutive closes.
// Step 2 — Seed average gain / loss with the SMA of the first `period`
//          gains / losses.
// Step 3 — Wilder's smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RS = avg_gain / avg_loss, RSI = 100 - 100 / (1 + RS).
//
// A flat market reads 50, all-gains reads 100, all-losses reads 0.
// =============================================================================

use super::Indicator;

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_price: Option<f64>,
    seed_gain: f64,
    seed_loss: f64,
    seed_count: usize,
    avg_gain: f64,
    avg_loss: f64,
    current: Option<f64>,
}

impl Rsi {
    /// `period` is clamped to >= 1. The conventional default is 14.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_price: None,
            seed_gain: 0.0,
            seed_loss: 0.0,
            seed_count: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            current: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss == 0.0 && avg_gain == 0.0 {
            50.0 // No movement at all.
        } else if avg_loss == 0.0 {
            100.0 // Only gains.
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> String {
        format!("rsi_{}", self.period)
    }

    fn update(&mut self, price: f64) -> Option<f64> {
        if !price.is_finite() {
            return self.current;
        }

        let prev = match self.prev_price.replace(price) {
            Some(prev) => prev,
            None => return None, // First sample has no delta.
        };

        let delta = price - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if self.seed_count < self.period {
            // Accumulating the SMA seed over the first `period` deltas.
            self.seed_gain += gain;
            self.seed_loss += loss;
            self.seed_count += 1;
            if self.seed_count == self.period {
                let period_f = self.period as f64;
                self.avg_gain = self.seed_gain / period_f;
                self.avg_loss = self.seed_loss / period_f;
                self.current = Some(Self::rsi_from_averages(self.avg_gain, self.avg_loss));
            }
        } else {
            let period_f = self.period as f64;
            self.avg_gain = (self.avg_gain * (period_f - 1.0) + gain) / period_f;
            self.avg_loss = (self.avg_loss * (period_f - 1.0) + loss) / period_f;
            self.current = Some(Self::rsi_from_averages(self.avg_gain, self.avg_loss));
        }

        self.current
    }

    fn current(&self) -> Option<f64> {
        self.current
    }

    fn reset(&mut self) {
        self.prev_price = None;
        self.seed_gain = 0.0;
        self.seed_loss = 0.0;
        self.seed_count = 0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
        self.current = None;
    }

    fn required_data_points(&self) -> usize {
        // `period` deltas need `period + 1` closes.
        self.period + 1
    }
}
