// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Mean of the last `period` closes, maintained incrementally with a sliding
// window and running sum. Yields `None` until `period` samples have been
// seen.
// =============================================================================

use std::collections::VecDeque;

use super::Indicator;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
    current: Option<f64>,
}

impl Sma {
    /// `period` is clamped to >= 1.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            window: VecDeque::with_capacity(period.max(1) + 1),
            sum: 0.0,
            current: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    fn name(&self) -> String {
        format!("sma_{}", self.period)
    }

    fn update(&mut self, price: f64) -> Option<f64> {
        if !price.is_finite() {
            // Poisoned input would corrupt the running sum permanently.
            return self.current;
        }

        self.window.push_back(price);
        self.sum += price;
        if self.window.len() > self.period {
            if let Some(evicted) = self.window.pop_front() {
                self.sum -= evicted;
            }
        }

        if self.window.len() == self.period {
            self.current = Some(self.sum / self.period as f64);
        }
        self.current
    }

    fn current(&self) -> Option<f64> {
        self.current
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
        self.current = None;
    }

    fn required_data_points(&self) -> usize {
        self.period
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_until_warm() {
        let mut sma = Sma::new(3);
        assert_eq!(sma.update(10.0), None);
        assert_eq!(sma.update(20.0), None);
        assert_eq!(sma.update(30.0), Some(20.0));
    }

    #[test]
    fn window_slides() {
        let mut sma = Sma::new(3);
        for price in [10.0, 20.0, 30.0] {
            sma.update(price);
        }
        // Window becomes [20, 30, 40].
        assert_eq!(sma.update(40.0), Some(30.0));
        assert_eq!(sma.current(), Some(30.0));
    }

    #[test]
    fn calculate_all_alignment() {
        let mut sma = Sma::new(3);
        let series = sma.calculate_all(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(series, vec![None, None, Some(20.0), Some(30.0)]);
        // State was reset afterwards.
        assert_eq!(sma.current(), None);
    }

    #[test]
    fn reset_clears_state() {
        let mut sma = Sma::new(2);
        sma.update(1.0);
        sma.update(2.0);
        sma.reset();
        assert_eq!(sma.current(), None);
        assert_eq!(sma.update(5.0), None);
    }

    #[test]
    fn non_finite_input_is_ignored() {
        let mut sma = Sma::new(2);
        sma.update(10.0);
        sma.update(20.0);
        assert_eq!(sma.update(f64::NAN), Some(15.0));
        assert_eq!(sma.update(30.0), Some(25.0));
    }

    #[test]
    fn period_zero_clamps_to_one() {
        let mut sma = Sma::new(0);
        assert_eq!(sma.update(42.0), Some(42.0));
    }
}
