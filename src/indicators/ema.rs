// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = price_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first value is seeded with the SMA of the first `period` samples, so
// at the first available point EMA equals SMA. With constant input the EMA
// equals that constant exactly.
// =============================================================================

use super::Indicator;

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: f64,
    seed_sum: f64,
    seed_count: usize,
    current: Option<f64>,
}

impl Ema {
    /// `period` is clamped to >= 1.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seed_count: 0,
            current: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Ema {
    fn name(&self) -> String {
        format!("ema_{}", self.period)
    }

    fn update(&mut self, price: f64) -> Option<f64> {
        if !price.is_finite() {
            return self.current;
        }

        match self.current {
            None => {
                // Still accumulating the SMA seed.
                self.seed_sum += price;
                self.seed_count += 1;
                if self.seed_count == self.period {
                    self.current = Some(self.seed_sum / self.period as f64);
                }
            }
            Some(prev) => {
                self.current = Some(price * self.multiplier + prev * (1.0 - self.multiplier));
            }
        }
        self.current
    }

    fn current(&self) -> Option<f64> {
        self.current
    }

    fn reset(&mut self) {
        self.seed_sum = 0.0;
        self.seed_count = 0;
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
    use crate::indicators::Sma;

    #[test]
    fn ema_equals_sma_at_first_point() {
        // prices [10, 20, 30], period 3: SMA = 20 and EMA = 20 exactly.
        let mut ema = Ema::new(3);
        let mut sma = Sma::new(3);
        let prices = [10.0, 20.0, 30.0];
        let (mut e, mut s) = (None, None);
        for &p in &prices {
            e = ema.update(p);
            s = sma.update(p);
        }
        assert_eq!(e, Some(20.0));
        assert_eq!(e, s);
    }

    #[test]
    fn ema_of_constant_series_is_the_constant() {
        let mut ema = Ema::new(5);
        let mut last = None;
        for _ in 0..50 {
            last = ema.update(42.5);
        }
        assert_eq!(last, Some(42.5));
    }

    #[test]
    fn ema_recursion_matches_formula() {
        // period 5: seed = SMA(1..=5) = 3, multiplier = 1/3.
        let mut ema = Ema::new(5);
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let series = ema.calculate_all(&closes);
        assert_eq!(series[..4], [None, None, None, None]);
        assert_eq!(series[4], Some(3.0));

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        for (i, &close) in closes[5..].iter().enumerate() {
            expected = close * mult + expected * (1.0 - mult);
            let got = series[5 + i].unwrap();
            assert!((got - expected).abs() < 1e-12, "got {got}, want {expected}");
        }
    }

    #[test]
    fn calculate_all_pads_warmup_with_none() {
        let mut ema = Ema::new(3);
        let series = ema.calculate_all(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(series.iter().filter(|v| v.is_none()).count(), 2);
        assert!(series[2].is_some());
    }

    #[test]
    fn reset_restarts_seeding() {
        let mut ema = Ema::new(2);
        ema.update(10.0);
        ema.update(20.0);
        assert!(ema.current().is_some());
        ema.reset();
        assert_eq!(ema.current(), None);
        assert_eq!(ema.update(5.0), None);
    }

    #[test]
    fn non_finite_input_is_ignored() {
        let mut ema = Ema::new(2);
        ema.update(10.0);
        ema.update(20.0);
        let before = ema.current();
        assert_eq!(ema.update(f64::INFINITY), before);
    }
}
