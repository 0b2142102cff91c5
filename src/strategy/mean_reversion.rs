// =============================================================================
// Mean-Reversion Strategy — RSI extremes with SMA distance scaling
// =============================================================================
//
// Buys oversold dips below the long SMA and sells overbought spikes above
// it, with confidence scaled by how stretched RSI is beyond its band.
// Exists mainly to prove the strategy contract carries more than one
// implementation; the trader runtime treats it exactly like any other.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;

use crate::market_data::ProcessedMarketData;
use crate::strategy::Strategy;
use crate::types::{SignalAction, TradingSignal};

#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    rsi_key: String,
    sma_key: String,
    oversold: f64,
    overbought: f64,
    required: usize,
}

impl MeanReversionStrategy {
    pub fn new() -> Self {
        Self {
            rsi_key: "rsi_14".to_string(),
            sma_key: "sma_30".to_string(),
            oversold: 30.0,
            overbought: 70.0,
            required: 31,
        }
    }
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn required_candles(&self) -> usize {
        self.required
    }

    fn evaluate(&mut self, data: &ProcessedMarketData) -> TradingSignal {
        if data.candles.len() < self.required {
            return TradingSignal::hold(format!(
                "Insufficient data: {} < {} candles",
                data.candles.len(),
                self.required
            ))
            .with_indicators(data.indicators.clone());
        }

        let (Some(rsi), Some(sma)) = (
            data.indicator(&self.rsi_key),
            data.indicator(&self.sma_key),
        ) else {
            return TradingSignal::hold("Indicators not ready".to_string())
                .with_indicators(data.indicators.clone());
        };

        let price = data.latest_price.to_f64().unwrap_or(0.0);
        if price <= 0.0 || sma <= 0.0 {
            return TradingSignal::hold("Invalid price data".to_string())
                .with_indicators(data.indicators.clone());
        }

        // Stretch in [0, 1]: how far beyond the band RSI has moved.
        let (action, stretch) = if rsi <= self.oversold && price < sma {
            (SignalAction::Buy, (self.oversold - rsi) / self.oversold)
        } else if rsi >= self.overbought && price > sma {
            (
                SignalAction::Sell,
                (rsi - self.overbought) / (100.0 - self.overbought),
            )
        } else {
            return TradingSignal::hold(format!(
                "no extreme: RSI {rsi:.1} inside [{:.0}, {:.0}] band",
                self.oversold, self.overbought
            ))
            .with_indicators(data.indicators.clone());
        };

        let confidence = 0.5 + 0.5 * stretch.clamp(0.0, 1.0);
        let reason = format!(
            "{}: RSI {rsi:.1}, price {price:.4} vs SMA {sma:.4}",
            if action == SignalAction::Buy {
                "oversold reversion"
            } else {
                "overbought reversion"
            }
        );
        TradingSignal::new(action, confidence, reason).with_indicators(data.indicators.clone())
    }

    fn reset(&mut self) {}
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;
    use crate::types::TimeFrame;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(price: Decimal, indicators: &[(&str, f64)]) -> ProcessedMarketData {
        let candles = (0..40)
            .map(|i| Candle {
                symbol: "ETHUSDT".into(),
                interval: TimeFrame::M5,
                open_time: i as i64 * 300_000,
                close_time: i as i64 * 300_000 + 299_999,
                open: price,
                high: price + dec!(1),
                low: price - dec!(1),
                close: price,
                volume: dec!(10),
                quote_volume: dec!(1000),
            })
            .collect();
        ProcessedMarketData {
            symbol: "ETHUSDT".into(),
            candles,
            indicators: indicators
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            latest_price: price,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn oversold_below_sma_buys() {
        let mut strategy = MeanReversionStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            dec!(95),
            &[("rsi_14", 20.0), ("sma_30", 100.0)],
        ));
        assert_eq!(signal.action, SignalAction::Buy);
        // stretch = (30-20)/30 = 1/3; 0.5 + 0.5/3
        assert!((signal.confidence - (0.5 + 0.5 / 3.0)).abs() < 1e-9);
        assert!(signal.reason.contains("oversold reversion"));
    }

    #[test]
    fn overbought_above_sma_sells() {
        let mut strategy = MeanReversionStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            dec!(105),
            &[("rsi_14", 85.0), ("sma_30", 100.0)],
        ));
        assert_eq!(signal.action, SignalAction::Sell);
        assert!((signal.confidence - 0.75).abs() < 1e-9); // stretch 0.5
    }

    #[test]
    fn extreme_rsi_on_wrong_side_of_sma_holds() {
        // Oversold but already above the mean: no reversion edge.
        let mut strategy = MeanReversionStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            dec!(105),
            &[("rsi_14", 20.0), ("sma_30", 100.0)],
        ));
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn neutral_band_holds() {
        let mut strategy = MeanReversionStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            dec!(100),
            &[("rsi_14", 50.0), ("sma_30", 100.0)],
        ));
        assert_eq!(signal.action, SignalAction::Hold);
        assert!(signal.reason.contains("inside"));
    }

    #[test]
    fn missing_indicators_hold() {
        let mut strategy = MeanReversionStrategy::new();
        let signal = strategy.evaluate(&snapshot(dec!(100), &[]));
        assert_eq!(signal.action, SignalAction::Hold);
    }
}
