// =============================================================================
// Trend-Following Strategy — SMA crossover with RSI and MACD gates
// =============================================================================
//
// Rules:
//   1. Fewer candles than the warm-up window => HOLD, confidence 0.
//   2. Short/long SMA crossover sets the bias: golden cross => BUY,
//      death cross => SELL, no crossover => HOLD.
//   3. RSI gate: entering overbought on a BUY bias (or oversold on SELL)
//      costs confidence.
//   4. MACD confirmation: a histogram agreeing with the bias raises
//      confidence; a disagreeing one lowers it.
//   5. Confidence clamped to [0, 1]; the reason lists the contributing
//      indicator values.
// =============================================================================

use std::collections::HashMap;

use tracing::debug;

use crate::market_data::ProcessedMarketData;
use crate::strategy::Strategy;
use crate::types::{SignalAction, TradingSignal};

const BASE_CONFIDENCE: f64 = 0.6;
const RSI_PENALTY: f64 = 0.2;
const MACD_BONUS: f64 = 0.2;
const MACD_PENALTY: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct TrendFollowingStrategy {
    short_key: String,
    long_key: String,
    rsi_key: String,
    overbought: f64,
    oversold: f64,
    required: usize,
}

impl TrendFollowingStrategy {
    pub fn new() -> Self {
        Self {
            short_key: "sma_10".to_string(),
            long_key: "sma_30".to_string(),
            rsi_key: "rsi_14".to_string(),
            overbought: 70.0,
            oversold: 30.0,
            // MACD(12,26,9) is the longest warm-up in the standard bank.
            required: 34,
        }
    }

    fn hold(reason: String, indicators: &HashMap<String, f64>) -> TradingSignal {
        TradingSignal::hold(reason).with_indicators(indicators.clone())
    }
}

impl Default for TrendFollowingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for TrendFollowingStrategy {
    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn required_candles(&self) -> usize {
        self.required
    }

    fn evaluate(&mut self, data: &ProcessedMarketData) -> TradingSignal {
        if data.candles.len() < self.required {
            return Self::hold(
                format!(
                    "Insufficient data: {} < {} candles",
                    data.candles.len(),
                    self.required
                ),
                &data.indicators,
            );
        }

        let short = data.indicator(&self.short_key);
        let long = data.indicator(&self.long_key);
        let short_prev = data.indicator(&format!("{}_prev", self.short_key));
        let long_prev = data.indicator(&format!("{}_prev", self.long_key));

        let (Some(short), Some(long), Some(short_prev), Some(long_prev)) =
            (short, long, short_prev, long_prev)
        else {
            return Self::hold("Moving averages not ready".to_string(), &data.indicators);
        };

        // Crossover detection against the previous bar.
        let golden = short_prev <= long_prev && short > long;
        let death = short_prev >= long_prev && short < long;

        let (action, mut reason) = if golden {
            (
                SignalAction::Buy,
                format!("golden cross: SMA short {short:.4} crossed above SMA long {long:.4}"),
            )
        } else if death {
            (
                SignalAction::Sell,
                format!("death cross: SMA short {short:.4} crossed below SMA long {long:.4}"),
            )
        } else {
            return Self::hold(
                format!("no crossover (SMA short {short:.4}, SMA long {long:.4})"),
                &data.indicators,
            );
        };

        let mut confidence = BASE_CONFIDENCE;

        // RSI gate.
        if let Some(rsi) = data.indicator(&self.rsi_key) {
            if action == SignalAction::Buy && rsi > self.overbought {
                confidence -= RSI_PENALTY;
                reason.push_str(&format!("; RSI {rsi:.1} overbought, confidence reduced"));
            } else if action == SignalAction::Sell && rsi < self.oversold {
                confidence -= RSI_PENALTY;
                reason.push_str(&format!("; RSI {rsi:.1} oversold, confidence reduced"));
            } else {
                reason.push_str(&format!("; RSI {rsi:.1}"));
            }
        }

        // MACD confirmation.
        if let Some(histogram) = data.indicator("macd_histogram") {
            let agrees = match action {
                SignalAction::Buy => histogram > 0.0,
                SignalAction::Sell => histogram < 0.0,
                _ => false,
            };
            if agrees {
                confidence += MACD_BONUS;
                reason.push_str(&format!("; MACD histogram {histogram:.4} confirms"));
            } else {
                confidence -= MACD_PENALTY;
                reason.push_str(&format!("; MACD histogram {histogram:.4} diverges"));
            }
        }

        debug!(action = %action, confidence, "trend-following evaluation");
        TradingSignal::new(action, confidence, reason).with_indicators(data.indicators.clone())
    }

    fn reset(&mut self) {
        // Stateless across ticks: crossovers come from the snapshot's
        // previous-bar values, so there is nothing to clear.
    }
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
    use rust_decimal_macros::dec;

    fn snapshot(count: usize, indicators: &[(&str, f64)]) -> ProcessedMarketData {
        let candles = (0..count)
            .map(|i| Candle {
                symbol: "BTCUSDT".into(),
                interval: TimeFrame::M5,
                open_time: i as i64 * 300_000,
                close_time: i as i64 * 300_000 + 299_999,
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(10),
                quote_volume: dec!(1000),
            })
            .collect();
        ProcessedMarketData {
            symbol: "BTCUSDT".into(),
            candles,
            indicators: indicators
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            latest_price: dec!(100),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn insufficient_data_holds_at_zero() {
        let mut strategy = TrendFollowingStrategy::new();
        let signal = strategy.evaluate(&snapshot(10, &[]));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.confidence, 0.0);
        assert!(signal.reason.contains("Insufficient data"));
    }

    #[test]
    fn golden_cross_with_confirmation_buys_strongly() {
        let mut strategy = TrendFollowingStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            50,
            &[
                ("sma_10", 101.0),
                ("sma_10_prev", 99.5),
                ("sma_30", 100.0),
                ("sma_30_prev", 100.0),
                ("rsi_14", 55.0),
                ("macd_histogram", 0.4),
            ],
        ));
        assert_eq!(signal.action, SignalAction::Buy);
        assert!((signal.confidence - 0.8).abs() < 1e-9); // 0.6 + 0.2
        assert!(signal.reason.contains("golden cross"));
        assert!(signal.reason.contains("confirms"));
    }

    #[test]
    fn death_cross_sells() {
        let mut strategy = TrendFollowingStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            50,
            &[
                ("sma_10", 99.0),
                ("sma_10_prev", 100.5),
                ("sma_30", 100.0),
                ("sma_30_prev", 100.0),
                ("rsi_14", 45.0),
                ("macd_histogram", -0.4),
            ],
        ));
        assert_eq!(signal.action, SignalAction::Sell);
        assert!((signal.confidence - 0.8).abs() < 1e-9);
        assert!(signal.reason.contains("death cross"));
    }

    #[test]
    fn overbought_rsi_downgrades_buys() {
        let mut strategy = TrendFollowingStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            50,
            &[
                ("sma_10", 101.0),
                ("sma_10_prev", 99.5),
                ("sma_30", 100.0),
                ("sma_30_prev", 100.0),
                ("rsi_14", 82.0),
                ("macd_histogram", 0.4),
            ],
        ));
        assert_eq!(signal.action, SignalAction::Buy);
        // 0.6 - 0.2 (RSI) + 0.2 (MACD)
        assert!((signal.confidence - 0.6).abs() < 1e-9);
        assert!(signal.reason.contains("overbought"));
    }

    #[test]
    fn diverging_macd_lowers_confidence() {
        let mut strategy = TrendFollowingStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            50,
            &[
                ("sma_10", 101.0),
                ("sma_10_prev", 99.5),
                ("sma_30", 100.0),
                ("sma_30_prev", 100.0),
                ("rsi_14", 55.0),
                ("macd_histogram", -0.2),
            ],
        ));
        assert_eq!(signal.action, SignalAction::Buy);
        // 0.6 - 0.15
        assert!((signal.confidence - 0.45).abs() < 1e-9);
        assert!(signal.reason.contains("diverges"));
    }

    #[test]
    fn no_crossover_holds() {
        let mut strategy = TrendFollowingStrategy::new();
        let signal = strategy.evaluate(&snapshot(
            50,
            &[
                ("sma_10", 101.0),
                ("sma_10_prev", 101.0),
                ("sma_30", 100.0),
                ("sma_30_prev", 100.0),
                ("rsi_14", 55.0),
            ],
        ));
        assert_eq!(signal.action, SignalAction::Hold);
        assert!(signal.reason.contains("no crossover"));
    }

    #[test]
    fn missing_averages_hold() {
        let mut strategy = TrendFollowingStrategy::new();
        let signal = strategy.evaluate(&snapshot(50, &[("rsi_14", 55.0)]));
        assert_eq!(signal.action, SignalAction::Hold);
        assert!(signal.reason.contains("not ready"));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut strategy = TrendFollowingStrategy::new();
        let data = snapshot(
            50,
            &[
                ("sma_10", 101.0),
                ("sma_10_prev", 99.5),
                ("sma_30", 100.0),
                ("sma_30_prev", 100.0),
                ("rsi_14", 55.0),
                ("macd_histogram", 0.4),
            ],
        );
        let a = strategy.evaluate(&data);
        strategy.reset();
        let b = strategy.evaluate(&data);
        assert_eq!(a.action, b.action);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reason, b.reason);
    }
}
