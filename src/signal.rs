// =============================================================================
// Signal Generator — strategy + pattern fusion with position-aware filters
// =============================================================================
//
// Filter rules, applied in order:
//   1. A signal that would duplicate the current position's side (BUY while
//      LONG, SELL while SHORT) is coerced to HOLD.
//   2. CLOSE is always accepted while a position exists (and coerced to
//      HOLD when there is nothing to close).
//   3. BUY/SELL below the confidence threshold is coerced to HOLD.
//
// Confidence: `(1 - w) * strategy + w * pattern` when a pattern matched,
// otherwise the raw strategy confidence; halved when a filter changed the
// action to HOLD; nudged +0.1 / -0.1 for CLOSE of a profitable / losing
// position; clamped to [0, 1].
// =============================================================================

use tracing::debug;

use crate::patterns::PatternMatch;
use crate::types::{Position, SignalAction, TradeAction, TradingSignal};

#[derive(Debug, Clone)]
pub struct SignalGeneratorConfig {
    /// BUY/SELL signals below this confidence are coerced to HOLD.
    pub min_confidence_threshold: f64,
    /// Weight of the pattern confidence in the fused result.
    pub pattern_weight: f64,
}

impl Default for SignalGeneratorConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.3,
            pattern_weight: 0.3,
        }
    }
}

pub struct SignalGenerator {
    config: SignalGeneratorConfig,
}

impl SignalGenerator {
    pub fn new(config: SignalGeneratorConfig) -> Self {
        Self {
            config: SignalGeneratorConfig {
                min_confidence_threshold: config.min_confidence_threshold.clamp(0.0, 1.0),
                pattern_weight: config.pattern_weight.clamp(0.0, 1.0),
            },
        }
    }

    /// Fuse `raw` with the best pattern match and filter against the
    /// current position. Pure: identical inputs produce identical outputs
    /// (up to the emitted timestamp).
    pub fn generate(
        &self,
        raw: TradingSignal,
        pattern: Option<&PatternMatch>,
        position: Option<&Position>,
    ) -> TradingSignal {
        let mut action = raw.action;
        let mut reasons = vec![raw.reason.clone()];
        let mut filtered = false;

        // Rule 1: no same-side duplicates.
        match (raw.action, position) {
            (SignalAction::Buy, Some(p)) if p.action == TradeAction::Long => {
                action = SignalAction::Hold;
                filtered = true;
                reasons.push("Already have long position".to_string());
            }
            (SignalAction::Sell, Some(p)) if p.action == TradeAction::Short => {
                action = SignalAction::Hold;
                filtered = true;
                reasons.push("Already have short position".to_string());
            }
            // Rule 2 (inverse): CLOSE with nothing to close.
            (SignalAction::Close, None) => {
                action = SignalAction::Hold;
                filtered = true;
                reasons.push("No open position to close".to_string());
            }
            _ => {}
        }

        // Rule 3: confidence gate for entries. CLOSE with a position is
        // always accepted, so the gate never applies to it.
        if !filtered
            && matches!(action, SignalAction::Buy | SignalAction::Sell)
            && raw.confidence < self.config.min_confidence_threshold
        {
            action = SignalAction::Hold;
            filtered = true;
            reasons.push(format!(
                "Confidence {:.2} below threshold {:.2}",
                raw.confidence, self.config.min_confidence_threshold
            ));
        }

        // Fusion.
        let mut confidence = match pattern {
            Some(m) => {
                reasons.push(format!(
                    "pattern {} matched (relevance {:.2}, confidence {:.2})",
                    m.pattern_id, m.relevance_score, m.confidence
                ));
                (1.0 - self.config.pattern_weight) * raw.confidence
                    + self.config.pattern_weight * m.confidence
            }
            None => raw.confidence,
        };

        if filtered {
            confidence *= 0.5;
        }

        // Position-aware nudge for closes.
        if action == SignalAction::Close {
            if let Some(p) = position {
                if p.is_profitable() {
                    confidence += 0.1;
                    reasons.push("closing profitable position".to_string());
                } else {
                    confidence -= 0.1;
                    reasons.push("closing losing position".to_string());
                }
            }
        }

        let mut signal = TradingSignal::new(action, confidence, reasons.join("; "));
        signal.indicators = raw.indicators;
        signal.matched_pattern_id = pattern.map(|m| m.pattern_id.clone());

        debug!(
            action = %signal.action,
            confidence = signal.confidence,
            filtered,
            "signal generated"
        );
        signal
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new(SignalGeneratorConfig::default())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn generator() -> SignalGenerator {
        SignalGenerator::default()
    }

    fn long_position() -> Position {
        Position::new("BTCUSDT", TradeAction::Long, dec!(0.1), dec!(50000), dec!(1))
    }

    #[test]
    fn duplicate_long_is_blocked_and_halved() {
        // BUY at confidence 0.9 while LONG: HOLD at 0.45 with explanation.
        let raw = TradingSignal::new(SignalAction::Buy, 0.9, "golden cross");
        let position = long_position();
        let out = generator().generate(raw, None, Some(&position));

        assert_eq!(out.action, SignalAction::Hold);
        assert!((out.confidence - 0.45).abs() < 1e-9);
        assert!(out.reason.contains("Already have long position"));
    }

    #[test]
    fn duplicate_short_is_blocked() {
        let raw = TradingSignal::new(SignalAction::Sell, 0.8, "death cross");
        let position = Position::new("BTCUSDT", TradeAction::Short, dec!(0.1), dec!(50000), dec!(1));
        let out = generator().generate(raw, None, Some(&position));
        assert_eq!(out.action, SignalAction::Hold);
        assert!(out.reason.contains("Already have short position"));
    }

    #[test]
    fn opposite_side_entry_passes() {
        let raw = TradingSignal::new(SignalAction::Sell, 0.8, "death cross");
        let position = long_position();
        let out = generator().generate(raw, None, Some(&position));
        assert_eq!(out.action, SignalAction::Sell);
        assert!((out.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn close_with_profit_gets_a_nudge_up() {
        let raw = TradingSignal::new(SignalAction::Close, 0.6, "exit rule");
        let mut position = long_position();
        position.update_price(dec!(51000));
        let out = generator().generate(raw, None, Some(&position));
        assert_eq!(out.action, SignalAction::Close);
        assert!((out.confidence - 0.7).abs() < 1e-9);
        assert!(out.reason.contains("profitable"));
    }

    #[test]
    fn close_with_loss_gets_a_nudge_down() {
        let raw = TradingSignal::new(SignalAction::Close, 0.6, "exit rule");
        let mut position = long_position();
        position.update_price(dec!(49000));
        let out = generator().generate(raw, None, Some(&position));
        assert_eq!(out.action, SignalAction::Close);
        assert!((out.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn close_without_position_holds() {
        let raw = TradingSignal::new(SignalAction::Close, 0.9, "exit rule");
        let out = generator().generate(raw, None, None);
        assert_eq!(out.action, SignalAction::Hold);
        assert!(out.reason.contains("No open position"));
    }

    #[test]
    fn low_confidence_entry_is_gated() {
        let raw = TradingSignal::new(SignalAction::Buy, 0.2, "weak cross");
        let out = generator().generate(raw, None, None);
        assert_eq!(out.action, SignalAction::Hold);
        assert!((out.confidence - 0.1).abs() < 1e-9); // 0.2 halved
        assert!(out.reason.contains("below threshold"));
    }

    #[test]
    fn low_confidence_close_is_still_accepted() {
        let raw = TradingSignal::new(SignalAction::Close, 0.1, "hard exit");
        let mut position = long_position();
        position.update_price(dec!(49000));
        let out = generator().generate(raw, None, Some(&position));
        // CLOSE bypasses the gate; the losing nudge takes it to 0.0.
        assert_eq!(out.action, SignalAction::Close);
        assert!(out.confidence.abs() < 1e-9);
    }

    #[test]
    fn pattern_fusion_weights_confidences() {
        let raw = TradingSignal::new(SignalAction::Buy, 0.6, "cross");
        let pattern = PatternMatch {
            pattern_id: "p-42".into(),
            relevance_score: 0.9,
            confidence: 0.9,
        };
        let out = generator().generate(raw, Some(&pattern), None);
        // 0.7 * 0.6 + 0.3 * 0.9 = 0.69
        assert_eq!(out.action, SignalAction::Buy);
        assert!((out.confidence - 0.69).abs() < 1e-9);
        assert_eq!(out.matched_pattern_id.as_deref(), Some("p-42"));
        assert!(out.reason.contains("p-42"));
    }

    #[test]
    fn fused_then_filtered_is_halved() {
        let raw = TradingSignal::new(SignalAction::Buy, 0.6, "cross");
        let pattern = PatternMatch {
            pattern_id: "p-1".into(),
            relevance_score: 0.8,
            confidence: 0.9,
        };
        let position = long_position();
        let out = generator().generate(raw, Some(&pattern), Some(&position));
        assert_eq!(out.action, SignalAction::Hold);
        assert!((out.confidence - 0.345).abs() < 1e-9); // 0.69 * 0.5
    }

    #[test]
    fn confidence_is_clamped_to_unit_interval() {
        let raw = TradingSignal::new(SignalAction::Close, 0.97, "exit");
        let mut position = long_position();
        position.update_price(dec!(60000));
        let out = generator().generate(raw, None, Some(&position));
        assert_eq!(out.confidence, 1.0); // 0.97 + 0.1 clamped

        let raw = TradingSignal::new(SignalAction::Hold, 0.0, "nothing");
        let out = generator().generate(raw, None, None);
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let raw = TradingSignal::new(SignalAction::Buy, 0.7, "cross");
        let a = generator().generate(raw.clone(), None, None);
        let b = generator().generate(raw, None, None);
        assert_eq!(a.action, b.action);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reason, b.reason);
    }
}
