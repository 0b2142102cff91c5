// =============================================================================
// Strategy Contract
// =============================================================================
//
// A strategy consumes one ProcessedMarketData snapshot per tick and emits a
// raw TradingSignal; the signal generator downstream applies position and
// confidence filters. Strategies slot into the same contract, so the
// trader runtime is indifferent to which one it drives.
// =============================================================================

pub mod mean_reversion;
pub mod trend_following;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::market_data::ProcessedMarketData;
use crate::types::TradingSignal;

pub use mean_reversion::MeanReversionStrategy;
pub use trend_following::TrendFollowingStrategy;

pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Candles required before the strategy can act.
    fn required_candles(&self) -> usize;

    /// Evaluate one snapshot. Must never panic on thin or missing data;
    /// the degenerate answer is HOLD with confidence 0.
    fn evaluate(&mut self, data: &ProcessedMarketData) -> TradingSignal;

    /// Clear any internal continuation state.
    fn reset(&mut self);
}

/// Canonical strategy taxonomy used in trader configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    TrendFollowing,
    MeanReversion,
}

impl StrategyKind {
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            Self::TrendFollowing => Box::new(TrendFollowingStrategy::new()),
            Self::MeanReversion => Box::new(MeanReversionStrategy::new()),
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::TrendFollowing => "TREND_FOLLOWING",
            Self::MeanReversion => "MEAN_REVERSION",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = crate::errors::ExchangeError;

    /// Accepts the canonical names plus the legacy "Momentum" label that
    /// older persisted configurations still carry.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "TREND_FOLLOWING" | "TRENDFOLLOWING" | "MOMENTUM" => Ok(Self::TrendFollowing),
            "MEAN_REVERSION" | "MEANREVERSION" => Ok(Self::MeanReversion),
            other => Err(crate::errors::ExchangeError::exchange(
                "strategy",
                format!("unknown strategy '{other}'"),
            )),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_parse() {
        assert_eq!(
            "TREND_FOLLOWING".parse::<StrategyKind>().unwrap(),
            StrategyKind::TrendFollowing
        );
        assert_eq!(
            "mean_reversion".parse::<StrategyKind>().unwrap(),
            StrategyKind::MeanReversion
        );
        assert!("scalping".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn legacy_momentum_normalizes_to_trend_following() {
        // Historical configs persisted "Momentum" before the rename.
        assert_eq!(
            "Momentum".parse::<StrategyKind>().unwrap(),
            StrategyKind::TrendFollowing
        );
        assert_eq!(StrategyKind::TrendFollowing.wire_name(), "TREND_FOLLOWING");
    }

    #[test]
    fn build_produces_matching_strategies() {
        assert_eq!(StrategyKind::TrendFollowing.build().name(), "trend_following");
        assert_eq!(StrategyKind::MeanReversion.build().name(), "mean_reversion");
    }
}
