// =============================================================================
// Pattern Matcher — consumer side of the pattern service
// =============================================================================
//
// The core only consumes stored patterns: it hands the matcher the current
// market conditions and receives back the best matches with a relevance
// score and a confidence derived from each pattern's historical win-rate.
// Pattern discovery and scoring internals belong to the external pattern
// service; `InMemoryPatternStore` is the in-process stand-in that wiring
// and tests use.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ExchangeResult;
use crate::market_data::Candle;
use crate::types::Exchange;

/// Matches below this relevance are not returned.
pub const DEFAULT_MIN_RELEVANCE: f64 = 0.6;

/// Snapshot of the market handed to the matcher.
#[derive(Debug, Clone)]
pub struct MarketConditions {
    pub exchange: Exchange,
    pub symbol: String,
    pub current_price: Decimal,
    pub indicators: HashMap<String, f64>,
    pub candles: Vec<Candle>,
    pub timestamp: DateTime<Utc>,
}

/// One scored match against a stored pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    /// How closely current conditions resemble the pattern, in [0, 1].
    pub relevance_score: f64,
    /// Confidence derived from the pattern's historical win-rate.
    pub confidence: f64,
}

/// The matching contract the trader runtime consumes.
#[async_trait]
pub trait PatternMatcher: Send + Sync {
    /// Best matches for `conditions`, highest relevance first, at most
    /// `max_results`, all with relevance >= the matcher's minimum.
    async fn find_matches(
        &self,
        conditions: &MarketConditions,
        max_results: usize,
    ) -> ExchangeResult<Vec<PatternMatch>>;
}

// ---------------------------------------------------------------------------
// Stored patterns + in-memory store
// ---------------------------------------------------------------------------

/// A persisted market-state fingerprint with win-rate metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPattern {
    pub id: String,
    /// Restrict the pattern to one symbol, or `None` for any.
    pub symbol: Option<String>,
    /// Indicator fingerprint the pattern was mined from.
    pub features: HashMap<String, f64>,
    /// Historical fraction of winning occurrences, in [0, 1].
    pub win_rate: f64,
    pub occurrences: u32,
}

impl StoredPattern {
    /// Confidence shrinks toward zero for thinly observed patterns.
    pub fn confidence(&self) -> f64 {
        let support = f64::from(self.occurrences) / (f64::from(self.occurrences) + 10.0);
        (self.win_rate.clamp(0.0, 1.0) * support).clamp(0.0, 1.0)
    }
}

/// Feature-distance scorer over an in-memory pattern list.
pub struct InMemoryPatternStore {
    patterns: RwLock<Vec<StoredPattern>>,
    min_relevance: f64,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self::with_min_relevance(DEFAULT_MIN_RELEVANCE)
    }

    pub fn with_min_relevance(min_relevance: f64) -> Self {
        Self {
            patterns: RwLock::new(Vec::new()),
            min_relevance: min_relevance.clamp(0.0, 1.0),
        }
    }

    pub fn insert(&self, pattern: StoredPattern) {
        self.patterns.write().push(pattern);
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }

    /// Similarity of a pattern fingerprint to the live indicator map:
    /// mean over shared keys of `1 - normalized distance`. No shared keys
    /// means no evidence, which scores zero.
    fn relevance(pattern: &StoredPattern, indicators: &HashMap<String, f64>) -> f64 {
        let mut total = 0.0;
        let mut compared = 0;
        for (key, expected) in &pattern.features {
            let Some(actual) = indicators.get(key) else {
                continue;
            };
            let scale = expected.abs().max(actual.abs()).max(1.0);
            let distance = ((expected - actual).abs() / scale).min(1.0);
            total += 1.0 - distance;
            compared += 1;
        }
        if compared == 0 {
            0.0
        } else {
            total / compared as f64
        }
    }
}

impl Default for InMemoryPatternStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PatternMatcher for InMemoryPatternStore {
    async fn find_matches(
        &self,
        conditions: &MarketConditions,
        max_results: usize,
    ) -> ExchangeResult<Vec<PatternMatch>> {
        let patterns = self.patterns.read();

        let mut matches: Vec<PatternMatch> = patterns
            .iter()
            .filter(|pattern| {
                pattern
                    .symbol
                    .as_deref()
                    .map_or(true, |s| s.eq_ignore_ascii_case(&conditions.symbol))
            })
            .map(|pattern| PatternMatch {
                pattern_id: pattern.id.clone(),
                relevance_score: Self::relevance(pattern, &conditions.indicators),
                confidence: pattern.confidence(),
            })
            .filter(|m| m.relevance_score >= self.min_relevance)
            .collect();

        matches.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(max_results);
        Ok(matches)
    }
}
