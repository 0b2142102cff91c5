// =============================================================================
// Shared domain types used across the Atlas trading engine
// =============================================================================
//
// All monetary fields (prices, quantities, balances, PnL) are
// `rust_decimal::Decimal`. Comparisons between representations such as
// "2000.0" and "2000.00000000" are numeric, never lexical, and binary
// floating point never enters signal -> order math.
// =============================================================================

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Exchange
// =============================================================================

/// Supported trading venues. Each variant identifies one connector
/// implementation in the factory registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Binance,
    Bitget,
    /// Deterministic in-memory venue used by tests and demo mode.
    Mock,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binance => write!(f, "BINANCE"),
            Self::Bitget => write!(f, "BITGET"),
            Self::Mock => write!(f, "MOCK"),
        }
    }
}

impl FromStr for Exchange {
    type Err = crate::errors::ExchangeError;

    /// Strings become `Exchange` variants only here (factory boundary).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BINANCE" => Ok(Self::Binance),
            "BITGET" => Ok(Self::Bitget),
            "MOCK" => Ok(Self::Mock),
            other => Err(crate::errors::ExchangeError::UnsupportedExchange(
                other.to_string(),
            )),
        }
    }
}

// =============================================================================
// TimeFrame
// =============================================================================

/// Candle interval. Each connector maps these exhaustively to the venue's
/// wire values; the enum is the only interval representation inside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl TimeFrame {
    /// Interval length in milliseconds.
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::M30 => 1_800_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
        }
    }

    /// Canonical lowercase label ("1m", "4h", ...). Matches the Binance wire
    /// format; other venues translate in their connector.
    pub fn label(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for TimeFrame {
    type Err = crate::errors::ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(crate::errors::ExchangeError::exchange(
                "interval",
                format!("unknown interval '{other}'"),
            )),
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Direction of a trade. Spot "long" buys the base asset, "short" sells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Long,
    Short,
}

impl TradeAction {
    /// The side that flattens this one: closing a long sells, closing a
    /// short buys back. Used by every `close_position` implementation.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Wire side string shared by both supported venues.
    pub fn as_side(&self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLossLimit,
}

impl OrderType {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::StopLoss => "STOP_LOSS",
            Self::StopLossLimit => "STOP_LOSS_LIMIT",
        }
    }
}

/// Order lifecycle state. Terminal states are never re-opened by the core;
/// transitions are driven solely by venue responses and stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Parse the status vocabulary both venues use on the wire.
    pub fn from_wire(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "NEW" | "OPEN" | "LIVE" => Self::Open,
            "PARTIALLY_FILLED" | "PARTIAL_FILL" | "PARTIAL-FILL" => Self::PartiallyFilled,
            "FILLED" | "FULL_FILL" | "FULL-FILL" => Self::Filled,
            "CANCELED" | "CANCELLED" => Self::Cancelled,
            "REJECTED" | "EXPIRED" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// A spot order, either local (no id yet) or venue-acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned id, present once the order has been submitted.
    pub id: Option<String>,
    pub symbol: String,
    pub action: TradeAction,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Required for LIMIT orders, absent for MARKET.
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a local MARKET order ready for submission.
    pub fn market(symbol: impl Into<String>, action: TradeAction, quantity: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            symbol: symbol.into().to_uppercase(),
            action,
            order_type: OrderType::Market,
            quantity,
            price: None,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a local LIMIT order ready for submission.
    pub fn limit(
        symbol: impl Into<String>,
        action: TradeAction,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        let mut order = Self::market(symbol, action, quantity);
        order.order_type = OrderType::Limit;
        order.price = Some(price);
        order
    }
}

// =============================================================================
// Position
// =============================================================================

/// Working copy of an open position. Created on the first fill of a new
/// side, mutated as fills arrive, destroyed when net quantity returns to
/// zero. The persistence collaborator owns the durable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        action: TradeAction,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            action,
            quantity,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            leverage,
            opened_at: Utc::now(),
        }
    }

    /// Re-mark the position at `price` and recompute unrealized PnL.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        let delta = match self.action {
            TradeAction::Long => price - self.entry_price,
            TradeAction::Short => self.entry_price - price,
        };
        self.unrealized_pnl = delta * self.quantity;
    }

    pub fn is_profitable(&self) -> bool {
        self.unrealized_pnl > Decimal::ZERO
    }
}

// =============================================================================
// Tickers and order books
// =============================================================================

/// 24h rolling ticker snapshot. Invariant: `bid <= ask` when both nonzero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub open_24h: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Check the bid/ask invariant; zero sides are treated as "unknown".
    pub fn is_coherent(&self) -> bool {
        if self.bid_price.is_zero() || self.ask_price.is_zero() {
            return true;
        }
        self.bid_price <= self.ask_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Depth snapshot: bids descending, asks ascending, `best_bid < best_ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }

    /// Validate ordering invariants on both sides plus the spread.
    pub fn is_coherent(&self) -> bool {
        let bids_sorted = self.bids.windows(2).all(|w| w[0].price >= w[1].price);
        let asks_sorted = self.asks.windows(2).all(|w| w[0].price <= w[1].price);
        let spread_ok = match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b.price < a.price,
            _ => true,
        };
        bids_sorted && asks_sorted && spread_ok
    }
}

// =============================================================================
// Signals
// =============================================================================

/// What the signal pipeline wants done about a symbol right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Close,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Close => write!(f, "CLOSE"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Output of the strategy / signal-generator pipeline.
/// Invariant: `0.0 <= confidence <= 1.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: SignalAction,
    pub confidence: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Indicator values that contributed to the decision, keyed by name.
    pub indicators: HashMap<String, f64>,
    pub matched_pattern_id: Option<String>,
}

impl TradingSignal {
    pub fn new(action: SignalAction, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            timestamp: Utc::now(),
            indicators: HashMap::new(),
            matched_pattern_id: None,
        }
    }

    /// A do-nothing signal, used whenever the pipeline cannot or should not
    /// trade (insufficient data, filtered action, tick-level error).
    pub fn hold(reason: impl Into<String>) -> Self {
        Self::new(SignalAction::Hold, 0.0, reason)
    }

    pub fn with_indicators(mut self, indicators: HashMap<String, f64>) -> Self {
        self.indicators = indicators;
        self
    }
}

// =============================================================================
// Trader status
// =============================================================================

/// Trader lifecycle states. `Active`/`Paused`/`Stopping`/`Stopped` form the
/// wire taxonomy exposed to the control plane; `Created` and `Terminated`
/// are the local endpoints of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraderStatus {
    Created,
    Active,
    Paused,
    Stopping,
    Stopped,
    Terminated,
}

impl TraderStatus {
    /// Wire label used by the control-plane contract.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Terminated => "TERMINATED",
        }
    }

    /// Normalize wire and legacy values into the canonical taxonomy.
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" | "RUNNING" | "LIVE" => Self::Active,
            "PAUSED" | "SUSPENDED" => Self::Paused,
            "STOPPING" => Self::Stopping,
            "STOPPED" | "HALTED" => Self::Stopped,
            "TERMINATED" | "DELETED" => Self::Terminated,
            _ => Self::Created,
        }
    }
}

impl std::fmt::Display for TraderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}
