// =============================================================================
// Exchange Connector Contract
// =============================================================================
//
// One polymorphic capability set for every venue. Connectors are composed
// from per-venue value objects (authenticator, error mapper, stream
// adapter) plus the shared rate limiter, retry policy and WebSocket
// manager; there is no inheritance hierarchy.
//
// Contract, identical across venues:
//   - `configure` once, then `connect`, then anything else, then
//     `disconnect`. Operations before `connect` fail with a connection
//     error. `disconnect` is an idempotent no-op; a redundant `connect`
//     is a caller error.
//   - Every REST call passes through rate-limit acquire, retry execute,
//     signing (where required), HTTP send and error mapping, in that
//     order.
//   - Symbols are normalized to uppercase on the wire; venue separators
//     are applied internally.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::ExchangeConfig;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::market_data::Candle;
use crate::types::{Exchange, Order, OrderBook, Position, Ticker, TimeFrame};

/// Free asset balances keyed by asset code ("USDT", "BTC", ...).
pub type Balances = HashMap<String, Decimal>;

pub type CandleCallback = Arc<dyn Fn(Candle) + Send + Sync>;
pub type TickerCallback = Arc<dyn Fn(Ticker) + Send + Sync>;
pub type OrderUpdateCallback = Arc<dyn Fn(Order) + Send + Sync>;

/// The venue capability set. All implementations, including the mock, must
/// satisfy every guarantee documented here; strategies cannot tell them
/// apart at this level.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Install the configuration. Must be called exactly once before
    /// `connect`; repeated calls replace the stored config while
    /// disconnected.
    fn configure(&self, config: ExchangeConfig) -> ExchangeResult<()>;

    /// Establish the session: reachability ping, server-time fetch with
    /// clock-offset update, then an authenticated balance probe. Any
    /// failure leaves the connector disconnected.
    async fn connect(&self) -> ExchangeResult<()>;

    /// Tear the session down, releasing streams and subscriptions.
    /// Idempotent.
    async fn disconnect(&self) -> ExchangeResult<()>;

    fn is_connected(&self) -> bool;

    // ── Market data ─────────────────────────────────────────────────────

    async fn get_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: Option<i64>,
        end: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    async fn get_order_book(&self, symbol: &str, limit: u32) -> ExchangeResult<OrderBook>;

    // ── Account ─────────────────────────────────────────────────────────

    async fn get_balance(&self) -> ExchangeResult<Balances>;

    async fn get_positions(&self) -> ExchangeResult<Vec<Position>>;

    /// Spot venues cannot always reconstruct an entry price; `None` is the
    /// honest answer there, never a zero-priced position.
    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<Position>>;

    // ── Orders ──────────────────────────────────────────────────────────

    /// Submit `order`. A nonzero price makes it a LIMIT order with GTC
    /// time-in-force; otherwise MARKET. The returned order carries the
    /// venue id and initial status.
    async fn place_order(&self, order: &Order) -> ExchangeResult<Order>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order>;

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order>;

    async fn get_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>>;

    /// Sell (or buy back) the full base-asset balance at market. Fails
    /// with an order error when there is nothing to close.
    async fn close_position(&self, symbol: &str) -> ExchangeResult<Order>;

    // ── Streaming ───────────────────────────────────────────────────────

    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        callback: CandleCallback,
    ) -> ExchangeResult<String>;

    async fn subscribe_ticker(
        &self,
        symbol: &str,
        callback: TickerCallback,
    ) -> ExchangeResult<String>;

    async fn subscribe_order_updates(
        &self,
        callback: OrderUpdateCallback,
    ) -> ExchangeResult<String>;

    async fn unsubscribe(&self, subscription_id: &str) -> ExchangeResult<()>;

    async fn unsubscribe_all(&self) -> ExchangeResult<()>;
}

impl std::fmt::Debug for dyn ExchangeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExchangeConnector({:?})", self.exchange())
    }
}

/// Uppercase, separator-free symbol form used on the wire by both venues.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_'))
        .collect::<String>()
        .to_uppercase()
}

/// The error every operation raises when called before `connect`.
pub fn not_connected() -> ExchangeError {
    ExchangeError::Connection {
        message: "connector is not connected".into(),
        retryable: false,
    }
}

/// The error `configure`-requiring operations raise on a blank connector.
pub fn not_configured() -> ExchangeError {
    ExchangeError::Connection {
        message: "connector is not configured".into(),
        retryable: false,
    }
}

/// Both venues send numbers either as JSON strings or as raw numbers;
/// parse either into an exact decimal.
pub fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
