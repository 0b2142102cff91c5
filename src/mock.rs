// =============================================================================
// Mock Connector — deterministic in-memory venue for tests and demo mode
// =============================================================================
//
// Satisfies every invariant of the connector contract so a strategy cannot
// tell it from a real venue: ordering rules, error taxonomy, immediate
// MARKET fills with funds validation, LIMIT orders that stay open until
// cancelled, and synthetic stream subscriptions.
//
// Determinism: candle series are generated from the seeded price table and
// a fixed epoch, so identical requests return identical data. Failure
// injection draws from a seeded RNG.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::ExchangeConfig;
use crate::connector::{
    normalize_symbol, not_connected, Balances, CandleCallback, ExchangeConnector,
    OrderUpdateCallback, TickerCallback,
};
use crate::errors::{ExchangeError, ExchangeResult};
use crate::market_data::Candle;
use crate::types::{
    Exchange, Order, OrderBook, OrderBookLevel, OrderStatus, OrderType, Position, Ticker,
    TimeFrame, TradeAction,
};

/// Anchor for synthetic candle timestamps; fixed so generated series are
/// reproducible across calls and processes.
const SYNTHETIC_EPOCH_MS: i64 = 1_700_000_000_000;

const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "BTC", "ETH"];

fn split_symbol(symbol: &str) -> Option<(String, String)> {
    for quote in KNOWN_QUOTES {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return Some((base.to_string(), (*quote).to_string()));
            }
        }
    }
    None
}

struct MockSubscription {
    task: tokio::task::JoinHandle<()>,
}

pub struct MockConnector {
    configured: AtomicBool,
    connected: AtomicBool,
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    prices: RwLock<HashMap<String, Decimal>>,
    balances: RwLock<HashMap<String, Decimal>>,
    positions: RwLock<HashMap<String, Position>>,
    orders: RwLock<HashMap<String, Order>>,
    order_listeners: RwLock<Vec<OrderUpdateCallback>>,
    subscriptions: RwLock<HashMap<String, MockSubscription>>,
    next_order_id: AtomicU64,
    next_sub_id: AtomicU64,
}

impl MockConnector {
    pub fn new() -> Self {
        let mut prices = HashMap::new();
        prices.insert("BTCUSDT".to_string(), dec!(50000));
        prices.insert("ETHUSDT".to_string(), dec!(2000));

        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(10000));

        Self {
            configured: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(42)),
            prices: RwLock::new(prices),
            balances: RwLock::new(balances),
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            order_listeners: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(HashMap::new()),
            next_order_id: AtomicU64::new(0),
            next_sub_id: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Probability in [0, 1] that any operation fails with a retryable
    /// connection error. Draws from the seeded RNG.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.prices.write().insert(normalize_symbol(symbol), price);
        self
    }

    pub fn with_balance(self, asset: &str, amount: Decimal) -> Self {
        self.balances
            .write()
            .insert(asset.to_uppercase(), amount);
        self
    }

    async fn pre_op(&self) -> ExchangeResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(not_connected());
        }
        self.simulate().await
    }

    /// Latency plus seeded failure injection, shared by every operation.
    async fn simulate(&self) -> ExchangeResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failure_rate > 0.0 {
            let roll: f64 = self.rng.lock().gen();
            if roll < self.failure_rate {
                return Err(ExchangeError::connection("simulated venue failure"));
            }
        }
        Ok(())
    }

    fn price_of(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.prices
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::exchange("symbol", format!("unknown symbol '{symbol}'")))
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().insert(normalize_symbol(symbol), price);
    }

    fn mint_order_id(&self) -> String {
        format!("mock-{}", self.next_order_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn notify_order(&self, order: &Order) {
        for listener in self.order_listeners.read().iter() {
            listener(order.clone());
        }
    }

    /// Settle a fill against balances and the position table.
    fn settle_fill(
        &self,
        symbol: &str,
        action: TradeAction,
        quantity: Decimal,
        price: Decimal,
    ) -> ExchangeResult<()> {
        let (base, quote) = split_symbol(symbol).ok_or_else(|| {
            ExchangeError::exchange("symbol", format!("cannot split symbol '{symbol}'"))
        })?;
        let cost = quantity * price;

        {
            let mut balances = self.balances.write();
            match action {
                TradeAction::Long => {
                    let quote_balance = balances.get(&quote).copied().unwrap_or_default();
                    if quote_balance < cost {
                        return Err(ExchangeError::InsufficientFunds(format!(
                            "need {cost} {quote}, have {quote_balance}"
                        )));
                    }
                    *balances.entry(quote).or_default() -= cost;
                    *balances.entry(base.clone()).or_default() += quantity;
                }
                TradeAction::Short => {
                    let base_balance = balances.get(&base).copied().unwrap_or_default();
                    if base_balance < quantity {
                        return Err(ExchangeError::InsufficientFunds(format!(
                            "need {quantity} {base}, have {base_balance}"
                        )));
                    }
                    *balances.entry(base.clone()).or_default() -= quantity;
                    *balances.entry(quote).or_default() += cost;
                }
            }
        }

        // Position bookkeeping: same-side fills average in, opposite-side
        // fills reduce and eventually destroy the position.
        let mut positions = self.positions.write();
        match positions.get_mut(symbol) {
            Some(position) if position.action == action => {
                let total = position.quantity + quantity;
                position.entry_price =
                    (position.entry_price * position.quantity + price * quantity) / total;
                position.quantity = total;
                position.update_price(price);
            }
            Some(position) => {
                if quantity >= position.quantity {
                    positions.remove(symbol);
                } else {
                    position.quantity -= quantity;
                    position.update_price(price);
                }
            }
            None => {
                positions.insert(
                    symbol.to_string(),
                    Position::new(symbol, action, quantity, price, Decimal::ONE),
                );
            }
        }
        Ok(())
    }

    /// Deterministic synthetic candle for (symbol, interval, index). The
    /// price wobbles around the seeded table value by a few tenths of a
    /// percent in a fixed pattern.
    fn synthetic_candle(
        symbol: &str,
        interval: TimeFrame,
        base_price: Decimal,
        index: i64,
    ) -> Candle {
        let step = interval.as_millis();
        let open_time = SYNTHETIC_EPOCH_MS + index * step;

        // Per-mille offsets cycling with the index.
        let wobble = |i: i64| -> Decimal {
            let offset = Decimal::from((i % 7) - 3); // -3..=3
            base_price * (Decimal::ONE + offset * dec!(0.001))
        };
        let open = wobble(index);
        let close = wobble(index + 1);
        let high = open.max(close) * dec!(1.0005);
        let low = open.min(close) * dec!(0.9995);

        Candle {
            symbol: symbol.to_string(),
            interval,
            open_time,
            close_time: open_time + step - 1,
            open,
            high,
            low,
            close,
            volume: dec!(10) + Decimal::from(index % 5),
            quote_volume: (dec!(10) + Decimal::from(index % 5)) * close,
        }
    }

    fn mint_sub_id(&self) -> String {
        format!("mock-sub-{}", self.next_sub_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeConnector for MockConnector {
    fn exchange(&self) -> Exchange {
        Exchange::Mock
    }

    fn configure(&self, config: ExchangeConfig) -> ExchangeResult<()> {
        if config.exchange != Exchange::Mock {
            return Err(ExchangeError::exchange(
                "config",
                format!("config is for {}, not MOCK", config.exchange),
            ));
        }
        config.validate()?;
        self.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self) -> ExchangeResult<()> {
        if !self.configured.load(Ordering::SeqCst) {
            return Err(crate::connector::not_configured());
        }
        if self.connected.load(Ordering::SeqCst) {
            return Err(ExchangeError::Connection {
                message: "connector already connected".into(),
                retryable: false,
            });
        }
        self.simulate().await?;
        self.connected.store(true, Ordering::SeqCst);
        debug!("mock connector connected");
        Ok(())
    }

    async fn disconnect(&self) -> ExchangeResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut subscriptions = self.subscriptions.write();
        for (_, sub) in subscriptions.drain() {
            sub.task.abort();
        }
        self.order_listeners.write().clear();
        debug!("mock connector disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // ── Market data ─────────────────────────────────────────────────────

    async fn get_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: Option<i64>,
        end: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.pre_op().await?;
        let symbol = normalize_symbol(symbol);
        let base_price = self.price_of(&symbol)?;

        let limit = limit.clamp(1, 1000) as i64;
        let step = interval.as_millis();
        let last_index = end.map_or(200, |e| (e - SYNTHETIC_EPOCH_MS) / step);
        let first_index = start
            .map(|s| (s - SYNTHETIC_EPOCH_MS) / step)
            .unwrap_or(last_index - limit + 1)
            .max(last_index - limit + 1);

        Ok((first_index..=last_index)
            .map(|i| Self::synthetic_candle(&symbol, interval, base_price, i))
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.pre_op().await?;
        let symbol = normalize_symbol(symbol);
        let price = self.price_of(&symbol)?;

        Ok(Ticker {
            symbol,
            last_price: price,
            bid_price: price * dec!(0.9995),
            ask_price: price * dec!(1.0005),
            high_24h: price * dec!(1.02),
            low_24h: price * dec!(0.98),
            open_24h: price * dec!(0.99),
            volume: dec!(1000),
            quote_volume: price * dec!(1000),
            price_change: price * dec!(0.01),
            price_change_percent: dec!(1),
            timestamp: Utc::now(),
        })
    }

    async fn get_order_book(&self, symbol: &str, limit: u32) -> ExchangeResult<OrderBook> {
        self.pre_op().await?;
        let symbol = normalize_symbol(symbol);
        let price = self.price_of(&symbol)?;

        let depth = limit.clamp(1, 50) as i64;
        let level = |i: i64, side: Decimal| -> OrderBookLevel {
            OrderBookLevel {
                price: price * (Decimal::ONE + side * Decimal::from(i) * dec!(0.0005)),
                quantity: dec!(1) + Decimal::from(i),
            }
        };

        Ok(OrderBook {
            symbol,
            bids: (1..=depth).map(|i| level(i, dec!(-1))).collect(),
            asks: (1..=depth).map(|i| level(i, dec!(1))).collect(),
            timestamp: Utc::now(),
        })
    }

    // ── Account ─────────────────────────────────────────────────────────

    async fn get_balance(&self) -> ExchangeResult<Balances> {
        self.pre_op().await?;
        Ok(self.balances.read().clone())
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
        self.pre_op().await?;
        Ok(self.positions.read().values().cloned().collect())
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<Position>> {
        self.pre_op().await?;
        Ok(self.positions.read().get(&normalize_symbol(symbol)).cloned())
    }

    // ── Orders ──────────────────────────────────────────────────────────

    async fn place_order(&self, order: &Order) -> ExchangeResult<Order> {
        self.pre_op().await?;
        let symbol = normalize_symbol(&order.symbol);
        let price = self.price_of(&symbol)?;

        if order.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Order {
                code: "invalid_quantity".into(),
                message: "quantity must be positive".into(),
                retryable: false,
            });
        }

        let mut placed = order.clone();
        placed.symbol = symbol.clone();
        placed.id = Some(self.mint_order_id());
        placed.updated_at = Utc::now();

        match order.price {
            // LIMIT orders rest on the book until cancelled.
            Some(limit_price) if !limit_price.is_zero() => {
                placed.order_type = OrderType::Limit;
                placed.status = OrderStatus::Open;
            }
            // MARKET orders fill immediately at the table price.
            _ => {
                placed.order_type = OrderType::Market;
                self.settle_fill(&symbol, order.action, order.quantity, price)?;
                placed.status = OrderStatus::Filled;
                placed.filled_quantity = order.quantity;
                placed.average_price = Some(price);
            }
        }

        self.orders
            .write()
            .insert(placed.id.clone().unwrap_or_default(), placed.clone());
        self.notify_order(&placed);
        Ok(placed)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        self.pre_op().await?;
        let _ = symbol;
        let mut orders = self.orders.write();
        let order = orders.get_mut(order_id).ok_or_else(|| ExchangeError::Order {
            code: "unknown_order".into(),
            message: format!("no order with id '{order_id}'"),
            retryable: false,
        })?;

        if order.status.is_terminal() {
            return Err(ExchangeError::Order {
                code: "terminal_order".into(),
                message: format!("order '{order_id}' is already {:?}", order.status),
                retryable: false,
            });
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        let cancelled = order.clone();
        drop(orders);
        self.notify_order(&cancelled);
        Ok(cancelled)
    }

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        self.pre_op().await?;
        let _ = symbol;
        self.orders
            .read()
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::Order {
                code: "unknown_order".into(),
                message: format!("no order with id '{order_id}'"),
                retryable: false,
            })
    }

    async fn get_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        self.pre_op().await?;
        let filter = symbol.map(normalize_symbol);
        Ok(self
            .orders
            .read()
            .values()
            .filter(|order| order.status == OrderStatus::Open)
            .filter(|order| filter.as_deref().map_or(true, |s| order.symbol == s))
            .cloned()
            .collect())
    }

    async fn close_position(&self, symbol: &str) -> ExchangeResult<Order> {
        self.pre_op().await?;
        let symbol = normalize_symbol(symbol);
        let (base, _quote) = split_symbol(&symbol).ok_or_else(|| {
            ExchangeError::exchange("symbol", format!("cannot split symbol '{symbol}'"))
        })?;

        let tracked = self.positions.read().get(&symbol).cloned();
        let (closing, quantity) = match tracked {
            // A tracked short closes on its opposite side: buy back the
            // tracked quantity.
            Some(position) if position.action == TradeAction::Short => {
                (position.action.opposite(), position.quantity)
            }
            // Longs and untracked holdings are long exposure: sell the
            // whole base balance.
            _ => {
                let held = self
                    .balances
                    .read()
                    .get(&base)
                    .copied()
                    .unwrap_or_default();
                if held.is_zero() {
                    return Err(ExchangeError::Order {
                        code: "no_position".into(),
                        message: format!("no position: zero {base} balance"),
                        retryable: false,
                    });
                }
                (TradeAction::Short, held)
            }
        };

        let order = Order::market(symbol, closing, quantity);
        self.place_order(&order).await
    }

    // ── Streaming ───────────────────────────────────────────────────────

    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        callback: CandleCallback,
    ) -> ExchangeResult<String> {
        self.pre_op().await?;
        let symbol = normalize_symbol(symbol);
        let base_price = self.price_of(&symbol)?;
        let id = self.mint_sub_id();

        // Emit the current candle immediately, then one per interval.
        let task = tokio::spawn(async move {
            let mut index: i64 = 200;
            loop {
                callback(Self::synthetic_candle(&symbol, interval, base_price, index));
                index += 1;
                tokio::time::sleep(Duration::from_millis(interval.as_millis() as u64)).await;
            }
        });

        self.subscriptions
            .write()
            .insert(id.clone(), MockSubscription { task });
        Ok(id)
    }

    async fn subscribe_ticker(
        &self,
        symbol: &str,
        callback: TickerCallback,
    ) -> ExchangeResult<String> {
        self.pre_op().await?;
        let symbol = normalize_symbol(symbol);
        let price = self.price_of(&symbol)?;
        let id = self.mint_sub_id();

        let task = tokio::spawn(async move {
            loop {
                callback(Ticker {
                    symbol: symbol.clone(),
                    last_price: price,
                    bid_price: price * dec!(0.9995),
                    ask_price: price * dec!(1.0005),
                    high_24h: price * dec!(1.02),
                    low_24h: price * dec!(0.98),
                    open_24h: price * dec!(0.99),
                    volume: dec!(1000),
                    quote_volume: price * dec!(1000),
                    price_change: Decimal::ZERO,
                    price_change_percent: Decimal::ZERO,
                    timestamp: Utc::now(),
                });
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        self.subscriptions
            .write()
            .insert(id.clone(), MockSubscription { task });
        Ok(id)
    }

    async fn subscribe_order_updates(
        &self,
        callback: OrderUpdateCallback,
    ) -> ExchangeResult<String> {
        self.pre_op().await?;
        let id = self.mint_sub_id();
        self.order_listeners.write().push(callback);
        // Listener registration doubles as the subscription; the id is
        // tracked so unsubscribe_all clears it like any other.
        self.subscriptions.write().insert(
            id.clone(),
            MockSubscription {
                task: tokio::spawn(async {}),
            },
        );
        Ok(id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> ExchangeResult<()> {
        self.pre_op().await?;
        match self.subscriptions.write().remove(subscription_id) {
            Some(sub) => {
                sub.task.abort();
                Ok(())
            }
            None => Err(ExchangeError::exchange(
                "subscription",
                format!("unknown subscription id '{subscription_id}'"),
            )),
        }
    }

    async fn unsubscribe_all(&self) -> ExchangeResult<()> {
        self.pre_op().await?;
        let mut subscriptions = self.subscriptions.write();
        for (_, sub) in subscriptions.drain() {
            sub.task.abort();
        }
        self.order_listeners.write().clear();
        Ok(())
    }
}
