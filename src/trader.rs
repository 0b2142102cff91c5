// =============================================================================
// Trader Runtime — per-trader evaluation loop
// =============================================================================
//
// Each trader drives one symbol on one connector with a cooperative tick
// loop: fetch candles, recompute indicators, run the strategy, fuse with
// the best pattern match, filter against the cached position, and act on
// the result. Ticks are strictly serial; the next tick starts only after
// the previous one's order submissions returned.
//
// Lifecycle: CREATED -> ACTIVE (start) <-> PAUSED (stop) -> TERMINATED
// (delete). Stop cancels the loop at a tick boundary and never cancels
// open orders. A failing tick downgrades to a HOLD signal instead of
// killing the trader.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bitget::BitgetConnector;
use crate::config::ExchangeConfig;
use crate::connector::ExchangeConnector;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::factory::ConnectorFactory;
use crate::indicators::{IndicatorBank, IndicatorPeriods};
use crate::market_data::{CandleWindow, ProcessedMarketData};
use crate::patterns::{MarketConditions, PatternMatcher};
use crate::signal::{SignalGenerator, SignalGeneratorConfig};
use crate::strategy::{Strategy, StrategyKind};
use crate::types::{
    Exchange, Order, OrderStatus, Position, SignalAction, TradeAction, TraderStatus, TradingSignal,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub interval: crate::types::TimeFrame,
    pub strategy: StrategyKind,
    pub tick_interval: Duration,
    /// Candle window fetched per tick; raised to the indicator warm-up
    /// requirement if configured smaller.
    pub candle_window: usize,
    /// Quote-currency budget per entry.
    pub budget: Decimal,
    pub leverage: Decimal,
    pub signal: SignalGeneratorConfig,
    pub exchange_config: ExchangeConfig,
}

impl TraderConfig {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        exchange_config: ExchangeConfig,
    ) -> Self {
        let id = id.into();
        Self {
            name: format!("trader-{id}"),
            id,
            symbol: symbol.into().to_uppercase(),
            interval: crate::types::TimeFrame::M1,
            strategy: StrategyKind::TrendFollowing,
            tick_interval: Duration::from_secs(30),
            candle_window: 100,
            budget: Decimal::from(1000),
            leverage: Decimal::ONE,
            signal: SignalGeneratorConfig::default(),
            exchange_config,
        }
    }

    pub fn validate(&self) -> ExchangeResult<()> {
        if self.budget <= Decimal::ZERO {
            return Err(ExchangeError::exchange("config", "budget must be positive"));
        }
        if self.leverage < Decimal::ONE {
            return Err(ExchangeError::exchange("config", "leverage must be >= 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(ExchangeError::exchange("config", "tick interval must be nonzero"));
        }
        self.exchange_config.validate()
    }
}

// ---------------------------------------------------------------------------
// Shared runtime state
// ---------------------------------------------------------------------------

struct TraderShared {
    status: RwLock<TraderStatus>,
    budget: RwLock<Decimal>,
    position: RwLock<Option<Position>>,
    last_signal: RwLock<Option<TradingSignal>>,
    ticks: AtomicU64,
    orders_submitted: AtomicU64,
    tick_errors: AtomicU64,
}

// ---------------------------------------------------------------------------
// Trader
// ---------------------------------------------------------------------------

pub struct Trader {
    config: TraderConfig,
    connector: Arc<dyn ExchangeConnector>,
    matcher: Option<Arc<dyn PatternMatcher>>,
    strategy: Arc<Mutex<Box<dyn Strategy>>>,
    signal_gen: Arc<SignalGenerator>,
    shared: Arc<TraderShared>,
    loop_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stop_tx: Mutex<Option<tokio::sync::watch::Sender<bool>>>,
}

impl Trader {
    pub fn new(
        config: TraderConfig,
        connector: Arc<dyn ExchangeConnector>,
        matcher: Option<Arc<dyn PatternMatcher>>,
    ) -> Self {
        let strategy = config.strategy.build();
        let signal_gen = SignalGenerator::new(config.signal.clone());
        let budget = config.budget;
        Self {
            config,
            connector,
            matcher,
            strategy: Arc::new(Mutex::new(strategy)),
            signal_gen: Arc::new(signal_gen),
            shared: Arc::new(TraderShared {
                status: RwLock::new(TraderStatus::Created),
                budget: RwLock::new(budget),
                position: RwLock::new(None),
                last_signal: RwLock::new(None),
                ticks: AtomicU64::new(0),
                orders_submitted: AtomicU64::new(0),
                tick_errors: AtomicU64::new(0),
            }),
            loop_task: Mutex::new(None),
            stop_tx: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn status(&self) -> TraderStatus {
        *self.shared.status.read()
    }

    pub fn position(&self) -> Option<Position> {
        self.shared.position.read().clone()
    }

    pub fn last_signal(&self) -> Option<TradingSignal> {
        self.shared.last_signal.read().clone()
    }

    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    pub fn orders_submitted(&self) -> u64 {
        self.shared.orders_submitted.load(Ordering::Relaxed)
    }

    pub fn tick_errors(&self) -> u64 {
        self.shared.tick_errors.load(Ordering::Relaxed)
    }

    /// Control-plane balance patch.
    pub fn update_budget(&self, budget: Decimal) -> ExchangeResult<()> {
        if budget <= Decimal::ZERO {
            return Err(ExchangeError::exchange("config", "budget must be positive"));
        }
        *self.shared.budget.write() = budget;
        Ok(())
    }

    /// Start the tick loop. Refused while already running, after
    /// termination, or when the configuration does not validate.
    pub fn start(&self) -> ExchangeResult<()> {
        {
            let status = self.shared.status.read();
            match *status {
                TraderStatus::Created | TraderStatus::Paused | TraderStatus::Stopped => {}
                TraderStatus::Active => {
                    return Err(ExchangeError::exchange("trader", "trader already active"));
                }
                other => {
                    return Err(ExchangeError::exchange(
                        "trader",
                        format!("cannot start trader in state {other}"),
                    ));
                }
            }
        }
        self.config.validate()?;
        if !self.connector.is_connected() {
            return Err(ExchangeError::Connection {
                message: "connector must be connected before starting a trader".into(),
                retryable: false,
            });
        }

        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let config = self.config.clone();
        let connector = self.connector.clone();
        let matcher = self.matcher.clone();
        let strategy = self.strategy.clone();
        let signal_gen = self.signal_gen.clone();
        let shared = self.shared.clone();

        let handle = tokio::spawn(async move {
            let mut bank = IndicatorBank::new(IndicatorPeriods::default());
            let window_size = config.candle_window.max(bank.required_candles());
            let mut window = CandleWindow::new(window_size);

            let mut interval = tokio::time::interval(config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(trader = %config.id, symbol = %config.symbol, "trader loop started");
            loop {
                tokio::select! {
                    // Stop lands at a tick boundary; an in-flight tick
                    // always completes first.
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        Self::run_tick(
                            &config,
                            &connector,
                            matcher.as_deref(),
                            &strategy,
                            &signal_gen,
                            &shared,
                            &mut bank,
                            &mut window,
                            window_size,
                        )
                        .await;
                    }
                }
            }
            info!(trader = %config.id, "trader loop exited");
        });
        *self.loop_task.lock() = Some(handle);

        *self.shared.status.write() = TraderStatus::Active;
        Ok(())
    }

    /// Pause the tick loop at the next boundary. Open orders stay on the
    /// venue untouched. No-op unless active.
    pub async fn stop(&self) -> ExchangeResult<()> {
        if self.status() != TraderStatus::Active {
            return Ok(());
        }
        *self.shared.status.write() = TraderStatus::Stopping;

        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        let handle = self.loop_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        *self.shared.status.write() = TraderStatus::Paused;
        info!(trader = %self.config.id, "trader stopped");
        Ok(())
    }

    /// Terminal removal; the trader can never be restarted afterwards.
    pub async fn delete(&self) -> ExchangeResult<()> {
        self.stop().await?;
        *self.shared.status.write() = TraderStatus::Terminated;
        info!(trader = %self.config.id, "trader terminated");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tick pipeline
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn run_tick(
        config: &TraderConfig,
        connector: &Arc<dyn ExchangeConnector>,
        matcher: Option<&dyn PatternMatcher>,
        strategy: &Arc<Mutex<Box<dyn Strategy>>>,
        signal_gen: &SignalGenerator,
        shared: &Arc<TraderShared>,
        bank: &mut IndicatorBank,
        window: &mut CandleWindow,
        window_size: usize,
    ) {
        shared.ticks.fetch_add(1, Ordering::Relaxed);

        let outcome = Self::evaluate_and_act(
            config,
            connector,
            matcher,
            strategy,
            signal_gen,
            shared,
            bank,
            window,
            window_size,
        )
        .await;

        match outcome {
            Ok(signal) => {
                *shared.last_signal.write() = Some(signal);
            }
            // A bad tick downgrades to HOLD; the loop keeps running.
            Err(e) => {
                shared.tick_errors.fetch_add(1, Ordering::Relaxed);
                warn!(trader = %config.id, error = %e, "tick failed, holding");
                *shared.last_signal.write() =
                    Some(TradingSignal::hold(format!("tick error: {e}")));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_and_act(
        config: &TraderConfig,
        connector: &Arc<dyn ExchangeConnector>,
        matcher: Option<&dyn PatternMatcher>,
        strategy: &Arc<Mutex<Box<dyn Strategy>>>,
        signal_gen: &SignalGenerator,
        shared: &Arc<TraderShared>,
        bank: &mut IndicatorBank,
        window: &mut CandleWindow,
        window_size: usize,
    ) -> ExchangeResult<TradingSignal> {
        // 1. Latest candle window.
        let candles = connector
            .get_candles(
                &config.symbol,
                config.interval,
                None,
                None,
                window_size as u32,
            )
            .await?;
        window.replace_all(candles);

        let latest_price = window.last_close().ok_or_else(|| {
            ExchangeError::exchange("market_data", "venue returned an empty candle window")
        })?;

        // 2. Indicator snapshot.
        let closes = window.closes_f64();
        let indicators = bank.compute(&closes);
        let data = ProcessedMarketData {
            symbol: config.symbol.clone(),
            candles: window.candles(),
            indicators: indicators.clone(),
            latest_price,
            timestamp: Utc::now(),
        };

        // Re-mark the cached position so close nudges see fresh PnL.
        if let Some(position) = shared.position.write().as_mut() {
            position.update_price(latest_price);
        }

        // 3. Strategy, then pattern match, then fusion + filters.
        let raw = strategy.lock().evaluate(&data);

        let pattern = match matcher {
            Some(matcher) => {
                let conditions = MarketConditions {
                    exchange: config.exchange_config.exchange,
                    symbol: config.symbol.clone(),
                    current_price: latest_price,
                    indicators,
                    candles: data.candles.clone(),
                    timestamp: Utc::now(),
                };
                match matcher.find_matches(&conditions, 1).await {
                    Ok(matches) => matches.into_iter().next(),
                    Err(e) => {
                        // Pattern service trouble never blocks trading.
                        warn!(trader = %config.id, error = %e, "pattern matcher failed");
                        None
                    }
                }
            }
            None => None,
        };

        let position = shared.position.read().clone();
        let signal = signal_gen.generate(raw, pattern.as_ref(), position.as_ref());

        // 4+5. Translate and submit.
        match signal.action {
            SignalAction::Hold => {}
            SignalAction::Buy | SignalAction::Sell => {
                let action = if signal.action == SignalAction::Buy {
                    TradeAction::Long
                } else {
                    TradeAction::Short
                };
                let budget = *shared.budget.read();
                let quantity = Self::position_size(budget, config.leverage, latest_price)?;
                let order = Order::market(config.symbol.clone(), action, quantity);

                let placed = connector.place_order(&order).await?;
                shared.orders_submitted.fetch_add(1, Ordering::Relaxed);
                debug!(trader = %config.id, order_id = placed.id.as_deref().unwrap_or("-"), "entry submitted");

                if matches!(
                    placed.status,
                    OrderStatus::Filled | OrderStatus::PartiallyFilled
                ) {
                    let entry_price = placed.average_price.unwrap_or(latest_price);
                    *shared.position.write() = Some(Position::new(
                        config.symbol.clone(),
                        action,
                        placed.filled_quantity,
                        entry_price,
                        config.leverage,
                    ));
                }
            }
            SignalAction::Close => {
                let placed = connector.close_position(&config.symbol).await?;
                shared.orders_submitted.fetch_add(1, Ordering::Relaxed);
                if placed.status == OrderStatus::Filled {
                    *shared.position.write() = None;
                }
            }
        }

        Ok(signal)
    }

    /// Entry size in base units: `budget * leverage / price`, rounded to
    /// 8 fractional digits. Exact decimal arithmetic throughout.
    fn position_size(
        budget: Decimal,
        leverage: Decimal,
        price: Decimal,
    ) -> ExchangeResult<Decimal> {
        if price <= Decimal::ZERO {
            return Err(ExchangeError::exchange("market_data", "non-positive price"));
        }
        let quantity = (budget * leverage / price).round_dp(8);
        if quantity <= Decimal::ZERO {
            return Err(ExchangeError::Order {
                code: "invalid_quantity".into(),
                message: format!("budget {budget} too small at price {price}"),
                retryable: false,
            });
        }
        Ok(quantity)
    }

    // -------------------------------------------------------------------------
    // Control-plane DTO
    // -------------------------------------------------------------------------

    pub fn to_dto(&self) -> TraderDTO {
        let position = self.position().map(|p| PositionDTO {
            action: p.action.to_string(),
            quantity: decimal_string(p.quantity),
            entry_price: decimal_string(p.entry_price),
            current_price: decimal_string(p.current_price),
            unrealized_pnl: decimal_string(p.unrealized_pnl),
        });
        let last_signal = self.last_signal().map(|s| SignalDTO {
            action: s.action.to_string(),
            confidence: s.confidence,
            reason: s.reason,
            matched_pattern_id: s.matched_pattern_id,
        });

        TraderDTO {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            exchange: self.config.exchange_config.exchange.to_string(),
            symbol: self.config.symbol.clone(),
            interval: self.config.interval.to_string(),
            strategy: self.config.strategy.to_string(),
            status: self.status().wire_name().to_string(),
            budget: decimal_string(*self.shared.budget.read()),
            leverage: decimal_string(self.config.leverage),
            ticks: self.ticks(),
            orders_submitted: self.orders_submitted(),
            tick_errors: self.tick_errors(),
            position,
            last_signal,
        }
    }
}

/// Numeric fields travel as decimal strings with 8 fractional digits.
fn decimal_string(value: Decimal) -> String {
    let mut value = value.round_dp(8);
    value.rescale(8);
    value.to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionDTO {
    pub action: String,
    pub quantity: String,
    pub entry_price: String,
    pub current_price: String,
    pub unrealized_pnl: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalDTO {
    pub action: String,
    pub confidence: f64,
    pub reason: String,
    pub matched_pattern_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraderDTO {
    pub id: String,
    pub name: String,
    pub exchange: String,
    pub symbol: String,
    pub interval: String,
    pub strategy: String,
    pub status: String,
    pub budget: String,
    pub leverage: String,
    pub ticks: u64,
    pub orders_submitted: u64,
    pub tick_errors: u64,
    pub position: Option<PositionDTO>,
    pub last_signal: Option<SignalDTO>,
}

// ---------------------------------------------------------------------------
// Exchange connection test (control-plane entry point)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionTestRequest {
    pub exchange: Exchange,
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
}

/// Validate credentials by building a disposable connector and running the
/// connect/disconnect cycle. Bitget requests go through environment
/// auto-detection, so the result names the environment that answered.
pub async fn test_exchange_connection(
    factory: &ConnectorFactory,
    request: ConnectionTestRequest,
) -> ConnectionTestResult {
    let mut config = ExchangeConfig::new(request.exchange)
        .with_credentials(request.api_key, request.secret_key);
    if let Some(passphrase) = request.passphrase {
        config = config.with_passphrase(passphrase);
    }

    if request.exchange == Exchange::Bitget {
        return match BitgetConnector::detect_environment(&config).await {
            Ok((_env, message)) => ConnectionTestResult {
                success: true,
                message,
            },
            Err(e) => ConnectionTestResult {
                success: false,
                message: e.report().message,
            },
        };
    }

    let connector = match factory.create_connector(request.exchange, config, false) {
        Ok(connector) => connector,
        Err(e) => {
            return ConnectionTestResult {
                success: false,
                message: e.report().message,
            }
        }
    };

    match connector.connect().await {
        Ok(()) => {
            let _ = connector.disconnect().await;
            ConnectionTestResult {
                success: true,
                message: format!("Connection to {} successful", request.exchange),
            }
        }
        Err(e) => ConnectionTestResult {
            success: false,
            message: e.report().message,
        },
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use crate::types::TimeFrame;
    use rust_decimal_macros::dec;

    /// Strategy pinned to one action, for driving the runtime.
    struct PinnedStrategy {
        action: SignalAction,
        confidence: f64,
    }

    impl Strategy for PinnedStrategy {
        fn name(&self) -> &'static str {
            "pinned"
        }
        fn required_candles(&self) -> usize {
            1
        }
        fn evaluate(&mut self, _data: &ProcessedMarketData) -> TradingSignal {
            TradingSignal::new(self.action, self.confidence, "pinned")
        }
        fn reset(&mut self) {}
    }

    async fn connected_mock() -> Arc<MockConnector> {
        let mock = Arc::new(MockConnector::new());
        mock.configure(ExchangeConfig::new(Exchange::Mock)).unwrap();
        mock.connect().await.unwrap();
        mock
    }

    fn fast_config(id: &str) -> TraderConfig {
        let mut config = TraderConfig::new(id, "BTCUSDT", ExchangeConfig::new(Exchange::Mock));
        config.tick_interval = Duration::from_millis(20);
        config.interval = TimeFrame::M1;
        config.budget = dec!(1000);
        config
    }

    fn pinned_trader(
        config: TraderConfig,
        connector: Arc<MockConnector>,
        action: SignalAction,
        confidence: f64,
    ) -> Trader {
        let trader = Trader::new(config, connector, None);
        *trader.strategy.lock() = Box::new(PinnedStrategy { action, confidence });
        trader
    }

    #[tokio::test]
    async fn hold_strategy_never_submits_orders() {
        let mock = connected_mock().await;
        let trader = pinned_trader(fast_config("t-hold"), mock.clone(), SignalAction::Hold, 0.0);

        trader.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        trader.stop().await.unwrap();

        assert!(trader.ticks() >= 3);
        assert_eq!(trader.orders_submitted(), 0);
        assert!(trader.position().is_none());
        // Balances untouched.
        let balances = mock.get_balance().await.unwrap();
        assert_eq!(balances.get("USDT"), Some(&dec!(10000)));
    }

    #[tokio::test]
    async fn buy_strategy_opens_exactly_one_long() {
        let mock = connected_mock().await;
        let trader = pinned_trader(fast_config("t-buy"), mock.clone(), SignalAction::Buy, 0.9);

        trader.start().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        trader.stop().await.unwrap();

        // The first BUY opens a long; later BUYs are filtered to HOLD.
        assert!(trader.ticks() >= 3);
        assert_eq!(trader.orders_submitted(), 1);

        let position = trader.position().expect("position should be cached");
        assert_eq!(position.action, TradeAction::Long);
        // budget 1000 / price 50000 = 0.02 base units.
        assert_eq!(position.quantity, dec!(0.02));

        let last = trader.last_signal().unwrap();
        assert_eq!(last.action, SignalAction::Hold);
        assert!(last.reason.contains("Already have long position"));
    }

    #[tokio::test]
    async fn tick_errors_hold_instead_of_crashing() {
        let mock = connected_mock().await;
        let mut config = fast_config("t-err");
        config.symbol = "NOPEUSDT".to_string(); // unknown to the mock
        let trader = pinned_trader(config, mock, SignalAction::Buy, 0.9);

        trader.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(trader.status(), TraderStatus::Active);
        assert!(trader.tick_errors() >= 1);
        assert_eq!(trader.orders_submitted(), 0);
        let last = trader.last_signal().unwrap();
        assert_eq!(last.action, SignalAction::Hold);
        assert!(last.reason.contains("tick error"));

        trader.stop().await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let mock = connected_mock().await;
        let trader = pinned_trader(fast_config("t-life"), mock, SignalAction::Hold, 0.0);
        assert_eq!(trader.status(), TraderStatus::Created);

        trader.start().unwrap();
        assert_eq!(trader.status(), TraderStatus::Active);
        // Double start is refused.
        assert!(trader.start().is_err());

        trader.stop().await.unwrap();
        assert_eq!(trader.status(), TraderStatus::Paused);
        // Stop is idempotent.
        trader.stop().await.unwrap();

        trader.start().unwrap();
        assert_eq!(trader.status(), TraderStatus::Active);

        trader.delete().await.unwrap();
        assert_eq!(trader.status(), TraderStatus::Terminated);
        assert!(trader.start().is_err());
    }

    #[tokio::test]
    async fn start_refuses_invalid_exchange_config() {
        let mock = connected_mock().await;
        let mut config = fast_config("t-bad");
        // A Binance config without credentials cannot validate.
        config.exchange_config = ExchangeConfig::new(Exchange::Binance);
        let trader = pinned_trader(config, mock, SignalAction::Hold, 0.0);
        assert!(trader.start().is_err());
        assert_eq!(trader.status(), TraderStatus::Created);
    }

    #[tokio::test]
    async fn start_requires_connected_connector() {
        let mock = Arc::new(MockConnector::new());
        mock.configure(ExchangeConfig::new(Exchange::Mock)).unwrap();
        let trader = pinned_trader(fast_config("t-conn"), mock, SignalAction::Hold, 0.0);
        let err = trader.start().unwrap_err();
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn position_sizing_is_exact_decimal() {
        let quantity = Trader::position_size(dec!(1000), dec!(1), dec!(50000)).unwrap();
        assert_eq!(quantity, dec!(0.02));

        let quantity = Trader::position_size(dec!(1000), dec!(3), dec!(2000)).unwrap();
        assert_eq!(quantity, dec!(1.5));

        // Representation differences are numeric, not lexical.
        let a = Trader::position_size(dec!(1000), dec!(1), dec!(2000.0)).unwrap();
        let b = Trader::position_size(dec!(1000), dec!(1), dec!(2000.00000000)).unwrap();
        assert_eq!(a, b);

        assert!(Trader::position_size(dec!(1000), dec!(1), dec!(0)).is_err());
        // Rounds to zero at 8 dp.
        assert!(Trader::position_size(dec!(0.000000001), dec!(1), dec!(1)).is_err());
    }

    #[tokio::test]
    async fn dto_carries_decimal_strings() {
        let mock = connected_mock().await;
        let trader = pinned_trader(fast_config("t-dto"), mock, SignalAction::Hold, 0.0);
        let dto = trader.to_dto();
        assert_eq!(dto.budget, "1000.00000000");
        assert_eq!(dto.leverage, "1.00000000");
        assert_eq!(dto.status, "CREATED");
        assert_eq!(dto.exchange, "MOCK");
        assert!(dto.position.is_none());
    }

    #[tokio::test]
    async fn budget_patch_feeds_sizing() {
        let mock = connected_mock().await;
        let trader = pinned_trader(fast_config("t-budget"), mock, SignalAction::Hold, 0.0);
        trader.update_budget(dec!(2500)).unwrap();
        assert_eq!(trader.to_dto().budget, "2500.00000000");
        assert!(trader.update_budget(dec!(0)).is_err());
    }

    #[tokio::test]
    async fn connection_test_succeeds_against_mock() {
        let factory = ConnectorFactory::new();
        let result = test_exchange_connection(
            &factory,
            ConnectionTestRequest {
                exchange: Exchange::Mock,
                api_key: String::new(),
                secret_key: String::new(),
                passphrase: None,
            },
        )
        .await;
        assert!(result.success, "{}", result.message);
        assert!(result.message.contains("MOCK"));
    }

    #[tokio::test]
    async fn connection_test_reports_config_failures() {
        let factory = ConnectorFactory::new();
        let result = test_exchange_connection(
            &factory,
            ConnectionTestRequest {
                exchange: Exchange::Binance,
                api_key: String::new(),
                secret_key: String::new(),
                passphrase: None,
            },
        )
        .await;
        assert!(!result.success);
        assert!(result.message.contains("api_key"));
    }
}
