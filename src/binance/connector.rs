// =============================================================================
// Binance Spot Connector
// =============================================================================
//
// REST base: https://api.binance.com (production) or
// https://testnet.binance.vision (testnet); streams on
// wss://stream.binance.com:9443/ws and wss://testnet.binance.vision/ws.
//
// Every REST call flows through rate-limit acquire -> retry execute ->
// signing (for private endpoints) -> HTTP send -> error mapping. Raw HTTP
// statuses and venue JSON never escape this module.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::Method;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::binance::auth::BinanceAuthenticator;
use crate::binance::errors::map_binance_error;
use crate::binance::ws::{
    parse_execution_report, parse_kline_payload, parse_ticker_payload, BinanceStreamAdapter,
    ORDER_UPDATE_CHANNEL,
};
use crate::config::ExchangeConfig;
use crate::connector::{
    json_decimal, normalize_symbol, not_configured, not_connected, Balances, CandleCallback,
    ExchangeConnector, OrderUpdateCallback, TickerCallback,
};
use crate::errors::{ExchangeError, ExchangeResult};
use crate::market_data::Candle;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::types::{
    Exchange, Order, OrderBook, OrderBookLevel, OrderStatus, OrderType, Position, Ticker,
    TimeFrame, TradeAction,
};
use crate::ws::WebSocketManager;

const PROD_REST_URL: &str = "https://api.binance.com";
const TESTNET_REST_URL: &str = "https://testnet.binance.vision";
const PROD_WS_URL: &str = "wss://stream.binance.com:9443/ws";
const TESTNET_WS_URL: &str = "wss://testnet.binance.vision/ws";

/// Quote assets recognized when splitting a symbol into base/quote.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "FDUSD", "TUSD", "BUSD", "BTC", "ETH", "BNB"];

// ---------------------------------------------------------------------------
// Connector state
// ---------------------------------------------------------------------------

struct BinanceState {
    config: ExchangeConfig,
    auth: BinanceAuthenticator,
    limiter: RateLimiter,
    retry: RetryPolicy,
    http: reqwest::Client,
    base_url: String,
    ws: WebSocketManager,
}

pub struct BinanceConnector {
    state: RwLock<Option<Arc<BinanceState>>>,
    connected: AtomicBool,
}

impl BinanceConnector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ExchangeResult<Arc<BinanceState>> {
        self.state.read().clone().ok_or_else(not_configured)
    }

    fn connected_state(&self) -> ExchangeResult<Arc<BinanceState>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(not_connected());
        }
        self.state()
    }

    /// Endpoint weight after applying the configured multiplier.
    fn effective_weight(state: &BinanceState, weight: u32) -> u32 {
        let scaled = f64::from(weight) * state.config.binance.weight_multiplier;
        scaled.ceil().max(1.0) as u32
    }

    /// The full REST pipeline: rate limit, retry, sign, send, map.
    async fn request(
        state: &Arc<BinanceState>,
        method: Method,
        path: &str,
        params: String,
        signed: bool,
        weight: u32,
    ) -> ExchangeResult<serde_json::Value> {
        state
            .limiter
            .acquire(Self::effective_weight(state, weight), Some(path))
            .await;

        let state = state.clone();
        let method_in = method;
        let path = path.to_string();
        state
            .clone()
            .retry
            .execute(move || {
                let state = state.clone();
                let method = method_in.clone();
                let path = path.clone();
                let params = params.clone();
                async move { Self::send_once(&state, method, &path, &params, signed).await }
            })
            .await
    }

    async fn send_once(
        state: &BinanceState,
        method: Method,
        path: &str,
        params: &str,
        signed: bool,
    ) -> ExchangeResult<serde_json::Value> {
        let query = if signed {
            state.auth.signed_query(params)
        } else {
            params.to_string()
        };
        let url = if query.is_empty() {
            format!("{}{}", state.base_url, path)
        } else {
            format!("{}{}?{}", state.base_url, path, query)
        };

        let response = state.http.request(method, &url).send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::timeout(format!("{path}"))
            } else {
                ExchangeError::connection(format!("request to {path} failed: {e}"))
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::connection(format!("reading {path} body: {e}")))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                ExchangeError::exchange("parse", format!("malformed response from {path}: {e}"))
            })
        } else {
            Err(map_binance_error(status.as_u16(), &body, retry_after))
        }
    }
}

impl Default for BinanceConnector {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Response parsing (pure, unit-tested)
// ---------------------------------------------------------------------------

/// Parse the klines array-of-arrays response.
/// Indices: [0] openTime, [1] open, [2] high, [3] low, [4] close,
/// [5] volume, [6] closeTime, [7] quoteAssetVolume.
fn parse_klines(symbol: &str, interval: TimeFrame, value: &serde_json::Value) -> Vec<Candle> {
    let rows = match value.as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(fields) = row.as_array() else {
            warn!("skipping non-array kline row");
            continue;
        };
        if fields.len() < 8 {
            warn!(len = fields.len(), "skipping short kline row");
            continue;
        }

        let parsed = (|| -> Option<Candle> {
            Some(Candle {
                symbol: symbol.to_string(),
                interval,
                open_time: fields[0].as_i64()?,
                close_time: fields[6].as_i64()?,
                open: json_decimal(&fields[1])?,
                high: json_decimal(&fields[2])?,
                low: json_decimal(&fields[3])?,
                close: json_decimal(&fields[4])?,
                volume: json_decimal(&fields[5])?,
                quote_volume: json_decimal(&fields[7])?,
            })
        })();

        match parsed {
            Some(candle) if candle.is_valid() => candles.push(candle),
            Some(_) => warn!(symbol, "dropping kline violating OHLC invariants"),
            None => warn!(symbol, "dropping malformed kline row"),
        }
    }
    candles
}

fn parse_ticker_24hr(value: &serde_json::Value) -> ExchangeResult<Ticker> {
    let field = |key: &str| -> ExchangeResult<Decimal> {
        value
            .get(key)
            .and_then(json_decimal)
            .ok_or_else(|| {
                ExchangeError::exchange("parse", format!("ticker response missing field '{key}'"))
            })
    };

    Ok(Ticker {
        symbol: value
            .get("symbol")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_uppercase(),
        last_price: field("lastPrice")?,
        bid_price: field("bidPrice").unwrap_or_default(),
        ask_price: field("askPrice").unwrap_or_default(),
        high_24h: field("highPrice")?,
        low_24h: field("lowPrice")?,
        open_24h: field("openPrice")?,
        volume: field("volume")?,
        quote_volume: field("quoteVolume")?,
        price_change: field("priceChange").unwrap_or_default(),
        price_change_percent: field("priceChangePercent").unwrap_or_default(),
        timestamp: value
            .get("closeTime")
            .and_then(|t| t.as_i64())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
    })
}

fn parse_depth(symbol: &str, value: &serde_json::Value) -> ExchangeResult<OrderBook> {
    let parse_side = |key: &str| -> Vec<OrderBookLevel> {
        value
            .get(key)
            .and_then(|side| side.as_array())
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let fields = row.as_array()?;
                        Some(OrderBookLevel {
                            price: json_decimal(fields.first()?)?,
                            quantity: json_decimal(fields.get(1)?)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let book = OrderBook {
        symbol: symbol.to_string(),
        bids: parse_side("bids"),
        asks: parse_side("asks"),
        timestamp: Utc::now(),
    };

    if !book.is_coherent() {
        return Err(ExchangeError::exchange(
            "parse",
            format!("crossed or unsorted depth snapshot for {symbol}"),
        ));
    }
    Ok(book)
}

fn parse_order_response(fallback_symbol: &str, value: &serde_json::Value) -> ExchangeResult<Order> {
    let missing =
        |key: &str| ExchangeError::exchange("parse", format!("order response missing field '{key}'"));

    let symbol = value
        .get("symbol")
        .and_then(|s| s.as_str())
        .unwrap_or(fallback_symbol)
        .to_uppercase();

    let side = value
        .get("side")
        .and_then(|s| s.as_str())
        .ok_or_else(|| missing("side"))?;
    let action = if side.eq_ignore_ascii_case("BUY") {
        TradeAction::Long
    } else {
        TradeAction::Short
    };

    let order_type = match value.get("type").and_then(|t| t.as_str()) {
        Some("LIMIT") => OrderType::Limit,
        Some("STOP_LOSS") => OrderType::StopLoss,
        Some("STOP_LOSS_LIMIT") => OrderType::StopLossLimit,
        _ => OrderType::Market,
    };

    let quantity = value
        .get("origQty")
        .and_then(json_decimal)
        .ok_or_else(|| missing("origQty"))?;
    let filled = value
        .get("executedQty")
        .and_then(json_decimal)
        .unwrap_or_default();
    let cumulative_quote = value
        .get("cummulativeQuoteQty")
        .and_then(json_decimal)
        .unwrap_or_default();
    let average_price = if !filled.is_zero() && !cumulative_quote.is_zero() {
        Some(cumulative_quote / filled)
    } else {
        None
    };

    let timestamp = value
        .get("transactTime")
        .or_else(|| value.get("time"))
        .and_then(|t| t.as_i64())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Order {
        id: value.get("orderId").map(|id| id.to_string()),
        symbol,
        action,
        order_type,
        quantity,
        price: value
            .get("price")
            .and_then(json_decimal)
            .filter(|p| !p.is_zero()),
        status: value
            .get("status")
            .and_then(|s| s.as_str())
            .map(OrderStatus::from_wire)
            .unwrap_or(OrderStatus::Pending),
        filled_quantity: filled,
        average_price,
        created_at: timestamp,
        updated_at: timestamp,
    })
}

/// Split a normalized symbol into (base, quote) using the known quote list.
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

/// Market order that flattens `position`: buy-to-cover for shorts, sell
/// for longs.
fn closing_order(position: &Position) -> Order {
    Order::market(
        position.symbol.clone(),
        position.action.opposite(),
        position.quantity,
    )
}

// ---------------------------------------------------------------------------
// ExchangeConnector implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeConnector for BinanceConnector {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn configure(&self, config: ExchangeConfig) -> ExchangeResult<()> {
        if config.exchange != Exchange::Binance {
            return Err(ExchangeError::exchange(
                "config",
                format!("config is for {}, not BINANCE", config.exchange),
            ));
        }
        config.validate()?;
        if self.connected.load(Ordering::SeqCst) {
            return Err(ExchangeError::Connection {
                message: "cannot reconfigure a connected connector".into(),
                retryable: false,
            });
        }

        let base_url = config.base_url.clone().unwrap_or_else(|| {
            if config.testnet {
                TESTNET_REST_URL.to_string()
            } else {
                PROD_REST_URL.to_string()
            }
        });
        let ws_url = if config.testnet {
            TESTNET_WS_URL
        } else {
            PROD_WS_URL
        };

        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&config.api_key) {
            headers.insert("X-MBX-APIKEY", value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ExchangeError::connection(format!("http client build failed: {e}")))?;

        let auth = BinanceAuthenticator::new(
            config.api_key.clone(),
            config.api_secret.clone(),
            config.recv_window_ms(),
        );
        let limiter = RateLimiter::new(config.rate_limit.clone());
        let retry = RetryPolicy::from_config(&config.retry);
        let ws = WebSocketManager::new(
            ws_url,
            config.websocket.clone(),
            Duration::from_millis(config.connect_timeout_ms),
            Arc::new(BinanceStreamAdapter::new()),
        );

        *self.state.write() = Some(Arc::new(BinanceState {
            config,
            auth,
            limiter,
            retry,
            http,
            base_url,
            ws,
        }));
        debug!("binance connector configured");
        Ok(())
    }

    #[instrument(skip(self), name = "binance::connect")]
    async fn connect(&self) -> ExchangeResult<()> {
        let state = self.state()?;
        if self.connected.load(Ordering::SeqCst) {
            return Err(ExchangeError::Connection {
                message: "connector already connected".into(),
                retryable: false,
            });
        }

        // 1. Reachability ping (unauthenticated).
        Self::request(&state, Method::GET, "/api/v3/ping", String::new(), false, 1).await?;

        // 2. Server time fetch + clock-offset update.
        let time = Self::request(&state, Method::GET, "/api/v3/time", String::new(), false, 1)
            .await?;
        if let Some(server_time) = time.get("serverTime").and_then(|t| t.as_i64()) {
            state.auth.update_timestamp_offset(server_time);
            debug!(
                offset_ms = state.auth.timestamp_offset_ms(),
                "clock offset updated"
            );
        }

        // 3. Authenticated probe to validate credentials.
        Self::request(&state, Method::GET, "/api/v3/account", String::new(), true, 20).await?;

        // 4. Stream session.
        state.ws.connect().await?;

        self.connected.store(true, Ordering::SeqCst);
        info!(base_url = %state.base_url, testnet = state.config.testnet, "binance connector connected");
        Ok(())
    }

    async fn disconnect(&self) -> ExchangeResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(()); // idempotent
        }
        if let Ok(state) = self.state() {
            state.ws.disconnect().await;
        }
        info!("binance connector disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // ── Market data ─────────────────────────────────────────────────────

    #[instrument(skip(self), name = "binance::get_candles")]
    async fn get_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: Option<i64>,
        end: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);

        let mut params = format!(
            "symbol={symbol}&interval={}&limit={}",
            interval.label(),
            limit.clamp(1, 1000)
        );
        if let Some(start) = start {
            params.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end {
            params.push_str(&format!("&endTime={end}"));
        }

        let value =
            Self::request(&state, Method::GET, "/api/v3/klines", params, false, 2).await?;
        Ok(parse_klines(&symbol, interval, &value))
    }

    #[instrument(skip(self), name = "binance::get_ticker")]
    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let value = Self::request(
            &state,
            Method::GET,
            "/api/v3/ticker/24hr",
            format!("symbol={symbol}"),
            false,
            2,
        )
        .await?;
        parse_ticker_24hr(&value)
    }

    #[instrument(skip(self), name = "binance::get_order_book")]
    async fn get_order_book(&self, symbol: &str, limit: u32) -> ExchangeResult<OrderBook> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let value = Self::request(
            &state,
            Method::GET,
            "/api/v3/depth",
            format!("symbol={symbol}&limit={}", limit.clamp(1, 5000)),
            false,
            5,
        )
        .await?;
        parse_depth(&symbol, &value)
    }

    // ── Account ─────────────────────────────────────────────────────────

    #[instrument(skip(self), name = "binance::get_balance")]
    async fn get_balance(&self) -> ExchangeResult<Balances> {
        let state = self.connected_state()?;
        let value =
            Self::request(&state, Method::GET, "/api/v3/account", String::new(), true, 20).await?;

        let mut balances = Balances::new();
        if let Some(rows) = value.get("balances").and_then(|b| b.as_array()) {
            for row in rows {
                let Some(asset) = row.get("asset").and_then(|a| a.as_str()) else {
                    continue;
                };
                let free = row.get("free").and_then(json_decimal).unwrap_or_default();
                if !free.is_zero() {
                    balances.insert(asset.to_uppercase(), free);
                }
            }
        }
        Ok(balances)
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
        // Spot accounts hold assets, not positions: there is no entry price
        // to report, so no synthetic zero-priced positions are fabricated.
        self.connected_state()?;
        Ok(Vec::new())
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<Position>> {
        self.connected_state()?;
        let _ = symbol;
        Ok(None)
    }

    // ── Orders ──────────────────────────────────────────────────────────

    #[instrument(skip(self, order), name = "binance::place_order")]
    async fn place_order(&self, order: &Order) -> ExchangeResult<Order> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(&order.symbol);
        let side = order.action.as_side();

        let mut params = format!("symbol={symbol}&side={side}");
        match order.price {
            // A priced order goes out as LIMIT with GTC time-in-force.
            Some(price) if !price.is_zero() => {
                params.push_str(&format!(
                    "&type=LIMIT&timeInForce=GTC&quantity={}&price={}",
                    order.quantity, price
                ));
            }
            _ => {
                params.push_str(&format!("&type=MARKET&quantity={}", order.quantity));
            }
        }
        params.push_str(&format!("&newClientOrderId={}", uuid::Uuid::new_v4().simple()));

        debug!(symbol = %symbol, side, quantity = %order.quantity, "placing order");
        let value =
            Self::request(&state, Method::POST, "/api/v3/order", params, true, 1).await?;
        let placed = parse_order_response(&symbol, &value)?;
        info!(
            symbol = %symbol,
            order_id = placed.id.as_deref().unwrap_or("-"),
            status = ?placed.status,
            "order placed"
        );
        Ok(placed)
    }

    #[instrument(skip(self), name = "binance::cancel_order")]
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let value = Self::request(
            &state,
            Method::DELETE,
            "/api/v3/order",
            format!("symbol={symbol}&orderId={order_id}"),
            true,
            1,
        )
        .await?;
        parse_order_response(&symbol, &value)
    }

    #[instrument(skip(self), name = "binance::get_order")]
    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let value = Self::request(
            &state,
            Method::GET,
            "/api/v3/order",
            format!("symbol={symbol}&orderId={order_id}"),
            true,
            4,
        )
        .await?;
        parse_order_response(&symbol, &value)
    }

    #[instrument(skip(self), name = "binance::get_orders")]
    async fn get_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        let state = self.connected_state()?;
        let params = match symbol {
            Some(symbol) => format!("symbol={}", normalize_symbol(symbol)),
            None => String::new(),
        };
        let value =
            Self::request(&state, Method::GET, "/api/v3/openOrders", params, true, 6).await?;

        let fallback = symbol.map(normalize_symbol).unwrap_or_default();
        Ok(value
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| parse_order_response(&fallback, row).ok())
                    .collect()
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self), name = "binance::close_position")]
    async fn close_position(&self, symbol: &str) -> ExchangeResult<Order> {
        let symbol = normalize_symbol(symbol);

        // A venue-tracked short closes on its opposite side: buy back the
        // tracked quantity instead of selling again.
        if let Some(position) = self.get_position(&symbol).await? {
            if position.action == TradeAction::Short {
                return self.place_order(&closing_order(&position)).await;
            }
        }

        let (base, _quote) = split_symbol(&symbol).ok_or_else(|| ExchangeError::Order {
            code: "no_position".into(),
            message: format!("cannot derive base asset from symbol '{symbol}'"),
            retryable: false,
        })?;

        let balances = self.get_balance().await?;
        let quantity = balances.get(&base).copied().unwrap_or_default();
        if quantity.is_zero() {
            return Err(ExchangeError::Order {
                code: "no_position".into(),
                message: format!("no position: zero {base} balance"),
                retryable: false,
            });
        }

        // Spot holdings are long exposure: sell the whole base balance.
        let order = Order::market(symbol, TradeAction::Short, quantity);
        self.place_order(&order).await
    }

    // ── Streaming ───────────────────────────────────────────────────────

    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        callback: CandleCallback,
    ) -> ExchangeResult<String> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let channel = BinanceStreamAdapter::kline_channel(&symbol, interval);
        state
            .ws
            .subscribe(
                &channel,
                Arc::new(move |msg| {
                    if let Some(candle) = parse_kline_payload(&msg.payload) {
                        callback(candle);
                    }
                }),
            )
            .await
    }

    async fn subscribe_ticker(
        &self,
        symbol: &str,
        callback: TickerCallback,
    ) -> ExchangeResult<String> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let channel = BinanceStreamAdapter::ticker_channel(&symbol);
        state
            .ws
            .subscribe(
                &channel,
                Arc::new(move |msg| {
                    if let Some(ticker) = parse_ticker_payload(&msg.payload) {
                        callback(ticker);
                    }
                }),
            )
            .await
    }

    async fn subscribe_order_updates(
        &self,
        callback: OrderUpdateCallback,
    ) -> ExchangeResult<String> {
        let state = self.connected_state()?;
        state
            .ws
            .subscribe(
                ORDER_UPDATE_CHANNEL,
                Arc::new(move |msg| {
                    if let Some(order) = parse_execution_report(&msg.payload) {
                        callback(order);
                    }
                }),
            )
            .await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> ExchangeResult<()> {
        let state = self.connected_state()?;
        state.ws.unsubscribe(subscription_id).await
    }

    async fn unsubscribe_all(&self) -> ExchangeResult<()> {
        let state = self.connected_state()?;
        state.ws.unsubscribe_all();
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> ExchangeConfig {
        ExchangeConfig::new(Exchange::Binance).with_credentials("key", "secret")
    }

    #[test]
    fn configure_rejects_wrong_exchange() {
        let connector = BinanceConnector::new();
        let wrong = ExchangeConfig::new(Exchange::Bitget)
            .with_credentials("k", "s")
            .with_passphrase("p");
        assert!(connector.configure(wrong).is_err());
    }

    #[test]
    fn configure_accepts_valid_config() {
        let connector = BinanceConnector::new();
        assert!(connector.configure(config()).is_ok());
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn operations_before_configure_fail() {
        let connector = BinanceConnector::new();
        let err = connector.get_ticker("BTCUSDT").await.unwrap_err();
        assert_eq!(err.kind(), "connection");
    }

    #[tokio::test]
    async fn operations_before_connect_fail() {
        let connector = BinanceConnector::new();
        connector.configure(config()).unwrap();
        let err = connector
            .get_candles("BTCUSDT", TimeFrame::M1, None, None, 100)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_noop() {
        let connector = BinanceConnector::new();
        connector.configure(config()).unwrap();
        assert!(connector.disconnect().await.is_ok());
        assert!(!connector.is_connected());
    }

    #[test]
    fn kline_rows_parse_and_filter() {
        let value = serde_json::json!([
            [1700000000000i64, "100.0", "105.0", "99.0", "103.0", "12.5", 1700000059999i64, "1287.5", 100, "6.0", "620.0", "0"],
            [1700000060000i64, "103.0", "101.0", "99.0", "104.0", "10.0", 1700000119999i64, "1030.0", 90, "5.0", "515.0", "0"],
            "garbage",
            [1700000120000i64, "104.0"]
        ]);
        let candles = parse_klines("BTCUSDT", TimeFrame::M1, &value);
        // Row 2 has high < close (invariant violation), rows 3-4 malformed.
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(103.0));
        assert_eq!(candles[0].quote_volume, dec!(1287.5));
    }

    #[test]
    fn ticker_parse_round_trip() {
        let value = serde_json::json!({
            "symbol": "btcusdt", "lastPrice": "50000.00", "bidPrice": "49999.00",
            "askPrice": "50001.00", "highPrice": "51000.00", "lowPrice": "49000.00",
            "openPrice": "49500.00", "volume": "1000", "quoteVolume": "50000000",
            "priceChange": "500.00", "priceChangePercent": "1.01",
            "closeTime": 1700000000000i64
        });
        let ticker = parse_ticker_24hr(&value).unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.last_price, dec!(50000.00));
        assert!(ticker.is_coherent());
    }

    #[test]
    fn ticker_missing_field_errors() {
        let value = serde_json::json!({"symbol": "BTCUSDT", "bidPrice": "1"});
        assert!(parse_ticker_24hr(&value).is_err());
    }

    #[test]
    fn depth_parses_sorted_sides() {
        let value = serde_json::json!({
            "bids": [["99.0", "1.0"], ["98.5", "2.0"]],
            "asks": [["100.0", "1.5"], ["100.5", "3.0"]]
        });
        let book = parse_depth("BTCUSDT", &value).unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(99.0));
        assert_eq!(book.best_ask().unwrap().price, dec!(100.0));
    }

    #[test]
    fn depth_rejects_crossed_book() {
        let value = serde_json::json!({
            "bids": [["101.0", "1.0"]],
            "asks": [["100.0", "1.5"]]
        });
        assert!(parse_depth("BTCUSDT", &value).is_err());
    }

    #[test]
    fn order_response_market_fill() {
        let value = serde_json::json!({
            "symbol": "BTCUSDT", "orderId": 28, "transactTime": 1700000000000i64,
            "price": "0.00000000", "origQty": "0.01000000", "executedQty": "0.01000000",
            "cummulativeQuoteQty": "500.00000000", "status": "FILLED",
            "type": "MARKET", "side": "BUY"
        });
        let order = parse_order_response("BTCUSDT", &value).unwrap();
        assert_eq!(order.id.as_deref(), Some("28"));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.filled_quantity, dec!(0.01));
        assert_eq!(order.average_price, Some(dec!(50000)));
        assert!(order.price.is_none());
    }

    #[test]
    fn order_response_open_limit() {
        let value = serde_json::json!({
            "symbol": "ETHUSDT", "orderId": 99, "transactTime": 1700000000000i64,
            "price": "2000.00", "origQty": "1.00", "executedQty": "0.00",
            "cummulativeQuoteQty": "0.00", "status": "NEW",
            "type": "LIMIT", "side": "SELL"
        });
        let order = parse_order_response("ETHUSDT", &value).unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.action, TradeAction::Short);
        assert_eq!(order.price, Some(dec!(2000.00)));
        assert!(order.average_price.is_none());
    }

    #[test]
    fn symbol_splitting() {
        assert_eq!(
            split_symbol("BTCUSDT"),
            Some(("BTC".to_string(), "USDT".to_string()))
        );
        assert_eq!(
            split_symbol("ETHBTC"),
            Some(("ETH".to_string(), "BTC".to_string()))
        );
        assert_eq!(split_symbol("USDT"), None);
        assert_eq!(split_symbol("XYZABC"), None);
    }

    #[test]
    fn closing_order_flattens_either_side() {
        let short = Position::new("BTCUSDT", TradeAction::Short, dec!(0.5), dec!(50000), dec!(1));
        let close = closing_order(&short);
        assert_eq!(close.action, TradeAction::Long); // buy to cover
        assert_eq!(close.quantity, dec!(0.5));

        let long = Position::new("ETHUSDT", TradeAction::Long, dec!(3), dec!(2000), dec!(1));
        let close = closing_order(&long);
        assert_eq!(close.action, TradeAction::Short); // sell the holding
        assert_eq!(close.quantity, dec!(3));
    }

    #[test]
    fn weight_multiplier_scales_up() {
        let mut cfg = config();
        cfg.binance.weight_multiplier = 2.5;
        let connector = BinanceConnector::new();
        connector.configure(cfg).unwrap();
        let state = connector.state().unwrap();
        assert_eq!(BinanceConnector::effective_weight(&state, 2), 5);
        assert_eq!(BinanceConnector::effective_weight(&state, 1), 3);
    }
}
