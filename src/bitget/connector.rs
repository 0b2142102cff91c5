// =============================================================================
// Bitget Spot Connector
// =============================================================================
//
// REST base: https://api.bitget.com. Public informational endpoints are
// always v2 (`/api/v2/spot/public/symbols`); spot market operations use the
// v1 family (`/api/spot/v1/market/...`, symbols suffixed `_SPBL`) unless
// `use_v2_market_endpoints` is set. Signed endpoints carry the
// ACCESS-KEY/SIGN/TIMESTAMP/PASSPHRASE header quartet, plus `paptrading: 1`
// in demo mode.
//
// Environment auto-detection: try demo first; venue code 40099 means the
// keys belong to the other environment, so fall back to production and
// record which one answered.
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

use crate::bitget::auth::BitgetAuthenticator;
use crate::bitget::errors::{is_environment_mismatch, map_bitget_error};
use crate::bitget::ws::{
    parse_candle_payload, parse_order_payload, parse_ticker_payload, BitgetStreamAdapter,
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

const REST_URL: &str = "https://api.bitget.com";
const WS_URL: &str = "wss://ws.bitget.com/spot/v1/stream";

/// v1 spot market symbols carry the SPBL (spot public) suffix.
const V1_SYMBOL_SUFFIX: &str = "_SPBL";

/// Symbol-discovery probe budget: scan at most this many online symbols...
const DISCOVERY_PROBE_LIMIT: usize = 20;
/// ...collecting the first this many that answer on the v1 ticker.
const DISCOVERY_TARGET: usize = 5;

const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "BTC", "ETH"];

/// Which venue environment a connection attempt landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitgetEnvironment {
    Demo,
    Production,
}

impl std::fmt::Display for BitgetEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "demo/testnet"),
            Self::Production => write!(f, "production"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector state
// ---------------------------------------------------------------------------

struct BitgetState {
    config: ExchangeConfig,
    auth: BitgetAuthenticator,
    limiter: RateLimiter,
    retry: RetryPolicy,
    http: reqwest::Client,
    base_url: String,
    ws: WebSocketManager,
}

pub struct BitgetConnector {
    state: RwLock<Option<Arc<BitgetState>>>,
    connected: AtomicBool,
}

impl BitgetConnector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ExchangeResult<Arc<BitgetState>> {
        self.state.read().clone().ok_or_else(not_configured)
    }

    fn connected_state(&self) -> ExchangeResult<Arc<BitgetState>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(not_connected());
        }
        self.state()
    }

    /// The full REST pipeline: rate limit, retry, sign, send, map,
    /// envelope unwrap.
    async fn request(
        state: &Arc<BitgetState>,
        method: Method,
        path: &str,
        query: String,
        body: Option<serde_json::Value>,
        signed: bool,
        weight: u32,
    ) -> ExchangeResult<serde_json::Value> {
        state.limiter.acquire(weight, Some(path)).await;

        let state = state.clone();
        let path = path.to_string();
        let method_in = method;
        state
            .clone()
            .retry
            .execute(move || {
                let state = state.clone();
                let method = method_in.clone();
                let path = path.clone();
                let query = query.clone();
                let body = body.clone();
                async move { Self::send_once(&state, method, &path, &query, body, signed).await }
            })
            .await
    }

    async fn send_once(
        state: &BitgetState,
        method: Method,
        path: &str,
        query: &str,
        body: Option<serde_json::Value>,
        signed: bool,
    ) -> ExchangeResult<serde_json::Value> {
        // The prehash covers the path with its leading-? query string.
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let url = format!("{}{}", state.base_url, request_path);
        let body_text = body.map(|b| b.to_string()).unwrap_or_default();

        let mut request = state.http.request(method.clone(), &url);
        if signed {
            for (name, value) in state.auth.headers(method.as_str(), &request_path, &body_text) {
                request = request.header(name, value);
            }
        }
        if !body_text.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body_text);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::timeout(path.to_string())
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
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::connection(format!("reading {path} body: {e}")))?;

        if !status.is_success() {
            return Err(map_bitget_error(status.as_u16(), &text, retry_after));
        }
        unwrap_envelope(status.as_u16(), &text, retry_after)
    }

    fn market_symbol(state: &BitgetState, symbol: &str) -> String {
        if state.config.bitget.use_v2_market_endpoints {
            symbol.to_string()
        } else {
            format!("{symbol}{V1_SYMBOL_SUFFIX}")
        }
    }

    // -------------------------------------------------------------------------
    // Environment auto-detection
    // -------------------------------------------------------------------------

    /// Connect with demo settings first; a 40099 answer means the keys
    /// belong to production, so retry there. Used by the connection-test
    /// entry point; callers that set `testnet` explicitly bypass this.
    pub async fn detect_environment(
        config: &ExchangeConfig,
    ) -> ExchangeResult<(BitgetEnvironment, String)> {
        let mut demo_config = config.clone();
        demo_config.testnet = true;
        demo_config.bitget.demo_trading = true;

        let demo = BitgetConnector::new();
        demo.configure(demo_config)?;
        let demo_result = demo.connect().await;
        let _ = demo.disconnect().await;

        match environment_after_demo_probe(&demo_result) {
            ProbeDecision::Connected => {
                return Ok((
                    BitgetEnvironment::Demo,
                    "connected to Bitget demo/testnet environment".to_string(),
                ));
            }
            ProbeDecision::Fail => return Err(demo_result.unwrap_err()),
            ProbeDecision::TryProduction => {
                info!("demo probe answered 40099, falling back to production");
            }
        }

        let mut prod_config = config.clone();
        prod_config.testnet = false;
        prod_config.bitget.demo_trading = false;

        let production = BitgetConnector::new();
        production.configure(prod_config)?;
        production.connect().await?;
        let _ = production.disconnect().await;
        Ok((
            BitgetEnvironment::Production,
            "connected to Bitget production environment".to_string(),
        ))
    }

    // -------------------------------------------------------------------------
    // Symbol discovery
    // -------------------------------------------------------------------------

    /// Enumerate v2 online symbols, probe each with the v1 ticker, and
    /// collect the first few that answer. Lets callers adapt to the v1/v2
    /// market-endpoint split without hardcoding symbols.
    #[instrument(skip(self), name = "bitget::discover_v1_symbols")]
    pub async fn discover_v1_compatible_symbols(&self) -> ExchangeResult<Vec<String>> {
        let state = self.connected_state()?;

        let value = Self::request(
            &state,
            Method::GET,
            "/api/v2/spot/public/symbols",
            String::new(),
            None,
            false,
            1,
        )
        .await?;

        let online: Vec<String> = value
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.get("status").and_then(|s| s.as_str()).unwrap_or("") == "online"
                    })
                    .filter_map(|row| row.get("symbol").and_then(|s| s.as_str()))
                    .map(str::to_uppercase)
                    .collect()
            })
            .unwrap_or_default();

        let mut compatible = Vec::new();
        for symbol in online.into_iter().take(DISCOVERY_PROBE_LIMIT) {
            if compatible.len() >= DISCOVERY_TARGET {
                break;
            }
            let probe = Self::request(
                &state,
                Method::GET,
                "/api/spot/v1/market/ticker",
                format!("symbol={symbol}{V1_SYMBOL_SUFFIX}"),
                None,
                false,
                1,
            )
            .await;
            match probe {
                Ok(_) => compatible.push(symbol),
                Err(e) => debug!(symbol = %symbol, error = %e, "v1 ticker probe failed"),
            }
        }

        info!(count = compatible.len(), "v1-compatible symbols discovered");
        Ok(compatible)
    }
}

impl Default for BitgetConnector {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Envelope + response parsing (pure, unit-tested)
// ---------------------------------------------------------------------------

/// Bitget wraps every REST payload as `{"code":"00000","msg":...,"data":...}`
/// and reports some errors with HTTP 200. Unwrap `data` on success; map
/// anything else.
fn unwrap_envelope(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> ExchangeResult<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        ExchangeError::exchange("parse", format!("malformed venue response: {e}"))
    })?;

    match value.get("code").and_then(|c| c.as_str()) {
        Some("00000") | None => Ok(value.get("data").cloned().unwrap_or(value)),
        Some(_) => Err(map_bitget_error(status, body, retry_after)),
    }
}

/// Exhaustive v1 period mapping ("60min", "4hour", "1day").
fn interval_to_v1(interval: TimeFrame) -> &'static str {
    match interval {
        TimeFrame::M1 => "1min",
        TimeFrame::M5 => "5min",
        TimeFrame::M15 => "15min",
        TimeFrame::M30 => "30min",
        TimeFrame::H1 => "60min",
        TimeFrame::H4 => "4hour",
        TimeFrame::D1 => "1day",
    }
}

/// Exhaustive v2 granularity mapping ("1h", "4h", "1day").
fn interval_to_v2(interval: TimeFrame) -> &'static str {
    match interval {
        TimeFrame::M1 => "1min",
        TimeFrame::M5 => "5min",
        TimeFrame::M15 => "15min",
        TimeFrame::M30 => "30min",
        TimeFrame::H1 => "1h",
        TimeFrame::H4 => "4h",
        TimeFrame::D1 => "1day",
    }
}

/// Candle rows arrive as arrays (`[ts,o,h,l,c,baseVol,quoteVol]`) from v2
/// or as objects from v1; accept either, dropping malformed rows.
fn parse_candles(symbol: &str, interval: TimeFrame, value: &serde_json::Value) -> Vec<Candle> {
    let rows = match value.as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| parse_candle_row(symbol, interval, row))
        .filter(|candle| {
            let valid = candle.is_valid();
            if !valid {
                warn!(symbol, "dropping candle violating OHLC invariants");
            }
            valid
        })
        .collect();

    // The venue returns newest-first for some endpoints; normalize to
    // oldest-first for the indicator pipeline.
    candles.sort_by_key(|c| c.open_time);
    candles
}

fn parse_candle_row(
    symbol: &str,
    interval: TimeFrame,
    row: &serde_json::Value,
) -> Option<Candle> {
    let ms = |v: &serde_json::Value| -> Option<i64> {
        v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    };

    if let Some(fields) = row.as_array() {
        if fields.len() < 6 {
            warn!(symbol, "dropping short candle row");
            return None;
        }
        let open_time = ms(&fields[0])?;
        return Some(Candle {
            symbol: symbol.to_string(),
            interval,
            open_time,
            close_time: open_time + interval.as_millis() - 1,
            open: json_decimal(&fields[1])?,
            high: json_decimal(&fields[2])?,
            low: json_decimal(&fields[3])?,
            close: json_decimal(&fields[4])?,
            volume: json_decimal(&fields[5])?,
            quote_volume: fields.get(6).and_then(json_decimal).unwrap_or_default(),
        });
    }

    if row.is_object() {
        let field = |keys: &[&str]| keys.iter().find_map(|k| row.get(*k).and_then(json_decimal));
        let open_time = ms(row.get("ts")?)?;
        return Some(Candle {
            symbol: symbol.to_string(),
            interval,
            open_time,
            close_time: open_time + interval.as_millis() - 1,
            open: field(&["open"])?,
            high: field(&["high"])?,
            low: field(&["low"])?,
            close: field(&["close"])?,
            volume: field(&["baseVol", "baseVolume"]).unwrap_or_default(),
            quote_volume: field(&["quoteVol", "quoteVolume", "usdtVol"]).unwrap_or_default(),
        });
    }

    warn!(symbol, "dropping non-array, non-object candle row");
    None
}

fn parse_ticker(symbol: &str, value: &serde_json::Value) -> ExchangeResult<Ticker> {
    let field = |keys: &[&str]| -> Option<Decimal> {
        keys.iter().find_map(|key| value.get(*key).and_then(json_decimal))
    };
    let required = |keys: &[&str]| -> ExchangeResult<Decimal> {
        field(keys).ok_or_else(|| {
            ExchangeError::exchange("parse", format!("ticker missing any of {keys:?}"))
        })
    };

    let ticker = Ticker {
        symbol: symbol.to_string(),
        last_price: required(&["close", "last", "lastPr"])?,
        bid_price: field(&["bestBid", "buyOne", "bidPr"]).unwrap_or_default(),
        ask_price: field(&["bestAsk", "sellOne", "askPr"]).unwrap_or_default(),
        high_24h: field(&["high24h"]).unwrap_or_default(),
        low_24h: field(&["low24h"]).unwrap_or_default(),
        open_24h: field(&["openUtc0", "open24h", "open"]).unwrap_or_default(),
        volume: field(&["baseVol", "baseVolume"]).unwrap_or_default(),
        quote_volume: field(&["quoteVol", "quoteVolume", "usdtVol"]).unwrap_or_default(),
        price_change: field(&["change24h"]).unwrap_or_default(),
        price_change_percent: field(&["changeUtc", "chgUtc"]).unwrap_or_default(),
        timestamp: value
            .get("ts")
            .and_then(|t| t.as_i64().or_else(|| t.as_str().and_then(|s| s.parse().ok())))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
    };

    if !ticker.is_coherent() {
        return Err(ExchangeError::exchange(
            "parse",
            format!("crossed ticker for {symbol}"),
        ));
    }
    Ok(ticker)
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

/// Order-info objects come back from orderInfo (array of one) and
/// unfilled-orders (array). Field names vary slightly across versions.
fn parse_order_info(fallback_symbol: &str, value: &serde_json::Value) -> ExchangeResult<Order> {
    let missing =
        |key: &str| ExchangeError::exchange("parse", format!("order info missing '{key}'"));

    let symbol = value
        .get("symbol")
        .or_else(|| value.get("instId"))
        .and_then(|s| s.as_str())
        .map(|s| s.trim_end_matches(V1_SYMBOL_SUFFIX).to_uppercase())
        .unwrap_or_else(|| fallback_symbol.to_string());

    let side = value
        .get("side")
        .and_then(|s| s.as_str())
        .ok_or_else(|| missing("side"))?;
    let action = if side.eq_ignore_ascii_case("buy") {
        TradeAction::Long
    } else {
        TradeAction::Short
    };

    let order_type = match value
        .get("orderType")
        .or_else(|| value.get("ordType"))
        .and_then(|t| t.as_str())
    {
        Some("limit") => OrderType::Limit,
        _ => OrderType::Market,
    };

    let quantity = value
        .get("size")
        .or_else(|| value.get("quantity"))
        .or_else(|| value.get("sz"))
        .and_then(json_decimal)
        .ok_or_else(|| missing("size"))?;
    let filled = value
        .get("baseVolume")
        .or_else(|| value.get("fillQuantity"))
        .or_else(|| value.get("accFillSz"))
        .and_then(json_decimal)
        .unwrap_or_default();

    let ms = |keys: &[&str]| -> Option<i64> {
        keys.iter().find_map(|key| {
            value
                .get(*key)
                .and_then(|t| t.as_i64().or_else(|| t.as_str().and_then(|s| s.parse().ok())))
        })
    };

    Ok(Order {
        id: value
            .get("orderId")
            .or_else(|| value.get("ordId"))
            .map(|id| match id.as_str() {
                Some(s) => s.to_string(),
                None => id.to_string(),
            }),
        symbol,
        action,
        order_type,
        quantity,
        price: value
            .get("price")
            .or_else(|| value.get("px"))
            .and_then(json_decimal)
            .filter(|p| !p.is_zero()),
        status: value
            .get("status")
            .or_else(|| value.get("state"))
            .and_then(|s| s.as_str())
            .map(OrderStatus::from_wire)
            .unwrap_or(OrderStatus::Pending),
        filled_quantity: filled,
        average_price: value
            .get("priceAvg")
            .or_else(|| value.get("fillPrice"))
            .or_else(|| value.get("avgPx"))
            .and_then(json_decimal)
            .filter(|p| !p.is_zero()),
        created_at: ms(&["cTime", "ctime"])
            .and_then(|t| Utc.timestamp_millis_opt(t).single())
            .unwrap_or_else(Utc::now),
        updated_at: ms(&["uTime", "utime"])
            .and_then(|t| Utc.timestamp_millis_opt(t).single())
            .unwrap_or_else(Utc::now),
    })
}

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
// Environment probe decision (pure, so the sub-protocol is testable)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeDecision {
    /// Demo answered: this is the demo environment.
    Connected,
    /// Demo answered 40099: the keys are production keys.
    TryProduction,
    /// Demo failed for an unrelated reason; surface it.
    Fail,
}

fn environment_after_demo_probe(result: &ExchangeResult<()>) -> ProbeDecision {
    match result {
        Ok(()) => ProbeDecision::Connected,
        Err(err) if is_environment_mismatch(err) => ProbeDecision::TryProduction,
        Err(_) => ProbeDecision::Fail,
    }
}

// ---------------------------------------------------------------------------
// ExchangeConnector implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeConnector for BitgetConnector {
    fn exchange(&self) -> Exchange {
        Exchange::Bitget
    }

    fn configure(&self, config: ExchangeConfig) -> ExchangeResult<()> {
        if config.exchange != Exchange::Bitget {
            return Err(ExchangeError::exchange(
                "config",
                format!("config is for {}, not BITGET", config.exchange),
            ));
        }
        config.validate()?;
        if self.connected.load(Ordering::SeqCst) {
            return Err(ExchangeError::Connection {
                message: "cannot reconfigure a connected connector".into(),
                retryable: false,
            });
        }

        let base_url = config.base_url.clone().unwrap_or_else(|| REST_URL.to_string());
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ExchangeError::connection(format!("http client build failed: {e}")))?;

        let auth = BitgetAuthenticator::new(
            config.api_key.clone(),
            config.api_secret.clone(),
            config.passphrase.clone().unwrap_or_default(),
            config.bitget.demo_trading || config.testnet,
        );
        let limiter = RateLimiter::new(config.rate_limit.clone());
        let retry = RetryPolicy::from_config(&config.retry);
        let ws = WebSocketManager::new(
            WS_URL,
            config.websocket.clone(),
            Duration::from_millis(config.connect_timeout_ms),
            Arc::new(BitgetStreamAdapter::new()),
        );

        *self.state.write() = Some(Arc::new(BitgetState {
            config,
            auth,
            limiter,
            retry,
            http,
            base_url,
            ws,
        }));
        debug!("bitget connector configured");
        Ok(())
    }

    #[instrument(skip(self), name = "bitget::connect")]
    async fn connect(&self) -> ExchangeResult<()> {
        let state = self.state()?;
        if self.connected.load(Ordering::SeqCst) {
            return Err(ExchangeError::Connection {
                message: "connector already connected".into(),
                retryable: false,
            });
        }

        // 1+2. Reachability and server time come from the same public
        // endpoint; the offset feeds the signature timestamps.
        let time = Self::request(
            &state,
            Method::GET,
            "/api/v2/public/time",
            String::new(),
            None,
            false,
            1,
        )
        .await?;
        let server_time = time
            .get("serverTime")
            .and_then(|t| t.as_i64().or_else(|| t.as_str().and_then(|s| s.parse().ok())));
        if let Some(server_time) = server_time {
            state.auth.update_timestamp_offset(server_time);
            debug!(
                offset_ms = state.auth.timestamp_offset_ms(),
                "clock offset updated"
            );
        }

        // 3. Authenticated probe: the demo flag (paptrading header) is
        // validated here, surfacing 40099 on an environment mismatch.
        Self::request(
            &state,
            Method::GET,
            "/api/v2/spot/account/assets",
            String::new(),
            None,
            true,
            2,
        )
        .await?;

        // 4. Stream session.
        state.ws.connect().await?;

        self.connected.store(true, Ordering::SeqCst);
        info!(
            demo = state.auth.demo_trading(),
            "bitget connector connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> ExchangeResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(state) = self.state() {
            state.ws.disconnect().await;
        }
        info!("bitget connector disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // ── Market data ─────────────────────────────────────────────────────

    #[instrument(skip(self), name = "bitget::get_candles")]
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
        let limit = limit.clamp(1, 1000);

        let (path, mut query) = if state.config.bitget.use_v2_market_endpoints {
            (
                "/api/v2/spot/market/candles",
                format!(
                    "symbol={symbol}&granularity={}&limit={limit}",
                    interval_to_v2(interval)
                ),
            )
        } else {
            (
                "/api/spot/v1/market/candles",
                format!(
                    "symbol={}&period={}&limit={limit}",
                    Self::market_symbol(&state, &symbol),
                    interval_to_v1(interval)
                ),
            )
        };
        if let Some(start) = start {
            query.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end {
            query.push_str(&format!("&endTime={end}"));
        }

        let value = Self::request(&state, Method::GET, path, query, None, false, 2).await?;
        Ok(parse_candles(&symbol, interval, &value))
    }

    #[instrument(skip(self), name = "bitget::get_ticker")]
    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);

        let (path, query) = if state.config.bitget.use_v2_market_endpoints {
            ("/api/v2/spot/market/tickers", format!("symbol={symbol}"))
        } else {
            (
                "/api/spot/v1/market/ticker",
                format!("symbol={}", Self::market_symbol(&state, &symbol)),
            )
        };

        let value = Self::request(&state, Method::GET, path, query, None, false, 2).await?;
        // The v2 tickers endpoint returns an array even for one symbol.
        let data = value.as_array().and_then(|rows| rows.first()).unwrap_or(&value);
        parse_ticker(&symbol, data)
    }

    #[instrument(skip(self), name = "bitget::get_order_book")]
    async fn get_order_book(&self, symbol: &str, limit: u32) -> ExchangeResult<OrderBook> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let limit = limit.clamp(1, 200);

        let (path, query) = if state.config.bitget.use_v2_market_endpoints {
            (
                "/api/v2/spot/market/orderbook",
                format!("symbol={symbol}&limit={limit}"),
            )
        } else {
            (
                "/api/spot/v1/market/depth",
                format!(
                    "symbol={}&type=step0&limit={limit}",
                    Self::market_symbol(&state, &symbol)
                ),
            )
        };

        let value = Self::request(&state, Method::GET, path, query, None, false, 2).await?;
        parse_depth(&symbol, &value)
    }

    // ── Account ─────────────────────────────────────────────────────────

    #[instrument(skip(self), name = "bitget::get_balance")]
    async fn get_balance(&self) -> ExchangeResult<Balances> {
        let state = self.connected_state()?;
        let value = Self::request(
            &state,
            Method::GET,
            "/api/v2/spot/account/assets",
            String::new(),
            None,
            true,
            2,
        )
        .await?;

        let mut balances = Balances::new();
        if let Some(rows) = value.as_array() {
            for row in rows {
                let Some(coin) = row.get("coin").and_then(|c| c.as_str()) else {
                    continue;
                };
                let available = row
                    .get("available")
                    .and_then(json_decimal)
                    .unwrap_or_default();
                if !available.is_zero() {
                    balances.insert(coin.to_uppercase(), available);
                }
            }
        }
        Ok(balances)
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
        // Spot assets carry no entry price; nothing to fabricate.
        self.connected_state()?;
        Ok(Vec::new())
    }

    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<Position>> {
        self.connected_state()?;
        let _ = symbol;
        Ok(None)
    }

    // ── Orders ──────────────────────────────────────────────────────────

    #[instrument(skip(self, order), name = "bitget::place_order")]
    async fn place_order(&self, order: &Order) -> ExchangeResult<Order> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(&order.symbol);

        let mut body = serde_json::json!({
            "symbol": symbol,
            "side": order.action.as_side().to_lowercase(),
            "size": order.quantity.to_string(),
            "clientOid": uuid::Uuid::new_v4().simple().to_string(),
        });
        match order.price {
            Some(price) if !price.is_zero() => {
                body["orderType"] = serde_json::json!("limit");
                body["force"] = serde_json::json!("gtc");
                body["price"] = serde_json::json!(price.to_string());
            }
            _ => {
                body["orderType"] = serde_json::json!("market");
            }
        }

        debug!(symbol = %symbol, side = order.action.as_side(), "placing order");
        let value = Self::request(
            &state,
            Method::POST,
            "/api/v2/spot/trade/place-order",
            String::new(),
            Some(body),
            true,
            1,
        )
        .await?;

        // The acknowledgement carries only ids; reflect the submitted
        // order with the venue id and an Open status until fills stream in.
        let mut placed = order.clone();
        placed.symbol = symbol;
        placed.id = value
            .get("orderId")
            .map(|id| match id.as_str() {
                Some(s) => s.to_string(),
                None => id.to_string(),
            });
        placed.status = OrderStatus::Open;
        placed.updated_at = Utc::now();
        info!(
            order_id = placed.id.as_deref().unwrap_or("-"),
            "order placed"
        );
        Ok(placed)
    }

    #[instrument(skip(self), name = "bitget::cancel_order")]
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);

        Self::request(
            &state,
            Method::POST,
            "/api/v2/spot/trade/cancel-order",
            String::new(),
            Some(serde_json::json!({ "symbol": symbol, "orderId": order_id })),
            true,
            1,
        )
        .await?;

        // Return the refreshed order so callers observe the terminal state.
        let mut cancelled = self.get_order(order_id, &symbol).await?;
        if !cancelled.status.is_terminal() {
            cancelled.status = OrderStatus::Cancelled;
        }
        Ok(cancelled)
    }

    #[instrument(skip(self), name = "bitget::get_order")]
    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let state = self.connected_state()?;
        let symbol = normalize_symbol(symbol);
        let value = Self::request(
            &state,
            Method::GET,
            "/api/v2/spot/trade/orderInfo",
            format!("orderId={order_id}"),
            None,
            true,
            1,
        )
        .await?;

        let data = value.as_array().and_then(|rows| rows.first()).unwrap_or(&value);
        parse_order_info(&symbol, data)
    }

    #[instrument(skip(self), name = "bitget::get_orders")]
    async fn get_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        let state = self.connected_state()?;
        let query = match symbol {
            Some(symbol) => format!("symbol={}", normalize_symbol(symbol)),
            None => String::new(),
        };
        let value = Self::request(
            &state,
            Method::GET,
            "/api/v2/spot/trade/unfilled-orders",
            query,
            None,
            true,
            1,
        )
        .await?;

        let fallback = symbol.map(normalize_symbol).unwrap_or_default();
        Ok(value
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| parse_order_info(&fallback, row).ok())
                    .collect()
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self), name = "bitget::close_position")]
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
        let channel = BitgetStreamAdapter::candle_channel(&symbol, interval);
        state
            .ws
            .subscribe(
                &channel,
                Arc::new(move |msg| {
                    if let Some(candle) = parse_candle_payload(&msg.payload) {
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
        let channel = BitgetStreamAdapter::ticker_channel(&symbol);
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
                    if let Some(order) = parse_order_payload(&msg.payload) {
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
        ExchangeConfig::new(Exchange::Bitget)
            .with_credentials("key", "secret")
            .with_passphrase("phrase")
    }

    #[test]
    fn configure_requires_passphrase() {
        let connector = BitgetConnector::new();
        let without = ExchangeConfig::new(Exchange::Bitget).with_credentials("k", "s");
        assert!(connector.configure(without).is_err());
        assert!(connector.configure(config()).is_ok());
    }

    #[tokio::test]
    async fn operations_before_connect_fail() {
        let connector = BitgetConnector::new();
        connector.configure(config()).unwrap();
        let err = connector.get_ticker("BTCUSDT").await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(!err.is_retryable());
    }

    #[test]
    fn envelope_unwraps_data_on_success() {
        let body = r#"{"code":"00000","msg":"success","data":{"serverTime":"1700000000000"}}"#;
        let data = unwrap_envelope(200, body, None).unwrap();
        assert_eq!(data["serverTime"].as_str(), Some("1700000000000"));
    }

    #[test]
    fn envelope_maps_error_codes_even_on_http_200() {
        let body = r#"{"code":"40099","msg":"env mismatch","data":null}"#;
        let err = unwrap_envelope(200, body, None).unwrap_err();
        assert!(is_environment_mismatch(&err));
    }

    #[test]
    fn interval_mappings_are_exhaustive_and_distinct() {
        let frames = [
            TimeFrame::M1,
            TimeFrame::M5,
            TimeFrame::M15,
            TimeFrame::M30,
            TimeFrame::H1,
            TimeFrame::H4,
            TimeFrame::D1,
        ];
        for tf in frames {
            assert!(!interval_to_v1(tf).is_empty());
            assert!(!interval_to_v2(tf).is_empty());
        }
        assert_eq!(interval_to_v1(TimeFrame::H1), "60min");
        assert_eq!(interval_to_v2(TimeFrame::H1), "1h");
        assert_eq!(interval_to_v1(TimeFrame::H4), "4hour");
    }

    #[test]
    fn candles_parse_array_rows_and_sort_oldest_first() {
        let value = serde_json::json!([
            ["1700000060000", "101", "102", "100", "101.5", "5", "507.5"],
            ["1700000000000", "100", "101", "99", "100.5", "10", "1005"]
        ]);
        let candles = parse_candles("BTCUSDT", TimeFrame::M1, &value);
        assert_eq!(candles.len(), 2);
        assert!(candles[0].open_time < candles[1].open_time);
        assert_eq!(candles[0].close, dec!(100.5));
    }

    #[test]
    fn candles_parse_object_rows() {
        let value = serde_json::json!([
            {"ts": "1700000000000", "open": "100", "high": "101", "low": "99",
             "close": "100.5", "baseVol": "10", "usdtVol": "1005"}
        ]);
        let candles = parse_candles("BTCUSDT", TimeFrame::M5, &value);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].quote_volume, dec!(1005));
        assert_eq!(
            candles[0].close_time,
            1_700_000_000_000 + TimeFrame::M5.as_millis() - 1
        );
    }

    #[test]
    fn candles_drop_invalid_rows() {
        let value = serde_json::json!([
            ["1700000000000", "100", "99", "98", "100.5", "10"], // high < close
            ["1700000060000", "bad", "101", "99", "100", "10"],
            "garbage"
        ]);
        assert!(parse_candles("BTCUSDT", TimeFrame::M1, &value).is_empty());
    }

    #[test]
    fn ticker_accepts_v1_and_v2_field_names() {
        let v1 = serde_json::json!({
            "symbol": "BTCUSDT_SPBL", "close": "50000", "bestBid": "49999",
            "bestAsk": "50001", "high24h": "51000", "low24h": "49000",
            "baseVol": "1000", "quoteVol": "50000000", "ts": "1700000000000"
        });
        let ticker = parse_ticker("BTCUSDT", &v1).unwrap();
        assert_eq!(ticker.last_price, dec!(50000));

        let v2 = serde_json::json!({
            "symbol": "BTCUSDT", "lastPr": "50000", "bidPr": "49999",
            "askPr": "50001", "high24h": "51000", "low24h": "49000",
            "baseVolume": "1000", "quoteVolume": "50000000", "ts": 1700000000000i64
        });
        let ticker = parse_ticker("BTCUSDT", &v2).unwrap();
        assert_eq!(ticker.bid_price, dec!(49999));
    }

    #[test]
    fn order_info_parses_both_vocabularies() {
        let v2 = serde_json::json!({
            "orderId": "777", "symbol": "BTCUSDT", "side": "buy",
            "orderType": "limit", "size": "0.5", "price": "40000",
            "status": "live", "baseVolume": "0", "cTime": "1700000000000",
            "uTime": "1700000000000"
        });
        let order = parse_order_info("BTCUSDT", &v2).unwrap();
        assert_eq!(order.id.as_deref(), Some("777"));
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.price, Some(dec!(40000)));

        let filled = serde_json::json!({
            "ordId": "888", "instId": "ETHUSDT_SPBL", "side": "sell",
            "ordType": "market", "sz": "1", "status": "full-fill",
            "accFillSz": "1", "avgPx": "2000"
        });
        let order = parse_order_info("ETHUSDT", &filled).unwrap();
        assert_eq!(order.symbol, "ETHUSDT");
        assert_eq!(order.action, TradeAction::Short);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_price, Some(dec!(2000)));
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
    fn market_symbol_suffix_depends_on_endpoint_version() {
        let connector = BitgetConnector::new();
        connector.configure(config()).unwrap();
        let state = connector.state().unwrap();
        assert_eq!(
            BitgetConnector::market_symbol(&state, "BTCUSDT"),
            "BTCUSDT_SPBL"
        );

        let connector = BitgetConnector::new();
        let mut cfg = config();
        cfg.bitget.use_v2_market_endpoints = true;
        connector.configure(cfg).unwrap();
        let state = connector.state().unwrap();
        assert_eq!(BitgetConnector::market_symbol(&state, "BTCUSDT"), "BTCUSDT");
    }

    #[test]
    fn demo_probe_decision_tree() {
        assert_eq!(
            environment_after_demo_probe(&Ok(())),
            ProbeDecision::Connected
        );

        let mismatch: ExchangeResult<()> = Err(map_bitget_error(
            400,
            r#"{"code":"40099","msg":"apikey env mismatch"}"#,
            None,
        ));
        assert_eq!(
            environment_after_demo_probe(&mismatch),
            ProbeDecision::TryProduction
        );

        let auth_failure: ExchangeResult<()> =
            Err(ExchangeError::Authentication("bad passphrase".into()));
        assert_eq!(
            environment_after_demo_probe(&auth_failure),
            ProbeDecision::Fail
        );

        let outage: ExchangeResult<()> = Err(ExchangeError::connection("refused"));
        assert_eq!(environment_after_demo_probe(&outage), ProbeDecision::Fail);
    }

    #[test]
    fn environment_labels() {
        assert_eq!(BitgetEnvironment::Demo.to_string(), "demo/testnet");
        assert_eq!(BitgetEnvironment::Production.to_string(), "production");
    }

    #[test]
    fn symbol_splitting() {
        assert_eq!(
            split_symbol("BTCUSDT"),
            Some(("BTC".to_string(), "USDT".to_string()))
        );
        assert_eq!(split_symbol("USDT"), None);
    }

    #[test]
    fn closing_order_flattens_either_side() {
        let short = Position::new("BTCUSDT", TradeAction::Short, dec!(0.3), dec!(50000), dec!(1));
        let close = closing_order(&short);
        assert_eq!(close.action, TradeAction::Long); // buy to cover
        assert_eq!(close.quantity, dec!(0.3));
        assert_eq!(close.symbol, "BTCUSDT");

        let long = Position::new("ETHUSDT", TradeAction::Long, dec!(2), dec!(2000), dec!(1));
        let close = closing_order(&long);
        assert_eq!(close.action, TradeAction::Short); // sell the holding
        assert_eq!(close.quantity, dec!(2));
    }
}
