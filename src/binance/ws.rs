// =============================================================================
// Binance Stream Adapter — kline/ticker/user-data framing
// =============================================================================
//
// Channels use the venue's own stream names: `btcusdt@kline_1m`,
// `btcusdt@ticker`, plus the synthetic `executionReport` channel for
// user-data order events. Subscribe/unsubscribe frames use the venue's
// SUBSCRIBE/UNSUBSCRIBE method envelope with a monotonically increasing
// request id.
// =============================================================================

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::connector::json_decimal;
use crate::market_data::Candle;
use crate::types::{Order, OrderStatus, OrderType, Ticker, TimeFrame, TradeAction};
use crate::ws::{StreamAdapter, StreamMessage};

/// Channel name carrying order updates from the user-data stream.
pub const ORDER_UPDATE_CHANNEL: &str = "executionReport";

pub struct BinanceStreamAdapter {
    request_id: AtomicU64,
}

impl BinanceStreamAdapter {
    pub fn new() -> Self {
        Self {
            request_id: AtomicU64::new(0),
        }
    }

    pub fn kline_channel(symbol: &str, interval: TimeFrame) -> String {
        format!("{}@kline_{}", symbol.to_lowercase(), interval.label())
    }

    pub fn ticker_channel(symbol: &str) -> String {
        format!("{}@ticker", symbol.to_lowercase())
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for BinanceStreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for BinanceStreamAdapter {
    fn parse_message(&self, raw: &str) -> Option<StreamMessage> {
        let root: serde_json::Value = serde_json::from_str(raw).ok()?;

        // Combined-stream envelope: {"stream": "...", "data": {...}}.
        if let (Some(stream), Some(data)) = (root.get("stream"), root.get("data")) {
            let channel = stream.as_str()?.to_string();
            return Some(StreamMessage {
                channel,
                payload: data.clone(),
            });
        }

        // Single-stream payloads carry the event type in "e".
        let channel = match root.get("e").and_then(|e| e.as_str()) {
            Some("kline") => {
                let symbol = root.get("s")?.as_str()?.to_lowercase();
                let interval = root.get("k")?.get("i")?.as_str()?;
                format!("{symbol}@kline_{interval}")
            }
            Some("24hrTicker") => {
                let symbol = root.get("s")?.as_str()?.to_lowercase();
                format!("{symbol}@ticker")
            }
            Some("executionReport") => ORDER_UPDATE_CHANNEL.to_string(),
            // Subscribe acknowledgements ({"result":null,"id":1}) and
            // unknown event types are dropped.
            _ => return None,
        };

        Some(StreamMessage {
            channel,
            payload: root,
        })
    }

    fn build_subscribe(&self, channel: &str) -> Option<String> {
        // The user-data stream is attached via listen key, not SUBSCRIBE.
        if channel == ORDER_UPDATE_CHANNEL {
            return None;
        }
        Some(format!(
            r#"{{"method":"SUBSCRIBE","params":["{channel}"],"id":{}}}"#,
            self.next_request_id()
        ))
    }

    fn build_unsubscribe(&self, channel: &str) -> Option<String> {
        if channel == ORDER_UPDATE_CHANNEL {
            return None;
        }
        Some(format!(
            r#"{{"method":"UNSUBSCRIBE","params":["{channel}"],"id":{}}}"#,
            self.next_request_id()
        ))
    }
}

// ---------------------------------------------------------------------------
// Payload parsers
// ---------------------------------------------------------------------------

/// Parse a kline event payload into a [`Candle`]. Only closed candles are
/// returned; in-progress updates and malformed fields yield `None` with a
/// warning so the stream keeps flowing.
pub fn parse_kline_payload(payload: &serde_json::Value) -> Option<Candle> {
    let symbol = payload.get("s")?.as_str()?.to_uppercase();
    let k = payload.get("k")?;

    let is_closed = k.get("x").and_then(|x| x.as_bool()).unwrap_or(false);
    if !is_closed {
        return None;
    }

    let interval = k
        .get("i")
        .and_then(|i| i.as_str())
        .and_then(|i| TimeFrame::from_str(i).ok())?;

    let candle = Candle {
        symbol,
        interval,
        open_time: k.get("t")?.as_i64()?,
        close_time: k.get("T")?.as_i64()?,
        open: json_decimal(k.get("o")?)?,
        high: json_decimal(k.get("h")?)?,
        low: json_decimal(k.get("l")?)?,
        close: json_decimal(k.get("c")?)?,
        volume: json_decimal(k.get("v")?)?,
        quote_volume: json_decimal(k.get("q")?)?,
    };

    if !candle.is_valid() {
        warn!(symbol = %candle.symbol, "dropping kline event violating OHLC invariants");
        return None;
    }
    Some(candle)
}

/// Parse a 24hrTicker event payload into a [`Ticker`].
pub fn parse_ticker_payload(payload: &serde_json::Value) -> Option<Ticker> {
    let field = |key: &str| -> Option<Decimal> { json_decimal(payload.get(key)?) };

    let ticker = Ticker {
        symbol: payload.get("s")?.as_str()?.to_uppercase(),
        last_price: field("c")?,
        bid_price: field("b").unwrap_or_default(),
        ask_price: field("a").unwrap_or_default(),
        high_24h: field("h")?,
        low_24h: field("l")?,
        open_24h: field("o")?,
        volume: field("v")?,
        quote_volume: field("q")?,
        price_change: field("p").unwrap_or_default(),
        price_change_percent: field("P").unwrap_or_default(),
        timestamp: payload
            .get("E")
            .and_then(|e| e.as_i64())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
    };

    if !ticker.is_coherent() {
        warn!(symbol = %ticker.symbol, "dropping ticker event with crossed book");
        return None;
    }
    Some(ticker)
}

/// Parse an executionReport event into an [`Order`] working copy.
pub fn parse_execution_report(payload: &serde_json::Value) -> Option<Order> {
    let symbol = payload.get("s")?.as_str()?.to_uppercase();
    let side = payload.get("S")?.as_str()?;
    let action = if side.eq_ignore_ascii_case("BUY") {
        TradeAction::Long
    } else {
        TradeAction::Short
    };

    let order_type = match payload.get("o")?.as_str()? {
        "LIMIT" => OrderType::Limit,
        "MARKET" => OrderType::Market,
        "STOP_LOSS" => OrderType::StopLoss,
        "STOP_LOSS_LIMIT" => OrderType::StopLossLimit,
        other => {
            warn!(order_type = %other, "unknown order type in executionReport");
            return None;
        }
    };

    let quantity = json_decimal(payload.get("q")?)?;
    let filled = payload
        .get("z")
        .and_then(json_decimal)
        .unwrap_or_default();
    let price = payload.get("p").and_then(json_decimal).filter(|p| !p.is_zero());
    let cumulative_quote = payload
        .get("Z")
        .and_then(json_decimal)
        .unwrap_or_default();
    let average_price = if !filled.is_zero() && !cumulative_quote.is_zero() {
        Some(cumulative_quote / filled)
    } else {
        None
    };

    let created = payload
        .get("O")
        .and_then(|t| t.as_i64())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    let updated = payload
        .get("E")
        .and_then(|t| t.as_i64())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Some(Order {
        id: payload.get("i").map(|i| i.to_string()),
        symbol,
        action,
        order_type,
        quantity,
        price,
        status: OrderStatus::from_wire(payload.get("X")?.as_str()?),
        filled_quantity: filled,
        average_price,
        created_at: created,
        updated_at: updated,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> BinanceStreamAdapter {
        BinanceStreamAdapter::new()
    }

    const KLINE_EVENT: &str = r#"{
        "e": "kline", "E": 1700000061000, "s": "BTCUSDT",
        "k": {
            "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
            "o": "37000.00", "h": "37050.00", "l": "36990.00", "c": "37020.00",
            "v": "123.456", "q": "4567890.12", "x": true
        }
    }"#;

    #[test]
    fn parses_single_stream_kline_into_channel() {
        let msg = adapter().parse_message(KLINE_EVENT).unwrap();
        assert_eq!(msg.channel, "btcusdt@kline_1m");
    }

    #[test]
    fn parses_combined_stream_envelope() {
        let combined = format!(r#"{{"stream":"btcusdt@kline_1m","data":{KLINE_EVENT}}}"#);
        let msg = adapter().parse_message(&combined).unwrap();
        assert_eq!(msg.channel, "btcusdt@kline_1m");
        assert_eq!(msg.payload["s"].as_str(), Some("BTCUSDT"));
    }

    #[test]
    fn drops_acknowledgement_frames() {
        assert!(adapter().parse_message(r#"{"result":null,"id":1}"#).is_none());
        assert!(adapter().parse_message("garbage").is_none());
    }

    #[test]
    fn subscribe_frames_use_method_envelope() {
        let a = adapter();
        let frame = a.build_subscribe("btcusdt@ticker").unwrap();
        assert!(frame.contains(r#""method":"SUBSCRIBE""#));
        assert!(frame.contains("btcusdt@ticker"));

        let unframe = a.build_unsubscribe("btcusdt@ticker").unwrap();
        assert!(unframe.contains(r#""method":"UNSUBSCRIBE""#));

        // Request ids are unique.
        assert_ne!(frame, a.build_subscribe("btcusdt@ticker").unwrap());
    }

    #[test]
    fn user_stream_has_no_subscribe_frame() {
        assert!(adapter().build_subscribe(ORDER_UPDATE_CHANNEL).is_none());
        assert!(adapter().build_unsubscribe(ORDER_UPDATE_CHANNEL).is_none());
    }

    #[test]
    fn kline_payload_parses_closed_candles_only() {
        let payload: serde_json::Value = serde_json::from_str(KLINE_EVENT).unwrap();
        let candle = parse_kline_payload(&payload).unwrap();
        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.interval, TimeFrame::M1);
        assert_eq!(candle.close, dec!(37020.00));

        let mut open = payload.clone();
        open["k"]["x"] = serde_json::json!(false);
        assert!(parse_kline_payload(&open).is_none());
    }

    #[test]
    fn kline_payload_rejects_invariant_violations() {
        let mut payload: serde_json::Value = serde_json::from_str(KLINE_EVENT).unwrap();
        payload["k"]["l"] = serde_json::json!("37100.00"); // low above high
        assert!(parse_kline_payload(&payload).is_none());
    }

    #[test]
    fn kline_payload_missing_field_is_dropped() {
        let mut payload: serde_json::Value = serde_json::from_str(KLINE_EVENT).unwrap();
        payload["k"].as_object_mut().unwrap().remove("c");
        assert!(parse_kline_payload(&payload).is_none());
    }

    #[test]
    fn ticker_payload_parses() {
        let payload = serde_json::json!({
            "e": "24hrTicker", "E": 1700000000000i64, "s": "ETHUSDT",
            "c": "2000.50", "b": "2000.40", "a": "2000.60",
            "h": "2100.00", "l": "1950.00", "o": "1980.00",
            "v": "5000", "q": "10000000", "p": "20.50", "P": "1.04"
        });
        let ticker = parse_ticker_payload(&payload).unwrap();
        assert_eq!(ticker.symbol, "ETHUSDT");
        assert_eq!(ticker.last_price, dec!(2000.50));
        assert_eq!(ticker.bid_price, dec!(2000.40));
        assert!(ticker.is_coherent());
    }

    #[test]
    fn execution_report_parses_fill() {
        let payload = serde_json::json!({
            "e": "executionReport", "E": 1700000002000i64, "s": "BTCUSDT",
            "S": "BUY", "o": "MARKET", "q": "0.01", "p": "0.00",
            "X": "FILLED", "i": 12345, "z": "0.01", "Z": "500.00",
            "O": 1700000001000i64
        });
        let order = parse_execution_report(&payload).unwrap();
        assert_eq!(order.id.as_deref(), Some("12345"));
        assert_eq!(order.action, TradeAction::Long);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(0.01));
        assert_eq!(order.average_price, Some(dec!(50000)));
        assert!(order.price.is_none());
    }
}
