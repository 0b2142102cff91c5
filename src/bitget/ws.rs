// =============================================================================
// Bitget Stream Adapter — spot channel framing
// =============================================================================
//
// Stream URL: wss://ws.bitget.com/spot/v1/stream. Subscriptions use the
// op/args envelope:
//
//   {"op":"subscribe","args":[{"instType":"sp","channel":"candle1m","instId":"BTCUSDT"}]}
//
// and data frames echo the arg back:
//
//   {"action":"update","arg":{"instType":"sp","channel":"candle1m","instId":"BTCUSDT"},"data":[...]}
//
// Internal channel names are `<venue-channel>:<instId>`, e.g.
// `candle1m:BTCUSDT` or `ticker:BTCUSDT`. The private `orders` channel is
// attached at session login rather than via subscribe frames.
// =============================================================================

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::connector::json_decimal;
use crate::market_data::Candle;
use crate::types::{Order, OrderStatus, OrderType, Ticker, TimeFrame, TradeAction};
use crate::ws::{StreamAdapter, StreamMessage};

/// Internal channel carrying private order updates.
pub const ORDER_UPDATE_CHANNEL: &str = "orders";

pub struct BitgetStreamAdapter;

impl BitgetStreamAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn candle_channel(symbol: &str, interval: TimeFrame) -> String {
        format!("candle{}:{}", interval.label(), symbol.to_uppercase())
    }

    pub fn ticker_channel(symbol: &str) -> String {
        format!("ticker:{}", symbol.to_uppercase())
    }

    fn split_channel(channel: &str) -> Option<(&str, &str)> {
        channel.split_once(':')
    }
}

impl Default for BitgetStreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for BitgetStreamAdapter {
    fn parse_message(&self, raw: &str) -> Option<StreamMessage> {
        // Text-level heartbeats.
        if raw == "pong" || raw == "ping" {
            return None;
        }
        let root: serde_json::Value = serde_json::from_str(raw).ok()?;

        // Subscribe acks and error events are not routed.
        if root.get("event").is_some() {
            return None;
        }

        let arg = root.get("arg")?;
        let venue_channel = arg.get("channel")?.as_str()?;
        let channel = if venue_channel == ORDER_UPDATE_CHANNEL {
            ORDER_UPDATE_CHANNEL.to_string()
        } else {
            let inst_id = arg.get("instId")?.as_str()?.to_uppercase();
            format!("{venue_channel}:{inst_id}")
        };

        Some(StreamMessage {
            channel,
            payload: root,
        })
    }

    fn build_subscribe(&self, channel: &str) -> Option<String> {
        if channel == ORDER_UPDATE_CHANNEL {
            return None; // login-bound channel
        }
        let (venue_channel, inst_id) = Self::split_channel(channel)?;
        Some(format!(
            r#"{{"op":"subscribe","args":[{{"instType":"sp","channel":"{venue_channel}","instId":"{inst_id}"}}]}}"#
        ))
    }

    fn build_unsubscribe(&self, channel: &str) -> Option<String> {
        if channel == ORDER_UPDATE_CHANNEL {
            return None;
        }
        let (venue_channel, inst_id) = Self::split_channel(channel)?;
        Some(format!(
            r#"{{"op":"unsubscribe","args":[{{"instType":"sp","channel":"{venue_channel}","instId":"{inst_id}"}}]}}"#
        ))
    }
}

// ---------------------------------------------------------------------------
// Payload parsers
// ---------------------------------------------------------------------------

/// Interval encoded in a venue candle channel name ("candle1m" -> M1).
fn interval_from_channel(venue_channel: &str) -> Option<TimeFrame> {
    let label = venue_channel.strip_prefix("candle")?;
    TimeFrame::from_str(&label.to_lowercase()).ok()
}

/// Parse the newest candle row from a candle frame. Rows are arrays of
/// `[ts, open, high, low, close, baseVol, quoteVol]` strings; short or
/// malformed rows are dropped with a warning.
pub fn parse_candle_payload(payload: &serde_json::Value) -> Option<Candle> {
    let arg = payload.get("arg")?;
    let symbol = arg.get("instId")?.as_str()?.to_uppercase();
    let interval = interval_from_channel(arg.get("channel")?.as_str()?)?;

    let row = payload.get("data")?.as_array()?.last()?;
    let fields = row.as_array()?;
    if fields.len() < 6 {
        warn!(symbol = %symbol, "dropping short candle row");
        return None;
    }

    let open_time = fields[0]
        .as_i64()
        .or_else(|| fields[0].as_str().and_then(|s| s.parse().ok()))?;

    let candle = Candle {
        symbol: symbol.clone(),
        interval,
        open_time,
        close_time: open_time + interval.as_millis() - 1,
        open: json_decimal(&fields[1])?,
        high: json_decimal(&fields[2])?,
        low: json_decimal(&fields[3])?,
        close: json_decimal(&fields[4])?,
        volume: json_decimal(&fields[5])?,
        quote_volume: fields.get(6).and_then(json_decimal).unwrap_or_default(),
    };

    if !candle.is_valid() {
        warn!(symbol = %symbol, "dropping candle frame violating OHLC invariants");
        return None;
    }
    Some(candle)
}

/// Parse the first ticker object from a ticker frame. Bitget has renamed
/// several fields across versions, so alternates are accepted.
pub fn parse_ticker_payload(payload: &serde_json::Value) -> Option<Ticker> {
    let data = payload.get("data")?.as_array()?.first()?;

    let field = |keys: &[&str]| -> Option<Decimal> {
        keys.iter().find_map(|key| data.get(*key).and_then(json_decimal))
    };

    let ticker = Ticker {
        symbol: data
            .get("instId")
            .and_then(|s| s.as_str())?
            .to_uppercase(),
        last_price: field(&["last", "lastPr", "close"])?,
        bid_price: field(&["bestBid", "bidPr"]).unwrap_or_default(),
        ask_price: field(&["bestAsk", "askPr"]).unwrap_or_default(),
        high_24h: field(&["high24h"]).unwrap_or_default(),
        low_24h: field(&["low24h"]).unwrap_or_default(),
        open_24h: field(&["open24h", "openUtc"]).unwrap_or_default(),
        volume: field(&["baseVolume", "baseVol"]).unwrap_or_default(),
        quote_volume: field(&["quoteVolume", "quoteVol"]).unwrap_or_default(),
        price_change: field(&["change24h"]).unwrap_or_default(),
        price_change_percent: field(&["changeUtc24h", "chgUtc"]).unwrap_or_default(),
        timestamp: data
            .get("ts")
            .and_then(|t| t.as_i64())
            .or_else(|| data.get("ts").and_then(|t| t.as_str()).and_then(|s| s.parse().ok()))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
    };

    if !ticker.is_coherent() {
        warn!(symbol = %ticker.symbol, "dropping ticker frame with crossed book");
        return None;
    }
    Some(ticker)
}

/// Parse the newest order object from a private orders frame.
pub fn parse_order_payload(payload: &serde_json::Value) -> Option<Order> {
    let data = payload.get("data")?.as_array()?.last()?;

    let symbol = data.get("instId")?.as_str()?.to_uppercase();
    let side = data.get("side")?.as_str()?;
    let action = if side.eq_ignore_ascii_case("buy") {
        TradeAction::Long
    } else {
        TradeAction::Short
    };

    let order_type = match data.get("ordType").and_then(|t| t.as_str()) {
        Some("limit") => OrderType::Limit,
        _ => OrderType::Market,
    };

    let quantity = data.get("sz").or_else(|| data.get("size")).and_then(json_decimal)?;
    let filled = data
        .get("accFillSz")
        .and_then(json_decimal)
        .unwrap_or_default();
    let average_price = data
        .get("avgPx")
        .and_then(json_decimal)
        .filter(|p| !p.is_zero());

    let ms_field = |key: &str| -> Option<i64> {
        data.get(key)
            .and_then(|t| t.as_i64().or_else(|| t.as_str().and_then(|s| s.parse().ok())))
    };

    Some(Order {
        id: data
            .get("ordId")
            .or_else(|| data.get("orderId"))
            .map(|id| match id.as_str() {
                Some(s) => s.to_string(),
                None => id.to_string(),
            }),
        symbol,
        action,
        order_type,
        quantity,
        price: data.get("px").and_then(json_decimal).filter(|p| !p.is_zero()),
        status: OrderStatus::from_wire(data.get("status")?.as_str()?),
        filled_quantity: filled,
        average_price,
        created_at: ms_field("cTime")
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
        updated_at: ms_field("uTime")
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> BitgetStreamAdapter {
        BitgetStreamAdapter::new()
    }

    const CANDLE_FRAME: &str = r#"{
        "action": "update",
        "arg": {"instType": "sp", "channel": "candle1m", "instId": "BTCUSDT"},
        "data": [["1700000000000", "37000.0", "37050.0", "36990.0", "37020.0", "12.5", "462750.0"]]
    }"#;

    #[test]
    fn parses_candle_frame_channel() {
        let msg = adapter().parse_message(CANDLE_FRAME).unwrap();
        assert_eq!(msg.channel, "candle1m:BTCUSDT");
    }

    #[test]
    fn heartbeats_and_acks_are_dropped() {
        let a = adapter();
        assert!(a.parse_message("pong").is_none());
        assert!(a.parse_message("ping").is_none());
        assert!(a
            .parse_message(r#"{"event":"subscribe","arg":{"channel":"ticker","instId":"BTCUSDT"}}"#)
            .is_none());
        assert!(a.parse_message("garbage").is_none());
    }

    #[test]
    fn subscribe_frames_use_op_args_envelope() {
        let a = adapter();
        let frame = a.build_subscribe("candle1m:BTCUSDT").unwrap();
        assert!(frame.contains(r#""op":"subscribe""#));
        assert!(frame.contains(r#""channel":"candle1m""#));
        assert!(frame.contains(r#""instId":"BTCUSDT""#));

        let unframe = a.build_unsubscribe("ticker:ETHUSDT").unwrap();
        assert!(unframe.contains(r#""op":"unsubscribe""#));
    }

    #[test]
    fn orders_channel_is_login_bound() {
        assert!(adapter().build_subscribe(ORDER_UPDATE_CHANNEL).is_none());
        assert!(adapter().build_unsubscribe(ORDER_UPDATE_CHANNEL).is_none());
    }

    #[test]
    fn candle_payload_parses_with_derived_close_time() {
        let payload: serde_json::Value = serde_json::from_str(CANDLE_FRAME).unwrap();
        let candle = parse_candle_payload(&payload).unwrap();
        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.interval, TimeFrame::M1);
        assert_eq!(candle.close, dec!(37020.0));
        assert_eq!(candle.close_time, 1700000000000 + 60_000 - 1);
        assert_eq!(candle.quote_volume, dec!(462750.0));
    }

    #[test]
    fn candle_payload_short_row_is_dropped() {
        let payload = serde_json::json!({
            "arg": {"channel": "candle1m", "instId": "BTCUSDT"},
            "data": [["1700000000000", "1", "2"]]
        });
        assert!(parse_candle_payload(&payload).is_none());
    }

    #[test]
    fn candle_channel_interval_mapping() {
        assert_eq!(interval_from_channel("candle1m"), Some(TimeFrame::M1));
        assert_eq!(interval_from_channel("candle4h"), Some(TimeFrame::H4));
        assert_eq!(interval_from_channel("candle1D"), Some(TimeFrame::D1));
        assert_eq!(interval_from_channel("ticker"), None);
    }

    #[test]
    fn ticker_payload_accepts_field_alternates() {
        let payload = serde_json::json!({
            "arg": {"channel": "ticker", "instId": "ETHUSDT"},
            "data": [{
                "instId": "ETHUSDT", "lastPr": "2000.5", "bidPr": "2000.4",
                "askPr": "2000.6", "high24h": "2100", "low24h": "1950",
                "open24h": "1980", "baseVolume": "5000", "quoteVolume": "10000000",
                "ts": 1700000000000i64
            }]
        });
        let ticker = parse_ticker_payload(&payload).unwrap();
        assert_eq!(ticker.last_price, dec!(2000.5));
        assert_eq!(ticker.bid_price, dec!(2000.4));
        assert!(ticker.is_coherent());
    }

    #[test]
    fn order_payload_parses_fill() {
        let payload = serde_json::json!({
            "arg": {"channel": "orders", "instId": "BTCUSDT"},
            "data": [{
                "instId": "BTCUSDT", "ordId": "121212", "side": "buy",
                "ordType": "market", "sz": "0.02", "px": "0",
                "status": "full-fill", "accFillSz": "0.02", "avgPx": "50000",
                "cTime": "1700000000000", "uTime": "1700000001000"
            }]
        });
        let order = parse_order_payload(&payload).unwrap();
        assert_eq!(order.id.as_deref(), Some("121212"));
        assert_eq!(order.action, TradeAction::Long);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(0.02));
        assert_eq!(order.average_price, Some(dec!(50000)));
    }
}
