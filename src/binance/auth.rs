// =============================================================================
// Binance Authenticator — HMAC-SHA256 signed requests
// =============================================================================
//
// Signed endpoints receive the canonical query string
// `p1=v1&p2=v2&timestamp=T&recvWindow=W` with the HMAC-SHA256 hex digest
// appended as `&signature=...`. The API key travels in the `X-MBX-APIKEY`
// header, never in the query. The secret never leaves this struct and is
// redacted from Debug output.
//
// `timestamp_offset` is the only mutable field: the connect sequence
// refreshes it atomically from the venue's time endpoint so signatures stay
// inside the recvWindow even on a skewed host clock.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceAuthenticator {
    api_key: String,
    secret: String,
    recv_window_ms: u64,
    timestamp_offset_ms: AtomicI64,
}

impl BinanceAuthenticator {
    /// `recv_window_ms` is clamped to the venue-accepted [1000, 60000] range.
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        recv_window_ms: u64,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            recv_window_ms: recv_window_ms.clamp(1_000, 60_000),
            timestamp_offset_ms: AtomicI64::new(0),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn recv_window_ms(&self) -> u64 {
        self.recv_window_ms
    }

    /// HMAC-SHA256 hex digest of `payload` keyed by the secret.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current timestamp in milliseconds, adjusted by the venue offset.
    pub fn timestamp_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() + self.timestamp_offset_ms.load(Ordering::Relaxed)
    }

    /// Record `server_time - local_time` so subsequent signatures carry a
    /// venue-aligned timestamp.
    pub fn update_timestamp_offset(&self, server_time_ms: i64) {
        let offset = server_time_ms - chrono::Utc::now().timestamp_millis();
        self.timestamp_offset_ms.store(offset, Ordering::Relaxed);
    }

    pub fn timestamp_offset_ms(&self) -> i64 {
        self.timestamp_offset_ms.load(Ordering::Relaxed)
    }

    /// Build the full signed query for `params` ("" for parameterless
    /// endpoints): appends timestamp, recvWindow and the signature.
    pub fn signed_query(&self, params: &str) -> String {
        let ts = self.timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={}", self.recv_window_ms)
        } else {
            format!("{params}&timestamp={ts}&recvWindow={}", self.recv_window_ms)
        };
        let signature = self.sign(&base);
        format!("{base}&signature={signature}")
    }
}

impl std::fmt::Debug for BinanceAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceAuthenticator")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("recv_window_ms", &self.recv_window_ms)
            .field(
                "timestamp_offset_ms",
                &self.timestamp_offset_ms.load(Ordering::Relaxed),
            )
            .finish()
    }
}
