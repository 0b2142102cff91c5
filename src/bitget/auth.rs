// =============================================================================
// Bitget Authenticator — Base64(HMAC-SHA256) prehash signing
// =============================================================================
//
// Signed requests carry four headers derived from the prehash
// `timestamp + METHOD + requestPath + (query-with-leading-? | body)`:
//
//   ACCESS-KEY        the API key
//   ACCESS-SIGN       Base64(HMAC-SHA256(prehash, secret))
//   ACCESS-TIMESTAMP  milliseconds since epoch (offset-adjusted)
//   ACCESS-PASSPHRASE the third credential component
//
// plus `Content-Type: application/json`. Demo/paper trading additionally
// requires `paptrading: 1`; the venue answers error 40099 without it.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header toggling the demo/paper-trading environment.
pub const PAPTRADING_HEADER: &str = "paptrading";

pub struct BitgetAuthenticator {
    api_key: String,
    secret: String,
    passphrase: String,
    demo_trading: bool,
    timestamp_offset_ms: AtomicI64,
}

impl BitgetAuthenticator {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
        demo_trading: bool,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
            demo_trading,
            timestamp_offset_ms: AtomicI64::new(0),
        }
    }

    pub fn demo_trading(&self) -> bool {
        self.demo_trading
    }

    /// Base64 HMAC-SHA256 signature over the documented prehash.
    /// `request_path` must include the query string with its leading `?`
    /// for GET requests; `body` is the raw JSON for POSTs, "" otherwise.
    pub fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let prehash = format!("{timestamp}{}{request_path}{body}", method.to_uppercase());
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(prehash.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    pub fn timestamp_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() + self.timestamp_offset_ms.load(Ordering::Relaxed)
    }

    pub fn update_timestamp_offset(&self, server_time_ms: i64) {
        let offset = server_time_ms - chrono::Utc::now().timestamp_millis();
        self.timestamp_offset_ms.store(offset, Ordering::Relaxed);
    }

    pub fn timestamp_offset_ms(&self) -> i64 {
        self.timestamp_offset_ms.load(Ordering::Relaxed)
    }

    /// All headers for one signed request, paptrading included when the
    /// authenticator is in demo mode.
    pub fn headers(&self, method: &str, request_path: &str, body: &str) -> Vec<(String, String)> {
        let timestamp = self.timestamp_ms().to_string();
        let signature = self.sign(&timestamp, method, request_path, body);

        let mut headers = vec![
            ("ACCESS-KEY".to_string(), self.api_key.clone()),
            ("ACCESS-SIGN".to_string(), signature),
            ("ACCESS-TIMESTAMP".to_string(), timestamp),
            ("ACCESS-PASSPHRASE".to_string(), self.passphrase.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if self.demo_trading {
            headers.push((PAPTRADING_HEADER.to_string(), "1".to_string()));
        }
        headers
    }
}

impl std::fmt::Debug for BitgetAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetAuthenticator")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("demo_trading", &self.demo_trading)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn auth(demo: bool) -> BitgetAuthenticator {
        BitgetAuthenticator::new("key", "secret", "phrase", demo)
    }

    #[test]
    fn signature_is_deterministic_base64() {
        let a = auth(false);
        let one = a.sign("1700000000000", "GET", "/api/v2/spot/account/assets", "");
        let two = a.sign("1700000000000", "GET", "/api/v2/spot/account/assets", "");
        assert_eq!(one, two);
        // Base64 of a 32-byte digest is 44 chars with padding.
        assert_eq!(one.len(), 44);
        assert!(one.ends_with('='));
    }

    #[test]
    fn every_prehash_component_matters() {
        let a = auth(false);
        let base = a.sign("1700000000000", "GET", "/path", "");
        assert_ne!(base, a.sign("1700000000001", "GET", "/path", ""));
        assert_ne!(base, a.sign("1700000000000", "POST", "/path", ""));
        assert_ne!(base, a.sign("1700000000000", "GET", "/path?x=1", ""));
        assert_ne!(base, a.sign("1700000000000", "GET", "/path", "{}"));
    }

    #[test]
    fn method_is_uppercased_in_prehash() {
        let a = auth(false);
        assert_eq!(
            a.sign("1700000000000", "get", "/path", ""),
            a.sign("1700000000000", "GET", "/path", "")
        );
    }

    #[test]
    fn headers_carry_all_required_fields() {
        let headers = auth(false).headers("GET", "/api/v2/spot/account/assets", "");
        let names: Vec<&str> = headers.iter().map(|(name, _)| name.as_str()).collect();
        assert!(names.contains(&"ACCESS-KEY"));
        assert!(names.contains(&"ACCESS-SIGN"));
        assert!(names.contains(&"ACCESS-TIMESTAMP"));
        assert!(names.contains(&"ACCESS-PASSPHRASE"));
        assert!(names.contains(&"Content-Type"));
        assert!(!names.contains(&PAPTRADING_HEADER));
    }

    #[test]
    fn demo_mode_adds_paptrading_header() {
        let headers = auth(true).headers("POST", "/api/v2/spot/trade/place-order", "{}");
        let paptrading = headers
            .iter()
            .find(|(name, _)| name == PAPTRADING_HEADER)
            .map(|(_, value)| value.as_str());
        assert_eq!(paptrading, Some("1"));
    }

    #[test]
    fn timestamp_offset_shifts_header_timestamp() {
        let a = auth(false);
        a.update_timestamp_offset(chrono::Utc::now().timestamp_millis() + 5_000);
        let offset = a.timestamp_offset_ms();
        assert!((4_500..=5_500).contains(&offset), "offset {offset}");
    }

    #[test]
    fn debug_redacts_credentials() {
        let auth = BitgetAuthenticator::new("key-material", "sekrit-material", "phrase-material", false);
        let printed = format!("{auth:?}");
        assert!(!printed.contains("key-material"));
        assert!(!printed.contains("sekrit-material"));
        assert!(!printed.contains("phrase-material"));
    }
}
