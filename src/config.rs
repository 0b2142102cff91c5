// =============================================================================
// Exchange Configuration — immutable per-connector settings
// =============================================================================
//
// Every tunable knob of a connector lives here: credentials, environment,
// rate-limit shape, retry policy, WebSocket behaviour and timeouts. All
// fields carry `#[serde(default)]` so that adding new fields never breaks
// deserializing an older payload. Secrets are never logged; the Debug impl
// redacts them.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::errors::{ExchangeError, ExchangeResult};
use crate::types::Exchange;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_requests_per_second() -> f64 {
    10.0
}

fn default_burst_capacity() -> f64 {
    20.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_health_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_weight_multiplier() -> f64 {
    1.0
}

// =============================================================================
// Sub-configs
// =============================================================================

/// Token-bucket shape applied to every REST call of a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained refill rate in tokens per second. Must be > 0.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity in tokens. Must hold at least one token.
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: f64,

    /// When set, a lazily created per-endpoint bucket must also grant each
    /// request in addition to the global bucket.
    #[serde(default)]
    pub per_endpoint_limit: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_capacity: default_burst_capacity(),
            per_endpoint_limit: false,
        }
    }
}

/// Retry back-off shape. Converted into a `RetryPolicy` by the connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_true")]
    pub exponential: bool,

    /// Uniform jitter band applied to each delay. Must lie in [0, 1].
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential: true,
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Long-lived stream session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Override the venue's default stream URL (testnet, proxies).
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// After this many consecutive failed reconnects the session goes
    /// terminally Disconnected.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: None,
            auto_reconnect: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Periodic reachability probing of the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_health_interval_ms(),
        }
    }
}

/// Binance-specific decoration of the base config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceSettings {
    /// Venue-enforced maximum skew between request timestamp and server
    /// time. Clamped to [1000, 60000] ms on use.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,

    /// Multiplier applied to endpoint weights before rate accounting.
    #[serde(default = "default_weight_multiplier")]
    pub weight_multiplier: f64,
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            recv_window_ms: default_recv_window_ms(),
            weight_multiplier: default_weight_multiplier(),
        }
    }
}

/// Bitget-specific decoration of the base config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BitgetSettings {
    /// Demo/paper-trading environment. When set, every signed request
    /// carries the `paptrading: 1` header (the venue answers 40099 without
    /// it).
    #[serde(default)]
    pub demo_trading: bool,

    /// Route spot market operations through the v2 endpoints instead of
    /// the mandatory-default v1. Off unless explicitly enabled.
    #[serde(default)]
    pub use_v2_market_endpoints: bool,
}

// =============================================================================
// ExchangeConfig
// =============================================================================

/// Immutable connector configuration. Built once, validated, then handed to
/// `ExchangeConnector::configure`.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub exchange: Exchange,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub api_secret: String,

    /// Third credential component required by Bitget.
    #[serde(default)]
    pub passphrase: Option<String>,

    /// Override the venue's default REST base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Use the venue's testnet environment where one exists.
    #[serde(default)]
    pub testnet: bool,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub binance: BinanceSettings,

    #[serde(default)]
    pub bitget: BitgetSettings,
}

impl ExchangeConfig {
    /// New config for `exchange` with every knob at its default.
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: None,
            base_url: None,
            testnet: false,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            websocket: WebSocketConfig::default(),
            health_check: HealthCheckConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            binance: BinanceSettings::default(),
            bitget: BitgetSettings::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        self.api_key = api_key.into();
        self.api_secret = api_secret.into();
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        // Bitget models "testnet" as its demo-trading flag.
        if self.exchange == Exchange::Bitget {
            self.bitget.demo_trading = testnet;
        }
        self
    }

    /// Validate the whole record. Called by the factory and by
    /// `Trader::start` before any network activity.
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.rate_limit.requests_per_second <= 0.0 {
            return Err(ExchangeError::exchange(
                "config",
                "rate_limit.requests_per_second must be > 0",
            ));
        }
        if self.rate_limit.burst_capacity < 1.0 {
            return Err(ExchangeError::exchange(
                "config",
                "rate_limit.burst_capacity must hold at least one token",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ExchangeError::exchange(
                "config",
                "retry.jitter_factor must lie in [0, 1]",
            ));
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ExchangeError::exchange("config", "timeouts must be nonzero"));
        }

        // The mock venue needs no credentials; real venues do.
        if self.exchange != Exchange::Mock {
            if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
                return Err(ExchangeError::Authentication(
                    "api_key and api_secret are required".into(),
                ));
            }
        }
        if self.exchange == Exchange::Bitget
            && self
                .passphrase
                .as_deref()
                .map_or(true, |p| p.trim().is_empty())
        {
            return Err(ExchangeError::Authentication(
                "Bitget requires a passphrase".into(),
            ));
        }

        Ok(())
    }

    /// Effective recvWindow clamped to the venue's accepted range.
    pub fn recv_window_ms(&self) -> u64 {
        self.binance.recv_window_ms.clamp(1_000, 60_000)
    }
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("exchange", &self.exchange)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("testnet", &self.testnet)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .finish()
    }
}
