// =============================================================================
// Exchange Error Taxonomy
// =============================================================================
//
// Every fallible connector operation resolves to exactly one of these
// variants. Raw HTTP statuses and venue JSON never cross the connector
// boundary; the per-venue error mappers translate them here and the retry
// policy pattern-matches on the variant.
// =============================================================================

use std::time::Duration;

use serde::Serialize;

/// Result alias used across the connector and trader layers.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Closed error taxonomy for the exchange-integration layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    /// Bad key, secret, passphrase, signature or clock. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Venue rate cap exceeded. Retried with back-off; `retry_after` is
    /// honored when the venue supplied a Retry-After header.
    #[error("rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Account cannot cover the intended trade. Never retried.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Order rejected or unknown. Retryable only when the venue code marks
    /// it transient.
    #[error("order error [{code}]: {message}")]
    Order {
        code: String,
        message: String,
        retryable: bool,
    },

    /// I/O failure, timeout, 5xx, clock skew or WebSocket drop.
    #[error("connection error: {message}")]
    Connection { message: String, retryable: bool },

    /// Generic mapped venue error with the original code preserved.
    /// Retryable unless the mapper marks it otherwise.
    #[error("exchange error [{code}]: {message}")]
    Exchange {
        code: String,
        message: String,
        retryable: bool,
    },

    /// Factory lookup failed for the requested venue. Never retried.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),
}

impl ExchangeError {
    /// Shorthand for a retryable connection failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: true,
        }
    }

    /// Shorthand for a request/connect timeout (always retryable).
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Connection {
            message: format!("timeout: {}", message.into()),
            retryable: true,
        }
    }

    /// Shorthand for a generic venue error (retryable by default).
    pub fn exchange(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exchange {
            code: code.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Whether the retry policy may re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::RateLimit { .. } => true,
            Self::InsufficientFunds(_) => false,
            Self::Order { retryable, .. } => *retryable,
            Self::Connection { retryable, .. } => *retryable,
            Self::Exchange { retryable, .. } => *retryable,
            Self::UnsupportedExchange(_) => false,
        }
    }

    /// Stable kind tag used in the boundary `ErrorReport`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::RateLimit { .. } => "rate_limit",
            Self::InsufficientFunds(_) => "insufficient_funds",
            Self::Order { .. } => "order",
            Self::Connection { .. } => "connection",
            Self::Exchange { .. } => "exchange",
            Self::UnsupportedExchange(_) => "unsupported_exchange",
        }
    }

    /// Venue error code, when one was preserved by the mapper.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Order { code, .. } | Self::Exchange { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Suggested pause before the next attempt (rate-limit responses only).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Structured error object handed to the API-server collaborator.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            error_code: self.error_code().map(str::to_string),
        }
    }
}

/// User-visible failure shape at the core's boundary. Never an opaque stack.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    pub error_code: Option<String>,
}
