// =============================================================================
// Binance Error Mapper — venue codes to the closed taxonomy
// =============================================================================
//
// Binance error bodies are JSON of the form `{"code": -1021, "msg": "..."}`.
// The mapper inspects the code first and falls back to the HTTP status for
// bodies that do not parse. 2xx responses never reach this module.
// =============================================================================

use std::time::Duration;

use crate::errors::ExchangeError;

/// Translate a non-2xx Binance response into the taxonomy.
/// `retry_after` is the parsed Retry-After header when present.
pub fn map_binance_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> ExchangeError {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(code) = value.get("code").and_then(|c| c.as_i64()) {
            let msg = value
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            return map_code(code, msg, status, retry_after);
        }
    }

    // Non-JSON body: classify on the HTTP status alone.
    match status {
        429 | 418 => ExchangeError::RateLimit {
            message: format!("HTTP {status}: {body}"),
            retry_after,
        },
        401 | 403 => ExchangeError::Authentication(format!("HTTP {status}: {body}")),
        500 | 502 | 503 | 504 => ExchangeError::Connection {
            message: format!("HTTP {status}: {body}"),
            retryable: true,
        },
        _ => ExchangeError::exchange(status.to_string(), body),
    }
}

fn map_code(
    code: i64,
    msg: String,
    status: u16,
    retry_after: Option<Duration>,
) -> ExchangeError {
    match code {
        // Too many requests / IP ban.
        -1003 => ExchangeError::RateLimit {
            message: msg,
            retry_after,
        },
        // Timestamp outside the recvWindow: the host clock drifted, a
        // re-sync plus retry usually clears it.
        -1021 => ExchangeError::Connection {
            message: format!("clock skew: {msg}"),
            retryable: true,
        },
        // Bad signature / API key problems.
        -1022 | -2014 | -2015 => ExchangeError::Authentication(msg),
        -2010 => ExchangeError::InsufficientFunds(msg),
        // Order rejections: unknown order, cancel rejected, bad
        // quantity/price filters. None are transient.
        -2011 | -2013 | -1013 | -1014 => ExchangeError::Order {
            code: code.to_string(),
            message: msg,
            retryable: false,
        },
        // Parameter-format family.
        -1106..=-1100 => ExchangeError::exchange(code.to_string(), msg),
        // Remaining generic server family (-1000 and friends): disconnects,
        // unexpected errors, busy replies. Worth a retry.
        -1099..=-1 => ExchangeError::Connection {
            message: format!("[{code}] {msg}"),
            retryable: true,
        },
        _ => match status {
            429 | 418 => ExchangeError::RateLimit {
                message: msg,
                retry_after,
            },
            401 | 403 => ExchangeError::Authentication(msg),
            500 | 502 | 503 | 504 => ExchangeError::Connection {
                message: format!("[{code}] {msg}"),
                retryable: true,
            },
            _ => ExchangeError::exchange(code.to_string(), msg),
        },
    }
}
