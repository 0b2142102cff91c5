// =============================================================================
// Bitget Error Mapper — venue codes to the closed taxonomy
// =============================================================================
//
// Bitget error bodies are JSON with a *string* code:
// `{"code": "40099", "msg": "...", "requestTime": ...}`. Code "00000" means
// success and never reaches this module. 40099 is the environment-mismatch
// answer (demo keys against production, or a missing paptrading header);
// it is deliberately non-retryable so the environment auto-detection can
// react to it instead of burning retries.
// =============================================================================

use std::time::Duration;

use crate::errors::ExchangeError;

/// Venue code signalling a demo/production environment mismatch.
pub const ENV_MISMATCH_CODE: &str = "40099";

/// Translate a non-2xx Bitget response into the taxonomy.
pub fn map_bitget_error(status: u16, body: &str, retry_after: Option<Duration>) -> ExchangeError {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let code = value
            .get("code")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            // Some gateway errors carry a numeric code.
            .or_else(|| value.get("code").and_then(|c| c.as_i64()).map(|c| c.to_string()));
        if let Some(code) = code {
            let msg = value
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            return map_code(&code, msg, status, retry_after);
        }
    }

    match status {
        429 => ExchangeError::RateLimit {
            message: format!("HTTP 429: {body}"),
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
    code: &str,
    msg: String,
    status: u16,
    retry_after: Option<Duration>,
) -> ExchangeError {
    match code {
        // Environment mismatch: wrong keys for the environment or missing
        // paptrading header. Never retried; drives env auto-detection.
        ENV_MISMATCH_CODE => ExchangeError::Exchange {
            code: code.to_string(),
            message: format!("environment mismatch: {msg}"),
            retryable: false,
        },

        // Credential and signature family.
        "40001" | "40002" | "40003" | "40005" | "40006" | "40009" | "40012" | "40037" => {
            ExchangeError::Authentication(msg)
        }

        // Request flood.
        "429" | "30001" | "30002" | "30003" | "30007" => ExchangeError::RateLimit {
            message: msg,
            retry_after,
        },

        // Timestamp expired: host clock drift, retry after re-sync.
        "40008" => ExchangeError::Connection {
            message: format!("clock skew: {msg}"),
            retryable: true,
        },

        "13003" | "43012" => ExchangeError::InsufficientFunds(msg),

        // Order family: unknown order, bad size/price, duplicate client id.
        "43001" | "43002" | "43004" | "43005" | "43009" | "43025" => ExchangeError::Order {
            code: code.to_string(),
            message: msg,
            retryable: false,
        },

        _ => match status {
            429 => ExchangeError::RateLimit {
                message: msg,
                retry_after,
            },
            401 | 403 => ExchangeError::Authentication(msg),
            500 | 502 | 503 | 504 => ExchangeError::Connection {
                message: format!("[{code}] {msg}"),
                retryable: true,
            },
            _ => ExchangeError::exchange(code, msg),
        },
    }
}

/// True when `err` is the venue's environment-mismatch answer.
pub fn is_environment_mismatch(err: &ExchangeError) -> bool {
    matches!(err, ExchangeError::Exchange { code, .. } if code == ENV_MISMATCH_CODE)
}
