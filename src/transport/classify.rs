//! Mapping of HTTP-level failures onto [`RpcError`].

use reqwest::StatusCode;

use crate::error::RpcError;

/// Converts a `reqwest` error into the error taxonomy.
///
/// Connection failures, timeouts, 5xx and 429 answers are transient; other
/// client error statuses are fatal.
pub fn classify_reqwest_error(error: reqwest::Error) -> RpcError {
    if error.is_timeout() {
        return RpcError::Timeout(error.to_string());
    }

    if let Some(status) = error.status() {
        return match status {
            StatusCode::TOO_MANY_REQUESTS => {
                RpcError::Connection(format!("HTTP {}: node is rate limiting", status.as_u16()))
            }
            s if s.is_server_error() => {
                RpcError::Connection(format!("HTTP {}: node unavailable", s.as_u16()))
            }
            s => RpcError::Http {
                status: s.as_u16(),
                message: s.canonical_reason().unwrap_or("client error").to_string(),
            },
        };
    }

    if error.is_connect() || error.is_request() || error.is_body() {
        return RpcError::Connection(error.to_string());
    }

    if error.is_decode() {
        return RpcError::Decode(error.to_string());
    }

    RpcError::Other(error.to_string())
}
