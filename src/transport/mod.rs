//! Transport abstraction for JSON-RPC nodes.
//!
//! A transport is the long-lived client object behind an endpoint handle.
//! This crate only needs it to run one request and report failures as an
//! [`RpcError`] whose variant tells transient and fatal failures apart.

mod classify;
mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;

pub use classify::classify_reqwest_error;
pub use http::{HttpTransport, HttpTransportFactory};

/// Default timeout of a single network attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings a transport is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Endpoint URL, also the registry key.
    pub url: String,
    /// Applies to each attempt, not to the retry budget.
    pub request_timeout: Duration,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout,
        }
    }
}

/// A client able to issue one JSON-RPC request against a node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `method` with `params` and returns the `result` member.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Builds the transport for a newly registered endpoint.
///
/// Called by the registry while it holds its lock, at most once per
/// successful registration.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, config: &EndpointConfig) -> Result<Arc<dyn Transport>, RpcError>;
}
