//! JSON-RPC 2.0 over HTTP, built on a pooled `reqwest` client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EndpointConfig, Transport, TransportFactory, classify_reqwest_error};
use crate::error::RpcError;

const USER_AGENT: &str = concat!("rpc-adapter/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

/// Transport that posts JSON-RPC requests to one HTTP endpoint.
///
/// The underlying `reqwest::Client` keeps its own connection pool, so one
/// `HttpTransport` should be shared for all calls to the same node.
pub struct HttpTransport {
    url: Url,
    client: Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Builds a client whose every request is bounded by the configured
    /// per-attempt timeout.
    pub fn new(config: &EndpointConfig) -> Result<Self, RpcError> {
        let url = Url::parse(&config.url)
            .map_err(|e| RpcError::InvalidEndpoint(format!("{}: {}", config.url, e)))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RpcError::Other(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "[RPC: {}] Initializing HTTP JSON-RPC client (timeout {:?})",
            config.url, config.request_timeout
        );

        Ok(Self::with_client(client, url))
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Client, url: Url) -> Self {
        Self {
            url,
            client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self, params), fields(url = %self.url))]
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("POST {} id={} to {}", method, id, self.url);

        let body = Request {
            jsonrpc: "2.0",
            id,
            method,
            params: &params,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let response = response
            .error_for_status()
            .map_err(classify_reqwest_error)?;

        let text = response.text().await.map_err(classify_reqwest_error)?;

        parse_response(&text)
    }
}

/// Extracts `result` from a JSON-RPC response body.
///
/// An explicit `"result": null` is returned as `Value::Null`; callers decide
/// what a null means for their method.
fn parse_response(text: &str) -> Result<Value, RpcError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RpcError::Decode(format!("response is not JSON: {}", e)))?;

    let Value::Object(mut envelope) = value else {
        return Err(RpcError::Decode(
            "response is not a JSON-RPC object".to_string(),
        ));
    };

    if let Some(error) = envelope.remove("error").filter(|e| !e.is_null()) {
        let error: ErrorObject = serde_json::from_value(error)
            .map_err(|e| RpcError::Decode(format!("malformed error object: {}", e)))?;
        return Err(RpcError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    envelope
        .remove("result")
        .ok_or_else(|| RpcError::Decode("response has neither result nor error".to_string()))
}

/// Factory producing an [`HttpTransport`] per endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, config: &EndpointConfig) -> Result<Arc<dyn Transport>, RpcError> {
        Ok(Arc::new(HttpTransport::new(config)?))
    }
}
