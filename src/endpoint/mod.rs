//! Endpoint handles and the registry that hands them out.
//!
//! An [`EndpointHandle`] owns the transport for one node and routes every
//! call through [`with_deadline_retry`], so transient failures are retried
//! within the handle's [`RetryPolicy`].

mod registry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde_json::{Value, json};

use crate::error::RpcError;
use crate::retry::{RetryPolicy, with_deadline_retry};
use crate::transport::{EndpointConfig, Transport};

pub use registry::EndpointRegistry;

/// Shared, long-lived client for one endpoint.
pub struct EndpointHandle {
    url: String,
    request_timeout: Duration,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("url", &self.url)
            .field("request_timeout", &self.request_timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EndpointHandle {
    pub fn new(config: EndpointConfig, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            url: config.url,
            request_timeout: config.request_timeout,
            transport,
            policy,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Issues a raw JSON-RPC call and returns its `result`.
    #[tracing::instrument(skip(self, params), fields(endpoint = %self.url))]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_decoded(method, params, Ok).await
    }

    /// Checks that the node answers at all.
    ///
    /// Any reply that is not a client version, including JSON-RPC and HTTP
    /// errors, counts as "not connected yet" and is retried like a refused
    /// connection.
    #[tracing::instrument(skip(self), fields(endpoint = %self.url))]
    pub async fn ensure_connection(&self) -> Result<bool, RpcError> {
        with_deadline_retry(&self.url, &self.policy, || async {
            match self.transport.request("web3_clientVersion", json!([])).await {
                Ok(_) => Ok(()),
                Err(e @ (RpcError::Rpc { .. } | RpcError::Http { .. } | RpcError::Decode(_))) => {
                    Err(RpcError::Connection(format!("node is not connected: {}", e)))
                }
                Err(e) => Err(e),
            }
        })
        .await?;
        info!("[RPC: {}] Connection OK", self.url);
        Ok(true)
    }

    /// Returns the number of the most recent block.
    #[tracing::instrument(skip(self), fields(endpoint = %self.url))]
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let block = self
            .call_decoded("eth_blockNumber", json!([]), |v| parse_quantity(&v))
            .await?;
        info!("[RPC: {}] Latest block = {}", self.url, block);
        Ok(block)
    }

    /// Fetches a block, retrying while the node has not indexed it yet.
    #[tracing::instrument(skip(self), fields(endpoint = %self.url))]
    pub async fn block_by_number(
        &self,
        number: u64,
        full_transactions: bool,
    ) -> Result<Value, RpcError> {
        let tag = format!("0x{:x}", number);
        self.call_decoded(
            "eth_getBlockByNumber",
            json!([tag, full_transactions]),
            |v| match v {
                Value::Null => Err(RpcError::BlockNotFound(format!(
                    "block {} is not available yet",
                    number
                ))),
                block => Ok(block),
            },
        )
        .await
    }

    /// Fetches a transaction receipt, retrying while it is not mined yet.
    #[tracing::instrument(skip(self), fields(endpoint = %self.url))]
    pub async fn transaction_receipt(&self, hash: &str) -> Result<Value, RpcError> {
        self.call_decoded("eth_getTransactionReceipt", json!([hash]), |v| match v {
            Value::Null => Err(RpcError::TransactionNotFound(format!(
                "no receipt for {} yet",
                hash
            ))),
            receipt => Ok(receipt),
        })
        .await
    }

    /// Runs one request per attempt and decodes it inside the retry loop, so
    /// that "not available yet" results count as transient failures.
    async fn call_decoded<T, D>(&self, method: &str, params: Value, decode: D) -> Result<T, RpcError>
    where
        D: Fn(Value) -> Result<T, RpcError>,
    {
        with_deadline_retry(&self.url, &self.policy, || async {
            let value = self.transport.request(method, params.clone()).await?;
            decode(value)
        })
        .await
    }
}

/// Parses a hex-encoded JSON-RPC quantity such as `"0x1b4"`.
pub fn parse_quantity(value: &Value) -> Result<u64, RpcError> {
    let text = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected hex quantity, got {}", value)))?;

    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| RpcError::Decode(format!("invalid hex quantity: {:?}", text)))?;

    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::Decode(format!("invalid hex quantity {:?}: {}", text, e)))
}
