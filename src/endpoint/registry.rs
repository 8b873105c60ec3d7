//! Endpoint registry: one shared handle per endpoint URL.
//!
//! Lookups and creations go through a single async mutex over the whole map.
//! Creating a handle is rare compared to calls made through it, so the
//! coarse lock only costs on first use of an endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::EndpointHandle;
use crate::error::RpcError;
use crate::retry::RetryPolicy;
use crate::transport::{EndpointConfig, HttpTransportFactory, TransportFactory};

/// Registry mapping endpoint URLs to lazily created handles.
///
/// The registry guarantees:
/// - at most one handle per URL, even under concurrent first lookups
/// - the first caller's timeout wins; later timeouts for a cached URL are ignored
/// - a failed transport construction leaves nothing behind, so the next
///   lookup tries again
pub struct EndpointRegistry {
    factory: Arc<dyn TransportFactory>,
    policy: RetryPolicy,
    handles: Mutex<HashMap<String, Arc<EndpointHandle>>>,
}

impl EndpointRegistry {
    /// Creates an empty registry whose handles use `policy` for their calls.
    pub fn new(factory: impl TransportFactory + 'static, policy: RetryPolicy) -> Self {
        Self {
            factory: Arc::new(factory),
            policy,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an empty registry backed by HTTP JSON-RPC transports.
    pub fn http(policy: RetryPolicy) -> Self {
        Self::new(HttpTransportFactory, policy)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the handle for `url`, creating it on first use.
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        url: &str,
        request_timeout: Duration,
    ) -> Result<Arc<EndpointHandle>, RpcError> {
        if url.trim().is_empty() {
            return Err(RpcError::InvalidEndpoint(
                "endpoint identifier must not be empty".to_string(),
            ));
        }

        let mut handles = self.handles.lock().await;

        if let Some(handle) = handles.get(url) {
            debug!("[RPC: {}] Using cached adapter instance", url);
            return Ok(Arc::clone(handle));
        }

        if request_timeout.is_zero() {
            return Err(RpcError::InvalidEndpoint(format!(
                "{}: request timeout must be positive",
                url
            )));
        }

        info!("[RPC: {}] Creating new adapter instance", url);

        let config = EndpointConfig::new(url, request_timeout);
        let transport = self.factory.connect(&config).inspect_err(|e| {
            warn!("[RPC: {}] Failed to create transport: {}", url, e);
        })?;

        let handle = Arc::new(EndpointHandle::new(config, transport, self.policy));
        handles.insert(url.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Returns the cached handle for `url` without creating one.
    pub async fn get(&self, url: &str) -> Option<Arc<EndpointHandle>> {
        self.handles.lock().await.get(url).cloned()
    }

    /// Number of cached handles.
    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }

    /// Sorted list of the URLs that have a handle.
    pub async fn identifiers(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.handles.lock().await.keys().cloned().collect();
        urls.sort();
        urls
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::http(RetryPolicy::default())
    }
}
