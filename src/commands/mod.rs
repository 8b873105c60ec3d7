//! Operator commands run by the `rpc-adapter` binary.
//!
//! Every command resolves its endpoints through one shared
//! [`EndpointRegistry`], so a URL given twice reuses one handle.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures_util::future::join_all;
use log::debug;
use serde_json::Value;

use crate::config::AdapterConfig;
use crate::endpoint::{EndpointHandle, EndpointRegistry};
use crate::error::RpcError;

/// Shared state for a command run.
pub struct Services {
    pub registry: EndpointRegistry,
    pub config: AdapterConfig,
}

impl Services {
    pub fn new(registry: EndpointRegistry, config: AdapterConfig) -> Self {
        Self { registry, config }
    }

    /// Registry using HTTP transports and the retry policy from `config`.
    pub fn http(config: AdapterConfig) -> Self {
        Self::new(EndpointRegistry::http(config.retry), config)
    }

    async fn handle(&self, url: &str) -> Result<Arc<EndpointHandle>, RpcError> {
        self.registry
            .get_or_create(url, self.config.request_timeout)
            .await
    }
}

/// Checks that every endpoint answers.
#[tracing::instrument(skip(services))]
pub async fn check(services: &Services, urls: &[String]) -> Result<()> {
    for_each_endpoint(services, urls, |handle| async move {
        handle.ensure_connection().await.map(|_| "ok")
    })
    .await
}

/// Prints the latest block number of every endpoint.
#[tracing::instrument(skip(services))]
pub async fn block_number(services: &Services, urls: &[String]) -> Result<()> {
    for_each_endpoint(services, urls, |handle| async move {
        handle.block_number().await
    })
    .await
}

/// Issues one raw JSON-RPC call and prints its result as JSON.
#[tracing::instrument(skip(services))]
pub async fn call(services: &Services, url: &str, method: &str, params: Option<&str>) -> Result<()> {
    let params: Value = match params {
        Some(text) => serde_json::from_str(text)
            .with_context(|| format!("Invalid JSON params: {}", text))?,
        None => Value::Array(vec![]),
    };

    let handle = services
        .handle(url)
        .await
        .with_context(|| format!("Failed to open endpoint {}", url))?;

    let result = handle
        .call(method, params)
        .await
        .with_context(|| format!("{} failed on {}", method, url))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Runs `op` on all endpoints concurrently and prints one line per endpoint.
/// Fails if any endpoint failed.
async fn for_each_endpoint<F, Fut, T>(services: &Services, urls: &[String], op: F) -> Result<()>
where
    F: Fn(Arc<EndpointHandle>) -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
    T: Display,
{
    if urls.is_empty() {
        bail!("No endpoint given");
    }

    let results = join_all(urls.iter().map(|url| {
        let op = &op;
        async move {
            let handle = services.handle(url).await?;
            op(handle).await
        }
    }))
    .await;

    let mut failed = 0;
    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(value) => println!("{}: {}", url, value),
            Err(e) => {
                debug!("{} failed with {:?}", url, e);
                eprintln!("{}: error ({}): {}", url, e.kind(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} endpoint(s) failed", failed, urls.len());
    }
    Ok(())
}
