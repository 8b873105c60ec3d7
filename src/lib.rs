//! Resilient JSON-RPC adapter.
//!
//! One long-lived client per endpoint, created on first use through an
//! [`EndpointRegistry`], with every call retried on transient failures until
//! a per-call time budget runs out.
//!
//! ```no_run
//! use std::time::Duration;
//! use rpc_adapter::{EndpointRegistry, RetryPolicy};
//!
//! # async fn example() -> Result<(), rpc_adapter::RpcError> {
//! let registry = EndpointRegistry::http(RetryPolicy::default());
//! let node = registry
//!     .get_or_create("http://localhost:8545", Duration::from_secs(10))
//!     .await?;
//! let latest = node.block_number().await?;
//! # let _ = latest;
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod retry;
pub mod transport;

pub use endpoint::{EndpointHandle, EndpointRegistry};
pub use error::{Classify, ErrorClass, RpcError};
pub use retry::{RetryPolicy, with_deadline_retry};
