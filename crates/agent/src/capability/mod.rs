//! Typed access to the remote capability provider.

pub mod cache;
pub mod client;
pub mod mcp;
pub mod retry;
pub mod transport;

use async_trait::async_trait;
use supportline_core::domain::tool::{ToolInvocation, ToolResult};
use thiserror::Error;

pub use cache::ResultCache;
pub use client::ResilientCapabilityClient;
pub use mcp::JsonRpcTransport;
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::CapabilityTransport;

/// Programming-contract violations. Expected remote failures are never
/// reported here; they come back as `ToolResult::Failure`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("unknown capability operation `{0}`")]
    UnknownOperation(String),
}

#[async_trait]
pub trait CapabilityClient: Send + Sync {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolResult, CapabilityError>;
}
