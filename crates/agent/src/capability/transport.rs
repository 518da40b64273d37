use async_trait::async_trait;
use supportline_core::domain::tool::{Operation, Params, ToolResult};

/// Wire-level access to the capability provider.
///
/// Implementations turn every expected remote failure into a
/// `ToolResult::Failure`; they never retry and never apply their own
/// per-call deadline beyond what the underlying client enforces.
#[async_trait]
pub trait CapabilityTransport: Send + Sync {
    async fn call(&self, operation: Operation, params: &Params) -> ToolResult;
}
