//! Tool adapter abstraction
//!
//! A [`ToolAdapter`] wraps one source of tools: a directory of CLI
//! definitions, a long-lived stdio JSON-RPC server, or a set of HTTP
//! endpoints. The registry aggregates adapters and routes calls to them;
//! each adapter exclusively owns its backend connections (child processes,
//! HTTP clients).

use async_trait::async_trait;

use super::entities::Tool;
use super::error::ToolError;

/// One source of tools, polymorphic over transport
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Stable identifier, used in logs and registry routing
    fn id(&self) -> &str;

    /// Enumerate the tools this adapter can execute
    async fn list_tools(&self) -> Result<Vec<Tool>, ToolError>;

    /// Invoke a tool. `recipe = None` is the escape hatch: every schema
    /// entry is addressable by keyword and no preset applies.
    async fn call(
        &self,
        tool: &str,
        recipe: Option<&str>,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError>;

    /// Release backend resources. Idempotent.
    async fn close(&self);
}
