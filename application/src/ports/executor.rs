//! Executor port
//!
//! The uniform contract over the three isolation backends. Between `start`
//! and `close`, consecutive `execute` calls share cumulative interpreter
//! state; `reset` drops user bindings but preserves the injected
//! namespaces; after `close`, every method fails with
//! [`ExecutorError::Closed`].
//!
//! `execute` never errors for user-code faults; those come back inside the
//! [`ExecutionResult`]. An `Err` from any method is an infrastructure
//! fault.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codemode_domain::{
    Capability, DepsError, ExecutionResult, StorageError, SyncReport, ToolError, ToolSummary,
};
use thiserror::Error;

use super::storage::StorageBackend;

/// Infrastructure faults at the executor boundary
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor is closed")]
    Closed,

    #[error("executor not started")]
    NotStarted,

    #[error("executor unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Deps(#[from] DepsError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Acquire resources and inject the four namespaces. Tools come from
    /// the executor's configuration; skills, artifacts, and deps from
    /// `storage`.
    async fn start(&mut self, storage: Arc<dyn StorageBackend>) -> Result<(), ExecutorError>;

    /// Run one chunk of agent code. Calls on the same executor are
    /// serialized; side effects of call *i* are visible to call *i+1*.
    async fn execute(
        &self,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ExecutorError>;

    /// Discard user bindings, keep `tools`/`skills`/`artifacts`/`deps`
    async fn reset(&self) -> Result<(), ExecutorError>;

    /// Release all resources. Idempotent.
    async fn close(&mut self) -> Result<(), ExecutorError>;

    fn capabilities(&self) -> BTreeSet<Capability>;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    // Tools and deps are owned by the executor (remote backends forward
    // these over their transport), so the facade routes through here.

    async fn list_tools(&self) -> Result<Vec<ToolSummary>, ExecutorError>;

    async fn search_tools(&self, query: &str, limit: usize)
        -> Result<Vec<ToolSummary>, ExecutorError>;

    async fn list_deps(&self) -> Result<Vec<String>, ExecutorError>;

    async fn add_dep(&self, spec: &str) -> Result<SyncReport, ExecutorError>;

    async fn remove_dep(&self, spec: &str) -> Result<bool, ExecutorError>;

    async fn sync_deps(&self) -> Result<SyncReport, ExecutorError>;
}
