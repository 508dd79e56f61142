//! Session orchestrator
//!
//! A [`Session`] composes a storage backend with an executor and exposes
//! the facade the front-ends consume: `run`/`reset`, capability queries,
//! and CRUD over tools, skills, artifacts, and deps.
//!
//! Ownership: the session holds the executor; skills and artifacts go
//! through the storage backend's catalog and stores, while tools and deps
//! are routed to the executor so remote backends can forward them over
//! their transport.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use codemode_domain::{
    Artifact, ArtifactMeta, Capability, ExecutionResult, Skill, SkillError, SkillSummary,
    StorageError, SyncReport, ToolSummary,
};
use thiserror::Error;
use tracing::warn;

use crate::ports::{Executor, ExecutorError, StorageBackend};

/// Errors surfaced by the session facade
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Skill(#[from] SkillError),
}

/// Session construction options
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Install all declared dependencies before the first `execute`
    pub sync_deps_on_start: bool,
}

/// Scoped aggregate of storage, executor, and the four agent namespaces
pub struct Session {
    storage: Arc<dyn StorageBackend>,
    executor: Option<Box<dyn Executor>>,
}

impl Session {
    /// Start the executor against the storage backend. On success the
    /// session owns the executor's resources until `close`.
    pub async fn open(
        storage: Arc<dyn StorageBackend>,
        mut executor: Box<dyn Executor>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        executor.start(Arc::clone(&storage)).await?;

        if options.sync_deps_on_start {
            let report = executor.sync_deps().await?;
            if !report.is_clean() {
                warn!(failed = ?report.failed, "dependency sync reported failures");
            }
        }

        Ok(Self {
            storage,
            executor: Some(executor),
        })
    }

    fn executor(&self) -> Result<&dyn Executor, SessionError> {
        self.executor
            .as_deref()
            .ok_or(SessionError::Closed)
    }

    /// Execute one chunk of agent code
    pub async fn run(
        &self,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, SessionError> {
        Ok(self.executor()?.execute(code, timeout).await?)
    }

    /// Clear user bindings, preserving the injected namespaces
    pub async fn reset(&self) -> Result<(), SessionError> {
        Ok(self.executor()?.reset().await?)
    }

    /// Release executor resources. Idempotent; the session is unusable
    /// afterwards.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if let Some(mut executor) = self.executor.take() {
            executor.close().await?;
        }
        Ok(())
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.executor
            .as_deref()
            .map(|e| e.supports(capability))
            .unwrap_or(false)
    }

    pub fn supported_capabilities(&self) -> BTreeSet<Capability> {
        self.executor
            .as_deref()
            .map(|e| e.capabilities())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    pub async fn list_tools(&self) -> Result<Vec<ToolSummary>, SessionError> {
        Ok(self.executor()?.list_tools().await?)
    }

    pub async fn search_tools(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ToolSummary>, SessionError> {
        Ok(self.executor()?.search_tools(query, limit).await?)
    }

    // ------------------------------------------------------------------
    // Skills (storage-backed; refreshed so external writes are visible)
    // ------------------------------------------------------------------

    pub async fn list_skills(&self) -> Result<Vec<SkillSummary>, SessionError> {
        let catalog = self.storage.skill_catalog();
        catalog.refresh().await?;
        Ok(catalog.list().await)
    }

    pub async fn search_skills(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SkillSummary>, SessionError> {
        let catalog = self.storage.skill_catalog();
        catalog.refresh().await?;
        Ok(catalog.search(query, limit).await)
    }

    pub async fn get_skill(&self, name: &str) -> Result<Option<Skill>, SessionError> {
        let catalog = self.storage.skill_catalog();
        catalog.refresh().await?;
        Ok(catalog.get(name).await)
    }

    pub async fn add_skill(
        &self,
        name: &str,
        source: &str,
        description: &str,
    ) -> Result<Skill, SessionError> {
        Ok(self
            .storage
            .skill_catalog()
            .create(name, source, description, false)
            .await?)
    }

    pub async fn remove_skill(&self, name: &str) -> Result<bool, SessionError> {
        Ok(self.storage.skill_catalog().remove(name).await?)
    }

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    pub async fn list_artifacts(&self) -> Result<Vec<ArtifactMeta>, SessionError> {
        Ok(self.storage.artifacts().list().await?)
    }

    pub async fn save_artifact(
        &self,
        name: &str,
        data: &[u8],
        description: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ArtifactMeta, SessionError> {
        Ok(self
            .storage
            .artifacts()
            .save(name, data, description, metadata)
            .await?)
    }

    pub async fn load_artifact(&self, name: &str) -> Result<Artifact, SessionError> {
        let (data, meta) = self.storage.artifacts().load(name).await?;
        Ok(Artifact { meta, data })
    }

    pub async fn delete_artifact(&self, name: &str) -> Result<bool, SessionError> {
        Ok(self.storage.artifacts().delete(name).await?)
    }

    // ------------------------------------------------------------------
    // Deps (executor-owned: installs must target its environment)
    // ------------------------------------------------------------------

    pub async fn list_deps(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.executor()?.list_deps().await?)
    }

    pub async fn add_dep(&self, spec: &str) -> Result<SyncReport, SessionError> {
        Ok(self.executor()?.add_dep(spec).await?)
    }

    pub async fn remove_dep(&self, spec: &str) -> Result<bool, SessionError> {
        Ok(self.executor()?.remove_dep(spec).await?)
    }

    pub async fn sync_deps(&self) -> Result<SyncReport, SessionError> {
        Ok(self.executor()?.sync_deps().await?)
    }
}

impl Drop for Session {
    /// Release backstop: if the session was dropped without `close` (early
    /// return, panic unwind, task cancellation), schedule executor shutdown
    /// on the runtime so subprocesses and containers are still reaped.
    fn drop(&mut self) {
        if let Some(mut executor) = self.executor.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(error) = executor.close().await {
                            warn!(%error, "executor close failed during session drop");
                        }
                    });
                }
                Err(_) => warn!("session dropped outside a runtime; executor not closed"),
            }
        }
    }
}
