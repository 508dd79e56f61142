//! Dependency controller
//!
//! The single object behind the agent-facing `deps` namespace and the
//! session facade. Mutation (`add`/`remove`) is policy-gated; `list` and
//! `sync` are always permitted since they only act on pre-declared intent.
//! A failed install rolls the store back, restoring any constraint the add
//! replaced.

use std::sync::Arc;

use codemode_application::{DepsStore, PackageInstaller};
use codemode_domain::{DepSpec, DepsError, StorageError, SyncReport};
use tracing::{info, warn};

pub struct DepsController {
    store: Arc<dyn DepsStore>,
    installer: Arc<dyn PackageInstaller>,
    allow_runtime: bool,
}

impl DepsController {
    pub fn new(
        store: Arc<dyn DepsStore>,
        installer: Arc<dyn PackageInstaller>,
        allow_runtime: bool,
    ) -> Self {
        Self {
            store,
            installer,
            allow_runtime,
        }
    }

    pub fn allow_runtime(&self) -> bool {
        self.allow_runtime
    }

    /// Declare and install one dependency
    pub async fn add(&self, spec: &str) -> Result<SyncReport, DepsError> {
        let spec = DepSpec::parse(spec)?;
        if !self.allow_runtime {
            return Err(DepsError::RuntimeDisabled);
        }

        // Remember what this add replaces so a failed install can restore it
        let previous = self
            .list_specs()
            .await
            .map_err(storage_to_install(&spec))?
            .into_iter()
            .find(|existing| existing.name == spec.name);

        self.store
            .add(&spec)
            .await
            .map_err(storage_to_install(&spec))?;

        let report = self.installer.install(std::slice::from_ref(&spec)).await;
        if !report.failed.is_empty() {
            warn!(dep = %spec, "install failed; rolling back declaration");
            let rollback = match &previous {
                Some(previous) => self.store.add(previous).await,
                None => self.store.remove(&spec.name).await.map(|_| ()),
            };
            if let Err(error) = rollback {
                warn!(dep = %spec, %error, "rollback of deps store failed");
            }
            return Err(DepsError::Install {
                spec: spec.to_string(),
                detail: "installer reported failure".into(),
            });
        }

        info!(dep = %spec, "dependency added");
        Ok(report)
    }

    /// Remove a declaration. The package is not uninstalled from the
    /// environment; the store reflects declared intent only.
    pub async fn remove(&self, spec: &str) -> Result<bool, DepsError> {
        let spec = DepSpec::parse(spec)?;
        if !self.allow_runtime {
            return Err(DepsError::RuntimeDisabled);
        }
        self.store
            .remove(&spec.name)
            .await
            .map_err(storage_to_install(&spec))
    }

    pub async fn list_specs(&self) -> Result<Vec<DepSpec>, StorageError> {
        self.store.list().await
    }

    /// Declared specs as strings, sorted
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut specs: Vec<String> = self
            .list_specs()
            .await?
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        specs.sort();
        Ok(specs)
    }

    /// Install every declared dep that is not yet importable. Idempotent;
    /// allowed even when runtime mutation is disabled.
    pub async fn sync(&self) -> Result<SyncReport, DepsError> {
        let specs = self.store.list().await.map_err(|e| DepsError::Install {
            spec: "<sync>".into(),
            detail: e.to_string(),
        })?;
        Ok(self.installer.install(&specs).await)
    }
}

fn storage_to_install(spec: &DepSpec) -> impl FnOnce(StorageError) -> DepsError {
    let spec = spec.to_string();
    move |e| DepsError::Install {
        spec,
        detail: e.to_string(),
    }
}
