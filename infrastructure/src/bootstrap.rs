//! Namespace bootstrap
//!
//! The single construction point for the four agent namespaces. The host
//! process calls [`build_namespaces`] with its live storage backend; a
//! subprocess kernel or container first calls [`open_storage`] on the
//! serialized [`StorageAccess`] descriptor and then the same
//! [`build_namespaces`], which is what makes the visible set of tools,
//! skills, and artifacts identical on both sides of a process boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use codemode_application::{
    ArtifactStore, ExecutorError, PackageInstaller, SkillCatalog, StorageBackend,
};
use codemode_domain::StorageAccess;
use tracing::info;

use crate::deps::{DepsController, LuaRocksInstaller};
use crate::storage::{FileStorage, KvStorage};
use crate::tools::ToolRegistry;

/// Options controlling namespace construction
#[derive(Clone, Default)]
pub struct NamespaceOptions {
    /// Directory of tool YAML files; no tools when absent
    pub tools_path: Option<PathBuf>,
    /// Whether agent code may mutate the dependency set
    pub allow_runtime_deps: bool,
    /// Rocks tree for installed dependencies; derived from the storage
    /// descriptor when absent
    pub deps_tree: Option<PathBuf>,
    /// Installer override (tests, hermetic environments)
    pub installer: Option<Arc<dyn PackageInstaller>>,
}

/// The four namespaces plus the resolved rocks tree
pub struct NamespaceSet {
    pub registry: Arc<ToolRegistry>,
    pub catalog: Arc<dyn SkillCatalog>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub deps: Arc<DepsController>,
    pub deps_tree: PathBuf,
}

/// Reopen a storage backend from its serialized descriptor
pub async fn open_storage(
    access: &StorageAccess,
) -> Result<Arc<dyn StorageBackend>, codemode_domain::StorageError> {
    match access {
        StorageAccess::File { base_path } => {
            Ok(Arc::new(FileStorage::open(base_path.clone())?) as Arc<dyn StorageBackend>)
        }
        StorageAccess::Kv {
            connection_url,
            prefix,
        } => Ok(Arc::new(KvStorage::connect(connection_url.clone(), prefix.clone()).await?)
            as Arc<dyn StorageBackend>),
    }
}

/// Stable rocks-tree location for a storage descriptor: beside file
/// storage, under the temp dir (keyed by prefix) for KV storage.
fn default_deps_tree(access: &StorageAccess) -> PathBuf {
    match access {
        StorageAccess::File { base_path } => base_path.join(".rocks"),
        StorageAccess::Kv { prefix, .. } => {
            std::env::temp_dir().join(format!("codemode-rocks-{prefix}"))
        }
    }
}

/// Build the four namespaces over a storage backend
pub async fn build_namespaces(
    storage: &Arc<dyn StorageBackend>,
    options: &NamespaceOptions,
) -> Result<NamespaceSet, ExecutorError> {
    let registry = match &options.tools_path {
        Some(path) => Arc::new(ToolRegistry::from_dir(path).await?),
        None => Arc::new(ToolRegistry::new()),
    };

    let catalog = storage.skill_catalog();
    catalog.refresh().await?;

    let deps_tree = options
        .deps_tree
        .clone()
        .unwrap_or_else(|| default_deps_tree(&storage.access()));
    let installer = options
        .installer
        .clone()
        .unwrap_or_else(|| Arc::new(LuaRocksInstaller::new(&deps_tree)) as Arc<dyn PackageInstaller>);
    let deps = Arc::new(DepsController::new(
        storage.deps(),
        installer,
        options.allow_runtime_deps,
    ));

    info!(
        tools = registry.list().len(),
        deps_tree = %deps_tree.display(),
        "namespaces constructed"
    );

    Ok(NamespaceSet {
        registry,
        catalog,
        artifacts: storage.artifacts(),
        deps,
        deps_tree,
    })
}

/// Convenience for kernels and servers: descriptor in, namespaces out
pub async fn bootstrap_from_access(
    access: &StorageAccess,
    options: &NamespaceOptions,
) -> Result<(Arc<dyn StorageBackend>, NamespaceSet), ExecutorError> {
    let storage = open_storage(access).await?;
    let namespaces = build_namespaces(&storage, options).await?;
    Ok((storage, namespaces))
}

/// Tools path fallback: `<base>/tools` when it exists beside file storage
pub fn discover_tools_path(base: &Path) -> Option<PathBuf> {
    let candidate = base.join("tools");
    candidate.is_dir().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_application::SkillStore;
    use codemode_application::StoredSkill;

    const CURL_YAML: &str = r#"
name: curl
description: Transfer data from URLs
schema:
  options:
    silent: { type: boolean, short: s }
  positional:
    - { name: url, type: string, required: true }
recipes:
  get:
    preset: { silent: true }
    params: { url: {} }
"#;

    /// A namespace built from the descriptor sees the same tools, skills,
    /// and artifacts as one built from the live backend.
    #[tokio::test]
    async fn test_bootstrap_matches_host_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let tools_dir = dir.path().join("tools");
        std::fs::create_dir_all(&tools_dir).unwrap();
        std::fs::write(tools_dir.join("curl.yaml"), CURL_YAML).unwrap();

        let storage: Arc<dyn StorageBackend> =
            Arc::new(FileStorage::open(dir.path()).unwrap());
        storage
            .skills()
            .put(&StoredSkill {
                name: "greet".into(),
                source: "function run(name) return 'hi ' .. name end".into(),
                description: "Greets".into(),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        storage
            .artifacts()
            .save("blob", b"x", "", serde_json::Map::new())
            .await
            .unwrap();

        let options = NamespaceOptions {
            tools_path: Some(tools_dir),
            allow_runtime_deps: true,
            ..Default::default()
        };

        let host = build_namespaces(&storage, &options).await.unwrap();
        let (_remote_storage, remote) = bootstrap_from_access(&storage.access(), &options)
            .await
            .unwrap();

        let host_tools: Vec<String> = host.registry.list().into_iter().map(|t| t.name).collect();
        let remote_tools: Vec<String> =
            remote.registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(host_tools, remote_tools);
        assert_eq!(host_tools, vec!["curl"]);

        let host_skills: Vec<String> =
            host.catalog.list().await.into_iter().map(|s| s.name).collect();
        let remote_skills: Vec<String> =
            remote.catalog.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(host_skills, remote_skills);
        assert_eq!(host_skills, vec!["greet"]);

        let host_artifacts = host.artifacts.list().await.unwrap();
        let remote_artifacts = remote.artifacts.list().await.unwrap();
        assert_eq!(host_artifacts.len(), remote_artifacts.len());
        assert_eq!(host_artifacts[0].name, "blob");
    }

    #[tokio::test]
    async fn test_default_deps_tree_beside_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn StorageBackend> =
            Arc::new(FileStorage::open(dir.path()).unwrap());
        let set = build_namespaces(&storage, &NamespaceOptions::default())
            .await
            .unwrap();
        assert_eq!(set.deps_tree, dir.path().join(".rocks"));
    }

    #[test]
    fn test_discover_tools_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_tools_path(dir.path()).is_none());
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        assert_eq!(
            discover_tools_path(dir.path()),
            Some(dir.path().join("tools"))
        );
    }
}
