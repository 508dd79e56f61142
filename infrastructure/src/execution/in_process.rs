//! In-process executor
//!
//! One long-lived Lua VM in this process. Fast, no isolation. Evaluation
//! runs on blocking threads; the per-call deadline is enforced
//! cooperatively by the VM hook, with a bounded wait at the async layer as
//! the backstop (a chunk stuck inside a native call can overrun the hook,
//! in which case the caller still gets its `Timeout` and the VM thread
//! finishes in the background).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codemode_application::{
    ArtifactStore, Executor, ExecutorError, PackageInstaller, SkillCatalog, StorageBackend,
};
use codemode_domain::{
    Capability, ErrorKind, ExecutionError, ExecutionResult, SyncReport, ToolSummary,
};
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::warn;

use crate::bootstrap::{build_namespaces, NamespaceOptions};
use crate::deps::DepsController;
use crate::scripting::{EngineNamespaces, LuaEngine};
use crate::tools::ToolRegistry;

/// Extra wait beyond the cooperative deadline before giving up on the VM
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
pub struct InProcessConfig {
    /// Directory of tool YAML files
    pub tools_path: Option<PathBuf>,
    /// Applied when `execute` is called without an explicit timeout
    pub default_timeout: Option<Duration>,
    /// Whether agent code may call `deps.add` / `deps.remove`
    pub allow_runtime_deps: bool,
    /// Rocks tree override; derived from storage when absent
    pub deps_tree: Option<PathBuf>,
    /// Installer override (tests, hermetic environments)
    pub installer: Option<Arc<dyn PackageInstaller>>,
}

impl InProcessConfig {
    pub fn new() -> Self {
        Self {
            tools_path: None,
            default_timeout: Some(Duration::from_secs(30)),
            allow_runtime_deps: true,
            deps_tree: None,
            installer: None,
        }
    }
}

struct Started {
    engine: Arc<LuaEngine>,
    registry: Arc<ToolRegistry>,
    catalog: Arc<dyn SkillCatalog>,
    artifacts: Arc<dyn ArtifactStore>,
    deps: Arc<DepsController>,
    deps_tree: PathBuf,
    handle: Handle,
}

impl Started {
    fn build_engine(&self) -> Result<Arc<LuaEngine>, ExecutorError> {
        let namespaces = EngineNamespaces {
            registry: Arc::clone(&self.registry),
            catalog: Arc::clone(&self.catalog),
            artifacts: Arc::clone(&self.artifacts),
            deps: Arc::clone(&self.deps),
        };
        LuaEngine::new(namespaces, self.handle.clone(), Some(&self.deps_tree))
            .map(Arc::new)
            .map_err(|e| ExecutorError::Unavailable(format!("VM construction failed: {e}")))
    }
}

pub struct InProcessExecutor {
    config: InProcessConfig,
    state: RwLock<Option<Started>>,
    closed: AtomicBool,
}

impl InProcessExecutor {
    pub fn new(config: InProcessConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), ExecutorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::Closed);
        }
        Ok(())
    }

    async fn with_state<T>(
        &self,
        f: impl FnOnce(&Started) -> T,
    ) -> Result<T, ExecutorError> {
        self.check_open()?;
        let state = self.state.read().await;
        match state.as_ref() {
            Some(started) => Ok(f(started)),
            None => Err(ExecutorError::NotStarted),
        }
    }
}

#[async_trait]
impl Executor for InProcessExecutor {
    async fn start(&mut self, storage: Arc<dyn StorageBackend>) -> Result<(), ExecutorError> {
        self.check_open()?;
        let mut state = self.state.write().await;
        if state.is_some() {
            return Ok(());
        }

        let options = NamespaceOptions {
            tools_path: self.config.tools_path.clone(),
            allow_runtime_deps: self.config.allow_runtime_deps,
            deps_tree: self.config.deps_tree.clone(),
            installer: self.config.installer.clone(),
        };
        let namespaces = build_namespaces(&storage, &options).await?;

        let started = Started {
            engine: Arc::new(LuaEngine::new(
                EngineNamespaces {
                    registry: Arc::clone(&namespaces.registry),
                    catalog: Arc::clone(&namespaces.catalog),
                    artifacts: Arc::clone(&namespaces.artifacts),
                    deps: Arc::clone(&namespaces.deps),
                },
                Handle::current(),
                Some(&namespaces.deps_tree),
            )
            .map_err(|e| ExecutorError::Unavailable(format!("VM construction failed: {e}")))?),
            registry: namespaces.registry,
            catalog: namespaces.catalog,
            artifacts: namespaces.artifacts,
            deps: namespaces.deps,
            deps_tree: namespaces.deps_tree,
            handle: Handle::current(),
        };
        *state = Some(started);
        Ok(())
    }

    async fn execute(
        &self,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ExecutorError> {
        let engine = self.with_state(|s| Arc::clone(&s.engine)).await?;
        let effective = timeout.or(self.config.default_timeout);

        let code = code.to_string();
        let task = tokio::task::spawn_blocking(move || engine.eval(&code, effective));

        match effective {
            Some(limit) => match tokio::time::timeout(limit + TIMEOUT_GRACE, task).await {
                Ok(joined) => {
                    joined.map_err(|e| ExecutorError::Unavailable(format!("VM thread failed: {e}")))
                }
                Err(_) => {
                    warn!("VM overran its cooperative deadline; abandoning the thread");
                    Ok(ExecutionResult::failure(
                        ExecutionError::new(
                            ErrorKind::Timeout,
                            format!("execution timed out after {:.1}s", limit.as_secs_f64()),
                        ),
                        String::new(),
                        String::new(),
                    ))
                }
            },
            None => task
                .await
                .map_err(|e| ExecutorError::Unavailable(format!("VM thread failed: {e}"))),
        }
    }

    async fn reset(&self) -> Result<(), ExecutorError> {
        self.check_open()?;
        let mut state = self.state.write().await;
        let started = state.as_mut().ok_or(ExecutorError::NotStarted)?;
        // A fresh VM drops user bindings; the namespaces are re-injected
        // from the same shared components.
        started.engine = started.build_engine()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(started) = self.state.write().await.take() {
            started.registry.close().await;
        }
        Ok(())
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Timeout, Capability::Reset, Capability::DepsInstall])
    }

    async fn list_tools(&self) -> Result<Vec<ToolSummary>, ExecutorError> {
        self.with_state(|s| s.registry.list()).await
    }

    async fn search_tools(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ToolSummary>, ExecutorError> {
        self.with_state(|s| s.registry.search(query, limit)).await
    }

    async fn list_deps(&self) -> Result<Vec<String>, ExecutorError> {
        let deps = self.with_state(|s| Arc::clone(&s.deps)).await?;
        Ok(deps.list().await?)
    }

    async fn add_dep(&self, spec: &str) -> Result<SyncReport, ExecutorError> {
        let deps = self.with_state(|s| Arc::clone(&s.deps)).await?;
        Ok(deps.add(spec).await?)
    }

    async fn remove_dep(&self, spec: &str) -> Result<bool, ExecutorError> {
        let deps = self.with_state(|s| Arc::clone(&s.deps)).await?;
        Ok(deps.remove(spec).await?)
    }

    async fn sync_deps(&self) -> Result<SyncReport, ExecutorError> {
        let deps = self.with_state(|s| Arc::clone(&s.deps)).await?;
        Ok(deps.sync().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codemode_domain::{DepSpec, Tool, ToolAdapter, ToolCallable, ToolError};
    use serde_json::json;
    use std::sync::Mutex;

    use crate::storage::FileStorage;

    fn storage(dir: &tempfile::TempDir) -> Arc<dyn StorageBackend> {
        Arc::new(FileStorage::open(dir.path()).unwrap())
    }

    async fn started(dir: &tempfile::TempDir) -> InProcessExecutor {
        let mut executor = InProcessExecutor::new(InProcessConfig::new());
        executor.start(storage(dir)).await.unwrap();
        executor
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_trailing_expression_value() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        let result = executor.execute("1 + 1", None).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.value, Some(json!(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_statement_chunk_yields_null() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        let result = executor.execute("x = 10", None).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.value, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_state_persists_between_executes() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        executor.execute("x = 42", None).await.unwrap();
        let result = executor.execute("x + 1", None).await.unwrap();
        assert_eq!(result.value, Some(json!(43)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stdout_captured() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        let result = executor
            .execute("print('hello', 42)\nio.write('raw')", None)
            .await
            .unwrap();
        assert_eq!(result.stdout, "hello\t42\nraw");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_syntax_error_contained() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        let result = executor.execute("function broken(", None).await.unwrap();
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Syntax);
        assert!(result.value.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runtime_error_contained() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        let result = executor.execute("error('boom')", None).await.unwrap();
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Runtime);
        assert!(error.message.contains("boom"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_then_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        let started_at = std::time::Instant::now();
        let result = executor
            .execute("while true do end", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(started_at.elapsed() < Duration::from_secs(2));
        assert_eq!(result.error.unwrap().kind, ErrorKind::Timeout);
        assert_eq!(result.value, None);

        // The VM survives the aborted chunk
        let result = executor.execute("1 + 1", None).await.unwrap();
        assert_eq!(result.value, Some(json!(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reset_clears_user_state_keeps_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        executor.execute("x = 42", None).await.unwrap();
        executor.reset().await.unwrap();

        let result = executor.execute("x", None).await.unwrap();
        assert_eq!(result.value, None);

        let result = executor.execute("type(tools)", None).await.unwrap();
        assert_eq!(result.value, Some(json!("table")));
        let result = executor
            .execute("type(skills) .. type(artifacts) .. type(deps)", None)
            .await
            .unwrap();
        assert_eq!(result.value, Some(json!("tabletabletable")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_methods_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = started(&dir).await;

        executor.close().await.unwrap();
        executor.close().await.unwrap(); // idempotent

        assert!(matches!(
            executor.execute("1", None).await.unwrap_err(),
            ExecutorError::Closed
        ));
        assert!(matches!(
            executor.list_tools().await.unwrap_err(),
            ExecutorError::Closed
        ));
        assert!(matches!(
            executor.reset().await.unwrap_err(),
            ExecutorError::Closed
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capabilities() {
        let executor = InProcessExecutor::new(InProcessConfig::new());
        assert!(executor.supports(Capability::Timeout));
        assert!(executor.supports(Capability::Reset));
        assert!(executor.supports(Capability::DepsInstall));
        assert!(!executor.supports(Capability::ProcessIsolation));
    }

    // ------------------------------------------------------------------
    // Skill composition
    // ------------------------------------------------------------------

    struct StubApi;

    #[async_trait]
    impl ToolAdapter for StubApi {
        fn id(&self) -> &str {
            "stub"
        }

        async fn list_tools(&self) -> Result<Vec<Tool>, ToolError> {
            Ok(vec![Tool::new("api", "Stub API")
                .with_callable(ToolCallable::new("get", "GET a URL"))])
        }

        async fn call(
            &self,
            _tool: &str,
            _recipe: Option<&str>,
            _args: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(json!({"stargazers_count": 7}))
        }

        async fn close(&self) {}
    }

    async fn executor_with_stub_tool(dir: &tempfile::TempDir) -> InProcessExecutor {
        let storage = storage(dir);
        let mut executor = InProcessExecutor::new(InProcessConfig::new());
        executor.start(Arc::clone(&storage)).await.unwrap();

        // Swap in a registry carrying the stub adapter, then rebuild the VM
        let mut registry = ToolRegistry::new();
        registry.register_adapter(Arc::new(StubApi)).await.unwrap();
        {
            let mut state = executor.state.write().await;
            let started = state.as_mut().unwrap();
            started.registry = Arc::new(registry);
            started.engine = started.build_engine().unwrap();
        }
        executor
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_skill_composition_through_tools() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor_with_stub_tool(&dir).await;

        executor
            .execute(
                "skills.create('fetch_json', \"function run(url) return tools.api.get{url = url} end\", 'Fetch JSON')",
                None,
            )
            .await
            .map(|r| assert!(r.is_success(), "{:?}", r.error))
            .unwrap();
        executor
            .execute(
                "skills.create('repo_stars', \"function run(owner, repo) return skills.fetch_json{url = 'https://api/' .. owner .. '/' .. repo}.stargazers_count end\", 'Star count')",
                None,
            )
            .await
            .map(|r| assert!(r.is_success(), "{:?}", r.error))
            .unwrap();

        let result = executor
            .execute("skills.repo_stars{owner = 'a', repo = 'b'}", None)
            .await
            .unwrap();
        assert_eq!(result.error, None);
        assert_eq!(result.value, Some(json!(7)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_skill_missing_argument_kind() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor_with_stub_tool(&dir).await;

        executor
            .execute(
                "skills.create('greet', 'function run(name) return name end')",
                None,
            )
            .await
            .unwrap();

        let result = executor.execute("skills.greet{}", None).await.unwrap();
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Skill);
        assert!(error.message.contains("name"));

        let result = executor
            .execute("skills.greet{name = 'x', extra = 1}", None)
            .await
            .unwrap();
        assert_eq!(result.error.unwrap().kind, ErrorKind::Skill);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_skill_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let executor = started(&dir).await;

        let result = executor.execute("skills.ghost{}", None).await.unwrap();
        assert_eq!(result.error.unwrap().kind, ErrorKind::NotFound);
    }

    // ------------------------------------------------------------------
    // Deps policy
    // ------------------------------------------------------------------

    struct RecordingInstaller {
        installed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PackageInstaller for RecordingInstaller {
        async fn install(&self, specs: &[DepSpec]) -> SyncReport {
            let mut report = SyncReport::default();
            let mut installed = self.installed.lock().unwrap();
            for spec in specs {
                if installed.contains(&spec.name) {
                    report.already_present.push(spec.to_string());
                } else {
                    installed.push(spec.name.clone());
                    report.installed.push(spec.to_string());
                }
            }
            report
        }

        async fn is_installed(&self, spec: &DepSpec) -> bool {
            self.installed.lock().unwrap().contains(&spec.name)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deps_policy_disabled_inside_code() {
        let dir = tempfile::tempdir().unwrap();
        let backend = storage(&dir);
        backend
            .deps()
            .add(&DepSpec::parse("pkg-a==1.0").unwrap())
            .await
            .unwrap();

        let mut config = InProcessConfig::new();
        config.allow_runtime_deps = false;
        config.installer = Some(Arc::new(RecordingInstaller {
            installed: Mutex::new(Vec::new()),
        }));
        let mut executor = InProcessExecutor::new(config);
        executor.start(backend).await.unwrap();

        assert_eq!(executor.list_deps().await.unwrap(), vec!["pkg-a==1.0"]);
        assert!(matches!(
            executor.add_dep("pkg-b").await.unwrap_err(),
            ExecutorError::Deps(codemode_domain::DepsError::RuntimeDisabled)
        ));

        let report = executor.sync_deps().await.unwrap();
        assert_eq!(report.installed, vec!["pkg-a==1.0"]);

        // Inside agent code the same policy holds, as a contained error
        let result = executor.execute("deps.add('pkg-c')", None).await.unwrap();
        assert_eq!(result.error.unwrap().kind, ErrorKind::RuntimeDepsDisabled);
        assert_eq!(executor.list_deps().await.unwrap(), vec!["pkg-a==1.0"]);

        // list/sync remain reachable from agent code
        let result = executor.execute("#deps.list()", None).await.unwrap();
        assert_eq!(result.value, Some(json!(1)));
    }
}
