//! Host side of the subprocess-kernel executor
//!
//! Spawns the kernel child with piped stdio, waits for its ready line,
//! bootstraps it with the serialized storage descriptor, then forwards
//! calls one at a time over the ordered channel. On a timeout the kernel
//! gets a grace period to report its own cooperative `Timeout`; if it
//! stays silent it is killed and restarted (state lost, caller observes
//! `Timeout`).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codemode_application::{Executor, ExecutorError, StorageBackend};
use codemode_domain::{
    Capability, ErrorKind, ExecutionError, ExecutionResult, StorageAccess, SyncReport, ToolSummary,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::kernel::fault_to_error;
use super::rpc::{BootstrapParams, KernelEvent, KernelRequest, KernelResponse, READY_EVENT};

/// Extra wait beyond the kernel's own deadline before it is killed
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct SubprocessConfig {
    /// Kernel command line; defaults to `current_exe kernel`
    pub kernel_command: Option<Vec<String>>,
    /// Directory of tool YAML files, passed through to the kernel
    pub tools_path: Option<PathBuf>,
    /// Applied when `execute` is called without an explicit timeout
    pub default_timeout: Option<Duration>,
    /// How long to wait for the kernel's ready line
    pub startup_timeout: Duration,
    pub allow_runtime_deps: bool,
    /// Rocks tree to reuse across restarts; a fresh temp tree per start
    /// when absent
    pub deps_tree: Option<PathBuf>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            kernel_command: None,
            tools_path: None,
            default_timeout: Some(Duration::from_secs(60)),
            startup_timeout: Duration::from_secs(30),
            allow_runtime_deps: true,
            deps_tree: None,
        }
    }
}

impl SubprocessConfig {
    fn resolve_command(&self) -> Result<Vec<String>, ExecutorError> {
        if let Some(command) = &self.kernel_command {
            if command.is_empty() {
                return Err(ExecutorError::Unavailable("empty kernel command".into()));
            }
            return Ok(command.clone());
        }
        let exe = std::env::current_exe()
            .map_err(|e| ExecutorError::Unavailable(format!("cannot resolve kernel binary: {e}")))?;
        Ok(vec![exe.to_string_lossy().into_owned(), "kernel".into()])
    }
}

struct KernelChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

enum CallOutcome {
    Ok(serde_json::Value),
    Fault(ExecutorError),
    /// No response within the allotted time; the kernel must be restarted
    Unresponsive,
}

impl KernelChannel {
    async fn spawn(config: &SubprocessConfig) -> Result<Self, ExecutorError> {
        let argv = config.resolve_command()?;
        debug!(?argv, "spawning kernel");
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::Unavailable(format!("failed to spawn kernel: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutorError::Transport("kernel stdin unavailable".into()))?;
        let stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| ExecutorError::Transport("kernel stdout unavailable".into()))?,
        )
        .lines();

        let mut channel = Self {
            child,
            stdin,
            stdout,
            next_id: 1,
        };
        channel.await_ready(config.startup_timeout).await?;
        Ok(channel)
    }

    async fn await_ready(&mut self, startup_timeout: Duration) -> Result<(), ExecutorError> {
        let line = tokio::time::timeout(startup_timeout, self.stdout.next_line())
            .await
            .map_err(|_| {
                ExecutorError::Unavailable(format!(
                    "kernel did not become ready within {startup_timeout:?}"
                ))
            })?
            .map_err(|e| ExecutorError::Transport(format!("reading ready line failed: {e}")))?
            .ok_or_else(|| ExecutorError::Unavailable("kernel exited before ready".into()))?;

        let event: KernelEvent = serde_json::from_str(&line)
            .map_err(|e| ExecutorError::Transport(format!("bad ready line '{line}': {e}")))?;
        if event.event != READY_EVENT {
            return Err(ExecutorError::Transport(format!(
                "unexpected kernel event '{}'",
                event.event
            )));
        }
        Ok(())
    }

    /// One request, one response. `deadline` bounds the wait; `None` waits
    /// indefinitely (bootstrap, shutdown are host-bounded elsewhere).
    async fn call(
        &mut self,
        method: &str,
        params: serde_json::Value,
        deadline: Option<Duration>,
    ) -> Result<CallOutcome, ExecutorError> {
        let id = self.next_id;
        self.next_id += 1;
        let mut line = serde_json::to_string(&KernelRequest {
            id,
            method: method.into(),
            params,
        })
        .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ExecutorError::Transport(format!("kernel write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ExecutorError::Transport(format!("kernel flush failed: {e}")))?;

        loop {
            let next = match deadline {
                Some(limit) => match tokio::time::timeout(limit, self.stdout.next_line()).await {
                    Ok(read) => read,
                    Err(_) => return Ok(CallOutcome::Unresponsive),
                },
                None => self.stdout.next_line().await,
            };
            let line = next
                .map_err(|e| ExecutorError::Transport(format!("kernel read failed: {e}")))?
                .ok_or_else(|| ExecutorError::Transport("kernel closed its stdout".into()))?;
            if line.trim().is_empty() {
                continue;
            }
            let response: KernelResponse = serde_json::from_str(&line)
                .map_err(|e| ExecutorError::Transport(format!("bad kernel response: {e}")))?;
            if response.id != id {
                warn!(got = response.id, expected = id, "kernel response out of order; skipping");
                continue;
            }
            return Ok(match response.error {
                Some(fault) => CallOutcome::Fault(fault_to_error(&fault)),
                None => CallOutcome::Ok(response.result.unwrap_or(serde_json::Value::Null)),
            });
        }
    }

    async fn bootstrap(
        &mut self,
        config: &SubprocessConfig,
        access: &StorageAccess,
        deps_tree: &std::path::Path,
    ) -> Result<(), ExecutorError> {
        let params = serde_json::to_value(BootstrapParams {
            storage: access.clone(),
            tools_path: config.tools_path.clone(),
            allow_runtime_deps: config.allow_runtime_deps,
            deps_tree: Some(deps_tree.to_path_buf()),
            default_timeout_ms: config.default_timeout.map(|t| t.as_millis() as u64),
        })
        .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        match self
            .call("bootstrap", params, Some(config.startup_timeout))
            .await?
        {
            CallOutcome::Ok(_) => Ok(()),
            CallOutcome::Fault(error) => Err(error),
            CallOutcome::Unresponsive => Err(ExecutorError::Unavailable(
                "kernel did not finish bootstrap in time".into(),
            )),
        }
    }

    async fn kill(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }

    /// Polite shutdown with a hard fallback
    async fn shutdown(mut self) {
        let polite = self
            .call("shutdown", serde_json::json!({}), Some(SHUTDOWN_WAIT))
            .await;
        match polite {
            Ok(CallOutcome::Ok(_)) => {
                let _ = tokio::time::timeout(SHUTDOWN_WAIT, self.child.wait()).await;
                let _ = self.child.start_kill();
            }
            _ => self.kill().await,
        }
    }
}

struct SubprocessState {
    channel: Option<KernelChannel>,
    access: StorageAccess,
    deps_tree: PathBuf,
    /// Owned temp tree, removed on close
    _scratch_tree: Option<tempfile::TempDir>,
}

pub struct SubprocessExecutor {
    config: SubprocessConfig,
    state: Mutex<Option<SubprocessState>>,
    closed: AtomicBool,
}

impl SubprocessExecutor {
    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), ExecutorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::Closed);
        }
        Ok(())
    }

    async fn restart_kernel(&self, state: &mut SubprocessState) -> Result<(), ExecutorError> {
        if let Some(dead) = state.channel.take() {
            dead.kill().await;
        }
        let mut channel = KernelChannel::spawn(&self.config).await?;
        channel
            .bootstrap(&self.config, &state.access, &state.deps_tree)
            .await?;
        state.channel = Some(channel);
        Ok(())
    }

    /// Forward one facade call, surfacing kernel faults as typed errors
    async fn forward(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ExecutorError> {
        self.check_open()?;
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(ExecutorError::NotStarted)?;
        let channel = state
            .channel
            .as_mut()
            .ok_or_else(|| ExecutorError::Unavailable("kernel not running".into()))?;

        match channel.call(method, params, None).await {
            Ok(CallOutcome::Ok(value)) => Ok(value),
            Ok(CallOutcome::Fault(error)) => Err(error),
            Ok(CallOutcome::Unresponsive) => unreachable!("unbounded call cannot time out"),
            Err(transport) => {
                // Channel is broken; tear it down so the next call restarts
                if let Some(dead) = state.channel.take() {
                    dead.kill().await;
                }
                if let Err(error) = self.restart_kernel(state).await {
                    warn!(%error, "kernel restart after transport failure failed");
                }
                Err(transport)
            }
        }
    }
}

#[async_trait]
impl Executor for SubprocessExecutor {
    async fn start(&mut self, storage: Arc<dyn StorageBackend>) -> Result<(), ExecutorError> {
        self.check_open()?;
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let access = storage.access();
        let (deps_tree, scratch) = match &self.config.deps_tree {
            Some(tree) => (tree.clone(), None),
            None => {
                let scratch = tempfile::TempDir::with_prefix("codemode-kernel-")
                    .map_err(|e| ExecutorError::Unavailable(format!("temp tree failed: {e}")))?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let mut channel = KernelChannel::spawn(&self.config).await?;
        channel.bootstrap(&self.config, &access, &deps_tree).await?;
        info!("kernel ready");

        *guard = Some(SubprocessState {
            channel: Some(channel),
            access,
            deps_tree,
            _scratch_tree: scratch,
        });
        Ok(())
    }

    async fn execute(
        &self,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.check_open()?;
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(ExecutorError::NotStarted)?;
        let channel = state
            .channel
            .as_mut()
            .ok_or_else(|| ExecutorError::Unavailable("kernel not running".into()))?;

        let effective = timeout.or(self.config.default_timeout);
        let params = serde_json::json!({
            "code": code,
            "timeout_ms": effective.map(|t| t.as_millis() as u64),
        });
        let deadline = effective.map(|t| t + TIMEOUT_GRACE);

        match channel.call("execute", params, deadline).await {
            Ok(CallOutcome::Ok(value)) => serde_json::from_value(value)
                .map_err(|e| ExecutorError::Transport(format!("bad execution result: {e}"))),
            Ok(CallOutcome::Fault(error)) => Err(error),
            Ok(CallOutcome::Unresponsive) => {
                // Kernel stuck past its grace period: kill, restart, report
                // the timeout. Interpreter state is lost.
                warn!("kernel unresponsive past deadline; restarting");
                self.restart_kernel(state).await?;
                let limit = effective.expect("deadline implies a timeout");
                Ok(ExecutionResult::failure(
                    ExecutionError::new(
                        ErrorKind::Timeout,
                        format!("execution timed out after {:.1}s", limit.as_secs_f64()),
                    ),
                    String::new(),
                    String::new(),
                ))
            }
            Err(transport) => {
                if let Err(error) = self.restart_kernel(state).await {
                    warn!(%error, "kernel restart after transport failure failed");
                }
                Err(transport)
            }
        }
    }

    async fn reset(&self) -> Result<(), ExecutorError> {
        self.check_open()?;
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(ExecutorError::NotStarted)?;
        // Restart rather than in-place reset: a fresh kernel re-bootstraps
        // from the descriptor, which is the stronger guarantee.
        self.restart_kernel(state).await
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut state) = self.state.lock().await.take() {
            if let Some(channel) = state.channel.take() {
                channel.shutdown().await;
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([
            Capability::Timeout,
            Capability::ProcessIsolation,
            Capability::Reset,
            Capability::DepsInstall,
        ])
    }

    async fn list_tools(&self) -> Result<Vec<ToolSummary>, ExecutorError> {
        let value = self.forward("list_tools", serde_json::json!({})).await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn search_tools(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ToolSummary>, ExecutorError> {
        let value = self
            .forward(
                "search_tools",
                serde_json::json!({"query": query, "limit": limit}),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn list_deps(&self) -> Result<Vec<String>, ExecutorError> {
        let value = self.forward("list_deps", serde_json::json!({})).await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn add_dep(&self, spec: &str) -> Result<SyncReport, ExecutorError> {
        let value = self
            .forward("add_dep", serde_json::json!({"spec": spec}))
            .await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn remove_dep(&self, spec: &str) -> Result<bool, ExecutorError> {
        let value = self
            .forward("remove_dep", serde_json::json!({"spec": spec}))
            .await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn sync_deps(&self) -> Result<SyncReport, ExecutorError> {
        let value = self.forward("sync_deps", serde_json::json!({})).await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }
}
