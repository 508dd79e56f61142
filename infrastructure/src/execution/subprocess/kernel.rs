//! The interpreter kernel
//!
//! Runs inside the child process (`codemode kernel`). Holds one in-process
//! executor, built on the `bootstrap` request from the serialized storage
//! descriptor, and serves execute/reset/facade requests strictly in order
//! until `shutdown` or EOF.

use std::sync::Arc;
use std::time::Duration;

use codemode_application::{Executor, ExecutorError};
use codemode_domain::{DepsError, StorageError, ToolError};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::rpc::{
    BootstrapParams, ExecuteParams, KernelEvent, KernelRequest, KernelResponse, SearchParams,
    SpecParams, READY_EVENT,
};
use crate::bootstrap::open_storage;
use crate::execution::in_process::{InProcessConfig, InProcessExecutor};

/// Serve the kernel protocol over process stdio
pub async fn run_kernel() -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(stdin, stdout).await
}

/// Serve the kernel protocol over arbitrary streams (tests use an
/// in-memory duplex).
pub async fn serve<R, W>(reader: BufReader<R>, mut writer: W) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(
        &mut writer,
        &serde_json::to_string(&KernelEvent {
            event: READY_EVENT.into(),
        })
        .expect("ready event serializes"),
    )
    .await?;

    let mut executor: Option<InProcessExecutor> = None;
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: KernelRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(error) => {
                warn!(%error, "dropping unparsable kernel request");
                continue;
            }
        };
        debug!(id = request.id, method = %request.method, "kernel request");

        let shutdown = request.method == "shutdown";
        let response = dispatch(&mut executor, request).await;
        write_line(
            &mut writer,
            &serde_json::to_string(&response).expect("response serializes"),
        )
        .await?;
        if shutdown {
            break;
        }
    }

    if let Some(mut executor) = executor {
        let _ = executor.close().await;
    }
    info!("kernel exiting");
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn dispatch(
    executor: &mut Option<InProcessExecutor>,
    request: KernelRequest,
) -> KernelResponse {
    let id = request.id;
    match handle(executor, &request.method, request.params).await {
        Ok(result) => KernelResponse::ok(id, result),
        Err(error) => KernelResponse::fail(id, fault_kind(&error), error.to_string()),
    }
}

async fn handle(
    executor: &mut Option<InProcessExecutor>,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, ExecutorError> {
    match method {
        "bootstrap" => {
            let params: BootstrapParams = parse(params)?;
            let storage = open_storage(&params.storage).await?;
            let config = InProcessConfig {
                tools_path: params.tools_path,
                default_timeout: params.default_timeout_ms.map(Duration::from_millis),
                allow_runtime_deps: params.allow_runtime_deps,
                deps_tree: params.deps_tree,
                installer: None,
            };
            let mut built = InProcessExecutor::new(config);
            built.start(Arc::clone(&storage)).await?;
            *executor = Some(built);
            Ok(serde_json::json!({"ok": true}))
        }
        "execute" => {
            let params: ExecuteParams = parse(params)?;
            let result = require(executor)?
                .execute(&params.code, params.timeout_ms.map(Duration::from_millis))
                .await?;
            to_json(&result)
        }
        "reset" => {
            require(executor)?.reset().await?;
            Ok(serde_json::json!({"ok": true}))
        }
        "list_tools" => to_json(&require(executor)?.list_tools().await?),
        "search_tools" => {
            let params: SearchParams = parse(params)?;
            to_json(
                &require(executor)?
                    .search_tools(&params.query, params.limit)
                    .await?,
            )
        }
        "list_deps" => to_json(&require(executor)?.list_deps().await?),
        "add_dep" => {
            let params: SpecParams = parse(params)?;
            to_json(&require(executor)?.add_dep(&params.spec).await?)
        }
        "remove_dep" => {
            let params: SpecParams = parse(params)?;
            to_json(&require(executor)?.remove_dep(&params.spec).await?)
        }
        "sync_deps" => to_json(&require(executor)?.sync_deps().await?),
        "shutdown" => Ok(serde_json::json!({"ok": true})),
        other => Err(ExecutorError::Transport(format!(
            "unknown kernel method '{other}'"
        ))),
    }
}

fn require(executor: &Option<InProcessExecutor>) -> Result<&InProcessExecutor, ExecutorError> {
    executor.as_ref().ok_or(ExecutorError::NotStarted)
}

fn parse<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, ExecutorError> {
    serde_json::from_value(params).map_err(|e| ExecutorError::Transport(format!("bad params: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ExecutorError> {
    serde_json::to_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
}

/// Wire taxonomy name for an executor fault
pub(crate) fn fault_kind(error: &ExecutorError) -> &'static str {
    match error {
        ExecutorError::Closed => "ExecutorClosed",
        ExecutorError::NotStarted | ExecutorError::Unavailable(_) => "ExecutorUnavailable",
        ExecutorError::Transport(_) => "TransportError",
        ExecutorError::Storage(storage) => match storage {
            StorageError::Unavailable(_) | StorageError::Io(_) => "StorageUnavailable",
            StorageError::NotFound(_) => "NotFound",
            StorageError::Conflict(_) => "Conflict",
            StorageError::Corrupt { .. } | StorageError::Encoding(_) => "Corrupt",
        },
        ExecutorError::Deps(deps) => match deps {
            DepsError::InvalidSpec(_) => "InvalidDepSpec",
            DepsError::RuntimeDisabled => "RuntimeDepsDisabled",
            DepsError::Install { .. } => "InstallFailed",
        },
        ExecutorError::Tool(tool) => tool.kind_name(),
    }
}

/// Inverse of [`fault_kind`] for the host side
pub(crate) fn fault_to_error(fault: &super::rpc::KernelFault) -> ExecutorError {
    match fault.kind.as_str() {
        "ExecutorClosed" => ExecutorError::Closed,
        "RuntimeDepsDisabled" => ExecutorError::Deps(DepsError::RuntimeDisabled),
        "InvalidDepSpec" => ExecutorError::Deps(DepsError::InvalidSpec(fault.message.clone())),
        "InstallFailed" => ExecutorError::Deps(DepsError::Install {
            spec: String::new(),
            detail: fault.message.clone(),
        }),
        "NotFound" => ExecutorError::Storage(StorageError::NotFound(fault.message.clone())),
        "StorageUnavailable" => {
            ExecutorError::Storage(StorageError::Unavailable(fault.message.clone()))
        }
        "DuplicateTool" | "SchemaError" => ExecutorError::Tool(ToolError::Schema(fault.message.clone())),
        "TransportError" => ExecutorError::Transport(fault.message.clone()),
        _ => ExecutorError::Unavailable(format!("{}: {}", fault.kind, fault.message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_domain::{ExecutionResult, StorageAccess};
    use tokio::io::AsyncBufReadExt;

    struct KernelHarness {
        writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
        reader: tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
        next_id: u64,
    }

    impl KernelHarness {
        /// Spawn the kernel loop over an in-memory duplex and consume the
        /// ready line.
        async fn start() -> Self {
            let (host_side, kernel_side) = tokio::io::duplex(64 * 1024);
            let (kernel_read, kernel_write) = tokio::io::split(kernel_side);
            tokio::spawn(async move {
                serve(BufReader::new(kernel_read), kernel_write)
                    .await
                    .unwrap();
            });

            let (host_read, host_write) = tokio::io::split(host_side);
            let mut reader = BufReader::new(host_read).lines();
            let ready = reader.next_line().await.unwrap().unwrap();
            assert!(ready.contains(READY_EVENT));
            Self {
                writer: host_write,
                reader,
                next_id: 1,
            }
        }

        async fn request(&mut self, method: &str, params: serde_json::Value) -> KernelResponse {
            let id = self.next_id;
            self.next_id += 1;
            let line = serde_json::to_string(&KernelRequest {
                id,
                method: method.into(),
                params,
            })
            .unwrap();
            use tokio::io::AsyncWriteExt;
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            let line = self.reader.next_line().await.unwrap().unwrap();
            let response: KernelResponse = serde_json::from_str(&line).unwrap();
            assert_eq!(response.id, id);
            response
        }

        async fn bootstrap(&mut self, base: &std::path::Path) {
            let params = serde_json::to_value(BootstrapParams {
                storage: StorageAccess::File {
                    base_path: base.to_path_buf(),
                },
                tools_path: None,
                allow_runtime_deps: true,
                deps_tree: None,
                default_timeout_ms: Some(10_000),
            })
            .unwrap();
            let response = self.request("bootstrap", params).await;
            assert!(response.error.is_none(), "{:?}", response.error);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kernel_bootstrap_then_execute() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = KernelHarness::start().await;
        harness.bootstrap(dir.path()).await;

        let response = harness
            .request("execute", serde_json::json!({"code": "6 * 7"}))
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.value, Some(serde_json::json!(42)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kernel_state_survives_between_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = KernelHarness::start().await;
        harness.bootstrap(dir.path()).await;

        harness
            .request("execute", serde_json::json!({"code": "x = 42"}))
            .await;
        let response = harness
            .request("execute", serde_json::json!({"code": "x + 1"}))
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.value, Some(serde_json::json!(43)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kernel_execute_before_bootstrap_fails() {
        let _dir = tempfile::tempdir().unwrap();
        let mut harness = KernelHarness::start().await;
        let response = harness
            .request("execute", serde_json::json!({"code": "1"}))
            .await;
        assert_eq!(response.error.unwrap().kind, "ExecutorUnavailable");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kernel_reset_clears_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = KernelHarness::start().await;
        harness.bootstrap(dir.path()).await;

        harness
            .request("execute", serde_json::json!({"code": "x = 1"}))
            .await;
        harness.request("reset", serde_json::json!({})).await;
        let response = harness
            .request("execute", serde_json::json!({"code": "x"}))
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.value, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kernel_unknown_method() {
        let mut harness = KernelHarness::start().await;
        let response = harness.request("warp", serde_json::json!({})).await;
        assert_eq!(response.error.unwrap().kind, "TransportError");
    }

    #[test]
    fn test_fault_round_trip() {
        let error = ExecutorError::Deps(DepsError::RuntimeDisabled);
        let kind = fault_kind(&error);
        let fault = super::super::rpc::KernelFault {
            kind: kind.into(),
            message: error.to_string(),
        };
        assert!(matches!(
            fault_to_error(&fault),
            ExecutorError::Deps(DepsError::RuntimeDisabled)
        ));
    }
}
