//! Container executor
//!
//! Runs the session-server image via the `docker` CLI, polls `/health`
//! until the server answers, and forwards `execute`/`reset`/facade calls
//! over HTTP with the bearer token attached to every request. `close`
//! force-removes the container. A configured `remote_url` skips Docker and
//! talks to an existing server.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use codemode_application::{Executor, ExecutorError, StorageBackend};
use codemode_domain::{
    Capability, DepsError, ExecutionResult, StorageAccess, SyncReport, ToolSummary,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::{
    rewrite_localhost_for_container, ContainerConfig, CONTAINER_PORT, CONTAINER_STORAGE_PATH,
    CONTAINER_TOOLS_PATH,
};
use crate::util::stderr_tail;

#[derive(Clone)]
struct HttpClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpClient {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, ExecutorError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(format!("GET {path} failed: {e}")))?;
        Self::decode(path, response).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutorError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(format!("POST {path} failed: {e}")))?;
        Self::decode(path, response).await
    }

    async fn delete_json(&self, path: &str) -> Result<serde_json::Value, ExecutorError> {
        let response = self
            .request(reqwest::Method::DELETE, path)
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(format!("DELETE {path} failed: {e}")))?;
        Self::decode(path, response).await
    }

    /// Map HTTP statuses onto executor faults. 408 carries a full
    /// `ExecutionResult` body (the server's timeout), so it is decoded by
    /// the execute path before this mapping applies.
    async fn decode(
        path: &str,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, ExecutorError> {
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        if status.is_success() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Ok(body);
        }
        let detail = body
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        Err(match status.as_u16() {
            401 => ExecutorError::Unavailable(format!("authentication rejected: {detail}")),
            403 => ExecutorError::Deps(DepsError::RuntimeDisabled),
            422 => ExecutorError::Deps(DepsError::InvalidSpec(detail)),
            _ => ExecutorError::Transport(format!("{path} returned {status}: {detail}")),
        })
    }
}

struct ContainerState {
    client: HttpClient,
    /// Absent when driving a remote server
    container_id: Option<String>,
}

pub struct ContainerExecutor {
    config: ContainerConfig,
    state: Mutex<Option<ContainerState>>,
    /// Serializes execute/reset against the single server session
    op_lock: Mutex<()>,
    closed: AtomicBool,
}

impl ContainerExecutor {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
            op_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), ExecutorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::Closed);
        }
        Ok(())
    }

    async fn docker(&self, args: &[&str]) -> Result<String, ExecutorError> {
        debug!(?args, "docker");
        let output = tokio::process::Command::new(&self.config.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ExecutorError::Unavailable(format!("failed to run {}: {e}", self.config.docker_bin))
            })?;
        if !output.status.success() {
            return Err(ExecutorError::Unavailable(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr_tail(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn pick_port(&self) -> Result<u16, ExecutorError> {
        if let Some(port) = self.config.port {
            return Ok(port);
        }
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .map_err(|e| ExecutorError::Unavailable(format!("no free port: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| ExecutorError::Unavailable(e.to_string()))?
            .port();
        Ok(port)
    }

    /// Env and mounts for `docker run`, derived from the storage
    /// descriptor. File storage is bind-mounted and the descriptor
    /// rewritten to the in-container path; KV URLs are rewritten so the
    /// container can reach host-local services.
    fn run_args(
        &self,
        name: &str,
        port: u16,
        access: &StorageAccess,
        token: Option<&str>,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            name.into(),
            "--publish".into(),
            format!("127.0.0.1:{port}:{CONTAINER_PORT}"),
        ];

        let container_access = match access {
            StorageAccess::File { base_path } => {
                args.push("--volume".into());
                args.push(format!("{}:{CONTAINER_STORAGE_PATH}", base_path.display()));
                StorageAccess::File {
                    base_path: CONTAINER_STORAGE_PATH.into(),
                }
            }
            StorageAccess::Kv {
                connection_url,
                prefix,
            } => StorageAccess::Kv {
                connection_url: rewrite_localhost_for_container(connection_url),
                prefix: prefix.clone(),
            },
        };
        args.push("--env".into());
        args.push(format!(
            "CODEMODE_STORAGE={}",
            serde_json::to_string(&container_access).expect("descriptor serializes")
        ));

        if let Some(tools) = &self.config.tools_path {
            args.push("--volume".into());
            args.push(format!("{}:{CONTAINER_TOOLS_PATH}:ro", tools.display()));
            args.push("--env".into());
            args.push(format!("CODEMODE_TOOLS_PATH={CONTAINER_TOOLS_PATH}"));
        }

        args.push("--env".into());
        args.push(format!(
            "CODEMODE_ALLOW_RUNTIME_DEPS={}",
            self.config.allow_runtime_deps
        ));
        match token {
            Some(token) => {
                args.push("--env".into());
                args.push(format!("CODEMODE_AUTH_TOKEN={token}"));
            }
            None => {
                args.push("--env".into());
                args.push("CODEMODE_AUTH_DISABLED=true".into());
            }
        }
        if let Some(timeout) = self.config.default_timeout {
            args.push("--env".into());
            args.push(format!(
                "CODEMODE_DEFAULT_TIMEOUT_SECS={}",
                timeout.as_secs_f64()
            ));
        }

        if let Some(memory) = &self.config.memory {
            args.push("--memory".into());
            args.push(memory.clone());
        }
        if let Some(cpus) = self.config.cpus {
            args.push("--cpus".into());
            args.push(cpus.to_string());
        }
        if self.config.network_disabled {
            args.push("--network".into());
            args.push("none".into());
        } else if cfg!(target_os = "linux") {
            // Docker Desktop provides host.docker.internal natively; plain
            // Linux engines need the gateway mapping.
            args.push("--add-host".into());
            args.push("host.docker.internal:host-gateway".into());
        }

        args.push(self.config.image.clone());
        args
    }

    async fn wait_healthy(&self, client: &HttpClient) -> Result<(), ExecutorError> {
        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            match client.get_json("/health").await {
                Ok(body) if body.get("status").and_then(|s| s.as_str()) == Some("healthy") => {
                    return Ok(());
                }
                Ok(body) => debug!(?body, "server not healthy yet"),
                Err(error) => debug!(%error, "health probe failed"),
            }
            if Instant::now() >= deadline {
                return Err(ExecutorError::Unavailable(format!(
                    "session server not healthy within {:?}",
                    self.config.startup_timeout
                )));
            }
            tokio::time::sleep(self.config.health_check_interval).await;
        }
    }

    async fn client(&self) -> Result<HttpClient, ExecutorError> {
        self.check_open()?;
        let state = self.state.lock().await;
        match state.as_ref() {
            Some(state) => Ok(state.client.clone()),
            None => Err(ExecutorError::NotStarted),
        }
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn start(&mut self, storage: Arc<dyn StorageBackend>) -> Result<(), ExecutorError> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let token = if self.config.auth_disabled {
            None
        } else {
            Some(
                self.config
                    .auth_token
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            )
        };
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ExecutorError::Unavailable(e.to_string()))?;

        let (base_url, container_id) = match &self.config.remote_url {
            Some(remote) => (remote.trim_end_matches('/').to_string(), None),
            None => {
                // Fail early when the image is missing rather than letting
                // `docker run` produce a less legible error.
                self.docker(&["image", "inspect", &self.config.image])
                    .await
                    .map_err(|_| {
                        ExecutorError::Unavailable(format!(
                            "image '{}' not found; build it first",
                            self.config.image
                        ))
                    })?;

                let port = self.pick_port()?;
                let name = format!(
                    "codemode-{}",
                    &uuid::Uuid::new_v4().simple().to_string()[..12]
                );
                let args = self.run_args(&name, port, &storage.access(), token.as_deref());
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                let id = self.docker(&arg_refs).await?;
                info!(container = %name, port, "session container started");
                (format!("http://127.0.0.1:{port}"), Some(id))
            }
        };

        let client = HttpClient {
            base_url,
            token,
            http,
        };
        if let Err(error) = self.wait_healthy(&client).await {
            if let Some(id) = &container_id {
                let _ = self.docker(&["rm", "--force", id]).await;
            }
            return Err(error);
        }

        *state = Some(ContainerState {
            client,
            container_id,
        });
        Ok(())
    }

    async fn execute(
        &self,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.check_open()?;
        let _serialize = self.op_lock.lock().await;
        let body = json!({
            "code": code,
            "timeout": timeout
                .or(self.config.default_timeout)
                .map(|t| t.as_secs_f64()),
        });
        let value = self.client().await?.post_json("/execute", &body).await?;
        serde_json::from_value(value)
            .map_err(|e| ExecutorError::Transport(format!("bad execution result: {e}")))
    }

    async fn reset(&self) -> Result<(), ExecutorError> {
        self.check_open()?;
        let _serialize = self.op_lock.lock().await;
        self.client().await?.post_json("/reset", &json!({})).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(state) = self.state.lock().await.take() {
            if let Some(id) = state.container_id {
                if let Err(error) = self.docker(&["rm", "--force", &id]).await {
                    warn!(%error, "container removal failed");
                }
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        let mut caps = BTreeSet::from([
            Capability::Timeout,
            Capability::ProcessIsolation,
            Capability::ContainerIsolation,
            Capability::Reset,
            Capability::DepsInstall,
        ]);
        if self.config.network_disabled {
            caps.insert(Capability::NetworkIsolation);
        }
        caps
    }

    async fn list_tools(&self) -> Result<Vec<ToolSummary>, ExecutorError> {
        let value = self.client().await?.get_json("/tools").await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn search_tools(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ToolSummary>, ExecutorError> {
        let path = format!("/tools/search?q={}&limit={limit}", urlencode(query));
        let value = self.client().await?.get_json(&path).await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn list_deps(&self) -> Result<Vec<String>, ExecutorError> {
        let value = self.client().await?.get_json("/deps").await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn add_dep(&self, spec: &str) -> Result<SyncReport, ExecutorError> {
        let body = json!({"spec": spec});
        let value = self.client().await?.post_json("/deps", &body).await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }

    async fn remove_dep(&self, spec: &str) -> Result<bool, ExecutorError> {
        let path = format!("/deps/{}", urlencode(spec));
        let value = self.client().await?.delete_json(&path).await?;
        Ok(value
            .get("removed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn sync_deps(&self) -> Result<SyncReport, ExecutorError> {
        let value = self
            .client()
            .await?
            .post_json("/deps/sync", &json!({}))
            .await?;
        serde_json::from_value(value).map_err(|e| ExecutorError::Transport(e.to_string()))
    }
}

fn urlencode(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_file_storage() {
        let config = ContainerConfig {
            tools_path: Some("/host/tools".into()),
            memory: Some("512m".into()),
            cpus: Some(1.5),
            ..Default::default()
        };
        let executor = ContainerExecutor::new(config);
        let access = StorageAccess::File {
            base_path: "/host/data".into(),
        };
        let args = executor.run_args("codemode-test", 18080, &access, Some("tok"));

        let joined = args.join(" ");
        assert!(joined.contains("--publish 127.0.0.1:18080:8080"));
        assert!(joined.contains(&format!("/host/data:{CONTAINER_STORAGE_PATH}")));
        assert!(joined.contains(&format!("/host/tools:{CONTAINER_TOOLS_PATH}:ro")));
        assert!(joined.contains("CODEMODE_AUTH_TOKEN=tok"));
        assert!(joined.contains("--memory 512m"));
        assert!(joined.contains("--cpus 1.5"));
        // The in-container descriptor points at the mount, not the host path
        assert!(joined.contains(CONTAINER_STORAGE_PATH));
        assert!(!joined.contains("CODEMODE_AUTH_DISABLED"));
        assert_eq!(
            args.last().map(String::as_str),
            Some(super::super::config::DEFAULT_IMAGE)
        );
    }

    #[test]
    fn test_run_args_kv_storage_rewrites_localhost() {
        let executor = ContainerExecutor::new(ContainerConfig::default());
        let access = StorageAccess::Kv {
            connection_url: "redis://localhost:6379/0".into(),
            prefix: "codemode".into(),
        };
        let args = executor.run_args("codemode-test", 18080, &access, None);
        let joined = args.join(" ");
        assert!(joined.contains("host.docker.internal"));
        assert!(joined.contains("CODEMODE_AUTH_DISABLED=true"));
    }

    #[test]
    fn test_run_args_network_disabled() {
        let config = ContainerConfig {
            network_disabled: true,
            ..Default::default()
        };
        let executor = ContainerExecutor::new(config);
        let access = StorageAccess::File {
            base_path: "/d".into(),
        };
        let args = executor.run_args("n", 1, &access, None);
        assert!(args.join(" ").contains("--network none"));
    }

    #[test]
    fn test_capabilities_follow_network_flag() {
        let executor = ContainerExecutor::new(ContainerConfig::default());
        assert!(!executor.supports(Capability::NetworkIsolation));
        assert!(executor.supports(Capability::ContainerIsolation));

        let executor = ContainerExecutor::new(ContainerConfig {
            network_disabled: true,
            ..Default::default()
        });
        assert!(executor.supports(Capability::NetworkIsolation));
    }

    #[tokio::test]
    async fn test_methods_after_close() {
        let mut executor = ContainerExecutor::new(ContainerConfig::default());
        executor.close().await.unwrap();
        executor.close().await.unwrap();
        assert!(matches!(
            executor.execute("1", None).await.unwrap_err(),
            ExecutorError::Closed
        ));
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("lua-cjson"), "lua-cjson");
        assert_eq!(urlencode("a b/c"), "a%20b%2Fc");
    }
}
