//! Host-side container configuration

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "codemode-server:latest";

/// In-container mount points, shared with the `docker run` invocation and
/// the rewritten storage descriptor.
pub(crate) const CONTAINER_STORAGE_PATH: &str = "/workspace/storage";
pub(crate) const CONTAINER_TOOLS_PATH: &str = "/workspace/tools";
pub(crate) const CONTAINER_PORT: u16 = 8080;

#[derive(Clone)]
pub struct ContainerConfig {
    pub image: String,
    /// Docker CLI binary
    pub docker_bin: String,
    /// Host port to bind; picked automatically when absent
    pub port: Option<u16>,
    /// Directory of tool YAML files, mounted read-only into the container
    pub tools_path: Option<PathBuf>,
    /// Applied when `execute` is called without an explicit timeout
    pub default_timeout: Option<Duration>,
    pub startup_timeout: Duration,
    pub health_check_interval: Duration,
    pub allow_runtime_deps: bool,
    /// `--memory` limit, e.g. "512m"
    pub memory: Option<String>,
    /// `--cpus` limit
    pub cpus: Option<f64>,
    /// Run with `--network none`; advertised as network isolation
    pub network_disabled: bool,
    /// Bearer token; generated at start when absent and auth not disabled
    pub auth_token: Option<String>,
    /// Explicit opt-out for local development only
    pub auth_disabled: bool,
    /// Talk to an already-running session server instead of Docker
    pub remote_url: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.into(),
            docker_bin: "docker".into(),
            port: None,
            tools_path: None,
            default_timeout: Some(Duration::from_secs(30)),
            startup_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_millis(500),
            allow_runtime_deps: true,
            memory: None,
            cpus: None,
            network_disabled: false,
            auth_token: None,
            auth_disabled: false,
            remote_url: None,
        }
    }
}

/// Containers resolve `localhost` to themselves; rewrite KV URLs so the
/// container reaches services on the host (Linux additionally needs the
/// `host-gateway` mapping the executor passes to `docker run`).
pub(crate) fn rewrite_localhost_for_container(url: &str) -> String {
    url.replacen("://localhost", "://host.docker.internal", 1)
        .replacen("://127.0.0.1", "://host.docker.internal", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_rewrite() {
        assert_eq!(
            rewrite_localhost_for_container("redis://localhost:6379/0"),
            "redis://host.docker.internal:6379/0"
        );
        assert_eq!(
            rewrite_localhost_for_container("redis://127.0.0.1:6379"),
            "redis://host.docker.internal:6379"
        );
        assert_eq!(
            rewrite_localhost_for_container("redis://db.internal:6379"),
            "redis://db.internal:6379"
        );
    }
}
