//! Container session server
//!
//! The HTTP surface that runs inside the execution container (and works
//! just as well on a plain host): `/execute`, `/reset`, `/health`, plus
//! CRUD over tools, skills, artifacts, and deps. Every route requires a
//! bearer token unless auth was explicitly disabled; a server with neither
//! refuses to start.

mod auth;
mod routes;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use codemode_application::{Session, SessionError, SessionOptions};
use codemode_domain::StorageAccess;
use thiserror::Error;
use tracing::info;

use crate::bootstrap::open_storage;
use crate::execution::{InProcessConfig, InProcessExecutor};

pub use auth::constant_time_eq;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("auth not configured: set CODEMODE_AUTH_TOKEN or CODEMODE_AUTH_DISABLED=true")]
    AuthNotConfigured,

    #[error("invalid server configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration, usually read from `CODEMODE_*` environment
/// variables inside the container.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageAccess,
    pub tools_path: Option<PathBuf>,
    pub allow_runtime_deps: bool,
    pub default_timeout: Option<Duration>,
    pub sync_deps_on_start: bool,
    pub auth_token: Option<String>,
    pub auth_disabled: bool,
}

impl ServerConfig {
    pub fn new(storage: StorageAccess) -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            storage,
            tools_path: None,
            allow_runtime_deps: true,
            default_timeout: Some(Duration::from_secs(30)),
            sync_deps_on_start: true,
            auth_token: None,
            auth_disabled: false,
        }
    }

    /// Load from environment. Fail-closed: missing auth configuration is a
    /// startup error, never an open server.
    pub fn from_env() -> Result<Self, ServerError> {
        let storage = match std::env::var("CODEMODE_STORAGE") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| ServerError::Config(format!("bad CODEMODE_STORAGE: {e}")))?,
            Err(_) => match std::env::var("CODEMODE_BASE_PATH") {
                Ok(base) => StorageAccess::File {
                    base_path: base.into(),
                },
                Err(_) => {
                    return Err(ServerError::Config(
                        "set CODEMODE_STORAGE (JSON descriptor) or CODEMODE_BASE_PATH".into(),
                    ))
                }
            },
        };

        let mut config = Self::new(storage);
        if let Ok(host) = std::env::var("CODEMODE_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("CODEMODE_PORT") {
            config.port = port
                .parse()
                .map_err(|e| ServerError::Config(format!("bad CODEMODE_PORT: {e}")))?;
        }
        if let Ok(tools) = std::env::var("CODEMODE_TOOLS_PATH") {
            config.tools_path = Some(tools.into());
        }
        if let Ok(allow) = std::env::var("CODEMODE_ALLOW_RUNTIME_DEPS") {
            config.allow_runtime_deps = matches!(allow.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(timeout) = std::env::var("CODEMODE_DEFAULT_TIMEOUT_SECS") {
            let secs: f64 = timeout
                .parse()
                .map_err(|e| ServerError::Config(format!("bad CODEMODE_DEFAULT_TIMEOUT_SECS: {e}")))?;
            config.default_timeout = Some(Duration::from_secs_f64(secs));
        }

        config.auth_token = std::env::var("CODEMODE_AUTH_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        config.auth_disabled = std::env::var("CODEMODE_AUTH_DISABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        config.validate_auth()?;
        Ok(config)
    }

    /// The fail-closed rule: a token, or an explicit opt-out
    pub fn validate_auth(&self) -> Result<(), ServerError> {
        if self.auth_token.is_none() && !self.auth_disabled {
            return Err(ServerError::AuthNotConfigured);
        }
        Ok(())
    }
}

/// Shared state behind every handler
pub struct AppState {
    pub(crate) session: Session,
    /// `None` means auth was explicitly disabled
    pub(crate) auth_token: Option<String>,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) resetting: AtomicBool,
    pub(crate) started_at: Instant,
}

/// Open storage, start the in-process executor, and assemble the state.
/// Auth is validated first so a misconfigured server never touches the
/// executor.
pub async fn build_state(config: &ServerConfig) -> Result<Arc<AppState>, ServerError> {
    config.validate_auth()?;

    let storage = open_storage(&config.storage)
        .await
        .map_err(|e| ServerError::Config(e.to_string()))?;
    let executor = InProcessExecutor::new(InProcessConfig {
        tools_path: config.tools_path.clone(),
        default_timeout: config.default_timeout,
        allow_runtime_deps: config.allow_runtime_deps,
        deps_tree: None,
        installer: None,
    });
    let session = Session::open(
        storage,
        Box::new(executor),
        SessionOptions {
            sync_deps_on_start: config.sync_deps_on_start,
        },
    )
    .await?;

    Ok(Arc::new(AppState {
        session,
        auth_token: config.auth_token.clone(),
        default_timeout: config.default_timeout,
        resetting: AtomicBool::new(false),
        started_at: Instant::now(),
    }))
}

/// The full route table with the bearer-auth layer applied
pub fn router(state: Arc<AppState>) -> Router {
    routes::router(state)
}

/// Run the server until ctrl-c
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let state = build_state(&config).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        auth = if config.auth_disabled { "disabled" } else { "bearer" },
        "session server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config(dir: &tempfile::TempDir) -> ServerConfig {
        ServerConfig::new(StorageAccess::File {
            base_path: dir.path().to_path_buf(),
        })
    }

    /// No token and no explicit opt-out refuses to start
    #[tokio::test]
    async fn test_fail_closed_without_auth() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        assert!(matches!(
            config.validate_auth(),
            Err(ServerError::AuthNotConfigured)
        ));
        assert!(matches!(
            build_state(&config).await,
            Err(ServerError::AuthNotConfigured)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_starts_with_token_or_explicit_opt_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = file_config(&dir);
        config.sync_deps_on_start = false;
        config.auth_token = Some("T".into());
        assert!(build_state(&config).await.is_ok());

        let mut config = file_config(&dir);
        config.sync_deps_on_start = false;
        config.auth_disabled = true;
        assert!(build_state(&config).await.is_ok());
    }

    #[test]
    fn test_empty_token_is_not_auth() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = file_config(&dir);
        config.auth_token = Some(String::new()).filter(|t| !t.is_empty());
        assert!(config.validate_auth().is_err());
    }
}
