//! Route handlers
//!
//! Thin wrappers over the session facade. User-code failures ride inside
//! the `ExecutionResult` body; infrastructure and validation failures map
//! onto HTTP statuses (401 auth, 403 policy, 404 missing, 408 timeout,
//! 409 conflict/invalid state, 422 malformed, 500 fault).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use codemode_application::SessionError;
use codemode_domain::{DepsError, ErrorKind, SkillError, StorageError};
use serde::Deserialize;
use serde_json::json;

use super::auth::require_bearer;
use super::AppState;

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/reset", post(reset))
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/search", get(search_tools))
        .route("/skills", get(list_skills).post(create_skill))
        .route("/skills/search", get(search_skills))
        .route("/skills/:name", get(get_skill).delete(delete_skill))
        .route("/artifacts", get(list_artifacts).post(save_artifact))
        .route(
            "/artifacts/:name",
            get(load_artifact).delete(delete_artifact),
        )
        .route("/deps", get(list_deps).post(add_dep))
        .route("/deps/sync", post(sync_deps))
        .route("/deps/:name", delete(remove_dep))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_bearer,
        ))
        .with_state(state)
}

// ----------------------------------------------------------------------
// Error mapping
// ----------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": self.kind, "message": self.message})),
        )
            .into_response()
    }
}

fn map_session_error(error: SessionError) -> ApiError {
    use codemode_application::ExecutorError;

    match &error {
        SessionError::Closed => ApiError::new(
            StatusCode::CONFLICT,
            "InvalidRequest",
            "session is closed",
        ),
        SessionError::Executor(ExecutorError::Deps(DepsError::RuntimeDisabled)) => ApiError::new(
            StatusCode::FORBIDDEN,
            "RuntimeDepsDisabled",
            error.to_string(),
        ),
        SessionError::Executor(ExecutorError::Deps(DepsError::InvalidSpec(_))) => {
            ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "InvalidDepSpec", error.to_string())
        }
        SessionError::Executor(ExecutorError::Deps(DepsError::Install { .. })) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "InstallFailed", error.to_string())
        }
        SessionError::Executor(ExecutorError::Storage(StorageError::NotFound(_)))
        | SessionError::Storage(StorageError::NotFound(_)) => {
            ApiError::new(StatusCode::NOT_FOUND, "NotFound", error.to_string())
        }
        SessionError::Storage(StorageError::Conflict(_)) => {
            ApiError::new(StatusCode::CONFLICT, "InvalidRequest", error.to_string())
        }
        SessionError::Skill(skill) => match skill {
            SkillError::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "NotFound", error.to_string())
            }
            SkillError::Duplicate(_) => {
                ApiError::new(StatusCode::CONFLICT, "DuplicateSkill", error.to_string())
            }
            SkillError::InvalidName(_) | SkillError::InvalidSource { .. } => ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "InvalidRequest",
                error.to_string(),
            ),
            _ => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SkillError",
                error.to_string(),
            ),
        },
        _ => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ExecutorUnavailable",
            error.to_string(),
        ),
    }
}

// ----------------------------------------------------------------------
// Execution
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct ExecuteBody {
    code: String,
    /// Seconds; the server default applies when absent
    timeout: Option<f64>,
}

async fn execute(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExecuteBody>,
) -> Result<Response, ApiError> {
    if state.resetting.load(Ordering::SeqCst) {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "InvalidRequest",
            "reset in progress",
        ));
    }
    let timeout = body
        .timeout
        .map(Duration::from_secs_f64)
        .or(state.default_timeout);
    let result = state
        .session
        .run(&body.code, timeout)
        .await
        .map_err(map_session_error)?;

    let status = match result.error.as_ref().map(|e| e.kind) {
        Some(ErrorKind::Timeout) => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)).into_response())
}

async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.resetting.store(true, Ordering::SeqCst);
    let outcome = state.session.reset().await;
    state.resetting.store(false, Ordering::SeqCst);
    outcome.map_err(map_session_error)?;
    Ok(Json(json!({"ok": true})))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
    }))
}

// ----------------------------------------------------------------------
// Tools
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

async fn list_tools(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tools = state
        .session
        .list_tools()
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(tools)))
}

async fn search_tools(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tools = state
        .session
        .search_tools(&query.q, query.limit.unwrap_or(10))
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(tools)))
}

// ----------------------------------------------------------------------
// Skills
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateSkillBody {
    name: String,
    source: String,
    #[serde(default)]
    description: String,
}

async fn list_skills(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let skills = state
        .session
        .list_skills()
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(skills)))
}

async fn search_skills(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let skills = state
        .session
        .search_skills(&query.q, query.limit.unwrap_or(5))
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(skills)))
}

async fn get_skill(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state
        .session
        .get_skill(&name)
        .await
        .map_err(map_session_error)?
    {
        Some(skill) => Ok(Json(json!(skill))),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NotFound",
            format!("skill '{name}' not found"),
        )),
    }
}

async fn create_skill(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSkillBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let skill = state
        .session
        .add_skill(&body.name, &body.source, &body.description)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(skill)))
}

async fn delete_skill(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .session
        .remove_skill(&name)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!({"deleted": deleted})))
}

// ----------------------------------------------------------------------
// Artifacts
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct SaveArtifactBody {
    name: String,
    /// Raw text, or base64 when `base64` is set
    data: String,
    #[serde(default)]
    base64: bool,
    #[serde(default)]
    description: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

async fn list_artifacts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let artifacts = state
        .session
        .list_artifacts()
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(artifacts)))
}

async fn save_artifact(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SaveArtifactBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let data = if body.base64 {
        BASE64.decode(&body.data).map_err(|e| {
            ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "InvalidRequest",
                format!("bad base64 payload: {e}"),
            )
        })?
    } else {
        body.data.into_bytes()
    };
    let meta = state
        .session
        .save_artifact(&body.name, &data, &body.description, body.metadata)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(meta)))
}

async fn load_artifact(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let artifact = state
        .session
        .load_artifact(&name)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!({
        "name": artifact.meta.name,
        "data": BASE64.encode(&artifact.data),
        "description": artifact.meta.description,
        "metadata": artifact.meta.metadata,
        "created_at": artifact.meta.created_at,
    })))
}

async fn delete_artifact(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .session
        .delete_artifact(&name)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!({"deleted": deleted})))
}

// ----------------------------------------------------------------------
// Deps
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct AddDepBody {
    spec: String,
}

async fn list_deps(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deps = state.session.list_deps().await.map_err(map_session_error)?;
    Ok(Json(json!(deps)))
}

async fn add_dep(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddDepBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state
        .session
        .add_dep(&body.spec)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!(report)))
}

async fn remove_dep(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .session
        .remove_dep(&name)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!({"removed": removed})))
}

async fn sync_deps(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.session.sync_deps().await.map_err(map_session_error)?;
    Ok(Json(json!(report)))
}
