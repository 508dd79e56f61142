//! Bearer-token authentication
//!
//! Applied as a middleware layer over the whole route table. Token
//! comparison is constant-time so response timing leaks nothing about
//! prefix matches.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;

/// Constant-time byte comparison; always walks the longer input
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

pub(crate) async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.auth_token else {
        // Auth explicitly disabled at startup
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => reject("AuthInvalid", "bearer token rejected"),
        None => reject("AuthRequired", "missing Authorization: Bearer header"),
    }
}

fn reject(kind: &str, message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": kind, "message": message})),
    )
        .into_response()
}
