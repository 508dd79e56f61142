//! Kernel wire protocol
//!
//! Line-delimited JSON, strictly request/response in order: the host never
//! pipelines, so correlation ids exist mainly to catch desync bugs. The
//! kernel emits one `{"event":"ready"}` line before serving.

use std::path::PathBuf;

use codemode_domain::StorageAccess;
use serde::{Deserialize, Serialize};

pub const READY_EVENT: &str = "ready";

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelEvent {
    pub event: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Infrastructure fault crossing the kernel boundary; `kind` uses the
/// wire taxonomy names so the host can reconstruct typed errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelFault {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<KernelFault>,
}

impl KernelResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: u64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(KernelFault {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }
}

/// `bootstrap` parameters: everything a fresh interpreter needs to rebuild
/// the same namespaces the host would see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapParams {
    pub storage: StorageAccess,
    #[serde(default)]
    pub tools_path: Option<PathBuf>,
    pub allow_runtime_deps: bool,
    #[serde(default)]
    pub deps_tree: Option<PathBuf>,
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteParams {
    pub code: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpecParams {
    pub spec: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        let ok = KernelResponse::ok(3, serde_json::json!({"x": 1}));
        let wire = serde_json::to_value(&ok).unwrap();
        assert_eq!(wire["id"], 3);
        assert!(wire.get("error").is_none());

        let fail = KernelResponse::fail(4, "TransportError", "pipe closed");
        let wire = serde_json::to_value(&fail).unwrap();
        assert_eq!(wire["error"]["kind"], "TransportError");
        assert!(wire.get("result").is_none());
    }

    #[test]
    fn test_bootstrap_params_round_trip() {
        let params = BootstrapParams {
            storage: StorageAccess::File {
                base_path: "/data".into(),
            },
            tools_path: Some("/data/tools".into()),
            allow_runtime_deps: false,
            deps_tree: None,
            default_timeout_ms: Some(60_000),
        };
        let wire = serde_json::to_string(&params).unwrap();
        let back: BootstrapParams = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.storage, params.storage);
        assert!(!back.allow_runtime_deps);
    }
}
