//! Storage domain: access descriptors and the storage error taxonomy

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serializable descriptor that lets a fresh process reopen the same
/// stores. Passed to subprocess kernels and containers at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageAccess {
    File {
        base_path: PathBuf,
    },
    Kv {
        connection_url: String,
        prefix: String,
    },
}

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend endpoint not reachable
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("'{0}' not found")]
    NotFound(String),

    /// Invariant violation: empty name, duplicate entity, oversized payload
    #[error("conflict: {0}")]
    Conflict(String),

    /// A persisted entity failed to parse; degraded, never fatal for lists
    #[error("'{name}' is corrupt: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(String),
}

impl StorageError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StorageError::Unavailable(_) => "StorageUnavailable",
            StorageError::NotFound(_) => "NotFound",
            StorageError::Conflict(_) => "Conflict",
            StorageError::Corrupt { .. } => "Corrupt",
            StorageError::Io(_) => "StorageUnavailable",
            StorageError::Encoding(_) => "Corrupt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_round_trip() {
        let access = StorageAccess::Kv {
            connection_url: "redis://localhost:6379/0".into(),
            prefix: "codemode".into(),
        };
        let json = serde_json::to_string(&access).unwrap();
        assert!(json.contains("\"type\":\"kv\""));
        let back: StorageAccess = serde_json::from_str(&json).unwrap();
        assert_eq!(back, access);
    }

    #[test]
    fn test_file_access_tag() {
        let access = StorageAccess::File {
            base_path: PathBuf::from("/data"),
        };
        let json = serde_json::to_value(&access).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["base_path"], "/data");
    }
}
