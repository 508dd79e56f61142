//! Artifact domain: named persisted blobs with metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artifact metadata, stored beside the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// String keys to JSON scalars; `kind` distinguishes raw bytes from
    /// JSON-encoded values so loads round-trip structured data
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }
}

/// A named persisted blob
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub data: Vec<u8>,
}

/// Artifact names become file names and KV key segments; reject separators
/// and traversal outright.
pub fn is_valid_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains(':')
        && !name.contains('\0')
}
