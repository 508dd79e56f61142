//! Storage backend ports
//!
//! A [`StorageBackend`] bundles the three persisted stores (skills,
//! artifacts, deps) plus the skill catalog built on top of them, and can
//! describe itself as a serializable [`StorageAccess`] so a fresh process
//! reopens identical stores.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codemode_domain::{ArtifactMeta, DepSpec, StorageAccess, StorageError};

use super::skill_catalog::SkillCatalog;

/// Raw persisted form of a skill; parsing into a domain `Skill` happens in
/// the catalog so corrupt sources degrade instead of failing loads.
#[derive(Debug, Clone)]
pub struct StoredSkill {
    pub name: String,
    pub source: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Cached embedding for one skill, keyed by a content hash of
/// `source + description`
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub content_hash: String,
    pub vector: Vec<f32>,
}

/// Persistence for skill sources and their embedding cache
#[async_trait]
pub trait SkillStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<StoredSkill>, StorageError>;
    async fn put(&self, skill: &StoredSkill) -> Result<(), StorageError>;
    /// Idempotent; returns false when absent
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;
    async fn list(&self) -> Result<Vec<StoredSkill>, StorageError>;
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    async fn get_vector(&self, name: &str) -> Result<Option<StoredVector>, StorageError>;
    async fn put_vector(&self, name: &str, vector: &StoredVector) -> Result<(), StorageError>;
    async fn delete_vector(&self, name: &str) -> Result<(), StorageError>;
}

/// Persistence for named blobs
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(
        &self,
        name: &str,
        data: &[u8],
        description: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ArtifactMeta, StorageError>;
    async fn load(&self, name: &str) -> Result<(Vec<u8>, ArtifactMeta), StorageError>;
    /// Idempotent; returns false when absent
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;
    async fn list(&self) -> Result<Vec<ArtifactMeta>, StorageError>;
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;
}

/// Persistence for declared dependencies. Deduplicated by package name;
/// adding an existing name replaces its constraint.
#[async_trait]
pub trait DepsStore: Send + Sync {
    async fn list(&self) -> Result<Vec<DepSpec>, StorageError>;
    async fn add(&self, spec: &DepSpec) -> Result<(), StorageError>;
    /// Idempotent; returns false when absent
    async fn remove(&self, name: &str) -> Result<bool, StorageError>;
}

/// A unified storage backend over the three logical stores
pub trait StorageBackend: Send + Sync {
    fn skills(&self) -> Arc<dyn SkillStore>;
    fn artifacts(&self) -> Arc<dyn ArtifactStore>;
    fn deps(&self) -> Arc<dyn DepsStore>;

    /// The skill catalog built over this backend's skill store; shared so
    /// the session facade and the executor namespace see the same index.
    fn skill_catalog(&self) -> Arc<dyn SkillCatalog>;

    /// Serializable descriptor sufficient to reopen these stores in
    /// another process.
    fn access(&self) -> StorageAccess;
}
