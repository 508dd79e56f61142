//! Skill catalog port
//!
//! The catalog is the parsed, searchable view over a skill store: it
//! compiles sources, derives `run` signatures, tracks corrupt entries, and
//! ranks search results (semantically when an embedder is configured).

use async_trait::async_trait;
use codemode_domain::{Skill, SkillError, SkillSummary, StorageError};

#[async_trait]
pub trait SkillCatalog: Send + Sync {
    /// Reload from the store and rebuild the search index
    async fn refresh(&self) -> Result<(), StorageError>;

    /// All skills, including corrupt entries (with `error` set)
    async fn list(&self) -> Vec<SkillSummary>;

    /// Ranked search; degrades to substring match without an embedder
    async fn search(&self, query: &str, limit: usize) -> Vec<SkillSummary>;

    /// Full record including source
    async fn get(&self, name: &str) -> Option<Skill>;

    /// Validate, persist, and index a new skill
    async fn create(
        &self,
        name: &str,
        source: &str,
        description: &str,
        overwrite: bool,
    ) -> Result<Skill, SkillError>;

    /// Idempotent; returns false when absent
    async fn remove(&self, name: &str) -> Result<bool, StorageError>;
}
