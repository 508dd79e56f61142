//! Port definitions for the application layer

pub mod embedder;
pub mod executor;
pub mod installer;
pub mod skill_catalog;
pub mod storage;

pub use embedder::{EmbeddingError, EmbeddingProvider};
pub use executor::{Executor, ExecutorError};
pub use installer::PackageInstaller;
pub use skill_catalog::SkillCatalog;
pub use storage::{ArtifactStore, DepsStore, SkillStore, StorageBackend, StoredSkill, StoredVector};
