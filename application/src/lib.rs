//! Application layer for codemode
//!
//! Port definitions and the session orchestrator use case. Depends only on
//! the domain layer; concrete storage, interpreters, and transports plug in
//! from infrastructure.

pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use ports::{
    ArtifactStore, DepsStore, EmbeddingError, EmbeddingProvider, Executor, ExecutorError,
    PackageInstaller, SkillCatalog, SkillStore, StorageBackend, StoredSkill, StoredVector,
};
pub use use_cases::{Session, SessionError, SessionOptions};
