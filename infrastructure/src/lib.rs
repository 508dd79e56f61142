//! Infrastructure layer for codemode
//!
//! Concrete implementations behind the application ports: file and Redis
//! storage, the tool adapters and registry, the Lua execution engine with
//! the injected agent namespaces, the dependency controller with its
//! LuaRocks installer, the three executor backends, the cross-process
//! bootstrap, and the container session server.

pub mod bootstrap;
pub mod deps;
pub mod execution;
pub mod scripting;
pub mod server;
pub mod skills;
pub mod storage;
pub mod tools;
mod util;

// Re-export commonly used types
pub use bootstrap::{build_namespaces, open_storage, NamespaceOptions, NamespaceSet};
pub use deps::{DepsController, LuaRocksInstaller};
pub use execution::{
    ContainerConfig, ContainerExecutor, InProcessConfig, InProcessExecutor, SubprocessConfig,
    SubprocessExecutor,
};
pub use scripting::{EngineNamespaces, LuaEngine};
pub use server::{ServerConfig, ServerError};
pub use skills::{HashEmbedder, SkillLibrary};
pub use storage::{FileStorage, KvStorage};
pub use tools::ToolRegistry;
