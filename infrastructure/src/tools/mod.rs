//! Tool loading, argv construction, and the adapter registry

pub mod adapters;
mod builder;
mod loader;
mod registry;

pub use builder::CommandBuilder;
pub use loader::{load_tools_dir, parse_tool_yaml, ToolFile};
pub use registry::ToolRegistry;
