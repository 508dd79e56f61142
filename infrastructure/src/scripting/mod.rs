//! The Lua execution engine and the injected agent namespaces
//!
//! `LuaEngine` owns one Lua 5.4 VM with the four namespace tables
//! (`tools`, `skills`, `artifacts`, `deps`) installed as globals. The VM's
//! globals table is the execution namespace: long-lived, accumulating user
//! bindings across executions, and the environment skills run against.

mod artifacts_api;
mod convert;
mod deps_api;
mod engine;
mod sandbox;
mod skills_api;
mod tools_api;

pub use convert::{json_to_lua, lua_to_json};
pub use engine::{EngineNamespaces, LuaEngine};
pub use sandbox::apply_sandbox;
