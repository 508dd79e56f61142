//! Dependency management: controller and the LuaRocks installer

mod controller;
mod luarocks;

pub use controller::DepsController;
pub use luarocks::{tree_lua_cpath, tree_lua_path, LuaRocksInstaller};
