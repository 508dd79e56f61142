//! The `deps` namespace
//!
//! `add(spec)`, `remove(spec)`, `list()`, `sync()`. The controller behind
//! this table enforces the runtime-mutation policy; its internals are Rust
//! state that Lua code has no way to reach, so there is no bypass surface
//! beyond these four functions.

use std::sync::Arc;

use mlua::prelude::*;
use tokio::runtime::Handle;

use super::convert::json_to_lua;
use crate::deps::DepsController;

pub(crate) fn register(lua: &Lua, deps: Arc<DepsController>, handle: Handle) -> LuaResult<()> {
    let table = lua.create_table()?;

    {
        let deps = Arc::clone(&deps);
        let handle = handle.clone();
        let add = lua.create_function(move |lua, spec: String| {
            let report = handle
                .block_on(deps.add(&spec))
                .map_err(LuaError::external)?;
            json_to_lua(lua, &serde_json::to_value(report).map_err(LuaError::external)?)
        })?;
        table.set("add", add)?;
    }

    {
        let deps = Arc::clone(&deps);
        let handle = handle.clone();
        let remove = lua.create_function(move |_lua, spec: String| {
            handle
                .block_on(deps.remove(&spec))
                .map_err(LuaError::external)
        })?;
        table.set("remove", remove)?;
    }

    {
        let deps = Arc::clone(&deps);
        let handle = handle.clone();
        let list = lua.create_function(move |lua, ()| {
            let specs = handle.block_on(deps.list()).map_err(LuaError::external)?;
            json_to_lua(lua, &serde_json::to_value(specs).map_err(LuaError::external)?)
        })?;
        table.set("list", list)?;
    }

    {
        let sync = lua.create_function(move |lua, ()| {
            let report = handle.block_on(deps.sync()).map_err(LuaError::external)?;
            json_to_lua(lua, &serde_json::to_value(report).map_err(LuaError::external)?)
        })?;
        table.set("sync", sync)?;
    }

    lua.globals().set("deps", table)
}
