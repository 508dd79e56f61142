//! The `tools` namespace
//!
//! `tools.list()`, `tools.search(query[, limit])`, the escape hatch
//! `tools.curl{url = "..."}` and recipe dispatch `tools.curl.get{...}`.
//! Attribute access is metatable-driven: `tools.<name>` builds a proxy
//! whose `__call` is the escape hatch and whose `__index` resolves
//! recipes. The Lua surface is synchronous; calls bridge onto the runtime
//! through the captured handle.

use std::sync::Arc;

use mlua::prelude::*;
use tokio::runtime::Handle;

use super::convert::{json_to_lua, table_to_args};
use crate::tools::ToolRegistry;

const DEFAULT_SEARCH_LIMIT: usize = 10;

pub(crate) fn register(lua: &Lua, registry: Arc<ToolRegistry>, handle: Handle) -> LuaResult<()> {
    let tools = lua.create_table()?;

    {
        let registry = Arc::clone(&registry);
        let list = lua.create_function(move |lua, ()| {
            let summaries = serde_json::to_value(registry.list()).map_err(LuaError::external)?;
            json_to_lua(lua, &summaries)
        })?;
        tools.set("list", list)?;
    }

    {
        let registry = Arc::clone(&registry);
        let search = lua.create_function(move |lua, (query, limit): (String, Option<usize>)| {
            let results = registry.search(&query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
            let summaries = serde_json::to_value(results).map_err(LuaError::external)?;
            json_to_lua(lua, &summaries)
        })?;
        tools.set("search", search)?;
    }

    let metatable = lua.create_table()?;
    {
        let index = lua.create_function(move |lua, (_tools, name): (LuaTable, String)| {
            make_tool_proxy(lua, name, Arc::clone(&registry), handle.clone())
        })?;
        metatable.set("__index", index)?;
    }
    tools.set_metatable(Some(metatable));

    lua.globals().set("tools", tools)
}

fn make_tool_proxy(
    lua: &Lua,
    tool: String,
    registry: Arc<ToolRegistry>,
    handle: Handle,
) -> LuaResult<LuaTable> {
    let proxy = lua.create_table()?;
    let metatable = lua.create_table()?;

    {
        let tool = tool.clone();
        let registry = Arc::clone(&registry);
        let handle = handle.clone();
        let call =
            lua.create_function(move |lua, (_this, args): (LuaTable, Option<LuaTable>)| {
                invoke(lua, &registry, &handle, &tool, None, args)
            })?;
        metatable.set("__call", call)?;
    }

    {
        let index = lua.create_function(move |lua, (_this, recipe): (LuaTable, String)| {
            let tool = tool.clone();
            let registry = Arc::clone(&registry);
            let handle = handle.clone();
            lua.create_function(move |lua, args: Option<LuaTable>| {
                invoke(lua, &registry, &handle, &tool, Some(&recipe), args)
            })
        })?;
        metatable.set("__index", index)?;
    }

    proxy.set_metatable(Some(metatable));
    Ok(proxy)
}

fn invoke(
    lua: &Lua,
    registry: &ToolRegistry,
    handle: &Handle,
    tool: &str,
    recipe: Option<&str>,
    args: Option<LuaTable>,
) -> LuaResult<LuaValue> {
    let args = match args {
        Some(table) => table_to_args(&table)?,
        None => serde_json::Map::new(),
    };
    let result = handle
        .block_on(registry.call(tool, recipe, &args))
        .map_err(LuaError::external)?;
    json_to_lua(lua, &result)
}
