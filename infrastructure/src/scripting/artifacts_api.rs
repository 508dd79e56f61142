//! The `artifacts` namespace
//!
//! `save(name, data[, description[, metadata]])`, `load`, `list`,
//! `delete`. Lua strings persist as raw bytes; tables, numbers, and
//! booleans are JSON-encoded with a `kind = "json"` metadata marker so
//! `load` round-trips them back into Lua values.

use std::sync::Arc;

use codemode_application::ArtifactStore;
use mlua::prelude::*;
use tokio::runtime::Handle;

use super::convert::{json_to_lua, lua_to_json};

const KIND_KEY: &str = "kind";
const KIND_BYTES: &str = "bytes";
const KIND_JSON: &str = "json";

pub(crate) fn register(lua: &Lua, store: Arc<dyn ArtifactStore>, handle: Handle) -> LuaResult<()> {
    let artifacts = lua.create_table()?;

    {
        let store = Arc::clone(&store);
        let handle = handle.clone();
        let save = lua.create_function(
            move |lua,
                  (name, data, description, metadata): (
                String,
                LuaValue,
                Option<String>,
                Option<LuaTable>,
            )| {
                let (bytes, kind) = encode(&data)?;

                let mut meta_map = serde_json::Map::new();
                if let Some(metadata) = metadata {
                    for pair in metadata.pairs::<String, LuaValue>() {
                        let (key, value) = pair?;
                        meta_map.insert(key, lua_to_json(&value));
                    }
                }
                meta_map
                    .entry(KIND_KEY.to_string())
                    .or_insert_with(|| serde_json::Value::String(kind.to_string()));

                let meta = handle
                    .block_on(store.save(
                        &name,
                        &bytes,
                        description.as_deref().unwrap_or(""),
                        meta_map,
                    ))
                    .map_err(LuaError::external)?;
                json_to_lua(lua, &serde_json::to_value(meta).map_err(LuaError::external)?)
            },
        )?;
        artifacts.set("save", save)?;
    }

    {
        let store = Arc::clone(&store);
        let handle = handle.clone();
        let load = lua.create_function(move |lua, name: String| {
            let (data, meta) = handle
                .block_on(store.load(&name))
                .map_err(LuaError::external)?;
            let kind = meta
                .metadata
                .get(KIND_KEY)
                .and_then(|v| v.as_str())
                .unwrap_or(KIND_BYTES);
            if kind == KIND_JSON {
                let value: serde_json::Value =
                    serde_json::from_slice(&data).map_err(LuaError::external)?;
                json_to_lua(lua, &value)
            } else {
                Ok(LuaValue::String(lua.create_string(&data)?))
            }
        })?;
        artifacts.set("load", load)?;
    }

    {
        let store = Arc::clone(&store);
        let handle = handle.clone();
        let list = lua.create_function(move |lua, ()| {
            let metas = handle.block_on(store.list()).map_err(LuaError::external)?;
            json_to_lua(lua, &serde_json::to_value(metas).map_err(LuaError::external)?)
        })?;
        artifacts.set("list", list)?;
    }

    {
        let delete = lua.create_function(move |_lua, name: String| {
            handle
                .block_on(store.delete(&name))
                .map_err(LuaError::external)
        })?;
        artifacts.set("delete", delete)?;
    }

    lua.globals().set("artifacts", artifacts)
}

fn encode(data: &LuaValue) -> LuaResult<(Vec<u8>, &'static str)> {
    match data {
        LuaValue::String(s) => Ok((s.as_bytes().to_vec(), KIND_BYTES)),
        LuaValue::Table(_) | LuaValue::Number(_) | LuaValue::Integer(_) | LuaValue::Boolean(_) => {
            let json = lua_to_json(data);
            let bytes = serde_json::to_vec(&json).map_err(LuaError::external)?;
            Ok((bytes, KIND_JSON))
        }
        other => Err(LuaError::RuntimeError(format!(
            "cannot persist a {} as an artifact",
            other.type_name()
        ))),
    }
}
