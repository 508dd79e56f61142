//! The `skills` namespace
//!
//! `skills.fetch_json{url = "..."}` sugar, plus the explicit surface:
//! `invoke`, `list`, `search`, `get`, `create`, `delete`. Invocation
//! executes the skill source in a fresh environment table chaining to the
//! VM globals, so skills see `tools`/`skills`/`artifacts`/`deps` and user
//! bindings, while each call gets its own argument binding (recursive
//! invocations never share call-local state).

use std::sync::Arc;

use codemode_application::SkillCatalog;
use codemode_domain::{Skill, SkillError};
use mlua::prelude::*;
use tokio::runtime::Handle;

use super::convert::json_to_lua;
use super::engine::carries_domain_error;

const DEFAULT_SEARCH_LIMIT: usize = 5;

pub(crate) fn register(lua: &Lua, catalog: Arc<dyn SkillCatalog>, handle: Handle) -> LuaResult<()> {
    let skills = lua.create_table()?;

    {
        let catalog = Arc::clone(&catalog);
        let handle = handle.clone();
        let list = lua.create_function(move |lua, ()| {
            let summaries = handle.block_on(catalog.list());
            json_to_lua(lua, &serde_json::to_value(summaries).map_err(LuaError::external)?)
        })?;
        skills.set("list", list)?;
    }

    {
        let catalog = Arc::clone(&catalog);
        let handle = handle.clone();
        let search = lua.create_function(move |lua, (query, limit): (String, Option<usize>)| {
            let results =
                handle.block_on(catalog.search(&query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT)));
            json_to_lua(lua, &serde_json::to_value(results).map_err(LuaError::external)?)
        })?;
        skills.set("search", search)?;
    }

    {
        let catalog = Arc::clone(&catalog);
        let handle = handle.clone();
        let get = lua.create_function(move |lua, name: String| {
            match handle.block_on(catalog.get(&name)) {
                Some(skill) => {
                    json_to_lua(lua, &serde_json::to_value(skill).map_err(LuaError::external)?)
                }
                None => Ok(LuaValue::Nil),
            }
        })?;
        skills.set("get", get)?;
    }

    {
        let catalog = Arc::clone(&catalog);
        let handle = handle.clone();
        let create = lua.create_function(
            move |lua, (name, source, description): (String, String, Option<String>)| {
                let skill = handle
                    .block_on(catalog.create(
                        &name,
                        &source,
                        description.as_deref().unwrap_or(""),
                        false,
                    ))
                    .map_err(LuaError::external)?;
                json_to_lua(
                    lua,
                    &serde_json::to_value(skill.summary()).map_err(LuaError::external)?,
                )
            },
        )?;
        skills.set("create", create)?;
    }

    {
        let catalog = Arc::clone(&catalog);
        let handle = handle.clone();
        let delete = lua.create_function(move |_lua, name: String| {
            handle
                .block_on(catalog.remove(&name))
                .map_err(LuaError::external)
        })?;
        skills.set("delete", delete)?;
    }

    {
        let catalog = Arc::clone(&catalog);
        let handle = handle.clone();
        let invoke = lua.create_function(
            move |lua, (name, args): (String, Option<LuaTable>)| {
                invoke_skill(lua, &catalog, &handle, &name, args)
            },
        )?;
        skills.set("invoke", invoke)?;
    }

    // skills.<name>{...} sugar: unknown keys resolve to an invoker
    let metatable = lua.create_table()?;
    {
        let index = lua.create_function(move |lua, (_skills, name): (LuaTable, String)| {
            let catalog = Arc::clone(&catalog);
            let handle = handle.clone();
            lua.create_function(move |lua, args: Option<LuaTable>| {
                invoke_skill(lua, &catalog, &handle, &name, args)
            })
        })?;
        metatable.set("__index", index)?;
    }
    skills.set_metatable(Some(metatable));

    lua.globals().set("skills", skills)
}

fn invoke_skill(
    lua: &Lua,
    catalog: &Arc<dyn SkillCatalog>,
    handle: &Handle,
    name: &str,
    args: Option<LuaTable>,
) -> LuaResult<LuaValue> {
    let skill = handle
        .block_on(catalog.get(name))
        .ok_or_else(|| LuaError::external(SkillError::NotFound(name.to_string())))?;

    let call_args = bind_arguments(lua, &skill, args)?;

    // Fresh environment chaining to the shared globals
    let env = lua.create_table()?;
    let env_meta = lua.create_table()?;
    env_meta.set("__index", lua.globals())?;
    env.set_metatable(Some(env_meta));

    lua.load(&skill.source)
        .set_name(format!("@skill:{name}"))
        .set_environment(env.clone())
        .exec()
        .map_err(|e| wrap_execution_error(name, e))?;

    let run: LuaFunction = env.get("run").map_err(|_| {
        LuaError::external(SkillError::InvalidSource {
            name: name.to_string(),
            reason: "source does not define a 'run' function".into(),
        })
    })?;

    run.call::<LuaValue>(call_args.into_iter().collect::<LuaMultiValue>())
        .map_err(|e| wrap_execution_error(name, e))
}

/// Bind a keyword table against the skill's parameter list
fn bind_arguments(
    lua: &Lua,
    skill: &Skill,
    args: Option<LuaTable>,
) -> LuaResult<Vec<LuaValue>> {
    let args = match args {
        Some(args) => args,
        None => lua.create_table()?,
    };

    for pair in args.clone().pairs::<LuaValue, LuaValue>() {
        let (key, _) = pair?;
        let key_name = match &key {
            LuaValue::String(s) => s.to_string_lossy().to_string(),
            other => format!("{other:?}"),
        };
        if !skill.parameters.iter().any(|p| p.name == key_name) {
            return Err(LuaError::external(SkillError::UnknownArgument {
                skill: skill.name.clone(),
                name: key_name,
            }));
        }
    }

    let mut call_args = Vec::with_capacity(skill.parameters.len());
    for param in &skill.parameters {
        let value: LuaValue = args.raw_get(param.name.as_str())?;
        if value == LuaValue::Nil {
            match &param.default {
                Some(default) => call_args.push(json_to_lua(lua, default)?),
                None => {
                    return Err(LuaError::external(SkillError::MissingArgument {
                        skill: skill.name.clone(),
                        name: param.name.clone(),
                    }))
                }
            }
        } else {
            call_args.push(value);
        }
    }
    Ok(call_args)
}

/// Keep tool/deps/storage failures intact for taxonomy mapping; wrap plain
/// Lua errors as skill failures.
fn wrap_execution_error(name: &str, error: LuaError) -> LuaError {
    if carries_domain_error(&error) {
        return error;
    }
    LuaError::external(SkillError::Execution {
        skill: name.to_string(),
        message: error.to_string(),
    })
}
