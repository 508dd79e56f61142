//! Lua <-> JSON value conversion
//!
//! Hand-rolled rather than serde-driven so mixed tables degrade
//! predictably: a table with consecutive integer keys from 1 becomes an
//! array, anything else becomes an object with stringified keys, and
//! values JSON cannot represent (functions, userdata) become tagged
//! strings instead of failing the whole conversion.

use mlua::prelude::*;
use serde_json::Value;

/// Convert a Lua value to JSON. Never fails; unrepresentable leaves become
/// `"<function>"`-style tags.
pub fn lua_to_json(value: &LuaValue) -> Value {
    match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(*b),
        LuaValue::Integer(i) => Value::from(*i),
        LuaValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        LuaValue::String(s) => Value::String(s.to_string_lossy().to_string()),
        LuaValue::Table(table) => table_to_json(table),
        LuaValue::Function(_) => Value::String("<function>".into()),
        LuaValue::Thread(_) => Value::String("<thread>".into()),
        LuaValue::UserData(_) | LuaValue::LightUserData(_) => Value::String("<userdata>".into()),
        LuaValue::Error(e) => Value::String(e.to_string()),
        _ => Value::Null,
    }
}

fn table_to_json(table: &LuaTable) -> Value {
    let mut entries: Vec<(LuaValue, LuaValue)> = Vec::new();
    for pair in table.clone().pairs::<LuaValue, LuaValue>() {
        match pair {
            Ok(entry) => entries.push(entry),
            Err(_) => continue,
        }
    }

    // Array iff keys are exactly 1..=n
    let mut integer_keys: Vec<i64> = entries
        .iter()
        .filter_map(|(k, _)| k.as_i64())
        .collect();
    integer_keys.sort_unstable();
    let is_array = integer_keys.len() == entries.len()
        && integer_keys
            .iter()
            .enumerate()
            .all(|(i, k)| *k == i as i64 + 1);

    if is_array {
        let mut items = vec![Value::Null; entries.len()];
        for (key, value) in &entries {
            if let Some(index) = key.as_i64() {
                items[(index - 1) as usize] = lua_to_json(value);
            }
        }
        Value::Array(items)
    } else {
        let mut object = serde_json::Map::new();
        for (key, value) in &entries {
            let key = match key {
                LuaValue::String(s) => s.to_string_lossy().to_string(),
                LuaValue::Integer(i) => i.to_string(),
                LuaValue::Number(n) => n.to_string(),
                LuaValue::Boolean(b) => b.to_string(),
                _ => continue,
            };
            object.insert(key, lua_to_json(value));
        }
        Value::Object(object)
    }
}

/// Convert a JSON value to Lua. JSON null maps to nil.
pub fn json_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LuaValue::Integer(i)
            } else {
                LuaValue::Number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => LuaValue::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (index, item) in items.iter().enumerate() {
                table.raw_set(index + 1, json_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Object(object) => {
            let table = lua.create_table_with_capacity(0, object.len())?;
            for (key, item) in object {
                table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

/// Convert a keyword-argument table (string keys only) to a JSON map
pub fn table_to_args(table: &LuaTable) -> LuaResult<serde_json::Map<String, Value>> {
    let mut args = serde_json::Map::new();
    for pair in table.clone().pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        let LuaValue::String(key) = key else {
            return Err(LuaError::RuntimeError(
                "argument names must be strings (use name=value pairs)".into(),
            ));
        };
        args.insert(key.to_string_lossy().to_string(), lua_to_json(&value));
    }
    Ok(args)
}
