//! Skill source parsing
//!
//! A skill source must define a top-level `run` function. Validation loads
//! the chunk into a throwaway sandboxed VM and extracts the parameter names
//! from the compiled function's debug info, the Lua analogue of signature
//! inspection. Top-level statements execute during validation, so skill
//! sources should only define functions and constants.

use codemode_domain::{SkillError, SkillParameter};
use mlua::prelude::*;

use crate::scripting::apply_sandbox;

/// Collect the leading `--` comment block as the skill description
pub fn leading_comment_description(source: &str) -> String {
    let mut lines = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() && lines.is_empty() {
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix("--") {
            // Skip block-comment openers; they are not prose
            if comment.starts_with('[') {
                break;
            }
            lines.push(comment.trim_start_matches('-').trim().to_string());
        } else {
            break;
        }
    }
    lines.join(" ").trim().to_string()
}

/// Validate a skill source and derive the `run` parameter list.
///
/// Fails with `InvalidSource` when the source does not compile, errors at
/// load time, or does not define a `run` function.
pub fn parse_skill_source(name: &str, source: &str) -> Result<Vec<SkillParameter>, SkillError> {
    let invalid = |reason: String| SkillError::InvalidSource {
        name: name.to_string(),
        reason,
    };

    // Signature inspection below needs `debug.getinfo`/`debug.getlocal`, which
    // `Lua::new()`'s safe stdlib subset excludes; this VM is throwaway and
    // never runs caller-supplied data beyond the chunk's own top-level.
    let lua = unsafe { Lua::unsafe_new_with(LuaStdLib::ALL_SAFE | LuaStdLib::DEBUG, LuaOptions::default()) };
    apply_sandbox(&lua).map_err(|e| invalid(format!("sandbox setup failed: {e}")))?;

    // A fresh environment keeps the chunk's definitions inspectable without
    // touching the VM globals.
    let env = lua.create_table().map_err(|e| invalid(e.to_string()))?;
    let env_meta = lua.create_table().map_err(|e| invalid(e.to_string()))?;
    env_meta
        .set("__index", lua.globals())
        .map_err(|e| invalid(e.to_string()))?;
    env.set_metatable(Some(env_meta));

    lua.load(source)
        .set_name(format!("@skill:{name}"))
        .set_environment(env.clone())
        .exec()
        .map_err(|e| invalid(e.to_string()))?;

    let run: LuaValue = env.get("run").map_err(|e| invalid(e.to_string()))?;
    let LuaValue::Function(run) = run else {
        return Err(invalid("source does not define a 'run' function".into()));
    };

    let extract = lua
        .load(
            r#"
            local f = ...
            local info = debug.getinfo(f, "u")
            local names = {}
            for i = 1, info.nparams do
                names[#names + 1] = (debug.getlocal(f, i))
            end
            return names
        "#,
        )
        .set_name("@signature")
        .call::<LuaTable>(run)
        .map_err(|e| invalid(format!("signature inspection failed: {e}")))?;

    let mut parameters = Vec::new();
    for entry in extract.sequence_values::<String>() {
        let param = entry.map_err(|e| invalid(e.to_string()))?;
        parameters.push(SkillParameter::new(param));
    }
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_parameters_in_order() {
        let params = parse_skill_source(
            "repo_stars",
            "function run(owner, repo)\n  return owner .. repo\nend",
        )
        .unwrap();
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["owner", "repo"]);
    }

    #[test]
    fn test_parse_zero_parameters() {
        let params = parse_skill_source("noop", "function run() end").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_run() {
        let err = parse_skill_source("bad", "local x = 1").unwrap_err();
        assert!(matches!(err, SkillError::InvalidSource { .. }));
        assert!(err.to_string().contains("run"));
    }

    #[test]
    fn test_parse_rejects_syntax_error() {
        let err = parse_skill_source("bad", "function run( end").unwrap_err();
        assert!(matches!(err, SkillError::InvalidSource { .. }));
    }

    #[test]
    fn test_parse_rejects_run_that_is_not_a_function() {
        let err = parse_skill_source("bad", "run = 42").unwrap_err();
        assert!(matches!(err, SkillError::InvalidSource { .. }));
    }

    #[test]
    fn test_leading_comment_description() {
        let source = "-- Fetch JSON from a URL\n-- and decode it\nfunction run(url) end";
        assert_eq!(
            leading_comment_description(source),
            "Fetch JSON from a URL and decode it"
        );
    }

    #[test]
    fn test_leading_comment_stops_at_code() {
        let source = "function run() end\n-- trailing comment";
        assert_eq!(leading_comment_description(source), "");
    }
}
