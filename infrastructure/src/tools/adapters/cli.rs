//! CLI tool adapter
//!
//! Executes external commands described by CLI tool definitions. Arguments
//! are always passed as an argv list; no shell interpreter is ever
//! involved. Children get piped stdio, a per-tool timeout, and are killed
//! when the timeout fires (the dropped handle reaps the process).

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use codemode_domain::{CliToolDefinition, Tool, ToolAdapter, ToolError};
use tracing::{debug, warn};

use crate::tools::builder::CommandBuilder;
use crate::util::stderr_tail;

/// Adapter over a set of CLI tool definitions
pub struct CliAdapter {
    defs: BTreeMap<String, CliToolDefinition>,
}

impl CliAdapter {
    /// Validate each definition and build the adapter. Missing executables
    /// are tolerated at load time (the tool fails at call time instead) but
    /// logged so misconfiguration is visible early.
    pub fn new(defs: Vec<CliToolDefinition>) -> Result<Self, ToolError> {
        let mut map = BTreeMap::new();
        for def in defs {
            def.validate()?;
            if which::which(&def.command).is_err() {
                warn!(tool = %def.name, command = %def.command, "executable not found on PATH");
            }
            if map.contains_key(&def.name) {
                return Err(ToolError::Duplicate(def.name));
            }
            map.insert(def.name.clone(), def);
        }
        Ok(Self { defs: map })
    }
}

#[async_trait]
impl ToolAdapter for CliAdapter {
    fn id(&self) -> &str {
        "cli"
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ToolError> {
        Ok(self.defs.values().map(|def| def.to_tool()).collect())
    }

    async fn call(
        &self,
        tool: &str,
        recipe: Option<&str>,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let def = self
            .defs
            .get(tool)
            .ok_or_else(|| ToolError::NotFound(tool.to_string()))?;

        let builder = CommandBuilder::new(def);
        let argv = match recipe {
            Some(recipe) => builder.build_recipe(recipe, args)?,
            None => builder.build(args)?,
        };
        debug!(tool, ?recipe, ?argv, "invoking CLI tool");

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs_f64(def.timeout_secs.max(0.001));
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::Transport(format!(
                    "failed to run '{}': {e}",
                    argv[0]
                )))
            }
            // Dropping the in-flight future drops the child handle, which
            // kills the process (kill_on_drop).
            Err(_) => return Err(ToolError::Timeout(def.timeout_secs)),
        };

        if !output.status.success() {
            return Err(ToolError::ExecutionFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr_tail: stderr_tail(&output.stderr),
            });
        }

        Ok(serde_json::Value::String(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_domain::{CliOption, CliPositional, CliRecipe, CliSchema, ParamType, RecipeParam};
    use serde_json::json;

    fn echo_def() -> CliToolDefinition {
        CliToolDefinition {
            name: "say".into(),
            description: "echo wrapper".into(),
            command: "echo".into(),
            timeout_secs: 5.0,
            tags: vec![],
            schema: CliSchema {
                options: vec![CliOption {
                    name: "no-newline".into(),
                    param_type: ParamType::Boolean,
                    short: Some('n'),
                    description: None,
                }],
                positional: vec![CliPositional {
                    name: "text".into(),
                    param_type: ParamType::String,
                    required: true,
                    description: None,
                }],
            },
            recipes: vec![CliRecipe {
                name: "bare".into(),
                description: "echo without trailing newline".into(),
                preset: json!({"no-newline": true}).as_object().unwrap().clone(),
                params: vec![RecipeParam {
                    name: "text".into(),
                    default: None,
                }],
            }],
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cli_call_captures_stdout() {
        let adapter = CliAdapter::new(vec![echo_def()]).unwrap();
        let args = json!({"text": "hello"}).as_object().unwrap().clone();
        let out = adapter.call("say", Some("bare"), &args).await.unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cli_unknown_tool() {
        let adapter = CliAdapter::new(vec![echo_def()]).unwrap();
        let err = adapter
            .call("nope", None, &serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cli_nonzero_exit_surfaces_stderr() {
        let mut def = echo_def();
        def.name = "fail".into();
        def.command = "sh".into();
        // sh -c is itself an argv invocation of /bin/sh; the tool under
        // test still never interpolates arguments into a shell string.
        def.schema = CliSchema {
            options: vec![],
            positional: vec![
                CliPositional {
                    name: "flag".into(),
                    param_type: ParamType::String,
                    required: true,
                    description: None,
                },
                CliPositional {
                    name: "script".into(),
                    param_type: ParamType::String,
                    required: true,
                    description: None,
                },
            ],
        };
        def.recipes = vec![CliRecipe {
            name: "run".into(),
            description: String::new(),
            preset: serde_json::Map::new(),
            params: vec![
                RecipeParam {
                    name: "flag".into(),
                    default: Some(json!("-c")),
                },
                RecipeParam {
                    name: "script".into(),
                    default: Some(json!("echo boom >&2; exit 3")),
                },
            ],
        }];

        let adapter = CliAdapter::new(vec![def]).unwrap();
        let err = adapter
            .call("fail", Some("run"), &serde_json::Map::new())
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed {
                exit_code,
                stderr_tail,
            } => {
                assert_eq!(exit_code, 3);
                assert!(stderr_tail.contains("boom"));
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cli_timeout_kills_child() {
        let mut def = echo_def();
        def.name = "sleepy".into();
        def.command = "sleep".into();
        def.timeout_secs = 0.2;
        def.schema = CliSchema {
            options: vec![],
            positional: vec![CliPositional {
                name: "seconds".into(),
                param_type: ParamType::String,
                required: true,
                description: None,
            }],
        };
        def.recipes = vec![CliRecipe {
            name: "nap".into(),
            description: String::new(),
            preset: json!({"seconds": "30"}).as_object().unwrap().clone(),
            params: vec![],
        }];

        let adapter = CliAdapter::new(vec![def]).unwrap();
        let started = std::time::Instant::now();
        let err = adapter
            .call("sleepy", Some("nap"), &serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

}
