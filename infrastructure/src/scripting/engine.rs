//! The Lua engine
//!
//! One VM per engine. `eval` implements the trailing-expression rule
//! (compile `return <code>` first, fall back to a plain chunk), captures
//! `print`/`io.write` into per-call buffers, enforces a cooperative
//! deadline through an instruction-count hook, and folds every user-code
//! failure into an [`ExecutionError`] with its taxonomy kind.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use codemode_domain::{DepsError, ErrorKind, ExecutionError, ExecutionResult, SkillError, StorageError, ToolError};
use mlua::prelude::*;
use mlua::{HookTriggers, VmState};
use tokio::runtime::Handle;
use tracing::debug;

use super::convert::lua_to_json;
use super::sandbox::apply_sandbox;
use super::{artifacts_api, deps_api, skills_api, tools_api};
use crate::deps::DepsController;
use crate::tools::ToolRegistry;
use codemode_application::{ArtifactStore, SkillCatalog};

/// Check the deadline every this many VM instructions
const HOOK_INSTRUCTION_INTERVAL: u32 = 4096;

/// Everything injected into the VM as the four agent namespaces
pub struct EngineNamespaces {
    pub registry: Arc<ToolRegistry>,
    pub catalog: Arc<dyn SkillCatalog>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub deps: Arc<DepsController>,
}

/// Marker error raised by the deadline hook
#[derive(Debug)]
pub(crate) struct TimeoutSignal(pub Duration);

impl std::fmt::Display for TimeoutSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "execution timed out after {:.1}s", self.0.as_secs_f64())
    }
}

impl std::error::Error for TimeoutSignal {}

pub struct LuaEngine {
    lua: Mutex<Lua>,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
}

impl LuaEngine {
    /// Build a VM with sandbox, output capture, the deps tree on the
    /// module path, and the four namespaces installed as globals.
    pub fn new(
        namespaces: EngineNamespaces,
        handle: Handle,
        deps_tree: Option<&std::path::Path>,
    ) -> LuaResult<Self> {
        let lua = Lua::new();
        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));

        apply_sandbox(&lua)?;
        install_output_capture(&lua, Arc::clone(&stdout), Arc::clone(&stderr))?;

        if let Some(tree) = deps_tree {
            let extend = format!(
                "package.path = package.path .. ';{path}'\npackage.cpath = package.cpath .. ';{cpath}'",
                path = crate::deps::tree_lua_path(tree),
                cpath = crate::deps::tree_lua_cpath(tree),
            );
            lua.load(&extend).set_name("@deps-tree").exec()?;
        }

        tools_api::register(&lua, Arc::clone(&namespaces.registry), handle.clone())?;
        skills_api::register(&lua, Arc::clone(&namespaces.catalog), handle.clone())?;
        artifacts_api::register(&lua, Arc::clone(&namespaces.artifacts), handle.clone())?;
        deps_api::register(&lua, Arc::clone(&namespaces.deps), handle)?;

        Ok(Self {
            lua: Mutex::new(lua),
            stdout,
            stderr,
        })
    }

    /// Run one chunk. Blocking: call from a blocking thread and bridge
    /// back to async via the runtime handle captured at construction.
    pub fn eval(&self, code: &str, timeout: Option<Duration>) -> ExecutionResult {
        let started = Instant::now();
        let lua = match self.lua.lock() {
            Ok(lua) => lua,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.stdout.lock().map(|mut b| b.clear()).ok();
        self.stderr.lock().map(|mut b| b.clear()).ok();

        if let Some(timeout) = timeout {
            let deadline = started + timeout;
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
                move |_lua, _debug| {
                    if Instant::now() >= deadline {
                        Err(LuaError::external(TimeoutSignal(timeout)))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        let outcome = Self::eval_inner(&lua, code);
        lua.remove_hook();

        let stdout = self
            .stdout
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .unwrap_or_default();
        let stderr = self
            .stderr
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                let json = match &value {
                    LuaValue::Nil => None,
                    other => Some(lua_to_json(other)),
                };
                ExecutionResult::success(json, stdout, stderr).with_duration_ms(duration_ms)
            }
            Err(error) => {
                debug!(%error, "execution failed");
                ExecutionResult::failure(classify_error(&error), stdout, stderr)
                    .with_duration_ms(duration_ms)
            }
        }
    }

    fn eval_inner(lua: &Lua, code: &str) -> LuaResult<LuaValue> {
        // Expression-first: a bare `1+1` or `skills.f{...}` yields its value
        let wrapped = format!("return {code}");
        let function = match lua.load(&wrapped).set_name("@input").into_function() {
            Ok(function) => function,
            Err(LuaError::SyntaxError { .. }) => {
                // Statement chunk; its `return` (if any) is the value
                lua.load(code).set_name("@input").into_function()?
            }
            Err(other) => return Err(other),
        };
        let results = function.call::<LuaMultiValue>(())?;
        Ok(results.into_iter().next().unwrap_or(LuaValue::Nil))
    }
}

fn install_output_capture(
    lua: &Lua,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
) -> LuaResult<()> {
    let append = |buffer: &Arc<Mutex<String>>, text: &str| {
        if let Ok(mut guard) = buffer.lock() {
            guard.push_str(text);
        }
    };

    // print(...) -> tab-separated tostring of each arg, newline-terminated
    {
        let stdout = Arc::clone(&stdout);
        let print = lua.create_function(move |lua, values: LuaMultiValue| {
            let tostring: LuaFunction = lua.globals().get("tostring")?;
            let mut parts = Vec::with_capacity(values.len());
            for value in values {
                parts.push(tostring.call::<LuaString>(value)?.to_string_lossy().to_string());
            }
            if let Ok(mut guard) = stdout.lock() {
                guard.push_str(&parts.join("\t"));
                guard.push('\n');
            }
            Ok(())
        })?;
        lua.globals().set("print", print)?;
    }

    // io.write(...) -> raw append; io.stderr:write(...) -> stderr buffer
    let io: LuaTable = lua.globals().get("io")?;
    {
        let stdout = Arc::clone(&stdout);
        let write = lua.create_function(move |_lua, values: LuaMultiValue| {
            for value in values {
                match &value {
                    LuaValue::String(s) => {
                        if let Ok(mut guard) = stdout.lock() {
                            guard.push_str(&s.to_string_lossy());
                        }
                    }
                    other => {
                        if let Ok(mut guard) = stdout.lock() {
                            guard.push_str(&lua_to_json(other).to_string());
                        }
                    }
                }
            }
            Ok(())
        })?;
        io.set("write", write)?;
    }
    {
        let stderr_table = lua.create_table()?;
        let write = lua.create_function(move |_lua, (_this, values): (LuaValue, LuaMultiValue)| {
            for value in values {
                if let LuaValue::String(s) = &value {
                    append(&stderr, &s.to_string_lossy());
                }
            }
            Ok(())
        })?;
        stderr_table.set("write", write)?;
        io.set("stderr", stderr_table)?;
    }
    Ok(())
}

/// Map a Lua error chain onto the wire taxonomy
pub(crate) fn classify_error(error: &LuaError) -> ExecutionError {
    match error {
        LuaError::SyntaxError { message, .. } => {
            ExecutionError::new(ErrorKind::Syntax, message.clone())
        }
        LuaError::CallbackError { traceback, cause } => {
            let mut inner = classify_error(cause);
            if inner.trace.is_none() {
                inner.trace = Some(traceback.clone());
            }
            inner
        }
        LuaError::WithContext { cause, .. } => classify_error(cause),
        LuaError::ExternalError(external) => classify_external(external.as_ref()),
        LuaError::RuntimeError(message) => {
            ExecutionError::new(ErrorKind::Runtime, message.clone())
        }
        other => ExecutionError::new(ErrorKind::Runtime, other.to_string()),
    }
}

fn classify_external(error: &(dyn std::error::Error + 'static)) -> ExecutionError {
    if let Some(timeout) = error.downcast_ref::<TimeoutSignal>() {
        return ExecutionError::new(ErrorKind::Timeout, timeout.to_string());
    }
    if let Some(tool) = error.downcast_ref::<ToolError>() {
        let kind = match tool {
            ToolError::Timeout(_) => ErrorKind::ToolTimeout,
            ToolError::NotFound(_) | ToolError::RecipeNotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Tool,
        };
        return ExecutionError::new(kind, tool.to_string());
    }
    if let Some(skill) = error.downcast_ref::<SkillError>() {
        let kind = match skill {
            SkillError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Skill,
        };
        return ExecutionError::new(kind, skill.to_string());
    }
    if let Some(deps) = error.downcast_ref::<DepsError>() {
        let kind = match deps {
            DepsError::InvalidSpec(_) => ErrorKind::InvalidDepSpec,
            DepsError::RuntimeDisabled => ErrorKind::RuntimeDepsDisabled,
            DepsError::Install { .. } => ErrorKind::InstallFailed,
        };
        return ExecutionError::new(kind, deps.to_string());
    }
    if let Some(storage) = error.downcast_ref::<StorageError>() {
        let kind = match storage {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Runtime,
        };
        return ExecutionError::new(kind, storage.to_string());
    }
    if let Some(inner) = error.downcast_ref::<LuaError>() {
        return classify_error(inner);
    }
    ExecutionError::new(ErrorKind::Runtime, error.to_string())
}

/// Whether the error chain already carries one of our domain errors (used
/// by skill invocation to avoid double-wrapping tool failures).
pub(crate) fn carries_domain_error(error: &LuaError) -> bool {
    match error {
        LuaError::CallbackError { cause, .. } => carries_domain_error(cause),
        LuaError::WithContext { cause, .. } => carries_domain_error(cause),
        LuaError::ExternalError(external) => {
            let e = external.as_ref();
            e.downcast_ref::<TimeoutSignal>().is_some()
                || e.downcast_ref::<ToolError>().is_some()
                || e.downcast_ref::<SkillError>().is_some()
                || e.downcast_ref::<DepsError>().is_some()
                || e.downcast_ref::<StorageError>().is_some()
                || e.downcast_ref::<LuaError>()
                    .map(carries_domain_error)
                    .unwrap_or(false)
        }
        _ => false,
    }
}
