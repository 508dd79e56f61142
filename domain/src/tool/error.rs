//! Tool error taxonomy

use thiserror::Error;

/// Errors raised by tool loading, validation, and invocation
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("tool '{0}' is already registered")]
    Duplicate(String),

    #[error("tool '{tool}' has no recipe '{recipe}'")]
    RecipeNotFound { tool: String, recipe: String },

    /// Invalid tool definition (bad YAML, duplicate short alias, preset key
    /// that names no schema entry)
    #[error("invalid tool definition: {0}")]
    Schema(String),

    #[error("unknown argument '{0}'")]
    UnknownArgument(String),

    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("argument '{name}' expects {expected}, got {actual}")]
    ArgumentType {
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("tool exited with status {exit_code}: {stderr_tail}")]
    ExecutionFailed { exit_code: i32, stderr_tail: String },

    #[error("tool timed out after {0:.1}s")]
    Timeout(f64),

    #[error("tool transport error: {0}")]
    Transport(String),
}

impl ToolError {
    /// Name used for this error on the wire and in logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "NotFound",
            ToolError::Duplicate(_) => "DuplicateTool",
            ToolError::RecipeNotFound { .. } => "NotFound",
            ToolError::Schema(_) => "SchemaError",
            ToolError::UnknownArgument(_) => "UnknownArgument",
            ToolError::MissingArgument(_) => "MissingArgument",
            ToolError::ArgumentType { .. } => "ArgumentTypeError",
            ToolError::ExecutionFailed { .. } => "ToolExecutionError",
            ToolError::Timeout(_) => "ToolTimeout",
            ToolError::Transport(_) => "TransportError",
        }
    }
}
