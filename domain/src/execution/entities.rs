//! Execution result entities
//!
//! [`ExecutionResult`] is the single value every executor backend returns
//! from `execute`. User-code failures are folded into its `error` field;
//! they never surface as `Err` at the executor boundary.

use serde::{Deserialize, Serialize};

/// Capability advertised by an execution backend
///
/// Callers must check `supports(Capability::Timeout)` before relying on
/// timeout enforcement; backends advertise only what they actually provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Per-call execution timeouts are enforced
    Timeout,
    /// Code runs in a separate OS process
    ProcessIsolation,
    /// Code runs inside a container
    ContainerIsolation,
    /// The container has no network access
    NetworkIsolation,
    /// `reset()` clears user bindings while preserving namespaces
    Reset,
    /// Dependencies can be installed into the execution environment
    DepsInstall,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Timeout => "timeout",
            Capability::ProcessIsolation => "process_isolation",
            Capability::ContainerIsolation => "container_isolation",
            Capability::NetworkIsolation => "network_isolation",
            Capability::Reset => "reset",
            Capability::DepsInstall => "deps_install",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Capability::Timeout),
            "process_isolation" => Ok(Capability::ProcessIsolation),
            "container_isolation" => Ok(Capability::ContainerIsolation),
            "network_isolation" => Ok(Capability::NetworkIsolation),
            "reset" => Ok(Capability::Reset),
            "deps_install" => Ok(Capability::DepsInstall),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// Error kind carried on the wire and in logs
///
/// The names match the serialized `kind` field exactly, so the same enum is
/// used by the in-process executor, the kernel protocol, and the container
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "SyntaxError")]
    Syntax,
    #[serde(rename = "RuntimeError")]
    Runtime,
    Timeout,
    #[serde(rename = "ToolError")]
    Tool,
    ToolTimeout,
    #[serde(rename = "SkillError")]
    Skill,
    RuntimeDepsDisabled,
    InvalidDepSpec,
    InstallFailed,
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Tool => "ToolError",
            ErrorKind::ToolTimeout => "ToolTimeout",
            ErrorKind::Skill => "SkillError",
            ErrorKind::RuntimeDepsDisabled => "RuntimeDepsDisabled",
            ErrorKind::InvalidDepSpec => "InvalidDepSpec",
            ErrorKind::InstallFailed => "InstallFailed",
            ErrorKind::NotFound => "NotFound",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A contained user-code failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Interpreter traceback, when one is available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Result of executing one chunk of agent code
///
/// Invariant: `error.is_none()` iff the chunk ran to completion; `value`
/// reflects the trailing expression (null allowed) only on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub value: Option<serde_json::Value>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(value: Option<serde_json::Value>, stdout: String, stderr: String) -> Self {
        Self {
            value,
            stdout,
            stderr,
            duration_ms: 0,
            error: None,
        }
    }

    /// Create a failed result; `value` is always null on failure
    pub fn failure(error: ExecutionError, stdout: String, stderr: String) -> Self {
        Self {
            value: None,
            stdout,
            stderr,
            duration_ms: 0,
            error: Some(error),
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
