//! Executor backends
//!
//! Three implementations of the [`Executor`](codemode_application::Executor)
//! port: in-process (one Lua VM in this process), subprocess (a kernel
//! child speaking line JSON-RPC), and container (the session server behind
//! Docker, driven over HTTP).

pub mod container;
mod in_process;
pub mod subprocess;

pub use container::{ContainerConfig, ContainerExecutor};
pub use in_process::{InProcessConfig, InProcessExecutor};
pub use subprocess::{SubprocessConfig, SubprocessExecutor};
