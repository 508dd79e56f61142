//! Subprocess-kernel executor
//!
//! The host spawns `codemode kernel` as a child process and drives it over
//! line-delimited JSON-RPC on stdio. The kernel reconstructs the four
//! namespaces from the serialized storage descriptor (see
//! [`crate::bootstrap`]) and hosts an in-process executor; the host side
//! forwards `execute`, `reset`, and the tool/deps facade.

mod executor;
pub mod kernel;
mod rpc;

pub use executor::{SubprocessConfig, SubprocessExecutor};
pub use rpc::{BootstrapParams, KernelFault, KernelRequest, KernelResponse};
