//! Execution domain: results, error kinds, capabilities

mod entities;

pub use entities::{Capability, ErrorKind, ExecutionError, ExecutionResult};
