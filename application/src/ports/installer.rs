//! Package installer port
//!
//! Contract: a spec that lands in `installed` or `already_present` is
//! `require`-able in the execution environment afterwards. Implementations
//! may shell out to a package manager or stub the whole thing in tests.

use async_trait::async_trait;
use codemode_domain::{DepSpec, SyncReport};

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install the given specs, reporting per-spec outcomes. Never errors
    /// as a whole; individual failures land in `SyncReport::failed`.
    async fn install(&self, specs: &[DepSpec]) -> SyncReport;

    /// Whether the package is already importable in the target environment
    async fn is_installed(&self, spec: &DepSpec) -> bool;
}
