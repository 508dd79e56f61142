//! LuaRocks-backed package installer
//!
//! Installs rocks into a dedicated tree (the virtualenv analogue). The
//! executor appends the tree to `package.path` / `package.cpath`, which is
//! what makes the installer contract hold: a spec reported installed is
//! `require`-able afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use codemode_domain::{DepSpec, SyncReport};
use codemode_application::PackageInstaller;
use tracing::{debug, info, warn};

const LUA_VERSION: &str = "5.4";

/// Lua `package.path` additions for a rocks tree
pub fn tree_lua_path(tree: &Path) -> String {
    let share = tree.join("share").join("lua").join(LUA_VERSION);
    format!(
        "{share}/?.lua;{share}/?/init.lua",
        share = share.display()
    )
}

/// Lua `package.cpath` additions for a rocks tree
pub fn tree_lua_cpath(tree: &Path) -> String {
    let lib = tree.join("lib").join("lua").join(LUA_VERSION);
    format!("{lib}/?.so", lib = lib.display())
}

pub struct LuaRocksInstaller {
    tree: PathBuf,
    luarocks: String,
}

impl LuaRocksInstaller {
    pub fn new(tree: impl Into<PathBuf>) -> Self {
        Self {
            tree: tree.into(),
            luarocks: "luarocks".into(),
        }
    }

    /// Override the luarocks executable (tests, hermetic builds)
    pub fn with_executable(mut self, luarocks: impl Into<String>) -> Self {
        self.luarocks = luarocks.into();
        self
    }

    pub fn tree(&self) -> &Path {
        &self.tree
    }

    fn base_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.luarocks);
        command
            .arg("--tree")
            .arg(&self.tree)
            .arg("--lua-version")
            .arg(LUA_VERSION)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn install_one(&self, spec: &DepSpec) -> Result<(), String> {
        let mut command = self.base_command();
        command.arg("install").arg(&spec.name);
        if let Some(version) = spec.pinned_version() {
            command.arg(version);
        }

        let output = command
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.luarocks))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(crate::util::stderr_tail(&output.stderr))
        }
    }
}

#[async_trait]
impl PackageInstaller for LuaRocksInstaller {
    async fn install(&self, specs: &[DepSpec]) -> SyncReport {
        let mut report = SyncReport::default();
        for spec in specs {
            if self.is_installed(spec).await {
                debug!(dep = %spec, "already present");
                report.already_present.push(spec.to_string());
                continue;
            }
            match self.install_one(spec).await {
                Ok(()) => {
                    info!(dep = %spec, tree = %self.tree.display(), "installed");
                    report.installed.push(spec.to_string());
                }
                Err(detail) => {
                    warn!(dep = %spec, detail, "install failed");
                    report.failed.push(spec.to_string());
                }
            }
        }
        report
    }

    async fn is_installed(&self, spec: &DepSpec) -> bool {
        let mut command = self.base_command();
        command.arg("show").arg(&spec.name);
        matches!(command.output().await, Ok(output) if output.status.success())
    }
}
