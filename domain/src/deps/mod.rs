//! Dependency domain: declared package requirements
//!
//! A dep is a rock name plus an optional version constraint. Specs are
//! normalized (lowercased name, `_` → `-`) so `Lua_CJSON` and `lua-cjson`
//! declare the same package. URL installs, environment markers, and shell
//! metacharacters are rejected outright.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const VERSION_OPS: [&str; 6] = [">=", "<=", "==", "~=", "!=", "="];
const MAX_SPEC_LEN: usize = 256;

/// A parsed, normalized dependency specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepSpec {
    /// Normalized package name (lowercase, hyphenated)
    pub name: String,
    /// Version constraint including its operator, e.g. `>=2.1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl DepSpec {
    /// Parse and validate a requirement string such as `lua-cjson` or
    /// `penlight>=1.13`.
    pub fn parse(spec: &str) -> Result<Self, DepsError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(DepsError::InvalidSpec("empty spec".into()));
        }
        if spec.len() > MAX_SPEC_LEN {
            return Err(DepsError::InvalidSpec(format!(
                "spec longer than {MAX_SPEC_LEN} characters"
            )));
        }
        // URL installs, markers, and anything shell-unsafe are out
        for forbidden in ['@', ';', '|', '&', '`', '$', '(', ')', '\n', '\r', '\0'] {
            if spec.contains(forbidden) {
                return Err(DepsError::InvalidSpec(format!(
                    "'{spec}' contains forbidden character '{}'",
                    forbidden.escape_default()
                )));
            }
        }
        if spec.contains("://") {
            return Err(DepsError::InvalidSpec(format!("'{spec}' looks like a URL")));
        }
        if spec.contains(char::is_whitespace) {
            return Err(DepsError::InvalidSpec(format!(
                "'{spec}' contains whitespace (environment markers are not supported)"
            )));
        }

        let (raw_name, constraint) = match spec.find(['<', '>', '=', '~', '!']) {
            Some(idx) => {
                let (name, rest) = spec.split_at(idx);
                if !VERSION_OPS.iter().any(|op| rest.starts_with(op)) && !rest.starts_with('<') && !rest.starts_with('>') {
                    return Err(DepsError::InvalidSpec(format!(
                        "'{spec}' has an invalid version operator"
                    )));
                }
                let version_part = rest.trim_start_matches(['<', '>', '=', '~', '!']);
                if version_part.is_empty()
                    || !version_part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                {
                    return Err(DepsError::InvalidSpec(format!(
                        "'{spec}' has an invalid version constraint"
                    )));
                }
                (name, Some(rest.to_string()))
            }
            None => (spec, None),
        };

        let normalized = raw_name.to_ascii_lowercase().replace('_', "-");
        let mut chars = normalized.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            return Err(DepsError::InvalidSpec(format!(
                "'{raw_name}' is not a valid package name"
            )));
        }

        Ok(Self {
            name: normalized,
            constraint,
        })
    }

    /// Exact pinned version, when the constraint is `==x` or `=x`
    pub fn pinned_version(&self) -> Option<&str> {
        let constraint = self.constraint.as_deref()?;
        constraint
            .strip_prefix("==")
            .or_else(|| constraint.strip_prefix('='))
            .filter(|v| !v.starts_with('='))
    }
}

impl std::fmt::Display for DepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{}{}", self.name, c),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Outcome of an install or sync pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub already_present: Vec<String>,
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.installed.extend(other.installed);
        self.already_present.extend(other.already_present);
        self.failed.extend(other.failed);
    }
}

/// Errors raised by the dependency controller
#[derive(Debug, Error)]
pub enum DepsError {
    #[error("invalid dependency spec: {0}")]
    InvalidSpec(String),

    #[error("runtime dependency mutation is disabled; declare dependencies before session start")]
    RuntimeDisabled,

    #[error("failed to install '{spec}': {detail}")]
    Install { spec: String, detail: String },
}

impl DepsError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DepsError::InvalidSpec(_) => "InvalidDepSpec",
            DepsError::RuntimeDisabled => "RuntimeDepsDisabled",
            DepsError::Install { .. } => "InstallFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let spec = DepSpec::parse("lua-cjson").unwrap();
        assert_eq!(spec.name, "lua-cjson");
        assert!(spec.constraint.is_none());
        assert_eq!(spec.to_string(), "lua-cjson");
    }

    #[test]
    fn test_parse_normalizes() {
        let spec = DepSpec::parse("Lua_CJSON>=2.1").unwrap();
        assert_eq!(spec.name, "lua-cjson");
        assert_eq!(spec.constraint.as_deref(), Some(">=2.1"));
    }

    #[test]
    fn test_parse_pinned() {
        let spec = DepSpec::parse("penlight==1.13.1").unwrap();
        assert_eq!(spec.pinned_version(), Some("1.13.1"));
        assert!(DepSpec::parse("penlight>=1.13").unwrap().pinned_version().is_none());
    }

    #[test]
    fn test_parse_rejects_urls_and_markers() {
        assert!(DepSpec::parse("https://example.com/x.rock").is_err());
        assert!(DepSpec::parse("pkg @ file:///x").is_err());
        assert!(DepSpec::parse("pkg; platform==linux").is_err());
        assert!(DepSpec::parse("pkg extra-marker").is_err());
    }

    #[test]
    fn test_parse_rejects_shell_metacharacters() {
        assert!(DepSpec::parse("pkg`rm -rf /`").is_err());
        assert!(DepSpec::parse("pkg$(x)").is_err());
        assert!(DepSpec::parse("pkg|tee").is_err());
        assert!(DepSpec::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_versions() {
        assert!(DepSpec::parse("pkg>=").is_err());
        assert!(DepSpec::parse("pkg==a b").is_err());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(DepsError::RuntimeDisabled.kind_name(), "RuntimeDepsDisabled");
        assert_eq!(
            DepsError::InvalidSpec("x".into()).kind_name(),
            "InvalidDepSpec"
        );
    }
}
