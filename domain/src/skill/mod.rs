//! Skill domain: persisted code recipes with a `run` entry point

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Skill names double as identifiers in agent code (`skills.fetch_json`),
/// so they must be valid identifiers.
pub fn is_valid_skill_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parameter of a skill's `run` function, derived from its signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillParameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl SkillParameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }
}

/// A named, persisted code recipe
///
/// Invariant: `source` compiles and defines a top-level callable `run`;
/// `name` matches `[A-Za-z_][A-Za-z0-9_]*`. Both are enforced at creation
/// and re-checked on load (violations degrade to corrupt records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub source: String,
    pub parameters: Vec<SkillParameter>,
    pub created_at: DateTime<Utc>,
}

impl Skill {
    pub fn summary(&self) -> SkillSummary {
        SkillSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            error: None,
        }
    }
}

/// Listing entry: no source. Corrupt stored entries are still listed, with
/// `error` set and an empty parameter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
    pub parameters: Vec<SkillParameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SkillSummary {
    pub fn corrupt(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Errors raised by skill validation and invocation
#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill '{0}' not found")]
    NotFound(String),

    #[error("skill '{0}' already exists")]
    Duplicate(String),

    #[error("invalid skill name '{0}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName(String),

    #[error("invalid skill '{name}': {reason}")]
    InvalidSource { name: String, reason: String },

    #[error("skill '{skill}' missing required argument '{name}'")]
    MissingArgument { skill: String, name: String },

    #[error("skill '{skill}' got unknown argument '{name}'")]
    UnknownArgument { skill: String, name: String },

    #[error("skill '{skill}' failed: {message}")]
    Execution { skill: String, message: String },

    #[error("skill storage error: {0}")]
    Storage(String),
}

impl SkillError {
    /// Name used for this error on the wire and in logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            SkillError::NotFound(_) => "NotFound",
            SkillError::Duplicate(_) => "DuplicateSkill",
            SkillError::InvalidName(_) => "InvalidRequest",
            SkillError::InvalidSource { .. } => "InvalidRequest",
            SkillError::MissingArgument { .. } => "MissingArgument",
            SkillError::UnknownArgument { .. } => "UnknownArgument",
            SkillError::Execution { .. } => "SkillError",
            SkillError::Storage(_) => "StorageUnavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_skill_name("fetch_json"));
        assert!(is_valid_skill_name("_private"));
        assert!(is_valid_skill_name("v2"));
        assert!(!is_valid_skill_name(""));
        assert!(!is_valid_skill_name("2fast"));
        assert!(!is_valid_skill_name("with-dash"));
        assert!(!is_valid_skill_name("with space"));
    }

    #[test]
    fn test_corrupt_summary_carries_error() {
        let summary = SkillSummary::corrupt("broken", "unexpected symbol near '{'");
        assert_eq!(summary.name, "broken");
        assert!(summary.error.is_some());
        assert!(summary.parameters.is_empty());
    }
}
