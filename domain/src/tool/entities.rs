//! Tool descriptor entities

use serde::{Deserialize, Serialize};

/// Semantic type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Boolean,
    Integer,
    /// Array of strings; emitted as one flag instance per element
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Integer => "integer",
            ParamType::Array => "array",
        }
    }

    /// Check a JSON value against this type. Empty strings and empty arrays
    /// are valid values of their respective types.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Array => value
                .as_array()
                .map(|items| items.iter().all(|v| v.is_string()))
                .unwrap_or(false),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ParamType::String),
            "boolean" => Ok(ParamType::Boolean),
            "integer" => Ok(ParamType::Integer),
            "array" => Ok(ParamType::Array),
            other => Err(format!("unknown parameter type: {other}")),
        }
    }
}

/// Parameter of a tool callable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ParamType, required: bool) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            param_type,
            required,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A named invocation exposed by a tool (a recipe, an RPC method, an HTTP
/// endpoint). Parameters are ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolCallable {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Immutable descriptor of an external capability
///
/// Invariant: `callables` is non-empty and callable names are unique within
/// the tool; adapters uphold this when building descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub callables: Vec<ToolCallable>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tags: Vec::new(),
            callables: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_callable(mut self, callable: ToolCallable) -> Self {
        self.callables.push(callable);
        self
    }

    pub fn callable(&self, name: &str) -> Option<&ToolCallable> {
        self.callables.iter().find(|c| c.name == name)
    }

    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            recipes: self
                .callables
                .iter()
                .map(|c| RecipeSummary {
                    name: c.name.clone(),
                    description: c.description.clone(),
                    params: c.parameters.iter().map(|p| p.name.clone()).collect(),
                })
                .collect(),
        }
    }
}

/// Agent-facing summary of one callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub name: String,
    pub description: String,
    pub params: Vec<String>,
}

/// Agent-facing summary of a tool, as returned by `tools.list()` and
/// `tools.search()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub recipes: Vec<RecipeSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_type_accepts() {
        assert!(ParamType::String.accepts(&json!("")));
        assert!(ParamType::String.accepts(&json!("x")));
        assert!(!ParamType::String.accepts(&json!(1)));
        assert!(ParamType::Boolean.accepts(&json!(true)));
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Array.accepts(&json!([])));
        assert!(ParamType::Array.accepts(&json!(["a", "b"])));
        assert!(!ParamType::Array.accepts(&json!([1])));
    }

    #[test]
    fn test_tool_summary() {
        let tool = Tool::new("curl", "Transfer data from URLs")
            .with_tags(vec!["http".into()])
            .with_callable(
                ToolCallable::new("get", "GET a URL").with_parameter(ToolParameter::new(
                    "url",
                    ParamType::String,
                    true,
                )),
            );

        let summary = tool.summary();
        assert_eq!(summary.name, "curl");
        assert_eq!(summary.recipes.len(), 1);
        assert_eq!(summary.recipes[0].params, vec!["url"]);
    }

    #[test]
    fn test_callable_lookup() {
        let tool = Tool::new("t", "").with_callable(ToolCallable::new("a", ""));
        assert!(tool.callable("a").is_some());
        assert!(tool.callable("b").is_none());
    }
}
