//! CLI tool definitions: schema, recipes, load-time validation
//!
//! A CLI tool is described by one YAML file (parsed in the infrastructure
//! layer); these are the validated in-memory types. Option declaration
//! order is preserved because argv emission follows it.

use serde::{Deserialize, Serialize};

use super::entities::{ParamType, Tool, ToolCallable, ToolParameter};
use super::error::ToolError;

/// One named option (`--name value`, `-s`, repeated flags for arrays)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliOption {
    pub name: String,
    pub param_type: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One positional argument, emitted after all options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliPositional {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Ordered schema of a CLI tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliSchema {
    /// Options in declaration order (argv emission order)
    pub options: Vec<CliOption>,
    /// Positionals in declaration order
    pub positional: Vec<CliPositional>,
}

impl CliSchema {
    pub fn option(&self, name: &str) -> Option<&CliOption> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn positional(&self, name: &str) -> Option<&CliPositional> {
        self.positional.iter().find(|p| p.name == name)
    }

    /// Whether `name` refers to any schema entry
    pub fn contains(&self, name: &str) -> bool {
        self.option(name).is_some() || self.positional(name).is_some()
    }

    /// Declared type of a schema entry
    pub fn param_type(&self, name: &str) -> Option<ParamType> {
        self.option(name)
            .map(|o| o.param_type)
            .or_else(|| self.positional(name).map(|p| p.param_type))
    }
}

/// Parameter exposed by a recipe; `default` substitutes when omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeParam {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// A named, preset-augmented invocation of a CLI tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliRecipe {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Fixed argument values applied before user args
    #[serde(default)]
    pub preset: serde_json::Map<String, serde_json::Value>,
    /// Parameters exposed to the agent, in declaration order
    #[serde(default)]
    pub params: Vec<RecipeParam>,
}

/// Validated definition of one CLI tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Executable; defaults to the tool name when the YAML omits it
    pub command: String,
    /// Per-invocation timeout in seconds
    pub timeout_secs: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub schema: CliSchema,
    pub recipes: Vec<CliRecipe>,
}

impl CliToolDefinition {
    pub fn recipe(&self, name: &str) -> Option<&CliRecipe> {
        self.recipes.iter().find(|r| r.name == name)
    }

    /// Load-time invariants: unique option names, unique short aliases,
    /// every preset/params key names a schema entry, preset values match
    /// declared types.
    pub fn validate(&self) -> Result<(), ToolError> {
        let mut seen_names = std::collections::BTreeSet::new();
        let mut seen_shorts = std::collections::BTreeSet::new();
        for opt in &self.schema.options {
            if !seen_names.insert(opt.name.as_str()) {
                return Err(ToolError::Schema(format!(
                    "tool '{}': duplicate option '{}'",
                    self.name, opt.name
                )));
            }
            if let Some(short) = opt.short {
                if !seen_shorts.insert(short) {
                    return Err(ToolError::Schema(format!(
                        "tool '{}': duplicate short alias '-{}'",
                        self.name, short
                    )));
                }
            }
        }
        for pos in &self.schema.positional {
            if !seen_names.insert(pos.name.as_str()) {
                return Err(ToolError::Schema(format!(
                    "tool '{}': positional '{}' collides with an option",
                    self.name, pos.name
                )));
            }
        }

        for recipe in &self.recipes {
            for key in recipe.preset.keys() {
                if !self.schema.contains(key) {
                    return Err(ToolError::Schema(format!(
                        "tool '{}': recipe '{}' preset key '{}' names no schema entry",
                        self.name, recipe.name, key
                    )));
                }
            }
            for (key, value) in &recipe.preset {
                let declared = self.schema.param_type(key).expect("checked above");
                if !declared.accepts(value) {
                    return Err(ToolError::Schema(format!(
                        "tool '{}': recipe '{}' preset '{}' is not a {}",
                        self.name, recipe.name, key, declared
                    )));
                }
            }
            for param in &recipe.params {
                if !self.schema.contains(&param.name) {
                    return Err(ToolError::Schema(format!(
                        "tool '{}': recipe '{}' param '{}' names no schema entry",
                        self.name, recipe.name, param.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the agent-facing [`Tool`] descriptor.
    ///
    /// Recipes become callables; their parameter types come from the schema
    /// entry each param names.
    pub fn to_tool(&self) -> Tool {
        let mut tool = Tool::new(&self.name, &self.description).with_tags(self.tags.clone());
        for recipe in &self.recipes {
            let mut callable = ToolCallable::new(&recipe.name, &recipe.description);
            for param in &recipe.params {
                let param_type = self
                    .schema
                    .param_type(&param.name)
                    .unwrap_or(ParamType::String);
                let required = param.default.is_none();
                let mut tp = ToolParameter::new(&param.name, param_type, required);
                if let Some(default) = &param.default {
                    tp = tp.with_default(default.clone());
                }
                if let Some(desc) = self
                    .schema
                    .option(&param.name)
                    .and_then(|o| o.description.clone())
                    .or_else(|| {
                        self.schema
                            .positional(&param.name)
                            .and_then(|p| p.description.clone())
                    })
                {
                    tp = tp.with_description(desc);
                }
                callable = callable.with_parameter(tp);
            }
            tool = tool.with_callable(callable);
        }
        tool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn curl_def() -> CliToolDefinition {
        CliToolDefinition {
            name: "curl".into(),
            description: "Transfer data from URLs".into(),
            command: "curl".into(),
            timeout_secs: 30.0,
            tags: vec!["http".into()],
            schema: CliSchema {
                options: vec![
                    CliOption {
                        name: "silent".into(),
                        param_type: ParamType::Boolean,
                        short: Some('s'),
                        description: None,
                    },
                    CliOption {
                        name: "header".into(),
                        param_type: ParamType::Array,
                        short: Some('H'),
                        description: None,
                    },
                ],
                positional: vec![CliPositional {
                    name: "url".into(),
                    param_type: ParamType::String,
                    required: true,
                    description: None,
                }],
            },
            recipes: vec![CliRecipe {
                name: "get".into(),
                description: "GET a URL".into(),
                preset: json!({"silent": true}).as_object().unwrap().clone(),
                params: vec![RecipeParam {
                    name: "url".into(),
                    default: None,
                }],
            }],
        }
    }

    #[test]
    fn test_validate_ok() {
        curl_def().validate().unwrap();
    }

    #[test]
    fn test_validate_duplicate_short() {
        let mut def = curl_def();
        def.schema.options[1].short = Some('s');
        let err = def.validate().unwrap_err();
        assert!(matches!(err, ToolError::Schema(_)));
    }

    #[test]
    fn test_validate_unknown_preset_key() {
        let mut def = curl_def();
        def.recipes[0]
            .preset
            .insert("verbose".into(), json!(true));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_validate_preset_type_mismatch() {
        let mut def = curl_def();
        def.recipes[0].preset.insert("silent".into(), json!("yes"));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_to_tool_marks_defaults_optional() {
        let mut def = curl_def();
        def.recipes[0].params.push(RecipeParam {
            name: "header".into(),
            default: Some(json!([])),
        });
        let tool = def.to_tool();
        let get = tool.callable("get").unwrap();
        assert!(get.parameters[0].required);
        assert!(!get.parameters[1].required);
    }
}
