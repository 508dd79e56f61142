//! CLI command builder
//!
//! Turns a tool schema plus an argument mapping into an argv, ready for
//! `Command::new(argv[0]).args(&argv[1..])`. No shell is ever involved.
//!
//! Emission order is deterministic: executable, then options in schema
//! declaration order (boolean true emits the bare flag, arrays emit one
//! flag instance per element, boolean false emits nothing), then
//! positionals in declaration order.

use codemode_domain::{CliToolDefinition, ParamType, ToolError};
use serde_json::Value;

type ArgMap = serde_json::Map<String, Value>;

pub struct CommandBuilder<'a> {
    def: &'a CliToolDefinition,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(def: &'a CliToolDefinition) -> Self {
        Self { def }
    }

    /// Escape-hatch invocation: every schema entry is addressable by
    /// keyword, no preset applies.
    pub fn build(&self, args: &ArgMap) -> Result<Vec<String>, ToolError> {
        for key in args.keys() {
            if !self.def.schema.contains(key) {
                return Err(ToolError::UnknownArgument(key.clone()));
            }
        }
        self.emit(args)
    }

    /// Recipe invocation: preset first, user args overlay, recipe defaults
    /// fill remaining holes. User args are validated against the recipe's
    /// exposed parameter list.
    pub fn build_recipe(&self, recipe_name: &str, args: &ArgMap) -> Result<Vec<String>, ToolError> {
        let recipe = self
            .def
            .recipe(recipe_name)
            .ok_or_else(|| ToolError::RecipeNotFound {
                tool: self.def.name.clone(),
                recipe: recipe_name.to_string(),
            })?;

        for key in args.keys() {
            if !recipe.params.iter().any(|p| p.name == *key) {
                return Err(ToolError::UnknownArgument(key.clone()));
            }
        }

        let mut merged = recipe.preset.clone();
        for param in &recipe.params {
            if let Some(value) = args.get(&param.name) {
                merged.insert(param.name.clone(), value.clone());
            } else if !merged.contains_key(&param.name) {
                match &param.default {
                    Some(default) => {
                        merged.insert(param.name.clone(), default.clone());
                    }
                    None => return Err(ToolError::MissingArgument(param.name.clone())),
                }
            }
        }

        self.emit(&merged)
    }

    fn emit(&self, merged: &ArgMap) -> Result<Vec<String>, ToolError> {
        // Type-check everything before emitting anything
        for (key, value) in merged {
            let declared = self
                .def
                .schema
                .param_type(key)
                .ok_or_else(|| ToolError::UnknownArgument(key.clone()))?;
            if !declared.accepts(value) {
                return Err(ToolError::ArgumentType {
                    name: key.clone(),
                    expected: declared.as_str(),
                    actual: json_type_name(value).to_string(),
                });
            }
        }
        for pos in &self.def.schema.positional {
            if pos.required && !merged.contains_key(&pos.name) {
                return Err(ToolError::MissingArgument(pos.name.clone()));
            }
        }

        let mut argv = vec![self.def.command.clone()];
        for opt in &self.def.schema.options {
            let Some(value) = merged.get(&opt.name) else {
                continue;
            };
            let flag = match opt.short {
                Some(short) => format!("-{short}"),
                None => format!("--{}", opt.name),
            };
            match opt.param_type {
                ParamType::Boolean => {
                    if value.as_bool() == Some(true) {
                        argv.push(flag);
                    }
                }
                ParamType::Array => {
                    for item in value.as_array().into_iter().flatten() {
                        argv.push(flag.clone());
                        argv.push(scalar_to_arg(item));
                    }
                }
                ParamType::String | ParamType::Integer => {
                    argv.push(flag);
                    argv.push(scalar_to_arg(value));
                }
            }
        }
        for pos in &self.def.schema.positional {
            if let Some(value) = merged.get(&pos.name) {
                argv.push(scalar_to_arg(value));
            }
        }
        Ok(argv)
    }
}

fn scalar_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
