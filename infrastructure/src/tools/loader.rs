//! Tool YAML loading
//!
//! One YAML file per tool, discriminated by `type` (`cli` when omitted).
//! CLI schema options keep their document order; argv emission follows
//! declaration order, so order is semantic here.

use std::path::Path;

use codemode_domain::{
    CliOption, CliPositional, CliRecipe, CliSchema, CliToolDefinition, ParamType, RecipeParam,
    ToolError,
};
use serde_yaml::Value as Yaml;
use tracing::debug;

use super::adapters::{HttpEndpoint, HttpToolConfig, RpcServerConfig};

const DEFAULT_TIMEOUT_SECS: f64 = 60.0;

/// One parsed tool definition file
#[derive(Debug, Clone)]
pub enum ToolFile {
    Cli(CliToolDefinition),
    Rpc(RpcServerConfig),
    Http(HttpToolConfig),
}

/// Load every `*.yaml` / `*.yml` file in a directory, sorted by file name
pub fn load_tools_dir(dir: &Path) -> Result<Vec<ToolFile>, ToolError> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| ToolError::Schema(format!("cannot read tools dir {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ToolError::Schema(format!("cannot read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<tool>");
        let parsed = parse_tool_yaml(file_name, &content)?;
        debug!(file = file_name, "loaded tool definition");
        files.push(parsed);
    }
    Ok(files)
}

/// Parse one tool YAML document
pub fn parse_tool_yaml(file_name: &str, content: &str) -> Result<ToolFile, ToolError> {
    let schema_err = |detail: String| ToolError::Schema(format!("{file_name}: {detail}"));

    let doc: Yaml =
        serde_yaml::from_str(content).map_err(|e| schema_err(format!("bad YAML: {e}")))?;
    let map = doc
        .as_mapping()
        .ok_or_else(|| schema_err("document is not a mapping".into()))?;

    let kind = str_field(map, "type").unwrap_or_else(|| "cli".into());
    match kind.as_str() {
        "cli" => parse_cli(file_name, map).map(ToolFile::Cli),
        "mcp" => parse_rpc(file_name, map).map(ToolFile::Rpc),
        "http" => parse_http(file_name, map).map(ToolFile::Http),
        other => Err(schema_err(format!("unknown tool type '{other}'"))),
    }
}

fn parse_cli(file_name: &str, map: &serde_yaml::Mapping) -> Result<CliToolDefinition, ToolError> {
    let schema_err = |detail: String| ToolError::Schema(format!("{file_name}: {detail}"));

    let name =
        str_field(map, "name").ok_or_else(|| schema_err("missing required 'name'".into()))?;
    let command = str_field(map, "command").unwrap_or_else(|| name.clone());
    let description = str_field(map, "description").unwrap_or_default();
    let timeout_secs = map
        .get("timeout")
        .and_then(Yaml::as_f64)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let tags = string_seq(map.get("tags"));

    let mut schema = CliSchema::default();
    if let Some(schema_map) = map.get("schema").and_then(Yaml::as_mapping) {
        if let Some(options) = schema_map.get("options").and_then(Yaml::as_mapping) {
            for (key, value) in options {
                let opt_name = key
                    .as_str()
                    .ok_or_else(|| schema_err("option name is not a string".into()))?;
                let spec = value
                    .as_mapping()
                    .ok_or_else(|| schema_err(format!("option '{opt_name}' is not a mapping")))?;
                let param_type = parse_param_type(file_name, spec.get("type"), opt_name)?;
                let short = match str_field(spec, "short") {
                    Some(s) => {
                        let mut chars = s.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => Some(c),
                            _ => {
                                return Err(schema_err(format!(
                                    "option '{opt_name}' short alias must be one character"
                                )))
                            }
                        }
                    }
                    None => None,
                };
                schema.options.push(CliOption {
                    name: opt_name.to_string(),
                    param_type,
                    short,
                    description: str_field(spec, "description"),
                });
            }
        }
        if let Some(positional) = schema_map.get("positional").and_then(Yaml::as_sequence) {
            for entry in positional {
                let spec = entry
                    .as_mapping()
                    .ok_or_else(|| schema_err("positional entry is not a mapping".into()))?;
                let pos_name = str_field(spec, "name")
                    .ok_or_else(|| schema_err("positional entry missing 'name'".into()))?;
                let param_type = parse_param_type(file_name, spec.get("type"), &pos_name)?;
                schema.positional.push(CliPositional {
                    name: pos_name,
                    param_type,
                    required: spec.get("required").and_then(Yaml::as_bool).unwrap_or(false),
                    description: str_field(spec, "description"),
                });
            }
        }
    }

    let mut recipes = Vec::new();
    if let Some(recipe_map) = map.get("recipes").and_then(Yaml::as_mapping) {
        for (key, value) in recipe_map {
            let recipe_name = key
                .as_str()
                .ok_or_else(|| schema_err("recipe name is not a string".into()))?;
            let spec = value
                .as_mapping()
                .ok_or_else(|| schema_err(format!("recipe '{recipe_name}' is not a mapping")))?;

            let mut preset = serde_json::Map::new();
            if let Some(preset_map) = spec.get("preset").and_then(Yaml::as_mapping) {
                for (pk, pv) in preset_map {
                    let pk = pk
                        .as_str()
                        .ok_or_else(|| schema_err("preset key is not a string".into()))?;
                    preset.insert(pk.to_string(), yaml_to_json(pv));
                }
            }

            let mut params = Vec::new();
            if let Some(params_map) = spec.get("params").and_then(Yaml::as_mapping) {
                for (pk, pv) in params_map {
                    let pk = pk
                        .as_str()
                        .ok_or_else(|| schema_err("param key is not a string".into()))?;
                    let default = pv
                        .as_mapping()
                        .and_then(|m| m.get("default"))
                        .map(yaml_to_json);
                    params.push(RecipeParam {
                        name: pk.to_string(),
                        default,
                    });
                }
            }

            recipes.push(CliRecipe {
                name: recipe_name.to_string(),
                description: str_field(spec, "description").unwrap_or_default(),
                preset,
                params,
            });
        }
    }
    if recipes.is_empty() {
        return Err(schema_err(format!(
            "tool '{name}' declares no recipes; a CLI tool needs at least one"
        )));
    }

    let def = CliToolDefinition {
        name,
        description,
        command,
        timeout_secs,
        tags,
        schema,
        recipes,
    };
    def.validate()?;
    Ok(def)
}

fn parse_rpc(file_name: &str, map: &serde_yaml::Mapping) -> Result<RpcServerConfig, ToolError> {
    let schema_err = |detail: String| ToolError::Schema(format!("{file_name}: {detail}"));
    let name =
        str_field(map, "name").ok_or_else(|| schema_err("missing required 'name'".into()))?;
    let command =
        str_field(map, "command").ok_or_else(|| schema_err("missing required 'command'".into()))?;

    let mut env = Vec::new();
    if let Some(env_map) = map.get("env").and_then(Yaml::as_mapping) {
        for (key, value) in env_map {
            if let (Some(k), Some(v)) = (key.as_str(), value.as_str()) {
                env.push((k.to_string(), v.to_string()));
            }
        }
    }

    Ok(RpcServerConfig {
        name,
        description: str_field(map, "description").unwrap_or_default(),
        command,
        args: string_seq(map.get("args")),
        env,
        tags: string_seq(map.get("tags")),
    })
}

fn parse_http(file_name: &str, map: &serde_yaml::Mapping) -> Result<HttpToolConfig, ToolError> {
    let schema_err = |detail: String| ToolError::Schema(format!("{file_name}: {detail}"));
    let name =
        str_field(map, "name").ok_or_else(|| schema_err("missing required 'name'".into()))?;
    let base_url = str_field(map, "base_url")
        .ok_or_else(|| schema_err("missing required 'base_url'".into()))?;

    let mut endpoints = Vec::new();
    if let Some(seq) = map.get("endpoints").and_then(Yaml::as_sequence) {
        for entry in seq {
            let spec = entry
                .as_mapping()
                .ok_or_else(|| schema_err("endpoint entry is not a mapping".into()))?;
            endpoints.push(HttpEndpoint {
                name: str_field(spec, "name")
                    .ok_or_else(|| schema_err("endpoint missing 'name'".into()))?,
                method: str_field(spec, "method").unwrap_or_else(|| "GET".into()),
                path: str_field(spec, "path")
                    .ok_or_else(|| schema_err("endpoint missing 'path'".into()))?,
                description: str_field(spec, "description").unwrap_or_default(),
            });
        }
    }
    if endpoints.is_empty() {
        return Err(schema_err(format!("HTTP tool '{name}' declares no endpoints")));
    }

    Ok(HttpToolConfig {
        name,
        description: str_field(map, "description").unwrap_or_default(),
        base_url,
        tags: string_seq(map.get("tags")),
        timeout_secs: map
            .get("timeout")
            .and_then(Yaml::as_f64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        endpoints,
    })
}

fn parse_param_type(
    file_name: &str,
    value: Option<&Yaml>,
    owner: &str,
) -> Result<ParamType, ToolError> {
    match value {
        None => Ok(ParamType::String),
        Some(value) => {
            let text = value.as_str().ok_or_else(|| {
                ToolError::Schema(format!("{file_name}: '{owner}' type is not a string"))
            })?;
            text.parse().map_err(|_| {
                ToolError::Schema(format!("{file_name}: '{owner}' has unknown type '{text}'"))
            })
        }
    }
}

fn str_field(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(key).and_then(Yaml::as_str).map(str::to_string)
}

fn string_seq(value: Option<&Yaml>) -> Vec<String> {
    value
        .and_then(Yaml::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(Yaml::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn yaml_to_json(value: &Yaml) -> serde_json::Value {
    match value {
        Yaml::Null => serde_json::Value::Null,
        Yaml::Bool(b) => serde_json::Value::Bool(*b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else {
                serde_json::Value::from(n.as_f64().unwrap_or(0.0))
            }
        }
        Yaml::String(s) => serde_json::Value::String(s.clone()),
        Yaml::Sequence(seq) => serde_json::Value::Array(seq.iter().map(yaml_to_json).collect()),
        Yaml::Mapping(map) => {
            let mut object = serde_json::Map::new();
            for (key, value) in map {
                if let Some(key) = key.as_str() {
                    object.insert(key.to_string(), yaml_to_json(value));
                }
            }
            serde_json::Value::Object(object)
        }
        Yaml::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURL_YAML: &str = r#"
name: curl
description: Transfer data from URLs
command: curl
timeout: 30
tags: [http, fetch]
schema:
  options:
    silent:
      type: boolean
      short: s
    location:
      type: boolean
      short: L
    header:
      type: array
      short: H
      description: Extra request headers
  positional:
    - name: url
      type: string
      required: true
recipes:
  get:
    description: GET a URL following redirects
    preset: { silent: true, location: true }
    params: { url: {} }
"#;

    #[test]
    fn test_parse_cli_preserves_option_order() {
        let ToolFile::Cli(def) = parse_tool_yaml("curl.yaml", CURL_YAML).unwrap() else {
            panic!("expected CLI tool");
        };
        let names: Vec<&str> = def.schema.options.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["silent", "location", "header"]);
        assert_eq!(def.schema.options[0].short, Some('s'));
        assert_eq!(def.timeout_secs, 30.0);
        assert_eq!(def.tags, vec!["http", "fetch"]);

        let recipe = def.recipe("get").unwrap();
        assert_eq!(recipe.preset.len(), 2);
        assert_eq!(recipe.params.len(), 1);
        assert_eq!(recipe.params[0].name, "url");
    }

    #[test]
    fn test_parse_cli_defaults_command_to_name() {
        let yaml = "name: jq\nrecipes:\n  identity:\n    preset: {}\n    params: {}\n";
        let ToolFile::Cli(def) = parse_tool_yaml("jq.yaml", yaml).unwrap() else {
            panic!("expected CLI tool");
        };
        assert_eq!(def.command, "jq");
    }

    #[test]
    fn test_parse_cli_requires_recipes() {
        let yaml = "name: jq\n";
        let err = parse_tool_yaml("jq.yaml", yaml).unwrap_err();
        assert!(matches!(err, ToolError::Schema(_)));
        assert!(err.to_string().contains("recipes"));
    }

    #[test]
    fn test_parse_rejects_duplicate_short() {
        let yaml = r#"
name: t
schema:
  options:
    alpha: { type: boolean, short: a }
    all:   { type: boolean, short: a }
recipes:
  r: { preset: {}, params: {} }
"#;
        let err = parse_tool_yaml("t.yaml", yaml).unwrap_err();
        assert!(matches!(err, ToolError::Schema(_)));
        assert!(err.to_string().contains("short"));
    }

    #[test]
    fn test_parse_rejects_unknown_preset_key() {
        let yaml = r#"
name: t
schema:
  options:
    alpha: { type: boolean }
recipes:
  r:
    preset: { beta: true }
    params: {}
"#;
        assert!(parse_tool_yaml("t.yaml", yaml).is_err());
    }

    #[test]
    fn test_parse_mcp() {
        let yaml = r#"
type: mcp
name: files
description: Filesystem server
command: mcp-files
args: ["--root", "/data"]
env: { LOG_LEVEL: warn }
tags: [fs]
"#;
        let ToolFile::Rpc(config) = parse_tool_yaml("files.yaml", yaml).unwrap() else {
            panic!("expected RPC tool");
        };
        assert_eq!(config.command, "mcp-files");
        assert_eq!(config.args, vec!["--root", "/data"]);
        assert_eq!(config.env, vec![("LOG_LEVEL".to_string(), "warn".to_string())]);
    }

    #[test]
    fn test_parse_http() {
        let yaml = r#"
type: http
name: repos
base_url: https://api.example.com
endpoints:
  - name: stars
    method: GET
    path: /repos/{owner}/{repo}
    description: Repo metadata
"#;
        let ToolFile::Http(config) = parse_tool_yaml("repos.yaml", yaml).unwrap() else {
            panic!("expected HTTP tool");
        };
        assert_eq!(config.endpoints[0].path_params(), vec!["owner", "repo"]);
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = parse_tool_yaml("x.yaml", "type: grpc\nname: x\n").unwrap_err();
        assert!(err.to_string().contains("unknown tool type"));
    }

    #[test]
    fn test_load_dir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), CURL_YAML.replace("curl", "burl")).unwrap();
        std::fs::write(dir.path().join("a.yaml"), CURL_YAML.replace("curl", "aurl")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = load_tools_dir(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| match f {
                ToolFile::Cli(def) => def.name.clone(),
                _ => panic!("expected CLI tools"),
            })
            .collect();
        assert_eq!(names, vec!["aurl", "burl"]);
    }
}
