//! Stdio JSON-RPC tool adapter
//!
//! Speaks line-delimited JSON-RPC 2.0 to a long-lived child process (the
//! MCP shape: `initialize`, `tools/list`, `tools/call`). One child per
//! adapter, spawned at connect time; requests are serialized behind the
//! channel lock and correlated by id. A dead pipe triggers one respawn
//! before the call is failed.

use std::process::Stdio;

use async_trait::async_trait;
use codemode_domain::{ParamType, Tool, ToolAdapter, ToolCallable, ToolError, ToolParameter};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
/// Every RPC tool exposes a single callable under this name; the escape
/// hatch (`tools.X{...}`) resolves to it as well.
const CALLABLE: &str = "call";

/// Configuration of one stdio RPC server (from a `type: mcp` tool file)
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub name: String,
    pub description: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub tags: Vec<String>,
}

struct Channel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl Channel {
    async fn spawn(config: &RpcServerConfig) -> Result<Self, ToolError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            ToolError::Transport(format!("failed to spawn '{}': {e}", config.command))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport("child stdin unavailable".into()))?;
        let stdout = BufReader::new(
            child
                .stdout
                .take()
                .ok_or_else(|| ToolError::Transport("child stdout unavailable".into()))?,
        );

        let mut channel = Self {
            child,
            stdin,
            stdout,
            next_id: 1,
        };
        channel.initialize(&config.name).await?;
        Ok(channel)
    }

    async fn initialize(&mut self, client_name: &str) -> Result<(), ToolError> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": client_name, "version": env!("CARGO_PKG_VERSION")}
            }),
        )
        .await?;
        self.notify("notifications/initialized", json!({})).await
    }

    async fn send(&mut self, payload: &Value) -> Result<(), ToolError> {
        let mut line = serde_json::to_string(payload)
            .map_err(|e| ToolError::Transport(format!("request encoding failed: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolError::Transport(format!("write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ToolError::Transport(format!("flush failed: {e}")))
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), ToolError> {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await?;

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ToolError::Transport(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(ToolError::Transport("server closed its stdout".into()));
            }
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = serde_json::from_str(&line)
                .map_err(|e| ToolError::Transport(format!("bad response line: {e}")))?;
            // Server-initiated notifications are interleaved with responses
            if message.get("method").is_some() {
                debug!(method = %message["method"], "ignoring server notification");
                continue;
            }
            if message.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
                let text = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown server error");
                return Err(ToolError::ExecutionFailed {
                    exit_code: error.get("code").and_then(Value::as_i64).unwrap_or(-1) as i32,
                    stderr_tail: text.to_string(),
                });
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn shutdown(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Adapter over one stdio JSON-RPC server
pub struct RpcAdapter {
    config: RpcServerConfig,
    channel: Mutex<Option<Channel>>,
    tools: Vec<Tool>,
}

impl RpcAdapter {
    /// Spawn the server, handshake, and enumerate its tools
    pub async fn connect(config: RpcServerConfig) -> Result<Self, ToolError> {
        let mut channel = Channel::spawn(&config).await?;
        let listing = channel.request("tools/list", json!({})).await?;
        let tools = Self::parse_tool_list(&config, &listing)?;
        info!(server = %config.name, tools = tools.len(), "stdio RPC server connected");
        Ok(Self {
            config,
            channel: Mutex::new(Some(channel)),
            tools,
        })
    }

    fn parse_tool_list(config: &RpcServerConfig, listing: &Value) -> Result<Vec<Tool>, ToolError> {
        let entries = listing
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::Transport("tools/list returned no tool array".into()))?;

        let mut tools = Vec::new();
        for entry in entries {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();

            let mut callable = ToolCallable::new(CALLABLE, description);
            if let Some(schema) = entry.get("inputSchema") {
                let required: Vec<&str> = schema
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                    for (param, prop) in props {
                        let param_type = match prop.get("type").and_then(Value::as_str) {
                            Some("boolean") => ParamType::Boolean,
                            Some("integer") => ParamType::Integer,
                            Some("array") => ParamType::Array,
                            _ => ParamType::String,
                        };
                        let mut tp = ToolParameter::new(
                            param,
                            param_type,
                            required.contains(&param.as_str()),
                        );
                        if let Some(desc) = prop.get("description").and_then(Value::as_str) {
                            tp = tp.with_description(desc);
                        }
                        callable = callable.with_parameter(tp);
                    }
                }
            }

            tools.push(
                Tool::new(name, description)
                    .with_tags(config.tags.clone())
                    .with_callable(callable),
            );
        }
        Ok(tools)
    }

    async fn call_once(
        &self,
        channel: &mut Channel,
        tool: &str,
        args: &serde_json::Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let result = channel
            .request(
                "tools/call",
                json!({"name": tool, "arguments": Value::Object(args.clone())}),
            )
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ToolError::ExecutionFailed {
                exit_code: -1,
                stderr_tail: flatten_content(&result),
            });
        }
        if result.get("content").is_some() {
            return Ok(Value::String(flatten_content(&result)));
        }
        Ok(result)
    }
}

fn flatten_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| result.to_string())
}

#[async_trait]
impl ToolAdapter for RpcAdapter {
    fn id(&self) -> &str {
        &self.config.name
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ToolError> {
        Ok(self.tools.clone())
    }

    async fn call(
        &self,
        tool: &str,
        recipe: Option<&str>,
        args: &serde_json::Map<String, Value>,
    ) -> Result<Value, ToolError> {
        if !self.tools.iter().any(|t| t.name == tool) {
            return Err(ToolError::NotFound(tool.to_string()));
        }
        if let Some(recipe) = recipe {
            if recipe != CALLABLE {
                return Err(ToolError::RecipeNotFound {
                    tool: tool.to_string(),
                    recipe: recipe.to_string(),
                });
            }
        }

        let mut guard = self.channel.lock().await;
        if guard.is_none() {
            *guard = Some(Channel::spawn(&self.config).await?);
        }
        let channel = guard.as_mut().expect("channel populated above");

        match self.call_once(channel, tool, args).await {
            Err(ToolError::Transport(reason)) => {
                // Child died mid-request: respawn once and retry
                warn!(server = %self.config.name, %reason, "stdio RPC channel lost; respawning");
                if let Some(dead) = guard.take() {
                    dead.shutdown().await;
                }
                *guard = Some(Channel::spawn(&self.config).await?);
                let channel = guard.as_mut().expect("channel repopulated");
                self.call_once(channel, tool, args).await
            }
            other => other,
        }
    }

    async fn close(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_list() {
        let config = RpcServerConfig {
            name: "files".into(),
            description: String::new(),
            command: "server".into(),
            args: vec![],
            env: vec![],
            tags: vec!["fs".into()],
        };
        let listing = json!({
            "tools": [{
                "name": "read_file",
                "description": "Read a file",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path"},
                        "limit": {"type": "integer"}
                    },
                    "required": ["path"]
                }
            }]
        });

        let tools = RpcAdapter::parse_tool_list(&config, &listing).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(tools[0].tags, vec!["fs"]);
        let callable = tools[0].callable(CALLABLE).unwrap();
        let path = callable.parameters.iter().find(|p| p.name == "path").unwrap();
        assert!(path.required);
        let limit = callable.parameters.iter().find(|p| p.name == "limit").unwrap();
        assert!(!limit.required);
        assert_eq!(limit.param_type, ParamType::Integer);
    }

    #[test]
    fn test_flatten_content() {
        let result = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        assert_eq!(flatten_content(&result), "a\nb");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_round_trip_against_cat_style_server() {
        // A minimal JSON-RPC server written in shell would be flaky across
        // platforms; instead exercise the channel against `cat`, which
        // echoes requests back. The echoed request has a `method` field, so
        // it is skipped as a notification and the read eventually hits EOF
        // when the child exits -> Transport error, proving framing and the
        // dead-pipe path.
        let config = RpcServerConfig {
            name: "echo".into(),
            description: String::new(),
            command: "true".into(),
            args: vec![],
            env: vec![],
            tags: vec![],
        };
        // `true` exits immediately: spawn succeeds, initialize fails on a
        // closed pipe.
        let result = RpcAdapter::connect(config).await;
        assert!(result.is_err());
    }
}
