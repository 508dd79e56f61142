//! Tool registry
//!
//! Aggregates adapters and routes calls by tool name. Names are unique
//! across adapters: a collision at registration is an error rather than a
//! silent override, so an agent's `tools.nmap` always means the same
//! backing tool.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use codemode_domain::{Tool, ToolAdapter, ToolError, ToolSummary};
use tracing::{debug, info};

use super::adapters::{CliAdapter, HttpAdapter, RpcAdapter};
use super::loader::{load_tools_dir, ToolFile};

pub struct ToolRegistry {
    adapters: Vec<Arc<dyn ToolAdapter>>,
    /// Tool name -> (adapter index, descriptor)
    tools: BTreeMap<String, (usize, Tool)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            tools: BTreeMap::new(),
        }
    }

    /// Load every tool file in a directory and register the resulting
    /// adapters. CLI definitions share one adapter; each RPC server and
    /// HTTP tool gets its own.
    pub async fn from_dir(dir: &Path) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        let mut cli_defs = Vec::new();

        for file in load_tools_dir(dir)? {
            match file {
                ToolFile::Cli(def) => cli_defs.push(def),
                ToolFile::Rpc(config) => {
                    let adapter = RpcAdapter::connect(config).await?;
                    registry.register_adapter(Arc::new(adapter)).await?;
                }
                ToolFile::Http(config) => {
                    let adapter = HttpAdapter::new(config)?;
                    registry.register_adapter(Arc::new(adapter)).await?;
                }
            }
        }
        if !cli_defs.is_empty() {
            let adapter = CliAdapter::new(cli_defs)?;
            registry.register_adapter(Arc::new(adapter)).await?;
        }

        info!(tools = registry.tools.len(), dir = %dir.display(), "tool registry loaded");
        Ok(registry)
    }

    /// Register an adapter, indexing its tools. Fails with `DuplicateTool`
    /// on a name collision and rejects descriptors with no callables.
    pub async fn register_adapter(
        &mut self,
        adapter: Arc<dyn ToolAdapter>,
    ) -> Result<(), ToolError> {
        let tools = adapter.list_tools().await?;
        let index = self.adapters.len();

        for tool in &tools {
            if self.tools.contains_key(&tool.name) {
                return Err(ToolError::Duplicate(tool.name.clone()));
            }
            if tool.callables.is_empty() {
                return Err(ToolError::Schema(format!(
                    "tool '{}' exposes no callables",
                    tool.name
                )));
            }
            let mut seen = std::collections::BTreeSet::new();
            for callable in &tool.callables {
                if !seen.insert(callable.name.as_str()) {
                    return Err(ToolError::Schema(format!(
                        "tool '{}' has duplicate callable '{}'",
                        tool.name, callable.name
                    )));
                }
            }
        }

        for tool in tools {
            debug!(tool = %tool.name, adapter = adapter.id(), "registered tool");
            self.tools.insert(tool.name.clone(), (index, tool));
        }
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name).map(|(_, tool)| tool)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Summaries of every tool, sorted by name
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools.values().map(|(_, tool)| tool.summary()).collect()
    }

    /// Keyword ranking over name, description, and tags
    pub fn search(&self, query: &str, limit: usize) -> Vec<ToolSummary> {
        let needle = query.to_lowercase();
        let mut scored: Vec<(u32, &Tool)> = self
            .tools
            .values()
            .filter_map(|(_, tool)| {
                let mut score = 0u32;
                let name = tool.name.to_lowercase();
                if name == needle {
                    score += 5;
                }
                if name.contains(&needle) {
                    score += 3;
                }
                if tool.description.to_lowercase().contains(&needle) {
                    score += 2;
                }
                if tool.tags.iter().any(|t| t.to_lowercase().contains(&needle)) {
                    score += 1;
                }
                (score > 0).then_some((score, tool))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, tool)| tool.summary())
            .collect()
    }

    /// Route a call to the owning adapter
    pub async fn call(
        &self,
        tool: &str,
        recipe: Option<&str>,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let (index, _) = self
            .tools
            .get(tool)
            .ok_or_else(|| ToolError::NotFound(tool.to_string()))?;
        self.adapters[*index].call(tool, recipe, args).await
    }

    /// Blocking variant for synchronous callers without a runtime at hand.
    /// Rust has no reliable "am I inside an async frame" probe, so the two
    /// call modes are explicit methods; callers already on a runtime should
    /// use [`call`](Self::call) (or bridge via a `Handle`, as the Lua
    /// namespaces do).
    pub fn call_blocking(
        &self,
        tool: &str,
        recipe: Option<&str>,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ToolError::Transport(format!("runtime construction failed: {e}")))?;
        runtime.block_on(self.call(tool, recipe, args))
    }

    /// Close every adapter
    pub async fn close(&self) {
        for adapter in &self.adapters {
            adapter.close().await;
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codemode_domain::ToolCallable;

    /// Fixed-output adapter used across registry and engine tests
    pub(crate) struct StubAdapter {
        pub id: String,
        pub tools: Vec<Tool>,
        pub output: serde_json::Value,
    }

    #[async_trait]
    impl ToolAdapter for StubAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        async fn list_tools(&self) -> Result<Vec<Tool>, ToolError> {
            Ok(self.tools.clone())
        }

        async fn call(
            &self,
            _tool: &str,
            _recipe: Option<&str>,
            _args: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(self.output.clone())
        }

        async fn close(&self) {}
    }

    fn stub(id: &str, tool_names: &[&str]) -> Arc<StubAdapter> {
        Arc::new(StubAdapter {
            id: id.into(),
            tools: tool_names
                .iter()
                .map(|name| {
                    Tool::new(*name, format!("{name} tool"))
                        .with_tags(vec!["net".into()])
                        .with_callable(ToolCallable::new("run", ""))
                })
                .collect(),
            output: serde_json::json!("ok"),
        })
    }

    #[tokio::test]
    async fn test_register_and_route() {
        let mut registry = ToolRegistry::new();
        registry.register_adapter(stub("a", &["nmap"])).await.unwrap();
        registry.register_adapter(stub("b", &["curl"])).await.unwrap();

        assert!(registry.get("nmap").is_some());
        let out = registry
            .call("curl", None, &serde_json::Map::new())
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn test_duplicate_tool_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register_adapter(stub("a", &["nmap"])).await.unwrap();
        let err = registry
            .register_adapter(stub("b", &["nmap"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(name) if name == "nmap"));
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .call("ghost", None, &serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry
            .register_adapter(stub("a", &["zmap", "curl"]))
            .await
            .unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["curl", "zmap"]);
    }

    #[tokio::test]
    async fn test_search_ranks_name_over_tag() {
        let mut registry = ToolRegistry::new();
        registry
            .register_adapter(stub("a", &["netcat", "curl"]))
            .await
            .unwrap();

        // "net" matches netcat's name and both tools' tag
        let results = registry.search("net", 10);
        assert_eq!(results[0].name, "netcat");
        assert_eq!(results.len(), 2);

        let results = registry.search("nothing-matches-this", 10);
        assert!(results.is_empty());
    }

    #[test]
    fn test_call_blocking_from_sync_context() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut registry = ToolRegistry::new();
        runtime
            .block_on(registry.register_adapter(stub("a", &["curl"])))
            .unwrap();

        let out = registry
            .call_blocking("curl", None, &serde_json::Map::new())
            .unwrap();
        assert_eq!(out, serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn test_empty_callables_rejected() {
        let adapter = Arc::new(StubAdapter {
            id: "bad".into(),
            tools: vec![Tool::new("hollow", "")],
            output: serde_json::Value::Null,
        });
        let mut registry = ToolRegistry::new();
        let err = registry.register_adapter(adapter).await.unwrap_err();
        assert!(matches!(err, ToolError::Schema(_)));
    }
}
