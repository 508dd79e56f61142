//! HTTP tool adapter
//!
//! Exposes a set of HTTP endpoints as one tool. Path parameters are filled
//! from keyword args; an optional `query_params` mapping becomes the query
//! string. Responses are parsed as JSON when the body allows it, text
//! otherwise.

use std::time::Duration;

use async_trait::async_trait;
use codemode_domain::{ParamType, Tool, ToolAdapter, ToolCallable, ToolError, ToolParameter};
use serde_json::Value;
use tracing::debug;

/// Reserved keyword argument carrying the query-string mapping
const QUERY_PARAMS: &str = "query_params";

/// One endpoint of an HTTP tool
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub name: String,
    pub method: String,
    /// Path template with `{param}` placeholders, joined onto `base_url`
    pub path: String,
    pub description: String,
}

impl HttpEndpoint {
    /// Placeholder names in declaration order
    pub fn path_params(&self) -> Vec<String> {
        let mut params = Vec::new();
        let mut rest = self.path.as_str();
        while let Some(start) = rest.find('{') {
            let Some(end) = rest[start..].find('}') else {
                break;
            };
            params.push(rest[start + 1..start + end].to_string());
            rest = &rest[start + end + 1..];
        }
        params
    }
}

/// Configuration of one HTTP tool (from a `type: http` tool file)
#[derive(Debug, Clone)]
pub struct HttpToolConfig {
    pub name: String,
    pub description: String,
    pub base_url: String,
    pub tags: Vec<String>,
    pub timeout_secs: f64,
    pub endpoints: Vec<HttpEndpoint>,
}

/// Adapter over one HTTP tool
pub struct HttpAdapter {
    config: HttpToolConfig,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(config: HttpToolConfig) -> Result<Self, ToolError> {
        if config.endpoints.is_empty() {
            return Err(ToolError::Schema(format!(
                "HTTP tool '{}' declares no endpoints",
                config.name
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_secs.max(0.001)))
            .build()
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, recipe: Option<&str>) -> Result<&HttpEndpoint, ToolError> {
        match recipe {
            Some(name) => self
                .config
                .endpoints
                .iter()
                .find(|e| e.name == name)
                .ok_or_else(|| ToolError::RecipeNotFound {
                    tool: self.config.name.clone(),
                    recipe: name.to_string(),
                }),
            // The escape hatch only makes sense for a single-endpoint tool
            None if self.config.endpoints.len() == 1 => Ok(&self.config.endpoints[0]),
            None => Err(ToolError::MissingArgument("endpoint".into())),
        }
    }
}

#[async_trait]
impl ToolAdapter for HttpAdapter {
    fn id(&self) -> &str {
        &self.config.name
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ToolError> {
        let mut tool = Tool::new(&self.config.name, &self.config.description)
            .with_tags(self.config.tags.clone());
        for endpoint in &self.config.endpoints {
            let mut callable = ToolCallable::new(&endpoint.name, &endpoint.description);
            for param in endpoint.path_params() {
                callable =
                    callable.with_parameter(ToolParameter::new(param, ParamType::String, true));
            }
            tool = tool.with_callable(callable);
        }
        Ok(vec![tool])
    }

    async fn call(
        &self,
        tool: &str,
        recipe: Option<&str>,
        args: &serde_json::Map<String, Value>,
    ) -> Result<Value, ToolError> {
        if tool != self.config.name {
            return Err(ToolError::NotFound(tool.to_string()));
        }
        let endpoint = self.endpoint(recipe)?;
        let path_params = endpoint.path_params();

        for key in args.keys() {
            if key != QUERY_PARAMS && !path_params.contains(key) {
                return Err(ToolError::UnknownArgument(key.clone()));
            }
        }

        let mut path = endpoint.path.clone();
        for param in &path_params {
            let value = args
                .get(param)
                .ok_or_else(|| ToolError::MissingArgument(param.clone()))?;
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            path = path.replace(&format!("{{{param}}}"), &text);
        }

        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let method: reqwest::Method = endpoint
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| ToolError::Schema(format!("bad HTTP method '{}'", endpoint.method)))?;

        let mut request = self.client.request(method, &url);
        if let Some(query) = args.get(QUERY_PARAMS).and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect();
            request = request.query(&pairs);
        }
        debug!(tool, endpoint = %endpoint.name, %url, "invoking HTTP tool");

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Transport(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(format!("reading body failed: {e}")))?;

        if !status.is_success() {
            let tail: String = body.chars().take(512).collect();
            return Err(ToolError::ExecutionFailed {
                exit_code: i32::from(status.as_u16()),
                stderr_tail: tail,
            });
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HttpToolConfig {
        HttpToolConfig {
            name: "repos".into(),
            description: "Repository API".into(),
            base_url: "http://127.0.0.1:9".into(),
            tags: vec![],
            timeout_secs: 1.0,
            endpoints: vec![HttpEndpoint {
                name: "stars".into(),
                method: "GET".into(),
                path: "/repos/{owner}/{repo}".into(),
                description: "Fetch repo metadata".into(),
            }],
        }
    }

    #[test]
    fn test_path_params_extracted_in_order() {
        let endpoint = &config().endpoints[0];
        assert_eq!(endpoint.path_params(), vec!["owner", "repo"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_path_param() {
        let adapter = HttpAdapter::new(config()).unwrap();
        let args = serde_json::json!({"owner": "a"}).as_object().unwrap().clone();
        let err = adapter.call("repos", Some("stars"), &args).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingArgument(name) if name == "repo"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_keyword_rejected() {
        let adapter = HttpAdapter::new(config()).unwrap();
        let args = serde_json::json!({"owner": "a", "repo": "b", "page": 2})
            .as_object()
            .unwrap()
            .clone();
        let err = adapter.call("repos", Some("stars"), &args).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownArgument(name) if name == "page"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_endpoint() {
        let adapter = HttpAdapter::new(config()).unwrap();
        let err = adapter
            .call("repos", Some("forks"), &serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::RecipeNotFound { .. }));
    }

    #[test]
    fn test_listing_shape() {
        let adapter = HttpAdapter::new(config()).unwrap();
        let tools = futures_block(adapter.list_tools()).unwrap();
        assert_eq!(tools.len(), 1);
        let callable = tools[0].callable("stars").unwrap();
        let names: Vec<&str> = callable.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["owner", "repo"]);
    }

    fn futures_block<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }
}
