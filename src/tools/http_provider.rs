//! Generic HTTP-backed [`ToolProvider`]: posts `{base_url}/{method}` with
//! the call arguments as the JSON body. Tool descriptors are supplied at
//! construction time (fetched once from the collaborator's own
//! introspection endpoint, or configured statically) since schema
//! inspection must be synchronous for method resolution.

use crate::error::{EngineError, EngineResult};
use crate::tools::{ToolDescriptor, ToolProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::instrument;

pub struct HttpToolProvider {
    name: String,
    base_url: String,
    http: Client,
    tools: Vec<ToolDescriptor>,
}

impl HttpToolProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http: Client::new(),
            tools,
        }
    }
}

/// Fetch the collaborator's own tool list from `{base_url}/tools`,
/// expected to return a JSON array of `{name, description, input_schema}`.
pub async fn discover_tools(base_url: &str) -> EngineResult<Vec<ToolDescriptor>> {
    let url = format!("{}/tools", base_url.trim_end_matches('/'));
    let response = Client::new().get(&url).send().await?;
    let raw: Value = response.json().await?;

    let items = raw
        .as_array()
        .ok_or_else(|| EngineError::DataShape("tool introspection did not return an array".to_string()))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            Some(ToolDescriptor {
                name: item.get("name")?.as_str()?.to_string(),
                description: item.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
                input_schema: item.get("input_schema").cloned().unwrap_or(serde_json::json!({})),
            })
        })
        .collect())
}

#[async_trait]
impl ToolProvider for HttpToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    #[instrument(skip(self, args), fields(provider = %self.name, method = %method))]
    async fn call(&self, method: &str, args: Value) -> EngineResult<Value> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), method);
        let response = self.http.post(&url).json(&args).send().await?;

        if !response.status().is_success() {
            return Err(EngineError::Transient(format!("{method} returned HTTP {}", response.status())));
        }

        response.json::<Value>().await.map_err(EngineError::from)
    }
}
