//! Name-keyed tool registry.
//!
//! Tools are late-bound: the assistant names a tool in a [`ToolCall`] and the
//! [`ToolRegistry`] resolves it at call time. Every tool implements the
//! [`Tool`] trait; the registry stores them as trait objects so heterogeneous
//! implementations can live side by side.

pub mod canned;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::api::{ChatMessage, ToolCall};

/// Name, description and JSON-schema parameters of a tool, as shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// OpenAI `tools` array entry for this schema.
    pub fn to_openai(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A callable tool.
///
/// Implementations must tolerate concurrent calls with distinct arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    /// Run the tool and return the text shown to the model.
    async fn call(&self, arguments: serde_json::Value) -> Result<String>;
}

/// Registry of tools keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its schema name, replacing any previous holder.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "replacing previously registered tool");
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The live catalog, sorted by tool name.
    pub fn catalog(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Execute one tool call and wrap the output in a tool-role turn.
    ///
    /// An unknown tool name or undecodable arguments is the model's mistake:
    /// the model is told about it through the returned turn. An error raised
    /// by the tool itself is returned to the caller.
    pub async fn call_tool(&self, call: &ToolCall) -> Result<ChatMessage> {
        let name = call.function.name.as_str();
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "model requested an unknown tool");
            return Ok(ChatMessage::tool_result(
                call,
                format!("Error: unknown tool `{name}`"),
            ));
        };

        let arguments = match call.parsed_arguments() {
            Ok(args) => args,
            Err(err) => {
                warn!(tool = name, error = %err, "model sent malformed tool arguments");
                return Ok(ChatMessage::tool_result(
                    call,
                    format!("Error: arguments for `{name}` are not valid JSON"),
                ));
            }
        };

        debug!(tool = name, call_id = %call.id, "calling tool");
        let output = tool
            .call(arguments)
            .await
            .with_context(|| format!("tool `{name}` failed (call {})", call.id))?;
        Ok(ChatMessage::tool_result(call, output))
    }

    /// Execute every call concurrently; results come back in request order.
    pub async fn call_all(&self, calls: &[ToolCall]) -> Result<Vec<ChatMessage>> {
        try_join_all(calls.iter().map(|call| self.call_tool(call))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::model::api::Role;

    /// Sleeps for `delay_ms` before echoing its `value` argument.
    struct SlowEcho {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for SlowEcho {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.name.to_string(),
                description: "echo after a delay".into(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn call(&self, arguments: serde_json::Value) -> Result<String> {
            let delay = arguments["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(arguments["value"].as_str().unwrap_or_default().to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "broken".into(),
                description: String::new(),
                parameters: serde_json::json!({}),
            }
        }

        async fn call(&self, _arguments: serde_json::Value) -> Result<String> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with_tool(Arc::new(SlowEcho { name: "echo" }))
            .with_tool(Arc::new(Broken))
    }

    #[test]
    fn test_catalog_sorted_by_name() {
        let names: Vec<_> = registry().catalog().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["broken", "echo"]);
    }

    #[test]
    fn test_schema_to_openai() {
        let schema = SlowEcho { name: "echo" }.schema().to_openai();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "echo");
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let calls = vec![
            ToolCall::function("echo", &serde_json::json!({"value": "first", "delay_ms": 40})),
            ToolCall::function("echo", &serde_json::json!({"value": "second", "delay_ms": 0})),
            ToolCall::function("echo", &serde_json::json!({"value": "third", "delay_ms": 10})),
        ];
        let turns = registry().call_all(&calls).await.unwrap();

        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        for (turn, call) in turns.iter().zip(&calls) {
            assert_eq!(turn.role, Role::Tool);
            assert_eq!(turn.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_model() {
        let call = ToolCall::function("teleport", &serde_json::json!({}));
        let turn = registry().call_tool(&call).await.unwrap();
        assert!(turn.content.contains("unknown tool `teleport`"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_reported_to_model() {
        let mut call = ToolCall::function("echo", &serde_json::json!({}));
        call.function.arguments = "{oops".into();
        let turn = registry().call_tool(&call).await.unwrap();
        assert!(turn.content.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_tool_failure_propagates() {
        let calls = vec![
            ToolCall::function("echo", &serde_json::json!({"value": "ok"})),
            ToolCall::function("broken", &serde_json::json!({})),
        ];
        let err = registry().call_all(&calls).await.unwrap_err();
        assert!(format!("{err:#}").contains("backend unavailable"));
    }
}
