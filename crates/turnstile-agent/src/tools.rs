//! Tool execution seam.
//!
//! The turn processor calls tools through [`ToolExecutor`].  The usual
//! implementation is a [`ToolRegistry`] holding [`ToolAdapter`]s, each of
//! which exposes one or more named tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::llm::types::ToolDefinition;

// ---------------------------------------------------------------------------
// Tool adapter trait
// ---------------------------------------------------------------------------

/// Trait for components that can execute tool calls on behalf of the agent.
///
/// Adapters (filesystem, shell, search, etc.) implement this trait so the
/// turn processor can invoke their tools uniformly.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// The unique identifier for this adapter.
    fn adapter_id(&self) -> &str;

    /// Returns the tool definitions this adapter exposes to the model.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a named tool with the given arguments.
    ///
    /// Returns the result as a string suitable for feeding back to the model.
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Executes one tool call by name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<String>;
}

/// Routes tool calls to the adapter that declares the tool.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    adapters: Vec<Arc<dyn ToolAdapter>>,
    routes: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "adapters",
                &self.adapters.iter().map(|a| a.adapter_id()).collect::<Vec<_>>(),
            )
            .field("tools", &self.routes.len())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter.  A tool name already claimed by an earlier
    /// adapter keeps its first owner.
    pub fn register(&mut self, adapter: Arc<dyn ToolAdapter>) {
        let slot = self.adapters.len();
        for def in adapter.tool_definitions() {
            self.routes.entry(def.name).or_insert(slot);
        }
        debug!(adapter = adapter.adapter_id(), "tool adapter registered");
        self.adapters.push(adapter);
    }

    /// Builder-style [`Self::register`].
    pub fn with_adapter(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Every tool definition from every adapter.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.adapters
            .iter()
            .flat_map(|a| a.tool_definitions())
            .collect()
    }

    /// Whether a tool with this name is registered.
    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.routes.contains_key(tool_name)
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<String> {
        let adapter = self
            .routes
            .get(tool_name)
            .and_then(|&slot| self.adapters.get(slot))
            .ok_or_else(|| AgentError::UnknownTool {
                tool_name: tool_name.to_owned(),
            })?;
        adapter.execute(tool_name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockAdapter {
        id: String,
        tools: Vec<ToolDefinition>,
    }

    #[async_trait]
    impl ToolAdapter for MockAdapter {
        fn adapter_id(&self) -> &str {
            &self.id
        }

        fn tool_definitions(&self) -> Vec<ToolDefinition> {
            self.tools.clone()
        }

        async fn execute(&self, tool_name: &str, _arguments: Value) -> Result<String> {
            Ok(format!("{} ran {tool_name}", self.id))
        }
    }

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with_adapter(Arc::new(MockAdapter {
                id: "fs".into(),
                tools: vec![def("read_file"), def("write_file")],
            }))
            .with_adapter(Arc::new(MockAdapter {
                id: "shadow".into(),
                tools: vec![def("read_file"), def("shell_command")],
            }))
    }

    #[test]
    fn collects_definitions() {
        let reg = registry();
        assert_eq!(reg.tool_definitions().len(), 4);
        assert!(reg.has_tool("shell_command"));
        assert!(!reg.has_tool("nonexistent"));
    }

    #[tokio::test]
    async fn routes_to_first_owner() {
        let reg = registry();
        let out = reg.execute("read_file", Value::Null).await.unwrap();
        assert_eq!(out, "fs ran read_file");
        let out = reg.execute("shell_command", Value::Null).await.unwrap();
        assert_eq!(out, "shadow ran shell_command");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let err = registry().execute("frobnicate", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown tool 'frobnicate'");
    }
}
