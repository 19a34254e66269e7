//! Tool trait — the abstraction over capabilities the model may invoke.
//!
//! ragbot ships one tool (knowledge base retrieval), but the agent loop and
//! the HTTP gateway only ever see this trait and the registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (plain text handed back to the model)
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "request_to_rag").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// Ordered so that the definitions sent to the model are stable between
/// requests.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call. The result carries the call's ID.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone()).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
