//! Tools ragbot exposes to the model and to the HTTP gateway.
//!
//! There is a single built-in tool: knowledge base retrieval, registered
//! under a configurable name (`request_to_rag` by default).

pub mod rag_query;

use ragbot_core::tool::ToolRegistry;
use ragbot_rag::Retriever;
use std::sync::Arc;

pub use rag_query::{DEFAULT_TOOL_NAME, RequestToRagTool};

/// Build the registry containing the retrieval tool.
pub fn default_registry(retriever: Arc<dyn Retriever>, tool_name: &str) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RequestToRagTool::new(retriever).with_name(tool_name)));
    registry
}
