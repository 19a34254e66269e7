//! Knowledge base retrieval tool.
//!
//! Calls the managed RAG service through a [`Retriever`] and returns the
//! documents as a plain-text context block the model can cite.

use async_trait::async_trait;
use ragbot_core::error::ToolError;
use ragbot_core::tool::{Tool, ToolResult};
use ragbot_rag::Retriever;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_TOOL_NAME: &str = "request_to_rag";

/// Characters of tool output included in logs.
const LOG_PREVIEW_CHARS: usize = 25;

pub struct RequestToRagTool {
    name: String,
    retriever: Arc<dyn Retriever>,
}

impl RequestToRagTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            name: DEFAULT_TOOL_NAME.to_string(),
            retriever,
        }
    }

    /// Expose the tool under another name; blank names are ignored.
    pub fn with_name(mut self, name: &str) -> Self {
        if !name.trim().is_empty() {
            self.name = name.trim().to_string();
        }
        self
    }
}

#[async_trait]
impl Tool for RequestToRagTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Query the knowledge base and get the documents relevant to the user's question. \
         Use the returned documents to answer, and cite their sources."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user's question, rephrased as a search query"
                },
                "retrieve_limit": {
                    "type": "integer",
                    "description": "Maximum number of documents to return",
                    "minimum": 1
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let limit = arguments["retrieve_limit"]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0);

        info!(tool = %self.name, query = %query, "Knowledge base tool invoked");

        let result = self.retriever.retrieve(query, limit).await.map_err(|e| {
            warn!(tool = %self.name, query = %query, error = %e, "Knowledge base tool failed");
            ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        let output = result.render();
        let preview: String = output.chars().take(LOG_PREVIEW_CHARS).collect();
        info!(
            tool = %self.name,
            documents = result.results.len(),
            preview = %preview,
            "Knowledge base tool response"
        );

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output,
            data: serde_json::to_value(&result.results).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragbot_core::error::RetrievalError;
    use ragbot_core::tool::ToolCall;
    use ragbot_rag::{RetrievalResult, RetrievedDocument};
    use std::sync::Mutex;

    /// Records the queries it receives and answers with a fixed document.
    #[derive(Default)]
    struct RecordingRetriever {
        seen: Mutex<Vec<(String, Option<u32>)>>,
        fail: bool,
    }

    #[async_trait]
    impl Retriever for RecordingRetriever {
        async fn retrieve(
            &self,
            query: &str,
            limit: Option<u32>,
        ) -> Result<RetrievalResult, RetrievalError> {
            self.seen.lock().unwrap().push((query.to_string(), limit));
            if self.fail {
                return Err(RetrievalError::AuthExhausted);
            }
            Ok(RetrievalResult {
                results: vec![RetrievedDocument {
                    content: "Refunds take 14 days.".into(),
                    metadata: serde_json::Map::new(),
                }],
            })
        }
    }

    #[tokio::test]
    async fn returns_rendered_context() {
        let retriever = Arc::new(RecordingRetriever::default());
        let tool = RequestToRagTool::new(retriever.clone());

        let result = tool
            .execute(serde_json::json!({"query": "  refund policy "}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.output,
            "Context:\n\nDocument 1:\nContent: Refunds take 14 days.\nMetadata: {}\n\n"
        );
        assert_eq!(result.data.unwrap()[0]["content"], "Refunds take 14 days.");
        assert_eq!(
            retriever.seen.lock().unwrap().as_slice(),
            &[("refund policy".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn passes_explicit_limit() {
        let retriever = Arc::new(RecordingRetriever::default());
        let tool = RequestToRagTool::new(retriever.clone());

        tool.execute(serde_json::json!({"query": "q", "retrieve_limit": 2}))
            .await
            .unwrap();
        tool.execute(serde_json::json!({"query": "q", "retrieve_limit": 0}))
            .await
            .unwrap();

        let seen = retriever.seen.lock().unwrap();
        assert_eq!(seen[0].1, Some(2));
        assert_eq!(seen[1].1, None);
    }

    #[tokio::test]
    async fn missing_query_is_invalid() {
        let tool = RequestToRagTool::new(Arc::new(RecordingRetriever::default()));
        let err = tool.execute(serde_json::json!({"query": "   "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn retrieval_failure_is_execution_failure() {
        let retriever = Arc::new(RecordingRetriever {
            fail: true,
            ..Default::default()
        });
        let tool = RequestToRagTool::new(retriever);
        let err = tool.execute(serde_json::json!({"query": "q"})).await.unwrap_err();
        match err {
            ToolError::ExecutionFailed { tool_name, reason } => {
                assert_eq!(tool_name, "request_to_rag");
                assert!(reason.contains("repeated 401"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn registry_uses_configured_name() {
        let registry = crate::default_registry(Arc::new(RecordingRetriever::default()), "kb_lookup");
        assert_eq!(registry.names(), vec!["kb_lookup"]);

        let call = ToolCall {
            id: "call_9".into(),
            name: "kb_lookup".into(),
            arguments: serde_json::json!({"query": "q"}),
        };
        let result = registry.execute(&call).await.unwrap();
        assert_eq!(result.call_id, "call_9");
    }

    #[test]
    fn blank_name_keeps_default() {
        let tool = RequestToRagTool::new(Arc::new(RecordingRetriever::default())).with_name(" ");
        assert_eq!(tool.name(), DEFAULT_TOOL_NAME);
    }
}
