//! Streaming agent: the reasoning side of a turn.
//!
//! Sends `[system prompt, user query]` to the provider with the tool
//! definitions attached, forwards every text delta as a fragment, and
//! executes the tool calls the model asks for before looping back. The loop
//! ends with the first reply that requests no tools, or after
//! `max_iterations` model calls.

use ragbot_config::LlmConfig;
use ragbot_core::error::ProviderError;
use ragbot_core::message::{Message, MessageToolCall};
use ragbot_core::provider::{Provider, ProviderRequest};
use ragbot_core::tool::{ToolCall, ToolRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::prompt::DEFAULT_SYSTEM_PROMPT;

/// Produces an answer as an ordered stream of text fragments.
///
/// Dropping the receiver abandons the answer; implementations stop at their
/// next suspension point.
pub trait Reasoner: Send + Sync {
    fn stream_answer(&self, query: &str) -> mpsc::Receiver<Result<String, ProviderError>>;
}

/// Tool-calling LLM loop over a streaming [`Provider`].
pub struct StreamingAgent {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: u32,
    system_prompt: String,
    rag_tool_name: Option<String>,
}

impl StreamingAgent {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            rag_tool_name: None,
        }
    }

    /// Build an agent with the model settings from `[llm]`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
        config: &LlmConfig,
        system_prompt: String,
    ) -> Self {
        Self::new(provider, tools, config.model.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_max_iterations(config.max_iterations)
            .with_system_prompt(system_prompt)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Warn when a turn ends without the model calling this tool.
    pub fn with_rag_tool(mut self, name: impl Into<String>) -> Self {
        self.rag_tool_name = Some(name.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Reasoner for StreamingAgent {
    fn stream_answer(&self, query: &str) -> mpsc::Receiver<Result<String, ProviderError>> {
        let (tx, rx) = mpsc::channel(64);
        let run = AgentRun {
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_iterations: self.max_iterations,
            rag_tool_name: self.rag_tool_name.clone(),
            messages: vec![Message::system(&self.system_prompt), Message::user(query)],
        };

        tokio::spawn(async move {
            // `closed()` resolves once the consumer drops the receiver
            let closed = tx.clone();
            tokio::select! {
                _ = closed.closed() => debug!("Answer stream dropped, agent stopped"),
                _ = run.drive(&tx) => {}
            }
        });

        rx
    }
}

/// State owned by one spawned answer.
struct AgentRun {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: u32,
    rag_tool_name: Option<String>,
    messages: Vec<Message>,
}

type FragmentSender = mpsc::Sender<Result<String, ProviderError>>;

impl AgentRun {
    async fn drive(mut self, tx: &FragmentSender) {
        let tool_defs = self.tools.definitions();
        let mut rag_invoked = false;

        for iteration in 1..=self.max_iterations {
            let request = ProviderRequest {
                model: self.model.clone(),
                messages: self.messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tool_defs.clone(),
                stream: true,
            };

            let mut stream_rx = match self.provider.stream(request).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(iteration, error = %e, "Provider request failed");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut full_content = String::new();
            let mut tool_calls: Vec<MessageToolCall> = Vec::new();

            while let Some(chunk) = stream_rx.recv().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(iteration, error = %e, "Provider stream failed");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                if let Some(text) = chunk.content
                    && !text.is_empty()
                {
                    full_content.push_str(&text);
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }

                for tc in chunk.tool_calls {
                    match tool_calls
                        .iter_mut()
                        .find(|t| !tc.id.is_empty() && t.id == tc.id)
                    {
                        Some(existing) => existing.arguments.push_str(&tc.arguments),
                        None => tool_calls.push(tc),
                    }
                }

                if chunk.done {
                    break;
                }
            }

            if tool_calls.is_empty() {
                if let Some(name) = &self.rag_tool_name
                    && !rag_invoked
                {
                    warn!(tool = %name, "Answer produced without calling the knowledge base tool");
                }
                info!(iterations = iteration, len = full_content.len(), "Answer complete");
                return;
            }

            let mut assistant = Message::assistant(full_content);
            assistant.tool_calls = tool_calls.clone();
            self.messages.push(assistant);

            for tc in tool_calls {
                if self.rag_tool_name.as_deref() == Some(tc.name.as_str()) {
                    rag_invoked = true;
                }
                let output = self.run_tool(&tc).await;
                self.messages.push(Message::tool_result(&tc.id, output));
            }
        }

        warn!(max_iterations = self.max_iterations, "Max iterations reached without a final answer");
        let _ = tx
            .send(Err(ProviderError::StreamInterrupted(format!(
                "no final answer after {} model calls",
                self.max_iterations
            ))))
            .await;
    }

    /// Execute one call; failures become the tool result text.
    async fn run_tool(&self, tc: &MessageToolCall) -> String {
        let arguments = match serde_json::from_str(&tc.arguments) {
            Ok(value) => value,
            Err(e) if tc.arguments.trim().is_empty() => {
                debug!(tool = %tc.name, error = %e, "Tool call without arguments");
                serde_json::json!({})
            }
            Err(e) => return format!("Error: invalid tool arguments: {e}"),
        };

        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments,
        };
        match self.tools.execute(&call).await {
            Ok(result) if result.success => result.output,
            Ok(result) => format!("Error: {}", result.output),
            Err(e) => {
                warn!(tool = %tc.name, error = %e, "Tool call failed");
                format!("Error: {e}")
            }
        }
    }
}
