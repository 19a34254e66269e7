//! OpenAI-compatible chat completions provider.
//!
//! Works with any endpoint exposing `/chat/completions` with SSE streaming
//! and function calling: OpenAI, OpenRouter, vLLM, Ollama, and most hosted
//! gateways in front of other model families.

use async_trait::async_trait;
use futures::StreamExt;
use ragbot_config::LlmConfig;
use ragbot_core::error::ProviderError;
use ragbot_core::message::{Message, MessageToolCall, Role};
use ragbot_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the `[llm]` section. Fails if no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("LLM_API_KEY is not set".into()))?;
        Ok(Self::new("openai-compatible", config.api_url.clone(), api_key))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(body);
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        match response.status().as_u16() {
            200 => Ok(response),
            429 => Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            }),
            401 | 403 => Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            )),
            status => {
                let error_body = response.text().await.unwrap_or_default();
                warn!(status, body = %error_body, "Provider returned error");
                Err(ProviderError::ApiError {
                    status_code: status,
                    message: error_body,
                })
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");
        let response = self.post(&Self::request_body(&request, false), false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");
        let response = self.post(&Self::request_body(&request, true), true).await?;

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(next) = byte_stream.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for chunk in parser.push(&bytes, &provider_name) {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() {
                        trace!(provider = %provider_name, "Stream receiver dropped");
                        return;
                    }
                    if done {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(parser.finish(None))).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(Duration::from_secs(10))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

/// Incremental parser for the `data: {...}` lines of a chat completion stream.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across reads is decoded intact. Content deltas are emitted as they
/// arrive; tool call fragments are accumulated per index and emitted once,
/// with the final chunk.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
}

impl SseParser {
    fn push(&mut self, bytes: &[u8], provider_name: &str) -> Vec<StreamChunk> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                // Blank separators, comments, and `event:` lines
                continue;
            };

            if data == "[DONE]" {
                out.push(self.finish(None));
                return out;
            }

            let resp = match serde_json::from_str::<StreamResponse>(data) {
                Ok(resp) => resp,
                Err(e) => {
                    trace!(provider = %provider_name, error = %e, "Ignoring unparseable SSE chunk");
                    continue;
                }
            };

            if let Some(choice) = resp.choices.into_iter().next() {
                for delta in choice.delta.tool_calls.unwrap_or_default() {
                    let acc = self.tool_calls.entry(delta.index).or_default();
                    if let Some(id) = delta.id {
                        acc.id = id;
                    }
                    if let Some(func) = delta.function {
                        if let Some(name) = func.name {
                            acc.name = name;
                        }
                        if let Some(args) = func.arguments {
                            acc.arguments.push_str(&args);
                        }
                    }
                }

                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    out.push(StreamChunk {
                        content: Some(content),
                        ..StreamChunk::default()
                    });
                }
            }

            if let Some(usage) = resp.usage {
                out.push(self.finish(Some(usage.into())));
                return out;
            }
        }

        out
    }

    /// The terminal chunk carrying every accumulated tool call.
    fn finish(&mut self, usage: Option<Usage>) -> StreamChunk {
        StreamChunk {
            content: None,
            tool_calls: std::mem::take(&mut self.tool_calls)
                .into_values()
                .map(ToolCallAccumulator::into_tool_call)
                .collect(),
            done: true,
            usage,
        }
    }
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "test-model".into(),
            messages: vec![Message::system("be brief"), Message::user("refund policy?")],
            temperature: 0.2,
            max_tokens: None,
            tools: vec![ToolDefinition {
                name: "request_to_rag".into(),
                description: "Query the knowledge base".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            stream: true,
        }
    }

    fn sse(events: &[&str]) -> String {
        events.iter().map(|e| format!("data: {e}\n\n")).collect()
    }

    async fn collect(mut rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        chunks
    }

    #[test]
    fn message_conversion_roles_and_tool_calls() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "request_to_rag".into(),
            arguments: r#"{"query":"refunds"}"#.into(),
        }];
        let api = OpenAiCompatProvider::to_api_messages(&[
            Message::system("rules"),
            assistant,
            Message::tool_result("call_1", "Context:\n\n"),
        ]);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].tool_calls.as_ref().unwrap()[0].function.name, "request_to_rag");
        assert_eq!(api[2].role, "tool");
        assert_eq!(api[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn request_body_includes_tools_only_when_present() {
        let body = OpenAiCompatProvider::request_body(&request(), true);
        assert_eq!(body["tools"][0]["function"]["name"], "request_to_rag");
        assert_eq!(body["stream"], true);

        let mut bare = request();
        bare.tools.clear();
        let body = OpenAiCompatProvider::request_body(&bare, false);
        assert!(body.get("tools").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn parser_handles_lines_split_across_reads() {
        let mut parser = SseParser::default();
        let first = parser.push(b"data: {\"choices\":[{\"delta\":{\"con", "test");
        assert!(first.is_empty());
        let second = parser.push(b"tent\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n", "test");
        let texts: Vec<_> = second.iter().filter_map(|c| c.content.as_deref()).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[test]
    fn parser_keeps_multibyte_characters_split_across_reads() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Привет\"}}]}\n".as_bytes();
        // Second byte of 'р'
        let split = line.windows(2).position(|w| w == "р".as_bytes()).unwrap() + 1;

        let mut parser = SseParser::default();
        assert!(parser.push(&line[..split], "test").is_empty());
        let chunks = parser.push(&line[split..], "test");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("Привет"));
    }

    #[test]
    fn parser_accumulates_tool_call_fragments() {
        let mut parser = SseParser::default();
        let body = sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"request_to_rag","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"refunds\"}"}}]}}]}"#,
            "[DONE]",
        ]);
        let chunks = parser.push(body.as_bytes(), "test");
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.tool_calls.len(), 1);
        assert_eq!(last.tool_calls[0].id, "call_a");
        assert_eq!(last.tool_calls[0].arguments, r#"{"query":"refunds"}"#);
    }

    #[test]
    fn parser_ignores_garbage_and_comments() {
        let mut parser = SseParser::default();
        let chunks = parser.push(b": keep-alive\n\ndata: not-json\n\nevent: ping\n", "test");
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn stream_forwards_content_deltas() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "test-model", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse(&[
                        r#"{"choices":[{"delta":{"content":"Refunds "}}]}"#,
                        r#"{"choices":[{"delta":{"content":"take 14 days."}}]}"#,
                        r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
                    ])),
            )
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::new("test", server.uri(), "sk-test");
        let chunks = collect(provider.stream(request()).await.unwrap()).await;

        let text: String = chunks.iter().filter_map(|c| c.content.as_deref()).collect();
        assert_eq!(text, "Refunds take 14 days.");
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.usage.as_ref().unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn stream_without_done_marker_still_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse(&[r#"{"choices":[{"delta":{"content":"ok"}}]}"#])),
            )
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::new("test", server.uri(), "sk-test");
        let chunks = collect(provider.stream(request()).await.unwrap()).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].done);
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::new("test", server.uri(), "bad");
        let err = provider.stream(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn complete_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test-model",
                "choices": [{"message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function",
                        "function": {"name": "request_to_rag", "arguments": "{\"query\":\"x\"}"}}]
                }}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::new("test", server.uri(), "sk-test");
        let response = provider.complete(request()).await.unwrap();
        assert_eq!(response.message.tool_calls[0].name, "request_to_rag");
        assert!(response.message.content.is_empty());
    }

    #[test]
    fn from_config_requires_key() {
        let config = LlmConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
