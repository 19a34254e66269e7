//! Shared test doubles for the agent crate.

#![allow(dead_code)]

use async_trait::async_trait;
use ragbot_core::channel::{Channel, ChannelId, ChannelMessage, MessageHandle};
use ragbot_core::error::{ChannelError, ProviderError};
use ragbot_core::message::MessageToolCall;
use ragbot_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::streaming::Reasoner;

/// In-memory channel that records every send and edit.
///
/// Identical edits fail with `NotModified` like Telegram does.
pub struct RecordingChannel {
    id: ChannelId,
    allowed: Vec<String>,
    sent: Mutex<Vec<(String, String)>>,
    edits: Mutex<Vec<String>>,
    shown: Mutex<HashMap<String, String>>,
    failing_edits: Mutex<usize>,
    hanging_edits: Mutex<bool>,
    inbox: Mutex<Vec<ChannelMessage>>,
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::with_allowlist(vec!["*".into()])
    }
}

impl RecordingChannel {
    pub fn with_allowlist(allowed: Vec<String>) -> Self {
        Self {
            id: ChannelId("recording".into()),
            allowed,
            sent: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            shown: Mutex::new(HashMap::new()),
            failing_edits: Mutex::new(0),
            hanging_edits: Mutex::new(false),
            inbox: Mutex::new(Vec::new()),
        }
    }

    /// Messages delivered by `start`, after which the stream ends.
    pub fn with_inbox(self, messages: Vec<ChannelMessage>) -> Self {
        *self.inbox.lock().unwrap() = messages;
        self
    }

    /// Make the next `n` edits fail with a delivery error.
    pub fn fail_next_edits(&self, n: usize) {
        *self.failing_edits.lock().unwrap() = n;
    }

    /// Make every later edit wait forever.
    pub fn hang_edits(&self) {
        *self.hanging_edits.lock().unwrap() = true;
    }

    /// `(chat_id, text)` of every `send`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Text of every accepted edit, in order.
    pub fn edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().clone()
    }

    /// What the message behind `handle` shows now.
    pub fn shown(&self, handle: &MessageHandle) -> Option<String> {
        self.shown.lock().unwrap().get(&handle.message_id).cloned()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let inbox = std::mem::take(&mut *self.inbox.lock().unwrap());
        let (tx, rx) = mpsc::channel(inbox.len() + 1);
        for msg in inbox {
            let _ = tx.try_send(Ok(msg));
        }
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        _reply_to: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id.to_string(), content.to_string()));
        let message_id = sent.len().to_string();
        self.shown
            .lock()
            .unwrap()
            .insert(message_id.clone(), content.to_string());
        Ok(MessageHandle {
            chat_id: chat_id.to_string(),
            message_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, content: &str) -> Result<(), ChannelError> {
        let hang = *self.hanging_edits.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        {
            let mut failing = self.failing_edits.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ChannelError::DeliveryFailed {
                    channel: "recording".into(),
                    reason: "Too Many Requests".into(),
                });
            }
        }
        let mut shown = self.shown.lock().unwrap();
        if shown.get(&handle.message_id).map(String::as_str) == Some(content) {
            return Err(ChannelError::NotModified);
        }
        shown.insert(handle.message_id.clone(), content.to_string());
        self.edits.lock().unwrap().push(content.to_string());
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        ragbot_core::channel::allowlist_permits(&self.allowed, sender_id)
    }
}

/// A text message from `sender_id` in chat `chat_id`.
pub fn inbound(sender_id: &str, chat_id: &str, content: &str) -> ChannelMessage {
    ChannelMessage {
        channel_id: ChannelId("recording".into()),
        sender_id: sender_id.into(),
        sender_name: None,
        content: content.into(),
        chat_id: chat_id.into(),
        message_id: Some("100".into()),
    }
}

/// Reasoner that replays fixed fragments, optionally ending with an error.
pub struct ScriptedReasoner {
    fragments: Vec<String>,
    error: Option<ProviderError>,
    delay: Duration,
}

impl ScriptedReasoner {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            error: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing_with(mut self, error: ProviderError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sleep before every fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Reasoner for ScriptedReasoner {
    fn stream_answer(&self, _query: &str) -> mpsc::Receiver<Result<String, ProviderError>> {
        let (tx, rx) = mpsc::channel(4);
        let fragments = self.fragments.clone();
        let error = self.error.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(fragment)).await.is_err() {
                    return;
                }
            }
            if let Some(err) = error {
                let _ = tx.send(Err(err)).await;
            }
        });
        rx
    }
}

/// One scripted provider reply, streamed as separate chunks.
#[derive(Clone, Default)]
pub struct ScriptedReply {
    pub deltas: Vec<String>,
    pub tool_calls: Vec<MessageToolCall>,
}

impl ScriptedReply {
    pub fn text(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            deltas: Vec::new(),
            tool_calls: vec![MessageToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
        }
    }
}

/// Streaming provider returning one scripted reply per call.
///
/// Records every request so tests can inspect the conversation sent.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("scripted provider only streams".into()))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::text(&["(no more replies)"]));

        let (tx, rx) = mpsc::channel(reply.deltas.len() + 1);
        for delta in reply.deltas {
            let _ = tx.try_send(Ok(StreamChunk {
                content: Some(delta),
                ..Default::default()
            }));
        }
        let _ = tx.try_send(Ok(StreamChunk {
            tool_calls: reply.tool_calls,
            done: true,
            ..Default::default()
        }));
        Ok(rx)
    }
}
