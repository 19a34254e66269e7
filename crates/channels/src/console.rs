//! Console channel — interactive terminal chat.
//!
//! Reads queries from stdin and writes answers to stdout. Since every edit
//! of a streamed answer extends the previous text, an edit prints only the
//! new suffix, so the answer appears to type itself out.

use async_trait::async_trait;
use ragbot_core::channel::{Channel, ChannelId, ChannelMessage, MessageHandle};
use ragbot_core::error::ChannelError;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const CHAT_ID: &str = "console";

/// Interactive console channel.
pub struct ConsoleChannel {
    id: ChannelId,
    out: Mutex<Box<dyn Write + Send>>,
    /// Text currently displayed for each message handle.
    shown: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            id: ChannelId("console".into()),
            out: Mutex::new(out),
            shown: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn write(&self, text: &str) -> Result<(), ChannelError> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: "console".into(),
                reason: e.to_string(),
            })
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let channel_id = self.id.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if matches!(line.as_str(), "exit" | "quit" | "/exit" | "/quit") {
                            break;
                        }

                        let msg = ChannelMessage {
                            channel_id: channel_id.clone(),
                            sender_id: "local_user".into(),
                            sender_name: Some("User".into()),
                            content: line,
                            chat_id: CHAT_ID.into(),
                            message_id: None,
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        _reply_to: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        self.write(&format!("\n{content}"))?;
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message_id.clone(), content.to_string());
        Ok(MessageHandle {
            chat_id: chat_id.to_string(),
            message_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, content: &str) -> Result<(), ChannelError> {
        let previous = self
            .shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.message_id.clone(), content.to_string())
            .unwrap_or_default();

        if previous == content {
            return Err(ChannelError::NotModified);
        }
        match content.strip_prefix(previous.as_str()) {
            Some(suffix) => self.write(suffix),
            // e.g. the placeholder being replaced by the answer
            None => self.write(&format!("\n{content}")),
        }
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true // local user
    }
}
