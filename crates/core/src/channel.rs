//! Channel trait — the abstraction over chat surfaces.
//!
//! A Channel delivers user queries to ragbot and shows the streamed answer
//! back. Streaming relies on two operations only: `send` creates the visible
//! message once, `edit` replaces its whole text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ChannelError;

/// Unique identifier for a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// The channel this message belongs to
    pub channel_id: ChannelId,

    /// Sender identifier (platform-specific user ID)
    pub sender_id: String,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// The text content
    pub content: String,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// Platform message ID of this message (for replies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Identifies a message previously created with [`Channel::send`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: String,
    pub message_id: String,
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, message
/// formatting, and authentication.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram", "console").
    fn name(&self) -> &str;

    /// Unique ID for this channel instance.
    fn id(&self) -> &ChannelId;

    /// Start listening for incoming messages.
    ///
    /// Returns a receiver that yields incoming messages. The channel
    /// implementation handles polling or reading internally.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<ChannelMessage, ChannelError>>,
        ChannelError,
    >;

    /// Send a new message to a chat and return a handle for later edits.
    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<MessageHandle, ChannelError>;

    /// Replace the full text of a previously sent message.
    ///
    /// Returns [`ChannelError::NotModified`] when the platform reports the
    /// text is identical to what it already shows.
    async fn edit(
        &self,
        handle: &MessageHandle,
        content: &str,
    ) -> std::result::Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: &str) -> std::result::Result<(), ChannelError> {
        Ok(()) // No-op default
    }

    /// Check if a sender is allowed (allowlist check).
    fn is_allowed(&self, sender_id: &str) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check — is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}

/// Allowlist check shared by channel implementations.
///
/// Empty list denies everyone, `"*"` admits everyone.
pub fn allowlist_permits(allowed: &[String], sender_id: &str) -> bool {
    allowed.iter().any(|u| u == "*" || u == sender_id)
}
