//! Telegram channel adapter.
//!
//! Talks to the Bot API directly over HTTPS: `getUpdates` long polling for
//! inbound messages, `sendMessage`/`editMessageText` for the streamed answer.

use async_trait::async_trait;
use ragbot_config::TelegramSettings;
use ragbot_core::channel::{Channel, ChannelId, ChannelMessage, MessageHandle, allowlist_permits};
use ragbot_core::error::ChannelError;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Telegram rejects message texts longer than this.
const MAX_MESSAGE_UNITS: usize = 4096;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_BACKOFF: Duration = Duration::from_secs(2);

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Bot API base URL.
    pub api_url: String,
    /// Allowed user IDs. Empty = deny all, ["*"] = allow all.
    pub allowed_users: Vec<String>,
    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl TelegramConfig {
    pub fn from_settings(settings: &TelegramSettings) -> Result<Self, ChannelError> {
        let bot_token = settings
            .bot_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChannelError::NotConfigured("TELEGRAM_BOT_TOKEN is not set".into()))?;
        Ok(Self {
            bot_token,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            allowed_users: settings.allowed_users.clone(),
            poll_timeout_secs: settings.poll_timeout_secs,
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

/// Telegram channel adapter.
pub struct TelegramChannel {
    api: BotApi,
    allowed_users: Vec<String>,
    poll_timeout_secs: u64,
    channel_id: ChannelId,
    shutdown: std::sync::Mutex<CancellationToken>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            api: BotApi {
                base: format!("{}/bot{}", config.api_url, config.bot_token),
                client: reqwest::Client::new(),
            },
            allowed_users: config.allowed_users,
            poll_timeout_secs: config.poll_timeout_secs,
            channel_id: ChannelId("telegram".into()),
            shutdown: std::sync::Mutex::new(CancellationToken::new()),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let shutdown = CancellationToken::new();
        {
            let mut current = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());
            current.cancel();
            *current = shutdown.clone();
        }

        let (tx, rx) = mpsc::channel(64);
        let api = self.api.clone();
        let channel_id = self.channel_id.clone();
        let poll_timeout = self.poll_timeout_secs;

        info!(poll_timeout, "Telegram channel starting long polling");
        tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": poll_timeout,
                    "allowed_updates": ["message"],
                });
                let timeout = Duration::from_secs(poll_timeout) + REQUEST_TIMEOUT;

                let updates = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    res = api.call::<Vec<Update>>("getUpdates", &body, timeout) => res,
                };

                let updates = match updates {
                    Ok(updates) => updates,
                    Err(e) => {
                        warn!(error = %e, "getUpdates failed, backing off");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(POLL_BACKOFF) => continue,
                        }
                    }
                };

                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(msg) = update.into_channel_message(&channel_id) else {
                        continue;
                    };
                    debug!(chat_id = %msg.chat_id, sender_id = %msg.sender_id, "Telegram message received");
                    if tx.send(Ok(msg)).await.is_err() {
                        return;
                    }
                }
            }
            info!("Telegram polling stopped");
        });

        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": clip(content),
        });
        if let Some(reply_to) = reply_to.and_then(|id| id.parse::<i64>().ok()) {
            body["reply_to_message_id"] = serde_json::json!(reply_to);
        }

        let sent: SentMessage = self.api.call("sendMessage", &body, REQUEST_TIMEOUT).await?;
        Ok(MessageHandle {
            chat_id: sent.chat.id.to_string(),
            message_id: sent.message_id.to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, content: &str) -> Result<(), ChannelError> {
        let message_id: i64 = handle.message_id.parse().map_err(|_| {
            ChannelError::InvalidPayload(format!("not a Telegram message id: {}", handle.message_id))
        })?;
        let body = serde_json::json!({
            "chat_id": handle.chat_id,
            "message_id": message_id,
            "text": clip(content),
        });
        // The result is the edited Message (or `true` for inline messages).
        self.api
            .call::<serde_json::Value>("editMessageText", &body, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        self.api
            .call::<bool>("sendChatAction", &body, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        allowlist_permits(&self.allowed_users, sender_id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        self.shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        let me: User = self
            .api
            .call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT)
            .await?;
        debug!(bot_id = me.id, "Telegram getMe succeeded");
        Ok(true)
    }
}

/// Truncate to Telegram's limit, keeping whole characters. The limit is
/// measured in UTF-16 code units.
fn clip(text: &str) -> String {
    if text.encode_utf16().count() <= MAX_MESSAGE_UNITS {
        return text.to_string();
    }
    let budget = MAX_MESSAGE_UNITS - '…'.len_utf16();
    let mut used = 0;
    let mut clipped: String = text
        .chars()
        .take_while(|c| {
            used += c.len_utf16();
            used <= budget
        })
        .collect();
    clipped.push('…');
    clipped
}

/// Thin JSON client for `https://api.telegram.org/bot<token>/<method>`.
#[derive(Clone)]
struct BotApi {
    base: String,
    client: reqwest::Client,
}

impl BotApi {
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: format!("{method}: unreadable response (status {status}): {e}"),
            }
        })?;

        match envelope {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => {
                let description = description.unwrap_or_else(|| format!("status {status}"));
                if description.to_lowercase().contains("message is not modified") {
                    return Err(ChannelError::NotModified);
                }
                Err(ChannelError::DeliveryFailed {
                    channel: "telegram".into(),
                    reason: format!("{method}: {description}"),
                })
            }
        }
    }
}

// --- Bot API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<IncomingMessage>,
}

impl Update {
    fn into_channel_message(self, channel_id: &ChannelId) -> Option<ChannelMessage> {
        let message = self.message?;
        let text = message.text?;
        let from = message.from?;
        Some(ChannelMessage {
            channel_id: channel_id.clone(),
            sender_id: from.id.to_string(),
            sender_name: from.username.or(from.first_name),
            content: text,
            chat_id: message.chat.id.to_string(),
            message_id: Some(message.message_id.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(server: &MockServer, allowed: Vec<String>) -> TelegramChannel {
        TelegramChannel::new(TelegramConfig {
            bot_token: "123:abc".into(),
            api_url: server.uri(),
            allowed_users: allowed,
            poll_timeout_secs: 0,
        })
    }

    fn sent(message_id: i64) -> serde_json::Value {
        serde_json::json!({
            "ok": true,
            "result": {"message_id": message_id, "chat": {"id": 42}, "date": 0, "text": "x"}
        })
    }

    #[test]
    fn from_settings_requires_token() {
        let settings = TelegramSettings::default();
        assert!(matches!(
            TelegramConfig::from_settings(&settings),
            Err(ChannelError::NotConfigured(_))
        ));
    }

    #[test]
    fn debug_redacts_token() {
        let config = TelegramConfig {
            bot_token: "123:secret".into(),
            api_url: "https://api.telegram.org".into(),
            allowed_users: vec![],
            poll_timeout_secs: 30,
        };
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[tokio::test]
    async fn allowlist_follows_config() {
        let server = MockServer::start().await;
        let open = channel(&server, vec!["*".into()]);
        assert!(open.is_allowed("anyone"));

        let closed = channel(&server, vec![]);
        assert!(!closed.is_allowed("anyone"));

        let listed = channel(&server, vec!["7".into()]);
        assert!(listed.is_allowed("7"));
        assert!(!listed.is_allowed("8"));
    }

    #[tokio::test]
    async fn send_returns_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "42",
                "text": "⏳ Thinking…",
                "reply_to_message_id": 5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(sent(77)))
            .expect(1)
            .mount(&server)
            .await;

        let handle = channel(&server, vec![])
            .send("42", "⏳ Thinking…", Some("5"))
            .await
            .unwrap();
        assert_eq!(
            handle,
            MessageHandle {
                chat_id: "42".into(),
                message_id: "77".into()
            }
        );
    }

    #[tokio::test]
    async fn edit_not_modified_is_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/editMessageText"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: message is not modified: specified new message content and reply markup are exactly the same"
            })))
            .mount(&server)
            .await;

        let handle = MessageHandle {
            chat_id: "42".into(),
            message_id: "77".into(),
        };
        let err = channel(&server, vec![]).edit(&handle, "same").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotModified));
    }

    #[tokio::test]
    async fn edit_other_failure_is_delivery_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/editMessageText"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: message to edit not found"
            })))
            .mount(&server)
            .await;

        let handle = MessageHandle {
            chat_id: "42".into(),
            message_id: "77".into(),
        };
        let err = channel(&server, vec![]).edit(&handle, "text").await.unwrap_err();
        assert!(matches!(err, ChannelError::DeliveryFailed { ref reason, .. } if reason.contains("not found")));
    }

    #[tokio::test]
    async fn edit_rejects_non_numeric_handle() {
        let server = MockServer::start().await;
        let handle = MessageHandle {
            chat_id: "42".into(),
            message_id: "abc".into(),
        };
        let err = channel(&server, vec![]).edit(&handle, "t").await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn polling_delivers_text_messages_and_advances_offset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .and(body_partial_json(serde_json::json!({"offset": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": [
                    {"update_id": 100, "message": {
                        "message_id": 1, "date": 0, "chat": {"id": 42, "type": "private"},
                        "from": {"id": 7, "is_bot": false, "first_name": "Ann", "username": "ann"},
                        "text": "What is the refund policy?"}},
                    {"update_id": 101, "message": {
                        "message_id": 2, "date": 0, "chat": {"id": 42, "type": "private"},
                        "from": {"id": 7, "is_bot": false, "first_name": "Ann"},
                        "sticker": {}}}
                ]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .and(body_partial_json(serde_json::json!({"offset": 102})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "result": []}))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1..)
            .mount(&server)
            .await;

        let ch = channel(&server, vec!["*".into()]);
        let mut rx = ch.start().await.unwrap();

        let msg = rx.recv().await.unwrap().unwrap();
        assert_eq!(msg.content, "What is the refund policy?");
        assert_eq!(msg.sender_id, "7");
        assert_eq!(msg.sender_name.as_deref(), Some("ann"));
        assert_eq!(msg.chat_id, "42");
        assert_eq!(msg.message_id.as_deref(), Some("1"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        ch.stop().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn health_check_calls_get_me() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "ragbot", "username": "rag_bot"}
            })))
            .mount(&server)
            .await;

        assert!(channel(&server, vec![]).health_check().await.unwrap());
    }

    #[test]
    fn long_texts_are_clipped() {
        let long = "a".repeat(MAX_MESSAGE_UNITS + 10);
        let clipped = clip(&long);
        assert_eq!(clipped.encode_utf16().count(), MAX_MESSAGE_UNITS);
        assert!(clipped.ends_with('…'));
        assert_eq!(clip("short"), "short");
    }

    #[test]
    fn clipping_counts_utf16_units() {
        // Each emoji is two UTF-16 units
        let emoji = "😀".repeat(MAX_MESSAGE_UNITS / 2 + 1);
        let clipped = clip(&emoji);
        assert!(clipped.encode_utf16().count() <= MAX_MESSAGE_UNITS);
        assert!(clipped.ends_with('…'));
        assert_eq!(clipped.chars().filter(|c| *c == '😀').count(), (MAX_MESSAGE_UNITS - 1) / 2);

        let fits = "😀".repeat(MAX_MESSAGE_UNITS / 2);
        assert_eq!(clip(&fits), fits);
    }
}
