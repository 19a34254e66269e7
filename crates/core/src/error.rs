//! Error types for the ragbot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] unifies them.

use thiserror::Error;

/// The top-level error type for all ragbot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Upstream credential errors ---
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    // --- Knowledge base retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Rendering errors ---
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A failed credential exchange.
///
/// Network errors, timeouts, non-2xx statuses and responses without an
/// `access_token` all normalize to this one type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token refresh failed: {cause}")]
pub struct AuthError {
    pub cause: String,
}

impl AuthError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    /// The endpoint answered 401 twice in a row, once with a freshly
    /// refreshed token.
    #[error("Authentication failed: repeated 401 from the knowledge base")]
    AuthExhausted,

    #[error("Could not obtain an access token: {0}")]
    Auth(#[from] AuthError),

    #[error("Knowledge base request timed out: {0}")]
    Timeout(String),

    #[error("Network error while querying the knowledge base: {0}")]
    Network(String),

    #[error("Unexpected knowledge base response (status: {status}): {message}")]
    BadResponse { status: u16, message: String },
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    /// The platform rejected an edit because the text did not change.
    #[error("Message is not modified")]
    NotModified,

    #[error("Unauthorized sender: {sender_id} on {channel}")]
    Unauthorized { channel: String, sender_id: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Failure of an aggregator render callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The rendering target already shows this exact text.
    #[error("content unchanged")]
    Unchanged,

    #[error("render failed: {0}")]
    Failed(String),
}

impl From<ChannelError> for RenderError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::NotModified => RenderError::Unchanged,
            other => RenderError::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
