//! Configuration loading, validation, and management for ragbot.
//!
//! Loads configuration from `~/.ragbot/config.toml` with environment
//! variable overrides. Validates the settings each command needs at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of documents requested from the knowledge base.
pub const DEFAULT_RETRIEVE_LIMIT: u32 = 6;

/// The root configuration structure.
///
/// Maps directly to `~/.ragbot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Telegram bot settings
    #[serde(default)]
    pub telegram: TelegramSettings,

    /// LLM backend used by the streaming agent
    #[serde(default)]
    pub llm: LlmConfig,

    /// Upstream managed RAG service
    #[serde(default)]
    pub rag: RagConfig,

    /// Streaming edit coalescing
    #[serde(default)]
    pub stream: StreamConfig,

    /// Retrieval HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,

    /// Allowlist of sender IDs. Empty = deny all. ["*"] = allow all.
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,

    /// Long-polling timeout for getUpdates.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".into()
}
fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}
fn default_poll_timeout() -> u64 {
    30
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: default_telegram_api_url(),
            allowed_users: default_allowed_users(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &redact(&self.bot_token))
            .field("api_url", &self.api_url)
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible `/chat/completions` API.
    #[serde(default = "default_llm_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum model/tool round trips per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Optional file with the system prompt; empty or missing falls back to
    /// the built-in prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
}

fn default_llm_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_iterations() -> u32 {
    5
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_llm_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            max_iterations: default_max_iterations(),
            system_prompt_file: None,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_iterations", &self.max_iterations)
            .field("system_prompt_file", &self.system_prompt_file)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// OpenID token endpoint (client-credentials grant).
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Retrieval URL; `{kb_id}` is replaced with the knowledge base ID.
    #[serde(default = "default_retrieve_url_template")]
    pub retrieve_url_template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_version_id: Option<String>,

    /// Service account key ID (`client_id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// Service account key secret (`client_secret`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,

    #[serde(default = "default_retrieve_limit")]
    pub retrieve_limit: i64,

    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    #[serde(default = "default_retrieve_timeout")]
    pub retrieve_timeout_secs: u64,

    /// Name the retrieval tool is exposed under.
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
}

fn default_auth_url() -> String {
    "https://auth.iam.sbercloud.ru/auth/system/openid/token".into()
}
fn default_retrieve_url_template() -> String {
    "https://{kb_id}.managed-rag.inference.cloud.ru/api/v1/retrieve".into()
}
fn default_retrieve_limit() -> i64 {
    DEFAULT_RETRIEVE_LIMIT as i64
}
fn default_auth_timeout() -> u64 {
    10
}
fn default_retrieve_timeout() -> u64 {
    20
}
fn default_tool_name() -> String {
    "request_to_rag".into()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            retrieve_url_template: default_retrieve_url_template(),
            project_id: None,
            knowledge_base_id: None,
            knowledge_base_version_id: None,
            key_id: None,
            key_secret: None,
            retrieve_limit: default_retrieve_limit(),
            auth_timeout_secs: default_auth_timeout(),
            retrieve_timeout_secs: default_retrieve_timeout(),
            tool_name: default_tool_name(),
        }
    }
}

impl std::fmt::Debug for RagConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagConfig")
            .field("auth_url", &self.auth_url)
            .field("retrieve_url_template", &self.retrieve_url_template)
            .field("project_id", &self.project_id)
            .field("knowledge_base_id", &self.knowledge_base_id)
            .field("knowledge_base_version_id", &self.knowledge_base_version_id)
            .field("key_id", &self.key_id)
            .field("key_secret", &redact(&self.key_secret))
            .field("retrieve_limit", &self.retrieve_limit)
            .field("auth_timeout_secs", &self.auth_timeout_secs)
            .field("retrieve_timeout_secs", &self.retrieve_timeout_secs)
            .field("tool_name", &self.tool_name)
            .finish()
    }
}

impl RagConfig {
    /// The retrieve limit actually sent upstream; non-positive values
    /// fall back to [`DEFAULT_RETRIEVE_LIMIT`].
    pub fn effective_retrieve_limit(&self) -> u32 {
        clamp_retrieve_limit(self.retrieve_limit)
    }

    /// Retrieval URL for the configured knowledge base.
    pub fn retrieve_url(&self) -> Option<String> {
        self.knowledge_base_id
            .as_deref()
            .map(|kb_id| self.retrieve_url_template.replace("{kb_id}", kb_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Minimum seconds between two message edits.
    #[serde(default = "default_edit_interval")]
    pub edit_interval_secs: f64,

    /// Buffered characters that force an edit before the interval elapses.
    #[serde(default = "default_min_chars_delta")]
    pub min_chars_delta: usize,

    /// Text of the message shown while the answer is being generated.
    #[serde(default = "default_placeholder")]
    pub placeholder_text: String,

    /// Upper bound for the best-effort final edit of a cancelled turn.
    #[serde(default = "default_final_flush_timeout")]
    pub final_flush_timeout_secs: f64,
}

fn default_edit_interval() -> f64 {
    0.4
}
fn default_min_chars_delta() -> usize {
    48
}
fn default_placeholder() -> String {
    "⏳ Thinking…".into()
}
fn default_final_flush_timeout() -> f64 {
    2.0
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            edit_interval_secs: default_edit_interval(),
            min_chars_delta: default_min_chars_delta(),
            placeholder_text: default_placeholder(),
            final_flush_timeout_secs: default_final_flush_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8003
}
fn default_host() -> String {
    "0.0.0.0".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Parse a retrieve limit from its textual form.
///
/// Absent, non-numeric, and non-positive values all resolve to `default`.
pub fn parse_retrieve_limit(value: Option<&str>, default: u32) -> u32 {
    match value.map(str::trim).and_then(|v| v.parse::<i64>().ok()) {
        Some(limit) if limit > 0 => u32::try_from(limit).unwrap_or(default),
        _ => default,
    }
}

fn clamp_retrieve_limit(limit: i64) -> u32 {
    match u32::try_from(limit) {
        Ok(limit) if limit > 0 => limit,
        _ => DEFAULT_RETRIEVE_LIMIT,
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragbot/config.toml),
    /// then apply process environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (highest priority).
    ///
    /// Unparseable numeric values are ignored with a warning, except
    /// `RETRIEVE_LIMIT`, which resolves to the default limit.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut Option<String>, name: &str| {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *target = Some(value);
            }
        };

        set(&mut self.telegram.bot_token, "TELEGRAM_BOT_TOKEN");
        set(&mut self.llm.api_key, "LLM_API_KEY");
        set(&mut self.rag.project_id, "EVOLUTION_PROJECT_ID");
        set(&mut self.rag.knowledge_base_id, "KNOWLEDGE_BASE_ID");
        set(&mut self.rag.knowledge_base_version_id, "KNOWLEDGE_BASE_VERSION_ID");
        set(&mut self.rag.key_id, "EVOLUTION_SERVICE_ACCOUNT_KEY_ID");
        set(&mut self.rag.key_secret, "EVOLUTION_SERVICE_ACCOUNT_KEY_SECRET");

        if let Some(url) = lookup("LLM_API_URL") {
            self.llm.api_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(name) = lookup("RAG_TOOL_NAME").filter(|v| !v.is_empty()) {
            self.rag.tool_name = name;
        }

        if let Some(raw) = lookup("LLM_TEMPERATURE") {
            match raw.trim().parse::<f32>() {
                Ok(t) => self.llm.temperature = t,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparseable LLM_TEMPERATURE"),
            }
        }

        if let Some(raw) = lookup("RETRIEVE_LIMIT") {
            self.rag.retrieve_limit =
                parse_retrieve_limit(Some(&raw), DEFAULT_RETRIEVE_LIMIT) as i64;
        }

        if let Some(raw) = lookup("STREAM_EDIT_INTERVAL_SEC") {
            match raw.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => self.stream.edit_interval_secs = secs,
                _ => {
                    tracing::warn!(value = %raw, "Ignoring invalid STREAM_EDIT_INTERVAL_SEC");
                    self.stream.edit_interval_secs = default_edit_interval();
                }
            }
        }

        if let Some(raw) = lookup("STREAM_MIN_CHARS_DELTA") {
            match raw.trim().parse::<usize>() {
                Ok(delta) => self.stream.min_chars_delta = delta,
                Err(_) => {
                    tracing::warn!(value = %raw, "Ignoring invalid STREAM_MIN_CHARS_DELTA");
                    self.stream.min_chars_delta = default_min_chars_delta();
                }
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragbot")
    }

    /// Structural validation that applies to every command.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid {
                name: "llm.temperature".into(),
                reason: "must be between 0.0 and 2.0".into(),
            });
        }

        if !self.stream.edit_interval_secs.is_finite() || self.stream.edit_interval_secs < 0.0 {
            return Err(ConfigError::Invalid {
                name: "stream.edit_interval_secs".into(),
                reason: "must be a non-negative number of seconds".into(),
            });
        }

        if !self.rag.retrieve_url_template.contains("{kb_id}") {
            return Err(ConfigError::Invalid {
                name: "rag.retrieve_url_template".into(),
                reason: "must contain the {kb_id} placeholder".into(),
            });
        }

        Ok(())
    }

    /// Check the settings needed to query the knowledge base.
    pub fn validate_for_retrieval(&self) -> Result<(), ConfigError> {
        let rag = &self.rag;
        require(&rag.project_id, "EVOLUTION_PROJECT_ID")?;
        require(&rag.knowledge_base_id, "KNOWLEDGE_BASE_ID")?;
        require(&rag.knowledge_base_version_id, "KNOWLEDGE_BASE_VERSION_ID")?;
        require(&rag.key_id, "EVOLUTION_SERVICE_ACCOUNT_KEY_ID")?;
        require(&rag.key_secret, "EVOLUTION_SERVICE_ACCOUNT_KEY_SECRET")?;
        Ok(())
    }

    /// Check the settings needed to answer questions with the LLM.
    pub fn validate_for_agent(&self) -> Result<(), ConfigError> {
        self.validate_for_retrieval()?;
        require(&self.llm.api_key, "LLM_API_KEY")?;
        Ok(())
    }

    /// Check the settings needed to run the Telegram bot.
    pub fn validate_for_bot(&self) -> Result<(), ConfigError> {
        self.validate_for_agent()?;
        require(&self.telegram.bot_token, "TELEGRAM_BOT_TOKEN")?;
        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn require(value: &Option<String>, name: &str) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::Missing(name.to_string())),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: String, reason: String },
}
