//! Knowledge base retrieval with a single re-authentication on 401.

use crate::auth::{AccessToken, Credentials, HttpAuthClient};
use crate::render::render_context;
use crate::token_store::TokenStore;
use async_trait::async_trait;
use ragbot_config::{ConfigError, RagConfig};
use ragbot_core::error::RetrievalError;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifies the knowledge base queried and the default result count.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub project_id: String,
    pub knowledge_base_id: String,
    pub knowledge_base_version_id: String,
    pub default_limit: u32,
}

impl KnowledgeBase {
    /// Build a request; a missing or zero limit falls back to `default_limit`.
    pub fn request(&self, query: impl Into<String>, limit: Option<u32>) -> RetrievalRequest {
        let retrieve_limit = match limit {
            Some(n) if n > 0 => n,
            _ => self.default_limit.max(1),
        };
        RetrievalRequest {
            project_id: self.project_id.clone(),
            query: query.into(),
            retrieve_limit,
            knowledge_base_id: self.knowledge_base_id.clone(),
            knowledge_base_version_id: self.knowledge_base_version_id.clone(),
        }
    }
}

/// One retrieval call. Immutable once built; see [`KnowledgeBase::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    project_id: String,
    query: String,
    retrieve_limit: u32,
    knowledge_base_id: String,
    knowledge_base_version_id: String,
}

impl RetrievalRequest {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn retrieve_limit(&self) -> u32 {
        self.retrieve_limit
    }

    pub fn knowledge_base_id(&self) -> &str {
        &self.knowledge_base_id
    }

    fn payload(&self) -> RetrievePayload<'_> {
        RetrievePayload {
            project_id: &self.project_id,
            query: &self.query,
            retrieve_limit: self.retrieve_limit,
            rag_version: &self.knowledge_base_version_id,
        }
    }
}

#[derive(Serialize)]
struct RetrievePayload<'a> {
    project_id: &'a str,
    query: &'a str,
    retrieve_limit: u32,
    rag_version: &'a str,
}

/// Documents returned by the knowledge base, in ranking order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    #[serde(default)]
    pub results: Vec<RetrievedDocument>,
}

impl RetrievalResult {
    /// The context text handed to the model.
    pub fn render(&self) -> String {
        render_context(&self.results)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<serde_json::Map<String, serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Anything that can answer a knowledge base query.
///
/// The retrieval tool and the HTTP gateway depend on this rather than on
/// [`RetrievalClient`] so they can be exercised without a network.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve documents for `query`. `None` uses the configured limit.
    async fn retrieve(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> Result<RetrievalResult, RetrievalError>;
}

/// Outcome of one authorized call.
enum Attempt {
    Done(RetrievalResult),
    Unauthorized,
}

/// HTTP client for the managed RAG retrieve endpoint.
pub struct RetrievalClient {
    client: reqwest::Client,
    tokens: Arc<TokenStore>,
    url_template: String,
    timeout: Duration,
    knowledge_base: KnowledgeBase,
}

impl RetrievalClient {
    /// `url_template` must contain `{kb_id}`.
    pub fn new(
        tokens: Arc<TokenStore>,
        url_template: impl Into<String>,
        knowledge_base: KnowledgeBase,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            url_template: url_template.into(),
            timeout,
            knowledge_base,
        }
    }

    /// Wire the HTTP auth client, token store, and retrieval client from config.
    pub fn from_config(config: &RagConfig) -> Result<Self, ConfigError> {
        let credentials = Credentials {
            key_id: required(&config.key_id, "EVOLUTION_SERVICE_ACCOUNT_KEY_ID")?,
            key_secret: required(&config.key_secret, "EVOLUTION_SERVICE_ACCOUNT_KEY_SECRET")?,
        };
        let knowledge_base = KnowledgeBase {
            project_id: required(&config.project_id, "EVOLUTION_PROJECT_ID")?,
            knowledge_base_id: required(&config.knowledge_base_id, "KNOWLEDGE_BASE_ID")?,
            knowledge_base_version_id: required(
                &config.knowledge_base_version_id,
                "KNOWLEDGE_BASE_VERSION_ID",
            )?,
            default_limit: config.effective_retrieve_limit(),
        };

        let auth = HttpAuthClient::new(
            config.auth_url.clone(),
            credentials,
            Duration::from_secs(config.auth_timeout_secs),
        );
        let tokens = Arc::new(TokenStore::new(Arc::new(auth)));

        Ok(Self::new(
            tokens,
            config.retrieve_url_template.clone(),
            knowledge_base,
            Duration::from_secs(config.retrieve_timeout_secs),
        ))
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.knowledge_base
    }

    /// Run one retrieval.
    ///
    /// A 401 triggers exactly one forced refresh and one retry; a second 401
    /// is [`RetrievalError::AuthExhausted`]. Other failures are not retried.
    pub async fn execute(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        let token = self.tokens.get_or_refresh().await?;
        if let Attempt::Done(result) = self.attempt(request, &token).await? {
            return Ok(result);
        }

        warn!(kb_id = %request.knowledge_base_id, "Knowledge base rejected the access token, refreshing");
        let token = self.tokens.force_refresh().await?;
        match self.attempt(request, &token).await? {
            Attempt::Done(result) => Ok(result),
            Attempt::Unauthorized => Err(RetrievalError::AuthExhausted),
        }
    }

    async fn attempt(
        &self,
        request: &RetrievalRequest,
        token: &AccessToken,
    ) -> Result<Attempt, RetrievalError> {
        let url = self
            .url_template
            .replace("{kb_id}", &request.knowledge_base_id);

        debug!(url = %url, limit = request.retrieve_limit, "Sending retrieval request");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(token.expose())
            .json(&request.payload())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(Attempt::Unauthorized);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Knowledge base returned an error");
            return Err(RetrievalError::BadResponse {
                status: status.as_u16(),
                message,
            });
        }

        let result: RetrievalResult = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Timeout(e.to_string())
            } else {
                RetrievalError::BadResponse {
                    status: status.as_u16(),
                    message: format!("malformed body: {e}"),
                }
            }
        })?;

        info!(documents = result.results.len(), "Retrieved documents");
        Ok(Attempt::Done(result))
    }
}

#[async_trait]
impl Retriever for RetrievalClient {
    async fn retrieve(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> Result<RetrievalResult, RetrievalError> {
        let request = self.knowledge_base.request(query, limit);
        self.execute(&request).await
    }
}

fn transport_error(e: reqwest::Error) -> RetrievalError {
    if e.is_timeout() {
        RetrievalError::Timeout(e.to_string())
    } else {
        RetrievalError::Network(e.to_string())
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| ConfigError::Missing(name.to_string()))
}
