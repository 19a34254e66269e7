//! Credential exchange against the OpenID token endpoint.

use async_trait::async_trait;
use ragbot_core::error::AuthError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An opaque bearer token.
///
/// Cheap to clone; never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(Arc<str>);

impl AccessToken {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Service account key pair.
#[derive(Clone)]
pub struct Credentials {
    pub key_id: String,
    pub key_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .finish()
    }
}

/// Exchanges credentials for a fresh token.
///
/// Each call is one network round trip; caching and coalescing live in
/// [`TokenStore`](crate::TokenStore).
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn exchange(&self) -> Result<AccessToken, AuthError>;
}

/// Client-credentials grant over HTTP.
pub struct HttpAuthClient {
    url: String,
    credentials: Credentials,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

impl HttpAuthClient {
    pub fn new(url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            credentials,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn exchange(&self) -> Result<AccessToken, AuthError> {
        debug!(url = %self.url, key_id = %self.credentials.key_id, "Requesting access token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.key_id.as_str()),
            ("client_secret", self.credentials.key_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::new("timed out waiting for the token endpoint")
                } else {
                    AuthError::new(format!("network error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token endpoint rejected credentials");
            return Err(AuthError::new(format!("status {}: {body}", status.as_u16())));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::new(format!("unreadable token response: {e}")))?;

        match parsed.access_token {
            Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
            _ => Err(AuthError::new("response did not contain access_token")),
        }
    }
}
