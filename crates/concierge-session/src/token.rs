//! Short-lived access tokens for the avatar service.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use concierge_core::config::TokenConfig;

use crate::error::SessionError;

/// Opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token body. Surrounding whitespace is stripped; an empty
    /// body is an [`SessionError::Auth`].
    pub fn new(raw: impl AsRef<str>) -> Result<Self, SessionError> {
        let token = raw.as_ref().trim();
        if token.is_empty() {
            return Err(SessionError::Auth("token provider returned an empty token".into()));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<redacted, {} bytes>)", self.0.len())
    }
}

/// Source of access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, SessionError>;
}

// =============================================================================
// HTTP provider
// =============================================================================

/// Fetches a token with `POST <endpoint>` and reads the body as raw text.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTokenProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Auth(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Self, SessionError> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken, SessionError> {
        debug!(endpoint = %self.endpoint, "Requesting access token");
        let response = self
            .client
            .post(&self.endpoint)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Access token request failed");
                SessionError::Auth(format!("token request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Token endpoint returned an error status");
            return Err(SessionError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Auth(format!("failed to read token body: {e}")))?;
        AccessToken::new(body)
    }
}

// =============================================================================
// Static provider
// =============================================================================

/// Hands out a fixed token, or always fails. Counts requests.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
    calls: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider whose every fetch fails with [`SessionError::Auth`].
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.token {
            Some(token) => AccessToken::new(token),
            None => Err(SessionError::Auth("token provider unavailable".into())),
        }
    }
}
