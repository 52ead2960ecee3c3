//! IAM access token sources
//!
//! Cloud SQL IAM database authentication accepts an OAuth2 access token as
//! the password of a cleartext password exchange. Tokens are only requested
//! when the server asks for a password, so the auth proxy path (which
//! injects the token itself) never touches a token source.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default token endpoint of the compute metadata server
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the reported expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// OAuth2 access token
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// Token without a known expiry
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    /// Token that expires after `ttl`
    ///
    /// A `ttl` too large to represent is treated as no expiry.
    pub fn expiring_in(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// Token value, sent as the password
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Whether the token is within the refresh margin of expiring
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(at) => at.saturating_duration_since(Instant::now()) <= REFRESH_MARGIN,
            None => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies access tokens for IAM database login
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current token; failures are `Error::Auth`
    async fn token(&self) -> Result<AccessToken>;
}

/// Fixed token
#[derive(Debug, Clone)]
pub struct StaticToken(AccessToken);

impl StaticToken {
    /// Wrap a token value
    pub fn new(secret: impl Into<String>) -> Self {
        Self(AccessToken::new(secret))
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<AccessToken> {
        Ok(self.0.clone())
    }
}

/// Token read from an environment variable on every use
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Read from `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenSource for EnvToken {
    async fn token(&self) -> Result<AccessToken> {
        match std::env::var(&self.var) {
            Ok(v) if !v.trim().is_empty() => Ok(AccessToken::new(v.trim())),
            _ => Err(Error::Auth(format!(
                "no access token available: {} is not set",
                self.var
            ))),
        }
    }
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

fn parse_token_response(raw: &[u8]) -> Result<MetadataTokenResponse> {
    serde_json::from_slice(raw)
        .map_err(|e| Error::Auth(format!("invalid metadata token response: {}", e)))
}

/// Default service account token from the metadata server, cached until
/// shortly before expiry
pub struct MetadataServerToken {
    client: reqwest::Client,
    url: String,
    cached: Mutex<Option<AccessToken>>,
}

impl MetadataServerToken {
    /// Use the standard metadata endpoint
    pub fn new() -> Result<Self> {
        Self::with_url(METADATA_TOKEN_URL)
    }

    /// Use a custom endpoint (emulators, tests)
    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to build metadata client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<AccessToken> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::Auth(format!("metadata server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let raw = response
            .bytes()
            .await
            .map_err(|e| Error::Auth(format!("metadata server response interrupted: {}", e)))?;
        let body = parse_token_response(&raw)?;

        tracing::debug!(expires_in = body.expires_in, "fetched access token from metadata server");
        Ok(AccessToken::expiring_in(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }
}

impl fmt::Debug for MetadataServerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataServerToken")
            .field("url", &self.url)
            .finish()
    }
}

#[async_trait]
impl TokenSource for MetadataServerToken {
    async fn token(&self) -> Result<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh() {
                return Ok(token.clone());
            }
        }
        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}
