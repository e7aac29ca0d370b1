//! OAuth2 client-credentials token acquisition for Microsoft Graph.
//!
//! Tokens are cached in memory and, when a cache file is configured, on disk
//! so a restarted daemon does not request a new token on every start.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::{http_client, CredentialProvider};
use crate::config::SourceConfig;
use crate::errors::{AuthError, ConfigError};

/// OAuth2 token response from the identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// A token together with its absolute expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Returns true if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Client-credentials token provider with an in-memory and optional file cache.
#[derive(Debug)]
pub struct ClientCredentialsProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cache_file: Option<PathBuf>,
    cached: RwLock<Option<CachedToken>>,
    /// Refresh this long before expiry (default: 5 minutes).
    grace_period: Duration,
}

impl ClientCredentialsProvider {
    pub fn new(
        authority_url: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ConfigError> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority_url.trim_end_matches('/'),
            tenant_id
        );
        info!(token_url = %token_url, "created client-credentials provider");
        Ok(Self {
            http: http_client(timeout)?,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            cache_file: None,
            cached: RwLock::new(None),
            grace_period: Duration::minutes(5),
        })
    }

    /// Persist tokens to `path`, seeding the in-memory cache from it.
    ///
    /// An unreadable or malformed cache file is ignored.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = load_cache_file(&path);
        if loaded.is_some() {
            debug!(path = %path.display(), "loaded cached token");
        }
        self.cached = RwLock::new(loaded);
        self.cache_file = Some(path);
        self
    }

    /// Build a provider from resolved source configuration.
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        let secret = config
            .client_secret
            .clone()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: config.client_secret_env.clone(),
                field: "source.client_secret_env".into(),
            })?;
        let provider = Self::new(
            &config.authority_url,
            &config.tenant_id,
            config.client_id.clone(),
            secret,
            config.scope.clone(),
            std::time::Duration::from_secs(config.timeout_secs),
        )?;
        Ok(match &config.token_cache {
            Some(path) => provider.with_cache_file(path.clone()),
            None => provider,
        })
    }

    /// Requests a new token using the client-credentials grant.
    #[instrument(skip(self))]
    async fn acquire_token(&self) -> Result<CachedToken, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        info!(
            expires_at = %expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            "access token obtained"
        );

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at,
        })
    }

    fn persist(&self, token: &CachedToken) {
        let Some(ref path) = self.cache_file else {
            return;
        };
        if let Err(e) = write_cache_file(path, token) {
            warn!(path = %path.display(), error = %e, "failed to write token cache");
        }
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        {
            let cache = self.cached.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired(self.grace_period) {
                    debug!("using cached token");
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("refreshing access token");
        let token = self.acquire_token().await?;
        self.persist(&token);

        let access_token = token.access_token.clone();
        *self.cached.write().await = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token, in memory and on disk, so the next call
    /// requests a new one.
    async fn invalidate(&self) {
        *self.cached.write().await = None;
        if let Some(ref path) = self.cache_file {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed token cache"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove token cache")
                }
            }
        }
        info!("cached access token invalidated");
    }
}

fn load_cache_file(path: &Path) -> Option<CachedToken> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed token cache");
            None
        }
    }
}

fn write_cache_file(path: &Path, token: &CachedToken) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(token).map_err(std::io::Error::other)?;
    std::fs::write(path, json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
