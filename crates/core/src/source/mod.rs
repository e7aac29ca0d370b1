//! Cloud directory access.
//!
//! Two capabilities are needed from the source side: an access token
//! ([`CredentialProvider`]) and the full user listing
//! ([`SourceDirectoryReader`]). The Microsoft Graph implementations live in
//! [`token`] and [`graph`].

pub mod graph;
pub mod token;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{AuthError, ConfigError, SourceReadError};
use crate::models::SourceIdentity;

pub use graph::GraphUserReader;
pub use token::ClientCredentialsProvider;

/// Supplies a bearer token for the source directory.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Forget any cached token. Called after the source rejects a token.
    async fn invalidate(&self) {}
}

/// Lists every identity in the source directory.
///
/// Implementations page through the listing internally. A failure on any
/// page fails the whole listing; identities from earlier pages are dropped.
#[async_trait]
pub trait SourceDirectoryReader: Send + Sync {
    async fn list_identities(&self, token: &str) -> Result<Vec<SourceIdentity>, SourceReadError>;
}

/// HTTP client shared by the token and listing calls, with a per-request
/// timeout so a silent endpoint fails the pass instead of stalling it.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::InvalidValue {
            field: "source.timeout_secs".into(),
            detail: format!("failed to create HTTP client: {e}"),
        })
}
