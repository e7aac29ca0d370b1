//! Error types for the IdSync core library.
//!
//! Each collaborator has its own error type derived with `thiserror`.
//! [`ReconcileError`] is the set of failures that abort a whole pass.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Credential provider
// ---------------------------------------------------------------------------

/// The access token for the cloud directory could not be obtained.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint could not be reached.
    #[error("token request failed: {0}")]
    RequestFailed(String),

    /// The token endpoint answered with an error status.
    #[error("token endpoint returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The token response body could not be decoded.
    #[error("failed to parse token response: {0}")]
    InvalidResponse(String),
}

// ---------------------------------------------------------------------------
// Source directory reader
// ---------------------------------------------------------------------------

/// Listing the cloud directory failed or was truncated.
#[derive(Debug, Error)]
pub enum SourceReadError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("source directory HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A page request returned a non-success status.
    #[error("source directory returned HTTP {status} for page {page}: {body}")]
    PageFailed {
        page: usize,
        status: u16,
        body: String,
    },

    /// A page could not be decoded.
    #[error("failed to decode source directory page {page}: {detail}")]
    ParseError { page: usize, detail: String },
}

impl SourceReadError {
    /// Whether the source refused the bearer token itself.
    pub fn is_token_rejected(&self) -> bool {
        matches!(self, Self::PageFailed { status: 401, .. })
    }
}

// ---------------------------------------------------------------------------
// Target directory store
// ---------------------------------------------------------------------------

/// Cannot connect or authenticate to the target directory.
#[derive(Debug, Error)]
pub enum BindError {
    /// TCP / TLS connection could not be established.
    #[error("cannot connect to target directory at '{url}': {detail}")]
    ConnectFailed { url: String, detail: String },

    /// The bind itself was rejected.
    #[error("bind as '{bind_dn}' rejected (code {code}): {detail}")]
    Rejected {
        bind_dn: String,
        code: u32,
        detail: String,
    },
}

/// A read against the target directory failed.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The connection itself is unusable; nothing else in the pass can succeed.
    #[error("target directory connection lost: {0}")]
    ConnectionLost(String),

    /// The search was rejected for this particular query.
    #[error("target directory search '{filter}' failed (code {code}): {detail}")]
    SearchFailed {
        filter: String,
        code: u32,
        detail: String,
    },
}

impl LookupError {
    /// Whether the error concerns the connection rather than one query.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// An account creation was rejected or failed.
#[derive(Debug, Error)]
pub enum CreateError {
    /// An entry with the same DN already exists.
    #[error("entry '{0}' already exists")]
    AlreadyExists(String),

    /// The server rejected the add operation.
    #[error("add of '{dn}' rejected (code {code}): {detail}")]
    Rejected {
        dn: String,
        code: u32,
        detail: String,
    },

    /// The add request could not be delivered.
    #[error("add of '{dn}' failed: {detail}")]
    Transport { dn: String, detail: String },
}

// ---------------------------------------------------------------------------
// Reconciliation pass
// ---------------------------------------------------------------------------

/// Failures that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Another pass is already running on this engine.
    #[error("sync already in progress (started at {started_at})")]
    AlreadyRunning { started_at: String },

    #[error("credential acquisition failed: {0}")]
    Auth(#[from] AuthError),

    #[error("source listing failed: {0}")]
    SourceRead(#[from] SourceReadError),

    #[error("target bind failed: {0}")]
    Bind(#[from] BindError),

    /// The numeric identifier snapshot could not be read.
    #[error("identifier snapshot failed: {0}")]
    Snapshot(#[source] LookupError),

    /// A lookup failed at connection level while processing an identity.
    #[error("lookup for '{login}' failed: {source}")]
    Lookup {
        login: String,
        #[source]
        source: LookupError,
    },

    /// Every identifier tried within the attempt budget was already taken.
    #[error("no free numeric identifier found after {attempts} attempts starting at {start}")]
    IdentifiersExhausted { start: u32, attempts: u32 },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from report delivery.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Email delivery failed.
    #[error("email notification failed: {0}")]
    EmailError(String),
}
