//! Domain model types used throughout IdSync.
//!
//! These types bridge the source reader, the reconciliation engine, the
//! target store and the report.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source identity
// ---------------------------------------------------------------------------

/// A user record as listed by the cloud directory.
///
/// Field names follow the Graph `user` resource so a page's `value` array
/// deserializes directly. Every attribute is optional there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceIdentity {
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

impl SourceIdentity {
    /// Create an identity with only a user principal name set.
    pub fn new(user_principal_name: impl Into<String>) -> Self {
        Self {
            user_principal_name: Some(user_principal_name.into()),
            ..Default::default()
        }
    }

    /// The login derived from the user principal name: everything before the
    /// first `@`. `None` when the principal name is absent or the prefix is
    /// empty.
    pub fn login(&self) -> Option<&str> {
        let upn = self.user_principal_name.as_deref()?.trim();
        let login = upn.split('@').next().unwrap_or_default();
        if login.is_empty() {
            None
        } else {
            Some(login)
        }
    }
}

// ---------------------------------------------------------------------------
// Target account
// ---------------------------------------------------------------------------

/// A fully populated account ready to be written to the target directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAccount {
    /// `uid` attribute; unique in the target directory.
    pub login: String,
    pub uid_number: u32,
    /// Always equal to `uid_number` (one private group per user).
    pub gid_number: u32,
    pub home_directory: String,
    pub login_shell: String,
    /// Initial password handed to the user out of band.
    pub password: String,
    /// `<login>@<realm>`.
    pub krb_principal_name: String,
    pub display_name: String,
    pub given_name: String,
    pub surname: String,
    pub mail: String,
    pub gecos: String,
}

/// What happened to one source identity during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The account was written to the target.
    Created(TargetAccount),
    /// The login already exists in the target.
    SkippedExisting { login: String },
    /// No login could be derived from the identity.
    SkippedUnmappable,
    /// The identity could not be processed; the pass continues.
    Failed { login: String, reason: String },
}
