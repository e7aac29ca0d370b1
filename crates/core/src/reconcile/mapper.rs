//! Source identity to target account mapping.

use crate::config::AppConfig;
use crate::errors::ConfigError;
use crate::models::{SourceIdentity, TargetAccount};

/// Builds [`TargetAccount`] records from source identities.
///
/// Pure: the output depends only on the inputs and the configured defaults.
#[derive(Debug, Clone)]
pub struct RecordMapper {
    realm: String,
    default_password: String,
    login_shell: String,
    home_root: String,
}

impl RecordMapper {
    pub fn new(realm: impl Into<String>, default_password: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            default_password: default_password.into(),
            login_shell: "/bin/bash".into(),
            home_root: "/home".into(),
        }
    }

    pub fn with_login_shell(mut self, shell: impl Into<String>) -> Self {
        self.login_shell = shell.into();
        self
    }

    pub fn with_home_root(mut self, root: impl Into<String>) -> Self {
        self.home_root = root.into();
        self
    }

    /// Build a mapper from resolved configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let password = config.accounts.default_password.clone().ok_or_else(|| {
            ConfigError::EnvVarMissing {
                var: config.accounts.default_password_env.clone(),
                field: "accounts.default_password_env".into(),
            }
        })?;
        Ok(Self::new(config.target.realm.clone(), password)
            .with_login_shell(config.accounts.login_shell.clone())
            .with_home_root(config.accounts.home_root.clone()))
    }

    /// Map `identity` to an account named `login` with `id` as both UID and
    /// GID. Missing optional attributes become empty strings.
    pub fn map(&self, login: &str, identity: &SourceIdentity, id: u32) -> TargetAccount {
        let display_name = identity.display_name.clone().unwrap_or_default();
        TargetAccount {
            login: login.to_string(),
            uid_number: id,
            gid_number: id,
            home_directory: format!("{}/{}", self.home_root.trim_end_matches('/'), login),
            login_shell: self.login_shell.clone(),
            password: self.default_password.clone(),
            krb_principal_name: format!("{}@{}", login, self.realm),
            gecos: display_name.clone(),
            display_name,
            given_name: identity.given_name.clone().unwrap_or_default(),
            surname: identity.surname.clone().unwrap_or_default(),
            mail: identity.mail.clone().unwrap_or_default(),
        }
    }
}
