//! TOML-based configuration system for IdSync.
//!
//! All sensitive values (client secret, bind password, initial account
//! password, SMTP password) are stored as `_env` fields that reference
//! environment variable names. The actual secrets are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cloud directory (Microsoft Graph) settings.
    pub source: SourceConfig,

    /// Target directory (FreeIPA LDAP) settings.
    pub target: TargetConfig,

    /// Defaults applied to newly created accounts.
    pub accounts: AccountsConfig,

    /// Sync cadence and allocation behaviour.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Email report settings.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Microsoft Graph application registration and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory (tenant) ID.
    pub tenant_id: String,

    /// Application (client) ID.
    pub client_id: String,

    /// Environment variable holding the client secret.
    pub client_secret_env: String,

    /// OAuth2 scope requested with the client-credentials grant.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Login authority base URL.
    #[serde(default = "default_authority_url")]
    pub authority_url: String,

    /// Graph API base URL including the version segment.
    #[serde(default = "default_graph_url")]
    pub graph_url: String,

    /// File used to persist the access token between restarts.
    #[serde(default)]
    pub token_cache: Option<PathBuf>,

    /// Users requested per Graph page (`$top`).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout for the token and Graph endpoints.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    /// Resolved client secret (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub client_secret: Option<String>,
}

fn default_scope() -> String {
    "https://graph.microsoft.com/.default".into()
}
fn default_authority_url() -> String {
    "https://login.microsoftonline.com".into()
}
fn default_graph_url() -> String {
    "https://graph.microsoft.com/v1.0".into()
}
fn default_page_size() -> u32 {
    999
}
fn default_http_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// FreeIPA LDAP connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// LDAP server hostname or IP.
    pub server: String,

    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Upgrade the plain connection with StartTLS.
    #[serde(default = "default_true")]
    pub starttls: bool,

    /// Verify the server certificate during StartTLS.
    #[serde(default)]
    pub tls_verify: bool,

    /// DN used for the simple bind (e.g. `cn=Directory Manager`).
    pub bind_dn: String,

    /// Environment variable holding the bind password.
    pub bind_password_env: String,

    /// Directory suffix (e.g. `dc=example,dc=com`).
    pub base_dn: String,

    /// Kerberos realm appended to logins to form principal names.
    pub realm: String,

    /// RDN of the account container below `base_dn`.
    #[serde(default = "default_users_rdn")]
    pub users_rdn: String,

    /// Connection and operation timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Resolved bind password.
    #[serde(skip)]
    pub bind_password: Option<String>,
}

fn default_ldap_port() -> u16 {
    389
}
fn default_users_rdn() -> String {
    "cn=users,cn=accounts".into()
}
fn default_timeout() -> u64 {
    30
}

impl TargetConfig {
    /// `ldap://host:port` URL for the configured server.
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.server, self.port)
    }

    /// DN of the subtree holding user accounts.
    pub fn users_dn(&self) -> String {
        format!("{},{}", self.users_rdn, self.base_dn)
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Values applied to every new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Environment variable holding the initial password for new accounts.
    pub default_password_env: String,

    #[serde(default = "default_login_shell")]
    pub login_shell: String,

    /// Parent directory of home directories.
    #[serde(default = "default_home_root")]
    pub home_root: String,

    /// First identifier handed out when the target has no numeric accounts.
    #[serde(default = "default_uid_floor")]
    pub uid_floor: u32,

    /// Resolved initial password.
    #[serde(skip)]
    pub default_password: Option<String>,
}

fn default_login_shell() -> String {
    "/bin/bash".into()
}
fn default_home_root() -> String {
    "/home".into()
}
fn default_uid_floor() -> u32 {
    10000
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Sync cadence and allocation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between sync cycles (default 300).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Probe the target for each allocated identifier right before creating
    /// the account, drawing the next one when it is already taken. Only needed
    /// when other writers may assign identifiers concurrently.
    #[serde(default)]
    pub recheck_numeric_ids: bool,
}

fn default_interval() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            recheck_numeric_ids: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// SMTP settings for the creation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// SMTP relay host (e.g. `smtp.office365.com`).
    #[serde(default)]
    pub smtp_server: Option<String>,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP login.
    #[serde(default)]
    pub smtp_user: Option<String>,

    /// Environment variable holding the SMTP password.
    #[serde(default)]
    pub smtp_password_env: Option<String>,

    /// Sender address; defaults to `smtp_user`.
    #[serde(default)]
    pub from: Option<String>,

    /// Recipient email addresses.
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Resolved SMTP password.
    #[serde(skip)]
    pub smtp_password: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            smtp_server: None,
            smtp_port: default_smtp_port(),
            smtp_user: None,
            smtp_password_env: None,
            from: None,
            recipients: Vec::new(),
            smtp_password: None,
        }
    }
}

impl NotificationConfig {
    /// Effective sender address.
    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().or(self.smtp_user.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rotated log files. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Commented sample written when no configuration file exists yet.
    pub const SAMPLE: &'static str = r#"# IdSync configuration
# Secrets are read from the environment variables named by the *_env keys.

[source]
tenant_id = "<azure tenant id>"
client_id = "<azure application client id>"
client_secret_env = "IDSYNC_CLIENT_SECRET"
scope = "https://graph.microsoft.com/.default"
timeout_secs = 30
# token_cache = "/var/lib/idsync/token_cache.json"

[target]
server = "<freeipa server ip or hostname>"
realm = "<FREEIPA.REALM>"
bind_dn = "cn=Directory Manager"
bind_password_env = "IDSYNC_BIND_PASSWORD"
base_dn = "dc=example,dc=com"

[accounts]
default_password_env = "IDSYNC_DEFAULT_PASSWORD"

[sync]
interval_secs = 300

[notifications]
# smtp_server = "smtp.office365.com"
# smtp_port = 587
# smtp_user = "<email account used to send>"
# smtp_password_env = "IDSYNC_SMTP_PASSWORD"
# recipients = ["admin@example.com"]

[logging]
level = "info"
# directory = "/var/log/idsync"
"#;

    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Write [`AppConfig::SAMPLE`] to `path`, creating parent directories.
    pub fn write_sample<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::SAMPLE)?;
        info!(path = %path.display(), "wrote sample configuration");
        Ok(())
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// The client secret, bind password and initial account password are
    /// required. The SMTP password is optional: a missing variable only logs
    /// a warning.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.source.client_secret = Some(resolve_required_env(
            &self.source.client_secret_env,
            "source.client_secret_env",
        )?);

        self.target.bind_password = Some(resolve_required_env(
            &self.target.bind_password_env,
            "target.bind_password_env",
        )?);

        self.accounts.default_password = Some(resolve_required_env(
            &self.accounts.default_password_env,
            "accounts.default_password_env",
        )?);

        if let Some(ref env_name) = self.notifications.smtp_password_env {
            self.notifications.smtp_password =
                resolve_optional_env(env_name, "notifications.smtp_password_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("source.tenant_id", &self.source.tenant_id),
            ("source.client_id", &self.source.client_id),
            ("source.graph_url", &self.source.graph_url),
            ("target.server", &self.target.server),
            ("target.bind_dn", &self.target.bind_dn),
            ("target.base_dn", &self.target.base_dn),
            ("target.realm", &self.target.realm),
            ("accounts.login_shell", &self.accounts.login_shell),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "must not be empty".into(),
                });
            }
        }

        if self.source.page_size == 0 || self.source.page_size > 999 {
            return Err(ConfigError::InvalidValue {
                field: "source.page_size".into(),
                detail: "page size must be between 1 and 999".into(),
            });
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source.timeout_secs".into(),
                detail: "request timeout must be > 0".into(),
            });
        }
        if self.sync.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.interval_secs".into(),
                detail: "sync interval must be > 0".into(),
            });
        }
        if !self.accounts.home_root.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "accounts.home_root".into(),
                detail: "home root must be an absolute path".into(),
            });
        }
        if self.notifications.smtp_server.is_some() {
            if self.notifications.recipients.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "notifications.recipients".into(),
                    detail: "at least one recipient is required when smtp_server is set".into(),
                });
            }
            if self.notifications.sender().is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "notifications.from".into(),
                    detail: "either from or smtp_user must be set".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

fn resolve_required_env(env_name: &str, field: &str) -> Result<String, ConfigError> {
    resolve_optional_env(env_name, field).ok_or_else(|| ConfigError::EnvVarMissing {
        var: env_name.to_string(),
        field: field.to_string(),
    })
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[source]
tenant_id = "0000-tenant"
client_id = "1111-client"
client_secret_env = "AAD_SECRET"
token_cache = "/tmp/idsync/token.json"
page_size = 200

[target]
server = "ipa1.example.com"
port = 389
bind_dn = "cn=Directory Manager"
bind_password_env = "IPA_PASSWORD"
base_dn = "dc=example,dc=com"
realm = "EXAMPLE.COM"

[accounts]
default_password_env = "NEWUSER_PASSWORD"
login_shell = "/bin/zsh"

[sync]
interval_secs = 120
recheck_numeric_ids = true

[notifications]
smtp_server = "smtp.office365.com"
smtp_user = "sync@example.com"
smtp_password_env = "SMTP_PASSWORD"
recipients = ["admin@example.com", "ops@example.com"]

[logging]
level = "debug"
directory = "/var/log/idsync"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.source.page_size, 200);
        assert_eq!(config.target.realm, "EXAMPLE.COM");
        assert_eq!(config.target.users_dn(), "cn=users,cn=accounts,dc=example,dc=com");
        assert_eq!(config.target.url(), "ldap://ipa1.example.com:389");
        assert_eq!(config.accounts.login_shell, "/bin/zsh");
        assert_eq!(config.sync.interval_secs, 120);
        assert!(config.sync.recheck_numeric_ids);
        assert_eq!(config.notifications.recipients.len(), 2);
        assert_eq!(config.notifications.sender(), Some("sync@example.com"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idsync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.source.tenant_id, "0000-tenant");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/idsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_sample_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("idsync.toml");
        AppConfig::write_sample(&path).unwrap();

        let config = AppConfig::load_from_file(&path).expect("sample must parse");
        assert_eq!(config.sync.interval_secs, 300);
        assert!(config.notifications.smtp_server.is_none());
    }

    #[test]
    fn test_validate_rejects_empty_realm() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.target.realm = String::new();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "target.realm"
        ));
    }

    #[test]
    fn test_validate_rejects_smtp_without_recipients() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.notifications.recipients.clear();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "notifications.recipients"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_http_timeout() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.source.timeout_secs = 0;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "source.timeout_secs"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.sync.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_IDSYNC_SECRET", "s3cret");
        std::env::set_var("TEST_IDSYNC_BIND", "dm-pass");
        std::env::set_var("TEST_IDSYNC_NEWUSER", "Welcome1!");

        let toml_str = r#"
[source]
tenant_id = "t"
client_id = "c"
client_secret_env = "TEST_IDSYNC_SECRET"
[target]
server = "ipa"
bind_dn = "cn=Directory Manager"
bind_password_env = "TEST_IDSYNC_BIND"
base_dn = "dc=test"
realm = "TEST"
[accounts]
default_password_env = "TEST_IDSYNC_NEWUSER"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.source.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.target.bind_password.as_deref(), Some("dm-pass"));
        assert_eq!(config.accounts.default_password.as_deref(), Some("Welcome1!"));

        std::env::remove_var("TEST_IDSYNC_SECRET");
        std::env::remove_var("TEST_IDSYNC_BIND");
        std::env::remove_var("TEST_IDSYNC_NEWUSER");
    }

    #[test]
    fn test_resolve_missing_required_env() {
        let toml_str = r#"
[source]
tenant_id = "t"
client_id = "c"
client_secret_env = "TEST_IDSYNC_UNSET_SECRET"
[target]
server = "ipa"
bind_dn = "cn=Directory Manager"
bind_password_env = "TEST_IDSYNC_UNSET_BIND"
base_dn = "dc=test"
realm = "TEST"
[accounts]
default_password_env = "TEST_IDSYNC_UNSET_NEWUSER"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        let result = config.resolve_env_vars();
        assert!(matches!(
            result,
            Err(ConfigError::EnvVarMissing { ref var, .. }) if var == "TEST_IDSYNC_UNSET_SECRET"
        ));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[source]
tenant_id = "t"
client_id = "c"
client_secret_env = "S"
[target]
server = "ipa"
bind_dn = "cn=dm"
bind_password_env = "B"
base_dn = "dc=test"
realm = "TEST"
[accounts]
default_password_env = "P"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.source.scope, "https://graph.microsoft.com/.default");
        assert_eq!(config.source.page_size, 999);
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.target.port, 389);
        assert!(config.target.starttls);
        assert!(!config.target.tls_verify);
        assert_eq!(config.target.users_rdn, "cn=users,cn=accounts");
        assert_eq!(config.accounts.login_shell, "/bin/bash");
        assert_eq!(config.accounts.home_root, "/home");
        assert_eq!(config.accounts.uid_floor, 10000);
        assert_eq!(config.sync.interval_secs, 300);
        assert!(!config.sync.recheck_numeric_ids);
        assert_eq!(config.notifications.smtp_port, 587);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }
}
