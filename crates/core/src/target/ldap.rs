//! FreeIPA account store over LDAP (`ldap3`).
//!
//! Accounts live under `cn=users,cn=accounts,<base_dn>`. The store binds as a
//! privileged DN, reads `uidNumber`/`gidNumber` for allocation, and adds
//! entries carrying the object classes FreeIPA expects on a user.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};
use tracing::{debug, info, instrument, warn};

use super::TargetDirectoryStore;
use crate::config::TargetConfig;
use crate::errors::{BindError, ConfigError, CreateError, LookupError};
use crate::models::TargetAccount;

/// Object classes of a FreeIPA user entry.
const USER_OBJECT_CLASSES: &[&str] = &[
    "top",
    "person",
    "organizationalPerson",
    "inetOrgPerson",
    "posixAccount",
    "ipaobject",
    "krbPrincipalAux",
    "ipaSshGroupOfPubKeys",
    "ipaUserAuthTypeClass",
];

/// LDAP result codes.
const RC_SUCCESS: u32 = 0;
const RC_BUSY: u32 = 51;
const RC_UNAVAILABLE: u32 = 52;
const RC_ALREADY_EXISTS: u32 = 68;

/// Target store backed by a FreeIPA directory server.
#[derive(Debug, Clone)]
pub struct FreeIpaDirectory {
    url: String,
    bind_dn: String,
    bind_password: String,
    users_dn: String,
    starttls: bool,
    tls_verify: bool,
    timeout: Duration,
}

impl FreeIpaDirectory {
    /// Build a store from resolved target configuration.
    pub fn from_config(config: &TargetConfig) -> Result<Self, ConfigError> {
        let bind_password =
            config
                .bind_password
                .clone()
                .ok_or_else(|| ConfigError::EnvVarMissing {
                    var: config.bind_password_env.clone(),
                    field: "target.bind_password_env".into(),
                })?;
        let store = Self {
            url: config.url(),
            bind_dn: config.bind_dn.clone(),
            bind_password,
            users_dn: config.users_dn(),
            starttls: config.starttls,
            tls_verify: config.tls_verify,
            timeout: Duration::from_secs(config.timeout_secs),
        };
        info!(
            url = %store.url,
            users_dn = %store.users_dn,
            starttls = store.starttls,
            "created FreeIPA directory store"
        );
        Ok(store)
    }

    /// DN of the entry for `login`.
    pub fn account_dn(&self, login: &str) -> String {
        format!("uid={},{}", escape_dn_value(login), self.users_dn)
    }

    async fn search(
        &self,
        conn: &mut Ldap,
        filter: &str,
        attrs: Vec<&str>,
    ) -> Result<Vec<SearchEntry>, LookupError> {
        let result = conn
            .with_timeout(self.timeout)
            .search(&self.users_dn, Scope::Subtree, filter, attrs)
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let ldap3::SearchResult(entries, status) = result;
        if status.rc != RC_SUCCESS {
            return Err(classify_result_code(filter, status.rc, &status.text));
        }
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }
}

#[async_trait]
impl TargetDirectoryStore for FreeIpaDirectory {
    type Connection = Ldap;

    #[instrument(skip(self), fields(url = %self.url))]
    async fn bind(&self) -> Result<Ldap, BindError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_starttls(self.starttls)
            .set_no_tls_verify(!self.tls_verify);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| BindError::ConnectFailed {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        debug!(bind_dn = %self.bind_dn, "performing LDAP bind");
        let result = ldap
            .with_timeout(self.timeout)
            .simple_bind(&self.bind_dn, &self.bind_password)
            .await
            .map_err(|e| BindError::ConnectFailed {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        if result.rc != RC_SUCCESS {
            return Err(BindError::Rejected {
                bind_dn: self.bind_dn.clone(),
                code: result.rc,
                detail: result.text,
            });
        }

        info!("bound to FreeIPA server");
        Ok(ldap)
    }

    #[instrument(skip(self, conn))]
    async fn snapshot_numeric_identifiers(
        &self,
        conn: &mut Ldap,
    ) -> Result<BTreeSet<u32>, LookupError> {
        let entries = self
            .search(conn, "(objectClass=posixAccount)", vec!["uidNumber", "gidNumber"])
            .await?;
        let ids = collect_numeric_ids(&entries);
        info!(
            accounts = entries.len(),
            highest = ?ids.last(),
            "read numeric identifier snapshot"
        );
        Ok(ids)
    }

    async fn exists(&self, conn: &mut Ldap, login: &str) -> Result<bool, LookupError> {
        let filter = format!("(uid={})", escape_filter_value(login));
        let entries = self.search(conn, &filter, vec!["uid"]).await?;
        Ok(!entries.is_empty())
    }

    async fn numeric_id_in_use(&self, conn: &mut Ldap, id: u32) -> Result<bool, LookupError> {
        let filter = format!("(|(uidNumber={id})(gidNumber={id}))");
        let entries = self.search(conn, &filter, vec!["1.1"]).await?;
        Ok(!entries.is_empty())
    }

    #[instrument(skip(self, conn, account), fields(login = %account.login))]
    async fn create(&self, conn: &mut Ldap, account: &TargetAccount) -> Result<(), CreateError> {
        let dn = self.account_dn(&account.login);
        debug!(dn = %dn, uid_number = account.uid_number, "adding LDAP entry");

        let result = conn
            .with_timeout(self.timeout)
            .add(&dn, account_attributes(account))
            .await
            .map_err(|e| CreateError::Transport {
                dn: dn.clone(),
                detail: e.to_string(),
            })?;

        match result.rc {
            RC_SUCCESS => Ok(()),
            RC_ALREADY_EXISTS => Err(CreateError::AlreadyExists(dn)),
            code => Err(CreateError::Rejected {
                dn,
                code,
                detail: result.text,
            }),
        }
    }

    async fn unbind(&self, mut conn: Ldap) {
        if let Err(e) = conn.unbind().await {
            warn!(error = %e, "LDAP unbind failed");
        }
    }
}

/// Attribute list for the add request.
///
/// Empty optional values are left out since LDAP rejects empty attribute
/// values. `cn` and `sn` are mandatory for `person` and fall back to the login.
fn account_attributes(account: &TargetAccount) -> Vec<(String, HashSet<String>)> {
    let or_login = |value: &str| {
        if value.is_empty() {
            account.login.clone()
        } else {
            value.to_string()
        }
    };

    let mut attrs: Vec<(String, HashSet<String>)> = vec![(
        "objectClass".into(),
        USER_OBJECT_CLASSES.iter().map(|c| c.to_string()).collect(),
    )];

    let values = [
        ("uid", account.login.clone()),
        ("cn", or_login(&account.display_name)),
        ("sn", or_login(&account.surname)),
        ("givenName", account.given_name.clone()),
        ("displayName", account.display_name.clone()),
        ("gecos", account.gecos.clone()),
        ("mail", account.mail.clone()),
        ("homeDirectory", account.home_directory.clone()),
        ("loginShell", account.login_shell.clone()),
        ("userPassword", account.password.clone()),
        ("uidNumber", account.uid_number.to_string()),
        ("gidNumber", account.gid_number.to_string()),
        ("krbPrincipalName", account.krb_principal_name.clone()),
    ];
    for (name, value) in values {
        if !value.is_empty() {
            attrs.push((name.to_string(), HashSet::from([value])));
        }
    }
    attrs
}

/// Every parseable `uidNumber` / `gidNumber` value across `entries`.
fn collect_numeric_ids(entries: &[SearchEntry]) -> BTreeSet<u32> {
    let mut ids = BTreeSet::new();
    for entry in entries {
        for attr in ["uidNumber", "gidNumber"] {
            for value in entry.attrs.get(attr).into_iter().flatten() {
                match value.trim().parse::<u32>() {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(_) => warn!(dn = %entry.dn, attr, value = %value, "ignoring non-numeric id"),
                }
            }
        }
    }
    ids
}

/// Errors raised before any LDAP result arrives mean the connection is gone.
fn classify_transport_error(err: &LdapError) -> LookupError {
    LookupError::ConnectionLost(err.to_string())
}

fn classify_result_code(filter: &str, code: u32, text: &str) -> LookupError {
    match code {
        RC_BUSY | RC_UNAVAILABLE => {
            LookupError::ConnectionLost(format!("server returned code {code}: {text}"))
        }
        _ => LookupError::SearchFailed {
            filter: filter.to_string(),
            code,
            detail: text.to_string(),
        },
    }
}

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape an attribute value for use inside a DN (RFC 4514).
pub fn escape_dn_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}
