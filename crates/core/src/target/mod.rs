//! Target directory access.
//!
//! [`TargetDirectoryStore`] is the seam between the reconciliation engine and
//! the directory that receives new accounts. [`ldap::FreeIpaDirectory`] is the
//! production implementation.

pub mod ldap;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::errors::{BindError, CreateError, LookupError};
use crate::models::TargetAccount;

pub use ldap::FreeIpaDirectory;

/// Operations the engine needs from the target directory.
///
/// All operations after [`bind`](Self::bind) run on the returned connection,
/// which the engine uses sequentially for the whole pass.
#[async_trait]
pub trait TargetDirectoryStore: Send + Sync {
    type Connection: Send;

    /// Open and authenticate a connection.
    async fn bind(&self) -> Result<Self::Connection, BindError>;

    /// Every `uidNumber` and `gidNumber` under the account subtree.
    async fn snapshot_numeric_identifiers(
        &self,
        conn: &mut Self::Connection,
    ) -> Result<BTreeSet<u32>, LookupError>;

    /// Whether an account with this exact login exists.
    async fn exists(&self, conn: &mut Self::Connection, login: &str) -> Result<bool, LookupError>;

    /// Whether any account uses `id` as its UID or GID.
    async fn numeric_id_in_use(
        &self,
        conn: &mut Self::Connection,
        id: u32,
    ) -> Result<bool, LookupError>;

    /// Write a new account.
    async fn create(
        &self,
        conn: &mut Self::Connection,
        account: &TargetAccount,
    ) -> Result<(), CreateError>;

    /// Release the connection. Failures are only logged.
    async fn unbind(&self, conn: Self::Connection) {
        drop(conn);
    }
}
