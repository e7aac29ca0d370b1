//! Login existence checks against the target directory.

use tracing::debug;

use crate::errors::LookupError;
use crate::target::TargetDirectoryStore;

/// Read-only check of whether a login is already present in the target.
pub struct ExistenceChecker<'a, T: TargetDirectoryStore> {
    store: &'a T,
}

impl<'a, T: TargetDirectoryStore> ExistenceChecker<'a, T> {
    pub fn new(store: &'a T) -> Self {
        Self { store }
    }

    /// `true` means a create for `login` must be skipped.
    pub async fn exists(
        &self,
        conn: &mut T::Connection,
        login: &str,
    ) -> Result<bool, LookupError> {
        let found = self.store.exists(conn, login).await?;
        debug!(login, found, "existence check");
        Ok(found)
    }
}
