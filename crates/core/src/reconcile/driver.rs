//! One reconciliation pass over a source listing.
//!
//! Identities are processed strictly in listing order because identifier
//! allocation is sequential. Each identity ends in exactly one
//! [`IdentityOutcome`]; only connection-level failures abort the pass.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use super::allocator::{IdentifierPool, DEFAULT_FLOOR};
use super::existence::ExistenceChecker;
use super::mapper::RecordMapper;
use crate::errors::{LookupError, ReconcileError};
use crate::models::{IdentityOutcome, SourceIdentity, TargetAccount};
use crate::target::TargetDirectoryStore;

/// Upper bound on identifiers tried for a single account when
/// `recheck_numeric_ids` is on.
pub const MAX_ID_PROBES: u32 = 64;

/// Result of drawing an identifier for one identity.
enum Allocation {
    Assigned(u32),
    ProbeFailed(LookupError),
}

/// Per-pass counters, logged when the pass ends.
#[derive(Debug, Default)]
struct PassTally {
    created: usize,
    existing: usize,
    unmappable: usize,
    failed: usize,
}

/// Decides which identities are missing from the target and creates them.
#[derive(Debug, Clone)]
pub struct Reconciler {
    mapper: RecordMapper,
    uid_floor: u32,
    recheck_numeric_ids: bool,
}

impl Reconciler {
    pub fn new(mapper: RecordMapper) -> Self {
        Self {
            mapper,
            uid_floor: DEFAULT_FLOOR,
            recheck_numeric_ids: false,
        }
    }

    /// Starting identifier for an empty directory.
    pub fn with_uid_floor(mut self, floor: u32) -> Self {
        self.uid_floor = floor;
        self
    }

    /// Probe each allocated identifier in the target before using it.
    pub fn with_recheck(mut self, enabled: bool) -> Self {
        self.recheck_numeric_ids = enabled;
        self
    }

    /// Run one pass and return the accounts created, in source order.
    ///
    /// An empty result means there was nothing to do. Per-identity failures
    /// are logged and skipped; an identifier drawn for a failed create is not
    /// handed out again in this pass.
    pub async fn run_once<T: TargetDirectoryStore>(
        &self,
        store: &T,
        conn: &mut T::Connection,
        identities: &[SourceIdentity],
        snapshot: &BTreeSet<u32>,
    ) -> Result<Vec<TargetAccount>, ReconcileError> {
        let mut pool = IdentifierPool::with_floor(snapshot, self.uid_floor);
        let checker = ExistenceChecker::new(store);
        let mut created = Vec::new();
        let mut tally = PassTally::default();

        info!(
            identities = identities.len(),
            next_id = ?pool.peek(),
            "starting reconciliation pass"
        );

        for identity in identities {
            match self
                .process_identity(store, &checker, conn, identity, &mut pool)
                .await?
            {
                IdentityOutcome::Created(account) => {
                    info!(
                        login = %account.login,
                        uid_number = account.uid_number,
                        "account created"
                    );
                    tally.created += 1;
                    created.push(account);
                }
                IdentityOutcome::SkippedExisting { login } => {
                    debug!(%login, "account already exists, skipping");
                    tally.existing += 1;
                }
                IdentityOutcome::SkippedUnmappable => {
                    debug!(
                        display_name = ?identity.display_name,
                        "identity has no user principal name, skipping"
                    );
                    tally.unmappable += 1;
                }
                IdentityOutcome::Failed { login, reason } => {
                    error!(%login, %reason, "failed to provision account");
                    tally.failed += 1;
                }
            }
        }

        info!(
            created = tally.created,
            existing = tally.existing,
            unmappable = tally.unmappable,
            failed = tally.failed,
            "reconciliation pass complete"
        );
        Ok(created)
    }

    async fn process_identity<T: TargetDirectoryStore>(
        &self,
        store: &T,
        checker: &ExistenceChecker<'_, T>,
        conn: &mut T::Connection,
        identity: &SourceIdentity,
        pool: &mut IdentifierPool,
    ) -> Result<IdentityOutcome, ReconcileError> {
        let Some(login) = identity.login() else {
            return Ok(IdentityOutcome::SkippedUnmappable);
        };

        match checker.exists(conn, login).await {
            Ok(true) => {
                return Ok(IdentityOutcome::SkippedExisting {
                    login: login.to_string(),
                })
            }
            Ok(false) => {}
            Err(e) if e.is_connection_level() => {
                return Err(ReconcileError::Lookup {
                    login: login.to_string(),
                    source: e,
                })
            }
            Err(e) => {
                return Ok(IdentityOutcome::Failed {
                    login: login.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        let id = match self.allocate(store, conn, pool, login).await? {
            Allocation::Assigned(id) => id,
            Allocation::ProbeFailed(e) => {
                return Ok(IdentityOutcome::Failed {
                    login: login.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let account = self.mapper.map(login, identity, id);
        match store.create(conn, &account).await {
            Ok(()) => Ok(IdentityOutcome::Created(account)),
            Err(e) => Ok(IdentityOutcome::Failed {
                login: login.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Draw the next identifier, probing the target first when configured.
    async fn allocate<T: TargetDirectoryStore>(
        &self,
        store: &T,
        conn: &mut T::Connection,
        pool: &mut IdentifierPool,
        login: &str,
    ) -> Result<Allocation, ReconcileError> {
        let start = pool.peek().unwrap_or(u32::MAX);

        if !self.recheck_numeric_ids {
            return pool
                .next()
                .map(Allocation::Assigned)
                .ok_or(ReconcileError::IdentifiersExhausted { start, attempts: 0 });
        }

        for _ in 0..MAX_ID_PROBES {
            let Some(id) = pool.next() else { break };
            match store.numeric_id_in_use(conn, id).await {
                Ok(false) => return Ok(Allocation::Assigned(id)),
                Ok(true) => warn!(login, id, "identifier taken by another writer, drawing next"),
                Err(e) if e.is_connection_level() => {
                    return Err(ReconcileError::Lookup {
                        login: login.to_string(),
                        source: e,
                    })
                }
                Err(e) => return Ok(Allocation::ProbeFailed(e)),
            }
        }

        Err(ReconcileError::IdentifiersExhausted {
            start,
            attempts: MAX_ID_PROBES,
        })
    }
}
