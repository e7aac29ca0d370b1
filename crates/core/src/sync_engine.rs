//! One full provisioning cycle.
//!
//! The [`SyncEngine`] wires the collaborators to the [`Reconciler`]:
//!
//! 1. Obtain an access token for the source directory.
//! 2. List every source identity (all pages, or nothing).
//! 3. Bind to the target directory and snapshot its numeric identifiers.
//! 4. Run the reconciliation pass.
//! 5. Unbind and report what was created.
//!
//! A lock flag prevents concurrent cycles on the same engine.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{ConfigError, ReconcileError};
use crate::models::{SourceIdentity, TargetAccount};
use crate::reconcile::{RecordMapper, Reconciler};
use crate::source::{
    ClientCredentialsProvider, CredentialProvider, GraphUserReader, SourceDirectoryReader,
};
use crate::target::{FreeIpaDirectory, TargetDirectoryStore};

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    /// Accounts created this cycle, in source order.
    pub created: Vec<TargetAccount>,
    /// Identities listed by the source directory.
    pub source_count: usize,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl CycleReport {
    /// True when the cycle had nothing to create.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

/// Engine wired to Microsoft Graph and FreeIPA.
pub type DirectorySyncEngine =
    SyncEngine<ClientCredentialsProvider, GraphUserReader, FreeIpaDirectory>;

/// Runs provisioning cycles against a set of collaborators.
pub struct SyncEngine<C, R, T> {
    credentials: C,
    reader: R,
    store: T,
    reconciler: Reconciler,
    /// Atomic flag preventing concurrent sync cycles.
    running: Arc<AtomicBool>,
    /// Start of the cycle holding the lock.
    cycle_started_at: Mutex<Option<DateTime<Utc>>>,
}

impl DirectorySyncEngine {
    /// Build the production engine from resolved configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let reconciler = Reconciler::new(RecordMapper::from_config(config)?)
            .with_uid_floor(config.accounts.uid_floor)
            .with_recheck(config.sync.recheck_numeric_ids);
        Ok(Self::new(
            ClientCredentialsProvider::from_config(&config.source)?,
            GraphUserReader::from_config(&config.source)?,
            FreeIpaDirectory::from_config(&config.target)?,
            reconciler,
        ))
    }
}

impl<C, R, T> SyncEngine<C, R, T>
where
    C: CredentialProvider,
    R: SourceDirectoryReader,
    T: TargetDirectoryStore,
{
    /// Create a new sync engine with all required dependencies.
    pub fn new(credentials: C, reader: R, store: T, reconciler: Reconciler) -> Self {
        info!("initializing sync engine");
        Self {
            credentials,
            reader,
            store,
            reconciler,
            running: Arc::new(AtomicBool::new(false)),
            cycle_started_at: Mutex::new(None),
        }
    }

    /// Return a reference to the credential provider.
    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Return a reference to the target store.
    pub fn store(&self) -> &T {
        &self.store
    }

    /// Check if a sync cycle is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute one full cycle.
    ///
    /// Credential, listing, bind and snapshot failures abort the cycle before
    /// anything is written. Per-identity failures are absorbed by the
    /// reconciler and only show up as missing entries in the report.
    pub async fn run_sync_cycle(&self) -> Result<CycleReport, ReconcileError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let started_at = self
                .cycle_started_at
                .lock()
                .ok()
                .and_then(|slot| *slot)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".into());
            return Err(ReconcileError::AlreadyRunning { started_at });
        }

        // RAII guard that clears the running flag on drop (even on panic).
        let _guard = SyncLockGuard(self.running.clone());

        let started = Utc::now();
        if let Ok(mut slot) = self.cycle_started_at.lock() {
            *slot = Some(started);
        }
        let mut report = CycleReport {
            started_at: started.to_rfc3339(),
            ..Default::default()
        };

        let token = self.credentials.access_token().await?;
        let identities = match self.reader.list_identities(&token).await {
            Ok(identities) => identities,
            Err(e) => {
                if e.is_token_rejected() {
                    warn!("source directory rejected the access token, dropping cached token");
                    self.credentials.invalidate().await;
                }
                return Err(e.into());
            }
        };
        report.source_count = identities.len();
        debug!(count = identities.len(), "source listing complete");

        let mut conn = self.store.bind().await?;
        let result = self.reconcile(&mut conn, &identities).await;
        self.store.unbind(conn).await;

        report.created = result?;
        report.completed_at = Some(Utc::now().to_rfc3339());
        Ok(report)
    }

    async fn reconcile(
        &self,
        conn: &mut T::Connection,
        identities: &[SourceIdentity],
    ) -> Result<Vec<TargetAccount>, ReconcileError> {
        let snapshot: BTreeSet<u32> = self
            .store
            .snapshot_numeric_identifiers(conn)
            .await
            .map_err(ReconcileError::Snapshot)?;

        self.reconciler
            .run_once(&self.store, conn, identities, &snapshot)
            .await
    }
}

/// Drop guard that releases the sync lock.
struct SyncLockGuard(Arc<AtomicBool>);

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
