//! Pass scheduler: runs a provisioning cycle immediately, then on a fixed
//! interval until shutdown is requested.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use idsync_core::errors::ReconcileError;
use idsync_core::notify::Notifier;
use idsync_core::report;
use idsync_core::source::{CredentialProvider, SourceDirectoryReader};
use idsync_core::target::TargetDirectoryStore;
use idsync_core::{CycleReport, SyncEngine};

/// Tracks aggregate statistics across cycles.
#[derive(Default)]
pub struct SchedulerStats {
    pub total_cycles: AtomicU64,
    pub total_created: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

/// The pass scheduler.
///
/// Cycles never overlap: the next tick is only awaited after the current
/// cycle has returned, and ticks missed during a long cycle are skipped.
pub struct Scheduler<C, R, T> {
    engine: Arc<SyncEngine<C, R, T>>,
    notifier: Arc<Notifier>,
    interval: Duration,
    stats: Arc<SchedulerStats>,
}

impl<C, R, T> Scheduler<C, R, T>
where
    C: CredentialProvider,
    R: SourceDirectoryReader,
    T: TargetDirectoryStore,
{
    pub fn new(
        engine: Arc<SyncEngine<C, R, T>>,
        notifier: Arc<Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            notifier,
            interval,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Main scheduler loop. Returns once `shutdown` is notified; a cycle in
    /// progress is allowed to finish first.
    ///
    /// Signal with [`Notify::notify_one`]: its permit is kept while a cycle
    /// runs and is seen as soon as the loop comes back to wait.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!("scheduler shutting down");
                    break;
                }
                // The first tick fires immediately.
                _ = interval.tick() => {
                    let _ = self.run_cycle().await;
                }
            }
        }
    }

    /// Run one cycle and handle its outcome.
    pub async fn run_cycle(&self) -> Result<CycleReport, ReconcileError> {
        let cycle_num = self.stats.total_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        info!(cycle = cycle_num, "starting provisioning cycle");

        let result = self.engine.run_sync_cycle().await;
        match &result {
            Ok(cycle) => {
                self.stats.consecutive_errors.store(0, Ordering::SeqCst);
                self.stats
                    .total_created
                    .fetch_add(cycle.created.len() as u64, Ordering::SeqCst);
                info!(
                    cycle = cycle_num,
                    source_identities = cycle.source_count,
                    created = cycle.created.len(),
                    "provisioning cycle completed"
                );
                self.publish(cycle).await;
            }
            Err(ReconcileError::AlreadyRunning { started_at }) => {
                warn!(
                    cycle = cycle_num,
                    started_at = %started_at,
                    "skipping cycle: previous cycle still running"
                );
            }
            Err(e) => {
                let errors = self.stats.total_errors.fetch_add(1, Ordering::SeqCst) + 1;
                let consecutive = self
                    .stats
                    .consecutive_errors
                    .fetch_add(1, Ordering::SeqCst)
                    + 1;
                error!(
                    cycle = cycle_num,
                    error = %e,
                    total_errors = errors,
                    consecutive_errors = consecutive,
                    "provisioning cycle failed"
                );
            }
        }
        result
    }

    async fn publish(&self, cycle: &CycleReport) {
        if cycle.is_empty() {
            info!("no new users found");
            return;
        }

        println!("{}", report::render(&cycle.created));
        if !self.notifier.is_configured() {
            return;
        }
        // Delivery failures are logged by the notifier; the accounts exist either way.
        if self.notifier.notify_created(&cycle.created).await.is_ok() {
            info!(accounts = cycle.created.len(), "creation report delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use idsync_core::config::NotificationConfig;
    use idsync_core::errors::{AuthError, BindError, CreateError, LookupError, SourceReadError};
    use idsync_core::models::{SourceIdentity, TargetAccount};
    use idsync_core::reconcile::{RecordMapper, Reconciler};

    /// Hands out a token once a permit is available.
    struct GatedCredentials {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl CredentialProvider for GatedCredentials {
        async fn access_token(&self) -> Result<String, AuthError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AuthError::RequestFailed(e.to_string()))?;
            Ok("tok".into())
        }
    }

    struct EmptyReader;

    #[async_trait]
    impl SourceDirectoryReader for EmptyReader {
        async fn list_identities(
            &self,
            _token: &str,
        ) -> Result<Vec<SourceIdentity>, SourceReadError> {
            Ok(Vec::new())
        }
    }

    struct EmptyDirectory;

    #[async_trait]
    impl TargetDirectoryStore for EmptyDirectory {
        type Connection = ();

        async fn bind(&self) -> Result<(), BindError> {
            Ok(())
        }

        async fn snapshot_numeric_identifiers(
            &self,
            _conn: &mut (),
        ) -> Result<BTreeSet<u32>, LookupError> {
            Ok(BTreeSet::new())
        }

        async fn exists(&self, _conn: &mut (), _login: &str) -> Result<bool, LookupError> {
            Ok(false)
        }

        async fn numeric_id_in_use(&self, _conn: &mut (), _id: u32) -> Result<bool, LookupError> {
            Ok(false)
        }

        async fn create(
            &self,
            _conn: &mut (),
            _account: &TargetAccount,
        ) -> Result<(), CreateError> {
            Ok(())
        }
    }

    type TestEngine = SyncEngine<GatedCredentials, EmptyReader, EmptyDirectory>;
    type TestScheduler = Scheduler<GatedCredentials, EmptyReader, EmptyDirectory>;

    fn scheduler(gate: Arc<Semaphore>) -> (Arc<TestEngine>, Arc<TestScheduler>) {
        let engine = Arc::new(SyncEngine::new(
            GatedCredentials { gate },
            EmptyReader,
            EmptyDirectory,
            Reconciler::new(RecordMapper::new("EXAMPLE.COM", "Welcome1!")),
        ));
        let notifier = Arc::new(Notifier::new(&NotificationConfig::default()));
        let sched = Arc::new(Scheduler::new(engine.clone(), notifier, Duration::from_secs(3600)));
        (engine, sched)
    }

    #[tokio::test]
    async fn test_shutdown_during_cycle_stops_after_cycle() {
        let gate = Arc::new(Semaphore::new(0));
        let (engine, sched) = scheduler(gate.clone());
        let shutdown = Arc::new(Notify::new());

        let handle = {
            let sched = sched.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sched.run(shutdown).await })
        };

        // Wait for the first cycle to take the engine lock and park on the gate.
        for _ in 0..200 {
            if engine.is_running() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert!(engine.is_running());

        shutdown.notify_one();
        gate.add_permits(1);

        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler kept running after shutdown")
            .unwrap();
        assert_eq!(sched.stats().total_cycles.load(Ordering::SeqCst), 1);
        assert_eq!(sched.stats().total_errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let gate = Arc::new(Semaphore::new(10));
        let (_engine, sched) = scheduler(gate);
        let shutdown = Arc::new(Notify::new());

        let handle = {
            let sched = sched.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sched.run(shutdown).await })
        };

        // Let the immediate first cycle finish; the next tick is an hour away.
        for _ in 0..200 {
            if sched.stats().total_cycles.load(Ordering::SeqCst) == 1 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        time::sleep(Duration::from_millis(50)).await;

        shutdown.notify_one();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("idle scheduler ignored shutdown")
            .unwrap();
        assert_eq!(sched.stats().total_cycles.load(Ordering::SeqCst), 1);
    }
}
