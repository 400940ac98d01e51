//! Sync orchestrator
//!
//! The only component allowed to invoke reconciliation. Owns the single
//! in-flight lock, the one-slot pending-request buffer, and the explicit
//! timer handles for debounce and replay. One orchestrator exists per
//! authenticated session: constructed on login, torn down on logout, never
//! ambient global state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::db::{MetaRepository, SharedDatabase};
use crate::error::Result;
use crate::remote::RemoteStore;

use super::connectivity::ConnectivityMonitor;
use super::queue::QueueManager;
use super::reconcile::{Reconciler, SyncReport};

/// Why a sync attempt was made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Once per session, shortly after login, if online
    AppStart,
    /// App-state transition to active
    Foreground,
    /// Offline→online transition from the connectivity monitor
    NetworkOnline,
    /// Debounced local mutation
    EntityChange,
    /// Explicit user action
    Manual,
    /// OS-level periodic background task
    Scheduled,
}

impl TriggerReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::AppStart => "app-start",
            Self::Foreground => "foreground",
            Self::NetworkOnline => "network-online",
            Self::EntityChange => "entity-change",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-trigger policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOptions {
    /// Busy policy: true defers the request to the last-wins pending slot;
    /// false (manual sync) waits for the lock and always runs
    pub skip_if_syncing: bool,
    /// Whether the pass drains the pending-change queue before pulling
    pub process_queue: bool,
}

impl TriggerOptions {
    /// The policy each trigger reason carries
    #[must_use]
    pub const fn for_reason(reason: TriggerReason) -> Self {
        match reason {
            // Foreground is a lightweight freshness check; the queue is
            // drained by the entity-change and scheduled triggers
            TriggerReason::Foreground => Self {
                skip_if_syncing: true,
                process_queue: false,
            },
            TriggerReason::Manual => Self {
                skip_if_syncing: false,
                process_queue: true,
            },
            TriggerReason::AppStart
            | TriggerReason::NetworkOnline
            | TriggerReason::EntityChange
            | TriggerReason::Scheduled => Self {
                skip_if_syncing: true,
                process_queue: true,
            },
        }
    }
}

/// What became of a trigger request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A reconciliation pass ran; inspect the report for success
    Completed(SyncReport),
    /// Device offline; nothing ran and nothing was queued
    SkippedOffline,
    /// A pass was in flight; the request landed in the pending slot and will
    /// be replayed once
    Coalesced,
}

/// Snapshot of the observable sync state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// Completion time of the last successful pass (Unix ms)
    pub last_sync_time: Option<i64>,
    /// Human-readable error from the last failed attempt
    pub sync_error: Option<String>,
    /// Current pending-change queue length
    pub pending_count: u64,
}

/// Broadcast after every successful reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCompleted {
    pub user_id: String,
    pub pushed: u32,
    pub pulled: u32,
}

/// Timing knobs; defaults match production behavior
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Quiet period after the last local mutation before entity-change fires
    pub debounce: Duration,
    /// Delay before a coalesced pending request is replayed
    pub replay_delay: Duration,
    /// Settle delay before the once-per-session app-start trigger
    pub settle_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            replay_delay: Duration::from_millis(250),
            settle_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTrigger {
    user_id: String,
    reason: TriggerReason,
    opts: TriggerOptions,
}

#[derive(Default)]
struct StatusInner {
    last_sync_time: Option<i64>,
    sync_error: Option<String>,
}

#[derive(Default)]
struct SessionTasks {
    debounce: Option<JoinHandle<()>>,
    replay: Option<JoinHandle<()>>,
    online_listener: Option<JoinHandle<()>>,
    app_start: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort_all(&mut self) {
        for handle in [
            self.debounce.take(),
            self.replay.take(),
            self.online_listener.take(),
            self.app_start.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// Mutual-exclusion coordinator for all reconciliation passes
pub struct SyncOrchestrator {
    reconciler: Reconciler,
    queue: QueueManager,
    meta: MetaRepository,
    connectivity: Arc<ConnectivityMonitor>,
    config: OrchestratorConfig,
    is_syncing: AtomicBool,
    lock_released: Notify,
    pending: Mutex<Option<PendingTrigger>>,
    status: Mutex<StatusInner>,
    tasks: Mutex<SessionTasks>,
    app_start_fired: AtomicBool,
    events: broadcast::Sender<SyncCompleted>,
}

impl SyncOrchestrator {
    /// Create an orchestrator for one session
    #[must_use]
    pub fn new(
        db: SharedDatabase,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Arc<Self> {
        Self::with_config(db, remote, connectivity, OrchestratorConfig::default())
    }

    /// Create an orchestrator with custom timing (tests)
    #[must_use]
    pub fn with_config(
        db: SharedDatabase,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            reconciler: Reconciler::new(db.clone(), remote.clone()),
            queue: QueueManager::new(db.clone(), remote),
            meta: MetaRepository::new(db),
            connectivity,
            config,
            is_syncing: AtomicBool::new(false),
            lock_released: Notify::new(),
            pending: Mutex::new(None),
            status: Mutex::new(StatusInner::default()),
            tasks: Mutex::new(SessionTasks::default()),
            app_start_fired: AtomicBool::new(false),
            events,
        })
    }

    /// Tie the orchestrator to an authenticated session: start listening for
    /// online transitions and arm the once-per-session app-start trigger.
    pub fn initialize(self: &Arc<Self>, user_id: &str) {
        let mut tasks = self.tasks.lock().expect("tasks lock");

        // Re-initializing must not leave the old listeners running; a second
        // listener would turn every online edge into two triggers
        for stale in [tasks.online_listener.take(), tasks.app_start.take()]
            .into_iter()
            .flatten()
        {
            stale.abort();
        }

        let listener = {
            let this = Arc::clone(self);
            let user = user_id.to_string();
            let mut rx = self.connectivity.subscribe();
            tokio::spawn(async move {
                while rx.recv().await.is_ok() {
                    if let Err(e) = this.trigger_sync(&user, TriggerReason::NetworkOnline).await {
                        tracing::warn!("network-online sync failed: {e}");
                    }
                }
            })
        };
        tasks.online_listener = Some(listener);

        let app_start = {
            let this = Arc::clone(self);
            let user = user_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(this.config.settle_delay).await;
                if this.app_start_fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                if !this.connectivity.is_online() {
                    tracing::debug!("Skipping app-start sync while offline");
                    return;
                }
                if let Err(e) = this.trigger_sync(&user, TriggerReason::AppStart).await {
                    tracing::warn!("app-start sync failed: {e}");
                }
            })
        };
        tasks.app_start = Some(app_start);
    }

    /// Tear the orchestrator down at the end of the session: cancel every
    /// timer and listener and drop any coalesced request.
    pub fn cleanup(&self) {
        self.tasks.lock().expect("tasks lock").abort_all();
        *self.pending.lock().expect("pending lock") = None;
        self.app_start_fired.store(false, Ordering::SeqCst);
    }

    /// Request a sync with the policy the reason carries
    pub async fn trigger_sync(
        self: &Arc<Self>,
        user_id: &str,
        reason: TriggerReason,
    ) -> Result<SyncOutcome> {
        self.trigger_sync_with(user_id, reason, TriggerOptions::for_reason(reason))
            .await
    }

    /// Request a sync with explicit options
    pub async fn trigger_sync_with(
        self: &Arc<Self>,
        user_id: &str,
        reason: TriggerReason,
        opts: TriggerOptions,
    ) -> Result<SyncOutcome> {
        if !self.connectivity.is_online() {
            tracing::debug!("Sync skipped ({reason}): no network");
            self.status.lock().expect("status lock").sync_error =
                Some(crate::error::Error::Offline.to_string());
            return Ok(SyncOutcome::SkippedOffline);
        }

        // The lock is a plain boolean: deferrable requests never queue up,
        // they collapse into the single pending slot (last request wins).
        // Manual requests instead wait for the lock; a later trigger taking
        // the slot must not displace them.
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            if opts.skip_if_syncing {
                tracing::debug!("Sync in flight; coalescing {reason} trigger");
                *self.pending.lock().expect("pending lock") = Some(PendingTrigger {
                    user_id: user_id.to_string(),
                    reason,
                    opts,
                });
                return Ok(SyncOutcome::Coalesced);
            }
            tracing::debug!("Sync in flight; {reason} trigger waiting for the lock");
            self.wait_for_lock().await;
        }

        let result = self.run_locked(user_id, reason, opts).await;
        self.release_lock();
        self.schedule_replay();

        match result {
            Ok(report) => Ok(SyncOutcome::Completed(report)),
            Err(e) => {
                self.status.lock().expect("status lock").sync_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Debounced trigger for local mutations: rapid edits batch into one
    /// network round trip. The timer handle lives in orchestrator state and
    /// is cancelled on the next call and on teardown.
    pub fn trigger_on_entity_change(self: &Arc<Self>, user_id: &str) {
        let mut tasks = self.tasks.lock().expect("tasks lock");
        if let Some(previous) = tasks.debounce.take() {
            previous.abort();
        }

        let this = Arc::clone(self);
        let user = user_id.to_string();
        tasks.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(this.config.debounce).await;
            if let Err(e) = this.trigger_sync(&user, TriggerReason::EntityChange).await {
                tracing::warn!("entity-change sync failed: {e}");
            }
        }));
    }

    /// Explicit user-requested sync; while a pass is in flight it waits for
    /// the lock instead of being deferred, then runs
    pub async fn manual_sync(self: &Arc<Self>, user_id: &str) -> Result<SyncOutcome> {
        self.trigger_sync(user_id, TriggerReason::Manual).await
    }

    /// Observable sync state for the surrounding application
    pub async fn status(&self, user_id: &str) -> Result<SyncStatus> {
        let pending_count = self.queue.pending_count(user_id).await?;
        let inner = self.status.lock().expect("status lock");
        Ok(SyncStatus {
            is_syncing: self.is_syncing.load(Ordering::SeqCst),
            last_sync_time: inner.last_sync_time,
            sync_error: inner.sync_error.clone(),
            pending_count,
        })
    }

    /// Subscribe to completion events ("sync completed, entity set changed")
    pub fn subscribe(&self) -> broadcast::Receiver<SyncCompleted> {
        self.events.subscribe()
    }

    async fn run_locked(
        &self,
        user_id: &str,
        reason: TriggerReason,
        opts: TriggerOptions,
    ) -> Result<SyncReport> {
        tracing::info!("Sync started ({reason}) for {user_id}");

        // Baseline for the NEXT pass is this pass's start, so remote writes
        // landing mid-pull are not skipped next time
        let started_at = chrono::Utc::now().timestamp_millis();
        let baseline = self.meta.last_synced_at(user_id).await?;

        let report = match baseline {
            Some(since) => {
                self.reconciler
                    .incremental_sync(user_id, since, opts.process_queue)
                    .await?
            }
            None => self.reconciler.full_sync(user_id, opts.process_queue).await?,
        };

        if report.success {
            self.meta.set_last_synced_at(user_id, started_at).await?;
            {
                let mut inner = self.status.lock().expect("status lock");
                inner.last_sync_time = Some(started_at);
                inner.sync_error = None;
            }
            tracing::info!(
                "Sync finished ({reason}): pushed {}, pulled {}, {} push failures",
                report.pushed,
                report.pulled,
                report.push_failures
            );
            let _ = self.events.send(SyncCompleted {
                user_id: user_id.to_string(),
                pushed: report.pushed,
                pulled: report.pulled,
            });
        } else {
            let message = report.errors.join("; ");
            tracing::warn!("Sync failed ({reason}): {message}");
            self.status.lock().expect("status lock").sync_error = Some(message);
        }

        Ok(report)
    }

    /// If a request was coalesced while the lock was held, replay it once
    /// after a brief delay
    fn schedule_replay(self: &Arc<Self>) {
        if self.pending.lock().expect("pending lock").is_none() {
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.config.replay_delay).await;
            this.replay_pending().await;
        });
        self.tasks.lock().expect("tasks lock").replay = Some(handle);
    }

    async fn replay_pending(self: Arc<Self>) {
        loop {
            let Some(req) = self.pending.lock().expect("pending lock").take() else {
                return;
            };

            if !self.connectivity.is_online() {
                tracing::debug!("Dropping coalesced {} trigger: offline", req.reason);
                return;
            }

            if self
                .is_syncing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Another pass took the lock meanwhile; it will schedule the
                // next replay itself
                *self.pending.lock().expect("pending lock") = Some(req);
                return;
            }

            tracing::debug!("Replaying coalesced {} trigger", req.reason);
            let result = self.run_locked(&req.user_id, req.reason, req.opts).await;
            self.release_lock();

            if let Err(e) = result {
                self.status.lock().expect("status lock").sync_error = Some(e.to_string());
                return;
            }
            // Loop: a trigger that arrived during the replay run gets its
            // own single follow-up
        }
    }

    /// Block until the in-flight pass releases the lock and this request
    /// holds it. The notify registration happens before the acquire attempt,
    /// so a release between the two cannot be missed.
    async fn wait_for_lock(&self) {
        loop {
            let released = self.lock_released.notified();
            if self
                .is_syncing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
            released.await;
        }
    }

    fn release_lock(&self) {
        self.is_syncing.store(false, Ordering::SeqCst);
        self.lock_released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EntityRepository;
    use crate::models::{EntityKind, EntityRecord};
    use crate::remote::{Document, MemoryRemoteStore, RemoteDocument, RemoteFuture};
    use pretty_assertions::assert_eq;

    /// Remote store that delays every list call, to hold the sync lock open
    struct SlowRemote {
        inner: MemoryRemoteStore,
        delay: Duration,
    }

    impl SlowRemote {
        fn new(delay: Duration) -> Self {
            Self {
                inner: MemoryRemoteStore::new(),
                delay,
            }
        }
    }

    impl crate::remote::RemoteStore for SlowRemote {
        fn upsert<'a>(
            &'a self,
            kind: EntityKind,
            id: &'a str,
            doc: &'a Document,
        ) -> RemoteFuture<'a, ()> {
            self.inner.upsert(kind, id, doc)
        }

        fn delete<'a>(&'a self, kind: EntityKind, id: &'a str) -> RemoteFuture<'a, ()> {
            self.inner.delete(kind, id)
        }

        fn list<'a>(
            &'a self,
            kind: EntityKind,
            user_id: &'a str,
        ) -> RemoteFuture<'a, Vec<RemoteDocument>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.list(kind, user_id).await
            })
        }

        fn list_since<'a>(
            &'a self,
            kind: EntityKind,
            user_id: &'a str,
            since_ms: i64,
        ) -> RemoteFuture<'a, Vec<RemoteDocument>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.list_since(kind, user_id, since_ms).await
            })
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            debounce: Duration::from_millis(50),
            replay_delay: Duration::from_millis(10),
            settle_delay: Duration::from_millis(10),
        }
    }

    async fn setup(
        online: bool,
    ) -> (Arc<SyncOrchestrator>, SharedDatabase, Arc<MemoryRemoteStore>) {
        let db = SharedDatabase::open_in_memory().await.unwrap();
        let remote = Arc::new(MemoryRemoteStore::new());
        let connectivity = Arc::new(ConnectivityMonitor::with_flap_window(
            online,
            Duration::ZERO,
        ));
        let orchestrator = SyncOrchestrator::with_config(
            db.clone(),
            remote.clone(),
            connectivity,
            fast_config(),
        );
        (orchestrator, db, remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_trigger_skips_without_network_activity() {
        let (orchestrator, db, remote) = setup(false).await;
        let entities = EntityRepository::new(db);

        // Offline local create: row stored unsynced, queued
        let record = EntityRecord::new(EntityKind::Story, "u1").with_field("title", "Draft");
        entities.upsert(&record).await.unwrap();

        let outcome = orchestrator
            .trigger_sync("u1", TriggerReason::EntityChange)
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::SkippedOffline);
        assert_eq!(remote.write_count(), 0);

        let status = orchestrator.status("u1").await.unwrap();
        assert_eq!(status.pending_count, 1);
        assert!(status.sync_error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_sync_full_then_incremental() {
        let (orchestrator, db, _remote) = setup(true).await;
        let meta = MetaRepository::new(db);

        assert_eq!(meta.last_synced_at("u1").await.unwrap(), None);

        let outcome = orchestrator.manual_sync("u1").await.unwrap();
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert!(report.success);

        // Baseline now present: next pass runs incremental
        let baseline = meta.last_synced_at("u1").await.unwrap();
        assert!(baseline.is_some());

        let outcome = orchestrator.manual_sync("u1").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(r) if r.success));
        assert!(meta.last_synced_at("u1").await.unwrap() >= baseline);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_online_transition_drains_queue_once() {
        let (orchestrator, db, remote) = setup(false).await;
        let entities = EntityRepository::new(db);

        let record = EntityRecord::new(EntityKind::Story, "u1").with_field("title", "Draft");
        entities.upsert(&record).await.unwrap();

        orchestrator.initialize("u1");
        let mut events = orchestrator.subscribe();

        // Regaining connectivity emits exactly one transition
        orchestrator_connectivity(&orchestrator).report(true);

        let completed = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("sync should complete")
            .unwrap();
        assert_eq!(completed.pushed, 1);

        let status = orchestrator.status("u1").await.unwrap();
        assert_eq!(status.pending_count, 0);
        let synced = entities
            .get(EntityKind::Story, record.id)
            .await
            .unwrap()
            .unwrap();
        assert!(synced.synced);
        assert!(remote.get(EntityKind::Story, &record.id.as_str()).is_some());

        orchestrator.cleanup();
    }

    // The monitor handed to setup() is owned by the orchestrator; reach it
    // through the struct for tests that drive connectivity
    fn orchestrator_connectivity(orchestrator: &SyncOrchestrator) -> &ConnectivityMonitor {
        &orchestrator.connectivity
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_debounce_batches_rapid_edits_into_one_pass() {
        let (orchestrator, db, _remote) = setup(true).await;
        let entities = EntityRepository::new(db);
        let mut events = orchestrator.subscribe();

        let mut scene = EntityRecord::new(EntityKind::Story, "u1").with_field("title", "v1");
        entities.upsert(&scene).await.unwrap();
        orchestrator.trigger_on_entity_change("u1");

        // Second edit before the debounce fires restarts the timer
        scene.fields.insert("title".into(), "v2".into());
        scene.touch();
        entities.upsert(&scene).await.unwrap();
        orchestrator.trigger_on_entity_change("u1");

        let completed = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("debounced sync should fire")
            .unwrap();
        // One pass, one pushed change: the second edit replaced the first in
        // the queue before any network trip
        assert_eq!(completed.pushed, 1);
        assert!(events.try_recv().is_err());

        orchestrator.cleanup();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_busy_triggers_coalesce_into_single_replay() {
        let db = SharedDatabase::open_in_memory().await.unwrap();
        let remote = Arc::new(SlowRemote::new(Duration::from_millis(150)));
        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        let orchestrator =
            SyncOrchestrator::with_config(db, remote, connectivity, fast_config());
        let mut events = orchestrator.subscribe();

        // Hold the lock with a slow pass
        let first = {
            let this = Arc::clone(&orchestrator);
            tokio::spawn(async move { this.manual_sync("u1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Several triggers land while busy; all collapse into one slot
        for _ in 0..3 {
            let outcome = orchestrator
                .trigger_sync("u1", TriggerReason::Scheduled)
                .await
                .unwrap();
            assert_eq!(outcome, SyncOutcome::Coalesced);
        }

        let first_outcome = first.await.unwrap().unwrap();
        assert!(matches!(first_outcome, SyncOutcome::Completed(_)));

        // Exactly two passes total: the in-flight one plus one replay
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("first pass")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("replayed pass")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(events.try_recv().is_err());

        orchestrator.cleanup();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_busy_manual_waits_for_lock_and_runs() {
        let db = SharedDatabase::open_in_memory().await.unwrap();
        let remote = Arc::new(SlowRemote::new(Duration::from_millis(100)));
        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        let orchestrator =
            SyncOrchestrator::with_config(db, remote, connectivity, fast_config());

        // Hold the lock with a slow pass
        let first = {
            let this = Arc::clone(&orchestrator);
            tokio::spawn(async move { this.manual_sync("u1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // A manual request while busy blocks on the lock instead of landing
        // in the deferrable slot
        let second = {
            let this = Arc::clone(&orchestrator);
            tokio::spawn(async move { this.manual_sync("u1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // A later trigger takes the slot; the waiting manual request must
        // not be displaced by it
        let outcome = orchestrator
            .trigger_sync("u1", TriggerReason::Scheduled)
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Coalesced);

        let first_outcome = first.await.unwrap().unwrap();
        assert!(matches!(first_outcome, SyncOutcome::Completed(r) if r.success));

        let second_outcome = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .expect("waiting manual sync should run")
            .unwrap()
            .unwrap();
        assert!(matches!(second_outcome, SyncOutcome::Completed(r) if r.success));

        orchestrator.cleanup();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reinitialize_keeps_one_listener_per_edge() {
        let (orchestrator, _db, _remote) = setup(false).await;
        let mut events = orchestrator.subscribe();

        orchestrator.initialize("u1");
        orchestrator.initialize("u1");
        // Let both app-start tasks fire and no-op while offline
        tokio::time::sleep(Duration::from_millis(50)).await;

        orchestrator_connectivity(&orchestrator).report(true);

        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("online sync should run")
            .unwrap();

        // One edge, one pass: a stale second listener would coalesce a
        // duplicate trigger and replay it as an extra pass
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(events.try_recv().is_err());

        orchestrator.cleanup();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lock_released_after_failed_pass() {
        let (orchestrator, _db, remote) = setup(true).await;

        remote.fail_next_reads(1);
        let outcome = orchestrator.manual_sync("u1").await.unwrap();
        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert!(!report.success);

        let status = orchestrator.status("u1").await.unwrap();
        assert!(!status.is_syncing);
        assert!(status.sync_error.is_some());

        // The next pass proceeds normally and clears the error
        let outcome = orchestrator.manual_sync("u1").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(r) if r.success));
        let status = orchestrator.status("u1").await.unwrap();
        assert_eq!(status.sync_error, None);
        assert!(status.last_sync_time.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_pass_leaves_baseline_unchanged() {
        let (orchestrator, db, remote) = setup(true).await;
        let meta = MetaRepository::new(db);

        orchestrator.manual_sync("u1").await.unwrap();
        let baseline = meta.last_synced_at("u1").await.unwrap().unwrap();

        remote.fail_next_reads(1);
        orchestrator.manual_sync("u1").await.unwrap();
        assert_eq!(meta.last_synced_at("u1").await.unwrap(), Some(baseline));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleanup_cancels_pending_debounce() {
        let (orchestrator, _db, _remote) = setup(true).await;
        let mut events = orchestrator.subscribe();

        orchestrator.trigger_on_entity_change("u1");
        orchestrator.cleanup();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(events.try_recv().is_err());
    }
}
