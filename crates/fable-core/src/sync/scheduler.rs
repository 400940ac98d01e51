//! Scheduled background trigger
//!
//! Periodic best-effort sync for mutations missed by the event-driven
//! triggers (failed pushes waiting for retry, remote edits from another
//! device while this one sat idle). The platform analogue is an OS-level
//! background task; here it is a tokio timer owned by the session. The user
//! is looked up from persisted session state at fire time, not captured at
//! registration, so a task that outlives a login switch syncs the right
//! account.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::orchestrator::{SyncOrchestrator, TriggerReason};

/// Floor for the schedule period; platforms throttle anything tighter
pub const MIN_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Persisted session state the scheduled task reads its user from
pub trait SessionStore: Send + Sync {
    /// Currently signed-in user, if any
    fn current_user_id(&self) -> Option<String>;
}

/// Periodic scheduled-sync driver
pub struct BackgroundScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    session: Arc<dyn SessionStore>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundScheduler {
    /// Create a scheduler at the minimum interval
    #[must_use]
    pub fn new(orchestrator: Arc<SyncOrchestrator>, session: Arc<dyn SessionStore>) -> Self {
        Self::with_interval(orchestrator, session, MIN_INTERVAL)
    }

    /// Create a scheduler with a custom period, clamped to [`MIN_INTERVAL`]
    #[must_use]
    pub fn with_interval(
        orchestrator: Arc<SyncOrchestrator>,
        session: Arc<dyn SessionStore>,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            session,
            interval: interval.max(MIN_INTERVAL),
            task: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_interval_unclamped(
        orchestrator: Arc<SyncOrchestrator>,
        session: Arc<dyn SessionStore>,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            session,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Effective schedule period
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the periodic task.
    ///
    /// Idempotent: while a task is already running, registering again is a
    /// no-op and returns false. Called on every authenticated app start, so
    /// the check matters. The first fire happens one full period after
    /// registration; skipped-while-busy and skipped-while-offline policy is
    /// the orchestrator's, and a fire with no signed-in user does nothing.
    pub fn register(&self) -> bool {
        let mut task = self.task.lock().expect("task lock");
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Background sync already registered; ignoring");
            return false;
        }

        tracing::info!(
            "Registering background sync every {}s",
            self.interval.as_secs()
        );
        let orchestrator = Arc::clone(&self.orchestrator);
        let session = Arc::clone(&self.session);
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            // The first tick completes immediately; consume it
            timer.tick().await;
            loop {
                timer.tick().await;
                let Some(user) = session.current_user_id() else {
                    tracing::debug!("Scheduled sync fired with no signed-in user");
                    continue;
                };
                if let Err(e) = orchestrator
                    .trigger_sync(&user, TriggerReason::Scheduled)
                    .await
                {
                    tracing::warn!("Scheduled sync failed: {e}");
                }
            }
        }));
        true
    }

    /// Stop the periodic task (logout); idempotent
    pub fn unregister(&self) {
        if let Some(handle) = self.task.lock().expect("task lock").take() {
            handle.abort();
            tracing::info!("Background sync unregistered");
        }
    }

    /// Whether a periodic task is currently running
    pub fn is_registered(&self) -> bool {
        self.task
            .lock()
            .expect("task lock")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().expect("task lock").take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SharedDatabase;
    use crate::remote::MemoryRemoteStore;
    use crate::sync::connectivity::ConnectivityMonitor;
    use crate::sync::orchestrator::OrchestratorConfig;

    struct StaticSession(Option<String>);

    impl SessionStore for StaticSession {
        fn current_user_id(&self) -> Option<String> {
            self.0.clone()
        }
    }

    fn signed_in(user: &str) -> Arc<dyn SessionStore> {
        Arc::new(StaticSession(Some(user.to_string())))
    }

    async fn orchestrator(online: bool) -> Arc<SyncOrchestrator> {
        let db = SharedDatabase::open_in_memory().await.unwrap();
        SyncOrchestrator::with_config(
            db,
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(ConnectivityMonitor::new(online)),
            OrchestratorConfig {
                debounce: Duration::from_millis(10),
                replay_delay: Duration::from_millis(10),
                settle_delay: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_interval_clamped_to_minimum() {
        let scheduler = BackgroundScheduler::with_interval(
            orchestrator(true).await,
            signed_in("u1"),
            Duration::from_secs(5),
        );
        assert_eq!(scheduler.interval(), MIN_INTERVAL);

        let scheduler = BackgroundScheduler::with_interval(
            orchestrator(true).await,
            signed_in("u1"),
            Duration::from_secs(30 * 60),
        );
        assert_eq!(scheduler.interval(), Duration::from_secs(30 * 60));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_is_idempotent() {
        let scheduler = BackgroundScheduler::new(orchestrator(true).await, signed_in("u1"));

        assert!(scheduler.register());
        assert!(!scheduler.register());
        assert!(scheduler.is_registered());

        scheduler.unregister();
        scheduler.unregister();
        assert!(!scheduler.is_registered());
        assert!(scheduler.register());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_periodic_fire_runs_scheduled_sync() {
        let orchestrator = orchestrator(true).await;
        let mut events = orchestrator.subscribe();
        let scheduler = BackgroundScheduler::with_interval_unclamped(
            Arc::clone(&orchestrator),
            signed_in("u1"),
            Duration::from_millis(50),
        );

        scheduler.register();
        let completed = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("scheduled sync should fire")
            .unwrap();
        assert_eq!(completed.user_id, "u1");

        scheduler.unregister();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fire_with_no_session_does_nothing() {
        let orchestrator = orchestrator(true).await;
        let mut events = orchestrator.subscribe();
        let scheduler = BackgroundScheduler::with_interval_unclamped(
            Arc::clone(&orchestrator),
            Arc::new(StaticSession(None)),
            Duration::from_millis(30),
        );

        scheduler.register();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(events.try_recv().is_err());

        scheduler.unregister();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fire_while_offline_does_nothing() {
        let orchestrator = orchestrator(false).await;
        let mut events = orchestrator.subscribe();
        let scheduler = BackgroundScheduler::with_interval_unclamped(
            Arc::clone(&orchestrator),
            signed_in("u1"),
            Duration::from_millis(30),
        );

        scheduler.register();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(events.try_recv().is_err());

        scheduler.unregister();
    }
}
