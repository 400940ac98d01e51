//! Sync engine: orchestration, queue drain, reconciliation, connectivity

pub mod connectivity;
pub mod orchestrator;
pub mod queue;
pub mod reconcile;
pub mod scheduler;

pub use connectivity::{ConnectivityMonitor, OnlineTransition, DEFAULT_FLAP_WINDOW};
pub use orchestrator::{
    OrchestratorConfig, SyncCompleted, SyncOrchestrator, SyncOutcome, SyncStatus, TriggerOptions,
    TriggerReason,
};
pub use queue::{DrainOutcome, QueueManager};
pub use reconcile::{Reconciler, SyncReport, TOMBSTONE_RETENTION_MS};
pub use scheduler::{BackgroundScheduler, SessionStore, MIN_INTERVAL};
