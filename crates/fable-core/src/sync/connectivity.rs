//! Connectivity monitor
//!
//! Single source of truth for "is the device online". The platform layer
//! feeds raw reachability notifications in via [`ConnectivityMonitor::report`];
//! subscribers only ever see debounced offline→online edges, never repeated
//! online notifications or rapid flaps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

/// Default window during which a repeated offline→online edge is treated as
/// the same blip and suppressed
pub const DEFAULT_FLAP_WINDOW: Duration = Duration::from_secs(5);

/// Emitted once per genuine offline→online transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineTransition;

/// Observes network reachability and fans out debounced transition events
pub struct ConnectivityMonitor {
    online: AtomicBool,
    last_emit: Mutex<Option<Instant>>,
    flap_window: Duration,
    tx: broadcast::Sender<OnlineTransition>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        Self::with_flap_window(initially_online, DEFAULT_FLAP_WINDOW)
    }

    /// Create a monitor with a custom flap-suppression window (tests)
    #[must_use]
    pub fn with_flap_window(initially_online: bool, flap_window: Duration) -> Self {
        let (tx, _) = broadcast::channel(8);
        Self {
            online: AtomicBool::new(initially_online),
            last_emit: Mutex::new(None),
            flap_window,
            tx,
        }
    }

    /// Point-in-time connectivity state
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Subscribe to offline→online transition events
    pub fn subscribe(&self) -> broadcast::Receiver<OnlineTransition> {
        self.tx.subscribe()
    }

    /// Feed a raw reachability notification from the platform.
    ///
    /// Returns whether a transition event was emitted. Repeated online
    /// notifications are ignored; an offline→online edge inside the flap
    /// window of the previous emitted edge updates the state but stays
    /// silent.
    pub fn report(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);

        if !online || was_online {
            return false;
        }

        let mut last_emit = self.last_emit.lock().expect("last_emit lock");
        let suppressed = last_emit
            .is_some_and(|at| at.elapsed() < self.flap_window);
        if suppressed {
            tracing::debug!("Suppressing online transition inside flap window");
            return false;
        }

        *last_emit = Some(Instant::now());
        drop(last_emit);

        tracing::info!("Network transitioned online");
        // No receivers is fine; the orchestrator may not be listening yet
        let _ = self.tx.send(OnlineTransition);
        true
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
