//! Graceful shutdown coordination.
//!
//! Every in-flight provider call holds a [`ShutdownGuard`]. Shutdown moves
//! the coordinator to `Draining`, refuses new guards, and waits (bounded)
//! for the outstanding ones to drop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

pub struct ShutdownCoordinator {
    state: Mutex<ShutdownState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ShutdownState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.lock()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Track one in-flight call. Returns None once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        // Held across the increment so a concurrent initiate() cannot miss it.
        let state = self.state.lock();
        if *state != ShutdownState::Running {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(ShutdownGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        })
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop handing out guards and wait up to `timeout` for in-flight calls.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        *self.state.lock() = ShutdownState::Draining;
        tracing::info!(in_flight = self.in_flight_count(), "draining in-flight calls");

        let result = self.wait_for_drain(timeout).await;

        *self.state.lock() = ShutdownState::Stopped;
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let drained = async {
            while self.in_flight_count() > 0 {
                self.notify.notified().await;
            }
        };
        if tokio::time::timeout(timeout, drained).await.is_ok() {
            return ShutdownResult::Complete;
        }
        match self.in_flight_count() {
            0 => ShutdownResult::Complete,
            remaining => ShutdownResult::Timeout { remaining },
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight call.
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
