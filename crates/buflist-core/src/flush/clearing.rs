//! Clearing state machine.
//!
//! Enforces at most one flush pass at a time. The same mutex/condvar pair
//! serves as the backpressure wake signal for producers blocked on a full
//! ingest queue.

use super::timer::IdleTimer;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::trace;

/// Coordinator state guarded by the mutex.
struct ClearState {
    clearing: bool,
}

/// Gatekeeper for flush passes.
pub struct ClearCoordinator {
    state: Mutex<ClearState>,
    wake: Condvar,
    disposing: AtomicBool,
    timer: IdleTimer,
}

impl ClearCoordinator {
    /// Create a coordinator owning an idle timer with the given ttl.
    pub fn new(idle_ttl: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(ClearState { clearing: false }),
            wake: Condvar::new(),
            disposing: AtomicBool::new(false),
            timer: IdleTimer::new(idle_ttl),
        }
    }

    /// Spawn the idle timer thread with its expiry callback.
    pub fn start_idle_timer<F>(&self, on_expire: F) -> std::io::Result<()>
    where
        F: Fn() + Send + 'static,
    {
        self.timer.start(on_expire)
    }

    /// Transition `Idle -> Clearing`.
    ///
    /// Succeeds iff no pass is running and `has_pending` reports queued
    /// items; both checks and the flag update happen under one lock. On
    /// success the idle timer is cancelled and the returned guard holds the
    /// flag until dropped.
    pub fn try_start_clearing(
        &self,
        has_pending: impl FnOnce() -> bool,
    ) -> Option<ClearingGuard<'_>> {
        {
            let mut state = self.state.lock();
            if state.clearing || !has_pending() {
                return None;
            }
            state.clearing = true;
        }
        self.timer.cancel();
        trace!("Clearing started");
        Some(ClearingGuard { coordinator: self })
    }

    /// Transition `Clearing -> Idle`. Only reachable through the guard.
    fn finish_clearing(&self) {
        let mut state = self.state.lock();
        state.clearing = false;
        if !self.is_disposing() {
            self.timer.arm();
        }
        self.wake.notify_all();
        drop(state);
        trace!("Clearing finished");
    }

    /// Whether a flush pass is currently running.
    pub fn is_clearing(&self) -> bool {
        self.state.lock().clearing
    }

    /// Whether dispose has begun.
    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::Acquire)
    }

    /// Rearm the idle timer unless the buffer is disposing.
    pub fn arm_idle_timer(&self) {
        if !self.is_disposing() {
            self.timer.arm();
        }
    }

    /// Block while `is_full` holds, polling every `delay`.
    ///
    /// Returns early once dispose begins so producers never hang on a
    /// buffer that is shutting down.
    pub fn wait_for_capacity(&self, is_full: impl Fn() -> bool, delay: Duration) {
        let mut state = self.state.lock();
        while is_full() && !self.is_disposing() {
            self.wake.wait_for(&mut state, delay);
        }
    }

    /// Wait up to `timeout` for a running pass to finish.
    pub fn wait_while_clearing(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if state.clearing {
            self.wake.wait_for(&mut state, timeout);
        }
    }

    /// Flip the disposing flag and wake every blocked producer.
    ///
    /// Returns `false` if dispose had already begun.
    pub fn begin_dispose(&self) -> bool {
        if self.disposing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _state = self.state.lock();
        self.timer.cancel();
        self.wake.notify_all();
        true
    }

    /// Stop the idle timer thread, waiting at most `timeout` for a pass
    /// running on it. Returns `false` if the thread had to be detached.
    pub fn shutdown_idle_timer(&self, timeout: Duration) -> bool {
        self.timer.shutdown_within(timeout)
    }

    #[cfg(test)]
    pub(crate) fn is_idle_timer_armed(&self) -> bool {
        self.timer.is_armed()
    }
}

/// Holds the clearing flag for the duration of one pass.
///
/// Dropping the guard finishes clearing on every exit path, including
/// unwinding out of the pass.
pub struct ClearingGuard<'a> {
    coordinator: &'a ClearCoordinator,
}

impl Drop for ClearingGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.finish_clearing();
    }
}
