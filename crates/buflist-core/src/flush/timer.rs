//! Single-shot, rearmable idle timer.
//!
//! One background thread per buffer sleeps until the current deadline and
//! then runs the expiry callback on its own thread. Arming moves the deadline;
//! cancelling clears it. A buffer with idle flushing disabled never spawns the
//! thread.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
    /// The expiry callback is executing
    running: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    signal: Condvar,
}

/// Idle timer owned by one buffer instance.
pub struct IdleTimer {
    ttl: Option<Duration>,
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IdleTimer {
    /// Create a timer. `None` disables it: arming becomes a no-op.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    deadline: None,
                    shutdown: false,
                    running: false,
                }),
                signal: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the timer thread. Does nothing when the timer is disabled.
    pub fn start<F>(&self, on_expire: F) -> std::io::Result<()>
    where
        F: Fn() + Send + 'static,
    {
        if self.ttl.is_none() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("buflist-idle-timer".into())
            .spawn(move || run(&shared, on_expire))?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Whether idle flushing is enabled.
    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Set the deadline to now + ttl, replacing any pending deadline.
    pub fn arm(&self) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.deadline = Some(Instant::now() + ttl);
        self.shared.signal.notify_all();
    }

    /// Clear the pending deadline, if any.
    pub fn cancel(&self) {
        self.shared.state.lock().deadline = None;
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    /// Stop the timer thread and wait for it to exit.
    ///
    /// When called from the timer thread itself (an expiry callback that
    /// ends up disposing the buffer) the join is skipped; the thread exits
    /// once the callback returns.
    pub fn shutdown(&self) {
        self.stop(None);
    }

    /// Stop the timer thread, waiting at most `timeout` for an in-flight
    /// expiry callback to return.
    ///
    /// Returns `false` if the callback was still running at the deadline. The
    /// thread is then detached and exits on its own once the callback returns.
    pub fn shutdown_within(&self, timeout: Duration) -> bool {
        self.stop(Some(Instant::now() + timeout))
    }

    fn stop(&self, deadline: Option<Instant>) -> bool {
        let mut worker = self.worker.lock();
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.deadline = None;
        self.shared.signal.notify_all();

        let Some(handle) = worker.take() else {
            return true;
        };
        if handle.thread().id() == thread::current().id() {
            return true;
        }

        while state.running {
            match deadline {
                Some(deadline) => {
                    if self.shared.signal.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.shared.signal.wait(&mut state),
            }
        }
        if state.running {
            debug!("Idle timer callback still running, detaching timer thread");
            return false;
        }
        drop(state);

        if handle.join().is_err() {
            debug!("Idle timer thread exited with a panic");
        }
        true
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F: Fn()>(shared: &TimerShared, on_expire: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }

        match state.deadline {
            None => shared.signal.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                state.running = true;
                trace!("Idle timer expired");
                let result = MutexGuard::unlocked(&mut state, || {
                    panic::catch_unwind(AssertUnwindSafe(&on_expire))
                });
                if result.is_err() {
                    debug!("Idle timer callback panicked");
                }
                state.running = false;
                shared.signal.notify_all();
            }
            Some(deadline) => {
                shared.signal.wait_until(&mut state, deadline);
            }
        }
    }
    trace!("Idle timer thread stopped");
}
