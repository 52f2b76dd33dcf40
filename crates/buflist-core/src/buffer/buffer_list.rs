//! Public buffer facade.
//!
//! Producers call [`BufferList::add`] from any thread. Items accumulate in
//! the ingest queue and are released to the handler in batches when a full
//! batch is queued, when the buffer has been idle for `idle_clear_ttl`, or on
//! an explicit [`BufferList::clear`]. [`BufferList::dispose`] drains under a
//! deadline and reports what could not be delivered.

use crate::config::BufferOptions;
use crate::flush::{ClearCoordinator, Dispatcher, FlushTrigger};
use crate::handler::BatchHandler;
use crate::metrics::BufferStats;
use crate::{BufferError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of a dispose call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisposeSummary {
    /// Both queues emptied before the deadline
    pub drained: bool,
    /// Items reported through `on_disposed`
    pub remaining: usize,
    /// Time spent draining
    pub elapsed: Duration,
}

struct Inner<T> {
    options: BufferOptions,
    coordinator: ClearCoordinator,
    dispatcher: Dispatcher<T>,
}

impl<T> Inner<T> {
    fn flush(&self, trigger: FlushTrigger) -> bool {
        self.dispatcher.run_pass(&self.coordinator, trigger)
    }
}

/// Concurrent batching buffer.
///
/// Share across producer threads with `Arc`. Dropping the buffer disposes it.
pub struct BufferList<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> BufferList<T> {
    /// Create a buffer delivering batches to `handler`.
    pub fn new<H>(options: BufferOptions, handler: H) -> Result<Self>
    where
        H: BatchHandler<T> + 'static,
    {
        Self::with_shared_handler(options, Arc::new(handler))
    }

    /// Create a buffer with a handler the caller keeps a reference to.
    pub fn with_shared_handler(
        options: BufferOptions,
        handler: Arc<dyn BatchHandler<T>>,
    ) -> Result<Self> {
        options.validate()?;

        let inner = Arc::new(Inner {
            coordinator: ClearCoordinator::new(options.idle_clear_ttl()),
            dispatcher: Dispatcher::new(
                handler,
                options.clear_batching_size,
                options.max_fault_size,
            ),
            options,
        });

        let weak = Arc::downgrade(&inner);
        inner.coordinator.start_idle_timer(move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush(FlushTrigger::Idle);
            }
        })?;

        info!(
            clear_batching_size = inner.options.clear_batching_size,
            max_size = inner.options.max_size,
            max_fault_size = inner.options.max_fault_size,
            idle_clear_ttl_ms = inner.options.idle_clear_ttl_ms,
            "Buffer created"
        );

        Ok(Self { inner })
    }

    /// Submit an item.
    ///
    /// Blocks while the ingest queue holds `max_size` items or more, polling
    /// every `max_size_waiting_delay`. May run a flush pass on the calling
    /// thread when the item completes a batch.
    ///
    /// Fails with [`BufferError::Disposed`] once dispose has begun. A call
    /// released from the wait by dispose either lands before the residual
    /// report, and is delivered or reported with it, or fails.
    pub fn add(&self, item: T) -> Result<()> {
        let inner = &*self.inner;
        if inner.coordinator.is_disposing() {
            return Err(BufferError::Disposed.into());
        }

        let ingest = inner.dispatcher.ingest();
        let max_size = inner.options.max_size;
        if ingest.len() >= max_size {
            inner.dispatcher.metrics().record_backpressure();
            debug!(max_size = max_size, "Ingest queue full, waiting for capacity");
            inner.coordinator.wait_for_capacity(
                || ingest.len() >= max_size,
                inner.options.max_size_waiting_delay(),
            );
        }

        if ingest.push(item).is_err() {
            // Dispose already reported the residual items
            return Err(BufferError::Disposed.into());
        }
        inner.dispatcher.metrics().record_add();

        if inner.coordinator.is_clearing() {
            return Ok(());
        }

        if ingest.len() < inner.options.clear_batching_size {
            inner.coordinator.arm_idle_timer();
            return Ok(());
        }

        inner.flush(FlushTrigger::Threshold);
        Ok(())
    }

    /// Flush now. Returns `false` if a pass was already running or nothing
    /// was buffered.
    pub fn clear(&self) -> bool {
        self.inner.flush(FlushTrigger::Explicit)
    }

    /// Stop accepting items, drain both queues until empty or until
    /// `dispose_timeout` elapses, report leftovers through `on_disposed` and
    /// stop the idle timer.
    ///
    /// Never blocks past the deadline on a pass running on another thread.
    /// Such a pass finishes on its own; its batch goes to `on_cleared` or,
    /// if it fails, to `on_dropped`.
    ///
    /// Returns `None` if dispose had already been called.
    pub fn dispose(&self) -> Option<DisposeSummary> {
        let inner = &*self.inner;
        if !inner.coordinator.begin_dispose() {
            return None;
        }

        let start = Instant::now();
        let timeout = inner.options.dispose_timeout();
        let poll = inner.options.max_size_waiting_delay();
        debug!(
            buffered = self.len(),
            timeout_ms = %timeout.as_millis(),
            "Disposing buffer"
        );

        while inner.dispatcher.has_pending() {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            if !inner.flush(FlushTrigger::Dispose) {
                // Another pass holds the gate
                inner.coordinator.wait_while_clearing(poll.min(timeout - elapsed));
            }
        }

        let drained = !inner.dispatcher.has_pending();
        let remaining = inner.dispatcher.close_and_report();
        if !inner
            .coordinator
            .shutdown_idle_timer(timeout.saturating_sub(start.elapsed()))
        {
            warn!("Idle flush pass still running after dispose deadline");
        }

        let summary = DisposeSummary {
            drained,
            remaining,
            elapsed: start.elapsed(),
        };

        if drained {
            info!(elapsed_ms = %summary.elapsed.as_millis(), "Buffer disposed");
        } else {
            warn!(
                remaining = remaining,
                timeout_ms = %timeout.as_millis(),
                "Dispose timeout exceeded, reporting undelivered items"
            );
        }

        Some(summary)
    }

    /// Whether dispose has begun.
    pub fn is_disposed(&self) -> bool {
        self.inner.coordinator.is_disposing()
    }

    /// Items currently buffered in the ingest and fault queues.
    pub fn len(&self) -> usize {
        self.inner.dispatcher.ingest().len() + self.inner.dispatcher.fault().len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        !self.inner.dispatcher.has_pending()
    }

    /// Options the buffer was built with.
    pub fn options(&self) -> &BufferOptions {
        &self.inner.options
    }

    /// Counters and queue lengths.
    pub fn stats(&self) -> BufferStats {
        let dispatcher = &self.inner.dispatcher;
        dispatcher
            .metrics()
            .snapshot(dispatcher.ingest().len(), dispatcher.fault().len())
    }
}

impl<T: Clone + Send + 'static> BufferList<T> {
    /// Snapshot of the fault queue, oldest first.
    pub fn failed(&self) -> Vec<T> {
        self.inner.dispatcher.fault().snapshot()
    }

    /// Snapshot of the ingest queue, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.dispatcher.ingest().snapshot()
    }

    /// Iterate over a snapshot of the ingest queue.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.snapshot().into_iter()
    }
}

impl<'a, T: Clone + Send + 'static> IntoIterator for &'a BufferList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Send + 'static> std::fmt::Debug for BufferList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferList")
            .field("options", &self.inner.options)
            .field("ingest_len", &self.inner.dispatcher.ingest().len())
            .field("fault_len", &self.inner.dispatcher.fault().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T: Send + 'static> Drop for BufferList<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
