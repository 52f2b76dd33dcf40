//! Flush pass execution.
//!
//! A pass retries at most one batch from the fault queue, then drains the
//! ingest queue batch by batch while a full batch remains. Handler failures
//! and panics are contained here: the batch moves to the fault queue, and
//! fault queue overflow evicts the oldest entries through `on_dropped`.

use super::clearing::ClearCoordinator;
use super::FlushTrigger;
use crate::buffer::ItemQueue;
use crate::handler::BatchHandler;
use crate::metrics::BufferMetrics;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Result of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Items retried from the fault queue
    pub retried: usize,
    /// Items taken from the ingest queue
    pub ingested: usize,
    /// Batches the handler failed
    pub failed_batches: usize,
}

impl PassOutcome {
    /// Total items handed to the handler.
    pub fn dispatched(&self) -> usize {
        self.retried + self.ingested
    }
}

/// Owns both queues and the handler; runs flush passes.
pub struct Dispatcher<T> {
    ingest: ItemQueue<T>,
    fault: ItemQueue<T>,
    handler: Arc<dyn BatchHandler<T>>,
    metrics: BufferMetrics,
    batch_size: usize,
    max_fault_size: usize,
}

impl<T> Dispatcher<T> {
    /// Create a dispatcher with empty queues.
    pub fn new(
        handler: Arc<dyn BatchHandler<T>>,
        batch_size: usize,
        max_fault_size: usize,
    ) -> Self {
        Self {
            ingest: ItemQueue::new(),
            fault: ItemQueue::new(),
            handler,
            metrics: BufferMetrics::new(),
            batch_size,
            max_fault_size,
        }
    }

    /// Queue of newly submitted items.
    pub fn ingest(&self) -> &ItemQueue<T> {
        &self.ingest
    }

    /// Queue of items whose last dispatch failed.
    pub fn fault(&self) -> &ItemQueue<T> {
        &self.fault
    }

    /// Buffer counters.
    pub fn metrics(&self) -> &BufferMetrics {
        &self.metrics
    }

    /// Whether either queue holds items.
    pub fn has_pending(&self) -> bool {
        !self.ingest.is_empty() || !self.fault.is_empty()
    }

    /// Run flush passes for `trigger` through the coordinator gate.
    ///
    /// Returns `false` when the gate was not acquired (another pass is
    /// running or nothing is queued). After releasing the gate, another pass
    /// starts if a full batch accumulated meanwhile, since producers that saw
    /// the flag set left their items for this pass.
    pub fn run_pass(&self, coordinator: &ClearCoordinator, trigger: FlushTrigger) -> bool {
        let mut ran = false;

        loop {
            let Some(guard) = coordinator.try_start_clearing(|| self.has_pending()) else {
                break;
            };
            ran = true;
            self.metrics.record_pass();

            let start = Instant::now();
            let outcome = self.drain_once();
            drop(guard);

            debug!(
                trigger = %trigger,
                dispatched = outcome.dispatched(),
                retried = outcome.retried,
                ingested = outcome.ingested,
                failed_batches = outcome.failed_batches,
                duration_ms = %start.elapsed().as_millis(),
                "Flush pass completed"
            );

            if coordinator.is_disposing() || self.ingest.len() < self.batch_size {
                break;
            }
        }

        ran
    }

    /// Body of one pass. Caller must hold the clearing guard.
    fn drain_once(&self) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        if !self.fault.is_empty() {
            let batch = self.fault.dequeue_batch(self.batch_size);
            outcome.retried = batch.len();
            if !self.dispatch(batch) {
                outcome.failed_batches += 1;
            }
        }

        loop {
            let batch = self.ingest.dequeue_batch(self.batch_size);
            outcome.ingested += batch.len();
            if !self.dispatch(batch) {
                outcome.failed_batches += 1;
            }
            if self.ingest.len() < self.batch_size {
                break;
            }
        }

        outcome
    }

    /// Hand one batch to the handler. Returns `false` if it failed.
    ///
    /// Empty batches are skipped and count as success.
    pub fn dispatch(&self, batch: Vec<T>) -> bool {
        if batch.is_empty() {
            return true;
        }

        let items = batch.len();
        match panic::catch_unwind(AssertUnwindSafe(|| self.handler.on_cleared(&batch))) {
            Ok(Ok(())) => {
                self.metrics.record_cleared(items);
                debug!(items = items, "Batch cleared");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, items = items, "Handler failed batch, moving to fault queue");
                self.metrics.record_failed();
                self.enqueue_failures(batch);
                false
            }
            Err(payload) => {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    items = items,
                    "Handler panicked, moving batch to fault queue"
                );
                self.metrics.record_failed();
                self.enqueue_failures(batch);
                false
            }
        }
    }

    /// Move a failed batch into the fault queue, evicting the oldest entries
    /// on overflow. Evicted items are reported once, oldest first.
    ///
    /// Once the dispatcher is closed nothing will retry, so the whole batch
    /// is reported as dropped.
    pub fn enqueue_failures(&self, batch: Vec<T>) {
        let mut dropped = Vec::new();
        for item in batch {
            if let Some(evicted) = self.fault.push_bounded(item, self.max_fault_size) {
                dropped.push(evicted);
            }
        }

        if !dropped.is_empty() {
            self.notify_dropped(dropped);
        }
    }

    fn notify_dropped(&self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let count = items.len();
        warn!(
            dropped = count,
            max_fault_size = self.max_fault_size,
            "Dropping failed items"
        );
        self.metrics.record_dropped(count);
        if let Err(payload) =
            panic::catch_unwind(AssertUnwindSafe(|| self.handler.on_dropped(items)))
        {
            error!(panic = %panic_message(payload.as_ref()), "Dropped handler panicked");
        }
    }

    /// Take every remaining item (fault queue first, then ingest queue),
    /// report them through `on_disposed` and close the dispatcher.
    ///
    /// Returns the number of items reported.
    ///
    /// Both queues are sealed as they are drained: a later `add` is refused
    /// and a later failed batch goes to `on_dropped`.
    pub fn close_and_report(&self) -> usize {
        let mut remaining = self.fault.seal_and_drain();
        remaining.extend(self.ingest.seal_and_drain());

        let count = remaining.len();
        if let Err(payload) =
            panic::catch_unwind(AssertUnwindSafe(|| self.handler.on_disposed(remaining)))
        {
            error!(panic = %panic_message(payload.as_ref()), "Disposed handler panicked");
        }
        count
    }

    /// Whether residual items have been reported.
    pub fn is_closed(&self) -> bool {
        self.ingest.is_sealed()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
