//! Buffer counters.
//!
//! Lock-free atomics updated on the hot path; read as a [`BufferStats`]
//! snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one buffer instance.
#[derive(Debug, Default)]
pub struct BufferMetrics {
    /// Items accepted by `add`
    items_added: AtomicU64,

    /// Batches the handler accepted
    batches_cleared: AtomicU64,

    /// Items in accepted batches
    items_cleared: AtomicU64,

    /// Batches the handler rejected or panicked on
    batches_failed: AtomicU64,

    /// Items evicted from the fault queue
    items_dropped: AtomicU64,

    /// Flush passes that acquired the clearing flag
    flush_passes: AtomicU64,

    /// Adds that had to wait on a full ingest queue
    backpressure_waits: AtomicU64,
}

impl BufferMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted item.
    pub fn record_add(&self) {
        self.items_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch delivered successfully.
    pub fn record_cleared(&self, items: usize) {
        self.batches_cleared.fetch_add(1, Ordering::Relaxed);
        self.items_cleared.fetch_add(items as u64, Ordering::Relaxed);
    }

    /// Record a failed batch.
    pub fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record items dropped on fault queue overflow.
    pub fn record_dropped(&self, items: usize) {
        self.items_dropped.fetch_add(items as u64, Ordering::Relaxed);
    }

    /// Record a flush pass.
    pub fn record_pass(&self) {
        self.flush_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a producer blocking on backpressure.
    pub fn record_backpressure(&self) {
        self.backpressure_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot counters together with the current queue lengths.
    pub fn snapshot(&self, ingest_len: usize, fault_len: usize) -> BufferStats {
        BufferStats {
            ingest_len,
            fault_len,
            items_added: self.items_added.load(Ordering::Relaxed),
            batches_cleared: self.batches_cleared.load(Ordering::Relaxed),
            items_cleared: self.items_cleared.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            flush_passes: self.flush_passes.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
        }
    }
}

/// Buffer statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Items waiting in the ingest queue
    pub ingest_len: usize,
    /// Items waiting in the fault queue
    pub fault_len: usize,
    /// Total items accepted
    pub items_added: u64,
    /// Total batches delivered
    pub batches_cleared: u64,
    /// Total items delivered
    pub items_cleared: u64,
    /// Total batches failed
    pub batches_failed: u64,
    /// Total items dropped on fault overflow
    pub items_dropped: u64,
    /// Total flush passes
    pub flush_passes: u64,
    /// Total adds that blocked on backpressure
    pub backpressure_waits: u64,
}

impl BufferStats {
    /// Items currently buffered in either queue.
    pub fn buffered(&self) -> usize {
        self.ingest_len + self.fault_len
    }
}
