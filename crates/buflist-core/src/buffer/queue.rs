//! Thread-safe FIFO queues backing the buffer.
//!
//! The ingest queue and the fault queue share one implementation. Both are
//! pure data structures: capacity policy lives in the dispatcher, except for
//! [`ItemQueue::push_bounded`] which makes the evict-then-push step atomic.
//!
//! A queue can be sealed once: the remaining items are taken out and every
//! later push hands its item straight back to the caller.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

struct QueueState<T> {
    items: VecDeque<T>,
    sealed: bool,
}

/// Multi-producer FIFO queue with a lock-free length read.
pub struct ItemQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Mirrors `state.items.len()`, updated while the lock is held
    len: AtomicUsize,
}

impl<T> ItemQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                sealed: false,
            }),
            len: AtomicUsize::new(0),
        }
    }

    /// Append an item at the back.
    ///
    /// Returns the item as `Err` if the queue is sealed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(item);
        }
        state.items.push_back(item);
        self.len.store(state.items.len(), Ordering::Release);
        Ok(())
    }

    /// Append an item, evicting the oldest entry first when the queue already
    /// holds `capacity` items.
    ///
    /// Returns the item that did not stay queued: the evicted one, or `item`
    /// itself if the queue is sealed.
    pub fn push_bounded(&self, item: T, capacity: usize) -> Option<T> {
        let mut state = self.state.lock();
        if state.sealed {
            return Some(item);
        }
        let evicted = if state.items.len() >= capacity {
            state.items.pop_front()
        } else {
            None
        };
        state.items.push_back(item);
        self.len.store(state.items.len(), Ordering::Release);
        evicted
    }

    /// Remove up to `max` items from the front, in FIFO order.
    pub fn dequeue_batch(&self, max: usize) -> Vec<T> {
        let mut state = self.state.lock();
        let take = max.min(state.items.len());
        let batch: Vec<T> = state.items.drain(..take).collect();
        self.len.store(state.items.len(), Ordering::Release);
        batch
    }

    /// Refuse all further pushes and remove every item, in FIFO order.
    ///
    /// Both happen under one lock, so each item is either returned here or
    /// handed back by the push that tried to add it.
    pub fn seal_and_drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.sealed = true;
        let all: Vec<T> = state.items.drain(..).collect();
        self.len.store(0, Ordering::Release);
        all
    }

    /// Whether [`seal_and_drain`](Self::seal_and_drain) has run.
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Current length. May be stale by the time the caller acts on it.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> ItemQueue<T> {
    /// Point-in-time copy of the queue contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.state.lock().items.iter().cloned().collect()
    }
}

impl<T> Default for ItemQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
