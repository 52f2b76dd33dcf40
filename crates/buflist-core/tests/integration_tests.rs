//! Integration tests for buflist-core.
//!
//! Exercise the public `BufferList` API end to end with real threads and
//! the idle timer.

use buflist_core::{BatchHandler, BufferList, BufferOptions, HandlerError, HandlerResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Handler recording every notification, optionally failing or blocking.
#[derive(Default)]
struct RecordingSink {
    cleared: Mutex<Vec<Vec<u64>>>,
    dropped: Mutex<Vec<Vec<u64>>>,
    disposed: Mutex<Vec<Vec<u64>>>,
    fail: AtomicBool,
    /// When set, the first `on_cleared` call waits for `release`
    block_first: AtomicBool,
    entered: AtomicBool,
    release: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay_ms: AtomicUsize,
}

impl RecordingSink {
    fn failing() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    fn blocking() -> Arc<Self> {
        let sink = Self::default();
        sink.block_first.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    fn cleared_items(&self) -> Vec<u64> {
        self.cleared.lock().iter().flatten().copied().collect()
    }

    fn cleared_count(&self) -> usize {
        self.cleared.lock().iter().map(Vec::len).sum()
    }

    /// Every item seen through any notification, sorted.
    fn observed_items(&self) -> Vec<u64> {
        let mut items: Vec<u64> = self.cleared_items();
        items.extend(self.dropped.lock().iter().flatten().copied());
        items.extend(self.disposed.lock().iter().flatten().copied());
        items.sort_unstable();
        items
    }

    fn dropped_count(&self) -> usize {
        self.dropped.lock().iter().map(Vec::len).sum()
    }

    fn wait_until_entered(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "handler never entered");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl BatchHandler<u64> for RecordingSink {
    fn on_cleared(&self, batch: &[u64]) -> HandlerResult {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if self.block_first.swap(false, Ordering::SeqCst) {
            self.entered.store(true, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
        }

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(HandlerError::new("sink unavailable"));
        }
        self.cleared.lock().push(batch.to_vec());
        Ok(())
    }

    fn on_dropped(&self, items: Vec<u64>) {
        self.dropped.lock().push(items);
    }

    fn on_disposed(&self, remaining: Vec<u64>) {
        self.disposed.lock().push(remaining);
    }
}

fn options(batch: usize) -> BufferOptions {
    BufferOptions::new(batch)
        .with_max_size(batch * 10)
        .with_max_fault_size(batch * 10)
        .with_idle_clear_ttl(Duration::ZERO)
        .with_max_size_waiting_delay(Duration::from_millis(5))
        .with_dispose_timeout(Duration::from_secs(5))
}

fn buffer_with(options: BufferOptions, sink: &Arc<RecordingSink>) -> BufferList<u64> {
    let handler: Arc<dyn BatchHandler<u64>> = sink.clone();
    BufferList::with_shared_handler(options, handler).expect("valid options")
}

mod flush_integration {
    use super::*;

    /// Sequential submission of 201 items with batch size 100.
    #[test]
    fn test_threshold_batches_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(options(100).with_max_size(200), &sink);

        for i in 0..=200 {
            buffer.add(i).unwrap();
        }

        let cleared = sink.cleared.lock().clone();
        assert_eq!(cleared.len(), 2);
        assert_eq!(cleared[0], (0..100).collect::<Vec<_>>());
        assert_eq!(cleared[1], (100..200).collect::<Vec<_>>());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.snapshot(), vec![200]);
    }

    #[test]
    fn test_no_loss_on_success_sequential() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(options(10), &sink);

        for i in 0..1000 {
            buffer.add(i).unwrap();
        }

        assert_eq!(sink.cleared_count(), 1000);
        assert!(sink.cleared.lock().iter().all(|b| b.len() == 10));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_no_loss_on_success_concurrent() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = Arc::new(buffer_with(options(10), &sink));

        let producers: Vec<_> = (0..8u64)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..500 {
                        buffer.add(p * 1_000 + i).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        // Anything below one batch waits for an explicit trigger
        assert!(buffer.len() < 10);
        buffer.clear();

        let mut items = sink.cleared_items();
        items.sort_unstable();
        let mut expected: Vec<u64> = (0..8u64)
            .flat_map(|p| (0..500).map(move |i| p * 1_000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(items, expected);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_per_producer_order_preserved() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = Arc::new(buffer_with(options(7), &sink));

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..200 {
                        buffer.add(p * 1_000 + i).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        buffer.clear();

        let items = sink.cleared_items();
        for p in 0..4u64 {
            let seq: Vec<u64> = items.iter().copied().filter(|v| v / 1_000 == p).collect();
            assert_eq!(seq, (0..200).map(|i| p * 1_000 + i).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_flush_passes_are_exclusive() {
        let sink = Arc::new(RecordingSink::default());
        sink.delay_ms.store(1, Ordering::SeqCst);
        let buffer = Arc::new(buffer_with(
            options(5).with_idle_clear_ttl(Duration::from_millis(2)),
            &sink,
        ));

        let mut workers: Vec<_> = (0..6u64)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..100 {
                        buffer.add(p * 1_000 + i).unwrap();
                        if i % 13 == 0 {
                            thread::sleep(Duration::from_millis(3));
                        }
                    }
                })
            })
            .collect();

        let clearer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for _ in 0..50 {
                    buffer.clear();
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        workers.push(clearer);

        for worker in workers {
            worker.join().unwrap();
        }
        buffer.dispose();

        assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(sink.cleared_count(), 600);
    }
}

mod idle_integration {
    use super::*;

    #[test]
    fn test_idle_flush_delivers_partial_batch_once() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(
            options(10).with_idle_clear_ttl(Duration::from_millis(50)),
            &sink,
        );

        for i in 0..3 {
            buffer.add(i).unwrap();
        }
        assert!(sink.cleared.lock().is_empty());

        thread::sleep(Duration::from_millis(400));
        assert_eq!(*sink.cleared.lock(), vec![vec![0, 1, 2]]);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(sink.cleared.lock().len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_idle_flush_retries_fault_queue() {
        let sink = RecordingSink::failing();
        let buffer = buffer_with(
            options(5).with_idle_clear_ttl(Duration::from_millis(30)),
            &sink,
        );

        for i in 0..5 {
            buffer.add(i).unwrap();
        }
        assert_eq!(buffer.failed(), vec![0, 1, 2, 3, 4]);

        // Handler recovers; the rearmed idle timer retries the fault queue
        sink.fail.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(400));

        assert_eq!(sink.cleared_items(), vec![0, 1, 2, 3, 4]);
        assert!(buffer.failed().is_empty());
    }
}

mod fault_integration {
    use super::*;

    #[test]
    fn test_bounded_fault_growth_with_drops() {
        let sink = RecordingSink::failing();
        let buffer = buffer_with(
            options(5)
                .with_max_fault_size(10)
                .with_dispose_timeout(Duration::ZERO),
            &sink,
        );

        for i in 0..40 {
            buffer.add(i).unwrap();
        }

        assert_eq!(buffer.failed().len(), 10);
        assert_eq!(sink.dropped_count(), 30);
        assert_eq!(buffer.stats().items_dropped, 30);
        assert!(sink.cleared.lock().is_empty());
    }

    #[test]
    fn test_bounded_fault_growth_without_drops() {
        let sink = RecordingSink::failing();
        let buffer = buffer_with(
            options(5)
                .with_max_fault_size(10)
                .with_dispose_timeout(Duration::ZERO),
            &sink,
        );

        for i in 0..8 {
            buffer.add(i).unwrap();
        }
        buffer.clear();

        assert_eq!(buffer.failed().len(), 8);
        assert_eq!(sink.dropped_count(), 0);
    }

    #[test]
    fn test_dropped_items_are_oldest_first() {
        let sink = RecordingSink::failing();
        let buffer = buffer_with(
            options(2)
                .with_max_fault_size(2)
                .with_dispose_timeout(Duration::ZERO),
            &sink,
        );

        buffer.add(1).unwrap();
        buffer.add(2).unwrap();
        assert_eq!(buffer.failed(), vec![1, 2]);

        // Pass retries [1, 2] (fails, re-queued), then [3, 4] fails and evicts
        buffer.add(3).unwrap();
        buffer.add(4).unwrap();

        assert_eq!(*sink.dropped.lock(), vec![vec![1, 2]]);
        assert_eq!(buffer.failed(), vec![3, 4]);
    }

    #[test]
    fn test_failure_never_reaches_producer() {
        let sink = RecordingSink::failing();
        let buffer = buffer_with(options(3).with_dispose_timeout(Duration::ZERO), &sink);

        for i in 0..30 {
            assert!(buffer.add(i).is_ok());
        }

        // First pass fails its ingest batch; every later pass also fails a retry
        let stats = buffer.stats();
        assert_eq!(stats.flush_passes, 10);
        assert_eq!(stats.batches_failed, 19);
        assert_eq!(stats.fault_len, 30);
    }
}

mod backpressure_integration {
    use super::*;

    #[test]
    fn test_add_blocks_until_pass_drains() {
        let sink = RecordingSink::blocking();
        let buffer = Arc::new(buffer_with(options(5).with_max_size(10), &sink));

        // The fifth add runs the pass on this producer and blocks in the handler
        let first = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..5 {
                    buffer.add(i).unwrap();
                }
            })
        };
        sink.wait_until_entered();

        // Fill the ingest queue to max_size while the pass is stuck
        for i in 5..15 {
            buffer.add(i).unwrap();
        }
        assert_eq!(buffer.snapshot().len(), 10);

        let accepted = Arc::new(AtomicBool::new(false));
        let eleventh = {
            let buffer = Arc::clone(&buffer);
            let accepted = Arc::clone(&accepted);
            thread::spawn(move || {
                buffer.add(15).unwrap();
                accepted.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!accepted.load(Ordering::SeqCst));
        assert!(buffer.stats().backpressure_waits >= 1);

        sink.release.store(true, Ordering::SeqCst);
        eleventh.join().unwrap();
        first.join().unwrap();
        assert!(accepted.load(Ordering::SeqCst));

        buffer.dispose();
        assert_eq!(sink.cleared_count(), 16);
    }

    #[test]
    fn test_dispose_releases_blocked_producer() {
        let sink = RecordingSink::blocking();
        let buffer = Arc::new(buffer_with(
            options(5)
                .with_max_size(5)
                .with_dispose_timeout(Duration::from_millis(200)),
            &sink,
        ));

        let first = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..5 {
                    buffer.add(i).unwrap();
                }
            })
        };
        sink.wait_until_entered();

        for i in 5..10 {
            buffer.add(i).unwrap();
        }

        let blocked = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.add(10))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished());

        let summary = buffer.dispose().unwrap();
        assert!(!summary.drained);
        assert!(summary.elapsed < Duration::from_secs(2));
        let accepted = if blocked.join().unwrap().is_ok() { 11 } else { 10 };

        sink.release.store(true, Ordering::SeqCst);
        first.join().unwrap();

        let disposed: usize = sink.disposed.lock().iter().map(Vec::len).sum();
        assert_eq!(summary.remaining, disposed);
        assert_eq!(sink.cleared_count() + disposed, accepted);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_released_producer_never_strands_item() {
        for _ in 0..20 {
            let sink = RecordingSink::blocking();
            let buffer = Arc::new(buffer_with(
                options(2)
                    .with_max_size(2)
                    .with_dispose_timeout(Duration::ZERO),
                &sink,
            ));

            let first = {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    buffer.add(0).unwrap();
                    buffer.add(1).unwrap();
                })
            };
            sink.wait_until_entered();
            buffer.add(2).unwrap();
            buffer.add(3).unwrap();

            let blocked = {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || buffer.add(4))
            };
            thread::sleep(Duration::from_millis(10));

            buffer.dispose().unwrap();
            let accepted = blocked.join().unwrap();
            sink.release.store(true, Ordering::SeqCst);
            first.join().unwrap();

            let mut expected: Vec<u64> = vec![0, 1, 2, 3];
            match accepted {
                Ok(()) => expected.push(4),
                Err(e) => assert!(e.is_disposed()),
            }
            assert_eq!(sink.observed_items(), expected);
            assert!(buffer.snapshot().is_empty());
        }
    }
}

mod dispose_integration {
    use super::*;

    #[test]
    fn test_dispose_drains_everything() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(options(100), &sink);

        for i in 0..250 {
            buffer.add(i).unwrap();
        }
        assert_eq!(buffer.len(), 50);

        let summary = buffer.dispose().unwrap();
        assert!(summary.drained);
        assert_eq!(summary.remaining, 0);
        assert_eq!(sink.cleared_items(), (0..250).collect::<Vec<_>>());
        assert_eq!(*sink.disposed.lock(), vec![Vec::<u64>::new()]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(options(10), &sink);
        buffer.add(1).unwrap();

        assert!(buffer.dispose().is_some());
        assert!(buffer.dispose().is_none());
        drop(buffer);

        assert_eq!(sink.disposed.lock().len(), 1);
        assert_eq!(sink.cleared_items(), vec![1]);
    }

    #[test]
    fn test_dispose_timeout_reports_undelivered() {
        let sink = RecordingSink::failing();
        let buffer = buffer_with(
            options(3).with_dispose_timeout(Duration::from_millis(100)),
            &sink,
        );

        for i in 0..4 {
            buffer.add(i).unwrap();
        }
        assert_eq!(buffer.failed(), vec![0, 1, 2]);

        let start = Instant::now();
        let summary = buffer.dispose().unwrap();
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(!summary.drained);
        assert_eq!(summary.remaining, 4);

        let disposed = sink.disposed.lock().clone();
        assert_eq!(disposed.len(), 1);
        let mut reported = disposed[0].clone();
        reported.sort_unstable();
        assert_eq!(reported, vec![0, 1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_timeout_reports_without_dispatch() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(options(10).with_dispose_timeout(Duration::ZERO), &sink);
        buffer.add(1).unwrap();
        buffer.add(2).unwrap();

        let summary = buffer.dispose().unwrap();
        assert!(!summary.drained);
        assert_eq!(*sink.disposed.lock(), vec![vec![1, 2]]);
        assert!(sink.cleared.lock().is_empty());
    }

    #[test]
    fn test_add_after_dispose_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(options(10), &sink);
        buffer.dispose();

        let err = buffer.add(1).unwrap_err();
        assert!(err.is_disposed());
        assert_eq!(buffer.stats().items_added, 0);
    }

    #[test]
    fn test_adds_racing_dispose_are_all_observed() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let buffer = Arc::new(buffer_with(
            options(4)
                .with_max_size(8)
                .with_idle_clear_ttl(Duration::from_millis(1))
                .with_dispose_timeout(Duration::from_millis(20)),
            &sink,
        ));

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    let mut accepted = Vec::new();
                    for i in 0..100_000 {
                        let item = p * 1_000_000 + i;
                        if buffer.add(item).is_err() {
                            break;
                        }
                        accepted.push(item);
                    }
                    accepted
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        sink.fail.store(false, Ordering::SeqCst);
        buffer.dispose().unwrap();

        let mut accepted: Vec<u64> = producers
            .into_iter()
            .flat_map(|producer| producer.join().unwrap())
            .collect();
        accepted.sort_unstable();

        // A pass left running on the timer thread may still be delivering
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.observed_items().len() < accepted.len() {
            assert!(Instant::now() < deadline, "accepted items went missing");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sink.observed_items(), accepted);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_deadline_holds_while_idle_pass_hangs() {
        let sink = RecordingSink::blocking();
        let buffer = buffer_with(
            options(10)
                .with_idle_clear_ttl(Duration::from_millis(10))
                .with_dispose_timeout(Duration::from_millis(100)),
            &sink,
        );

        // The idle pass picks up item 1 on the timer thread and hangs
        buffer.add(1).unwrap();
        sink.wait_until_entered();
        buffer.add(2).unwrap();

        let start = Instant::now();
        let summary = buffer.dispose().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(summary.elapsed < Duration::from_secs(1));
        assert!(!summary.drained);
        assert_eq!(summary.remaining, 1);
        assert_eq!(*sink.disposed.lock(), vec![vec![2]]);

        sink.release.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.cleared_items() != vec![1] {
            assert!(Instant::now() < deadline, "idle pass never finished");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
