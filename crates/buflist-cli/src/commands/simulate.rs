//! Simulate command implementation.
//!
//! Drives a buffer with synthetic producers and a handler that sleeps and
//! fails on a schedule, then prints what happened.

use anyhow::{Context, Result};
use buflist_core::{BatchHandler, BufferList, Config, HandlerError, HandlerResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Parameters for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateParams {
    pub producers: usize,
    pub items: u64,
    /// Fail every k-th batch; 0 never fails
    pub fail_every: u64,
    pub handler_delay: Duration,
    pub duration: Option<Duration>,
}

/// How a simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    DurationElapsed,
    Interrupted,
}

/// Handler standing in for a slow, flaky downstream sink.
struct SimulatedSink {
    delay: Duration,
    fail_every: u64,
    calls: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    disposed: AtomicU64,
}

impl SimulatedSink {
    fn new(delay: Duration, fail_every: u64) -> Self {
        Self {
            delay,
            fail_every,
            calls: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            disposed: AtomicU64::new(0),
        }
    }
}

impl BatchHandler<u64> for SimulatedSink {
    fn on_cleared(&self, batch: &[u64]) -> HandlerResult {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(HandlerError::new(format!("simulated failure on call {call}")));
        }
        self.delivered.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn on_dropped(&self, items: Vec<u64>) {
        self.dropped.fetch_add(items.len() as u64, Ordering::Relaxed);
    }

    fn on_disposed(&self, remaining: Vec<u64>) {
        self.disposed.fetch_add(remaining.len() as u64, Ordering::Relaxed);
    }
}

/// Run a simulation until the producers finish, the duration elapses or
/// Ctrl+C is received.
pub async fn run(config: Config, params: SimulateParams) -> Result<StopReason> {
    let sink = Arc::new(SimulatedSink::new(params.handler_delay, params.fail_every));
    let handler: Arc<dyn BatchHandler<u64>> = sink.clone();
    let buffer = Arc::new(
        BufferList::with_shared_handler(config.buffer.clone(), handler)
            .context("failed to create buffer")?,
    );

    info!(
        producers = params.producers,
        items = params.items,
        fail_every = params.fail_every,
        handler_delay_ms = %params.handler_delay.as_millis(),
        "Starting simulation"
    );

    let started = Instant::now();
    let stop = Arc::new(AtomicBool::new(false));
    let accepted = Arc::new(AtomicU64::new(0));

    let mut producers = {
        let buffer = Arc::clone(&buffer);
        let stop = Arc::clone(&stop);
        let accepted = Arc::clone(&accepted);
        tokio::task::spawn_blocking(move || {
            run_producers(buffer, stop, accepted, params.producers, params.items)
        })
    };

    let deadline = async {
        match params.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    let mut producers_done = false;
    let reason = tokio::select! {
        joined = &mut producers => {
            producers_done = true;
            joined.context("producer task failed")??;
            StopReason::Completed
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping producers");
            StopReason::Interrupted
        }
        _ = deadline => {
            info!("Simulation duration elapsed, stopping producers");
            StopReason::DurationElapsed
        }
    };

    stop.store(true, Ordering::Release);

    // Dispose releases producers blocked on a full buffer
    let summary = {
        let buffer = Arc::clone(&buffer);
        tokio::task::spawn_blocking(move || buffer.dispose())
            .await
            .context("dispose task failed")?
    };

    if !producers_done {
        producers.await.context("producer task failed")??;
    }

    let stats = buffer.stats();
    let elapsed = started.elapsed();

    println!("\n--- Simulation ({:?}) ---", reason);
    println!("Elapsed:            {:.2?}", elapsed);
    println!("Items accepted:     {}", accepted.load(Ordering::Relaxed));
    println!("Items delivered:    {}", sink.delivered.load(Ordering::Relaxed));
    println!("Items dropped:      {}", sink.dropped.load(Ordering::Relaxed));
    println!("Items undelivered:  {}", sink.disposed.load(Ordering::Relaxed));
    println!("Handler calls:      {}", sink.calls.load(Ordering::Relaxed));
    println!("Flush passes:       {}", stats.flush_passes);
    println!("Batches cleared:    {}", stats.batches_cleared);
    println!("Batches failed:     {}", stats.batches_failed);
    println!("Backpressure waits: {}", stats.backpressure_waits);
    if let Some(summary) = summary {
        println!(
            "Dispose:            {} in {:.2?}",
            if summary.drained { "drained" } else { "timed out" },
            summary.elapsed
        );
    }

    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        println!(
            "Throughput:         {:.0} items/s",
            sink.delivered.load(Ordering::Relaxed) as f64 / secs
        );
    }

    Ok(reason)
}

/// Spawn producer threads and wait for all of them.
fn run_producers(
    buffer: Arc<BufferList<u64>>,
    stop: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
    producers: usize,
    items: u64,
) -> Result<()> {
    let handles = (0..producers)
        .map(|producer| {
            let buffer = Arc::clone(&buffer);
            let stop = Arc::clone(&stop);
            let accepted = Arc::clone(&accepted);
            thread::Builder::new()
                .name(format!("producer-{producer}"))
                .spawn(move || {
                    let base = producer as u64 * items;
                    for i in 0..items {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        if let Err(e) = buffer.add(base + i) {
                            debug!(producer = producer, error = %e, "Producer stopped");
                            break;
                        }
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                })
        })
        .collect::<std::io::Result<Vec<_>>>()
        .context("failed to spawn producer thread")?;

    for handle in handles {
        if handle.join().is_err() {
            warn!("Producer thread panicked");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use buflist_core::BufferOptions;

    fn config(batch: usize) -> Config {
        Config {
            buffer: BufferOptions::new(batch)
                .with_max_size(batch * 4)
                .with_idle_clear_ttl(Duration::ZERO)
                .with_max_size_waiting_delay(Duration::from_millis(5))
                .with_dispose_timeout(Duration::from_secs(5)),
            ..Config::default()
        }
    }

    #[test]
    fn test_sink_fails_on_schedule() {
        let sink = SimulatedSink::new(Duration::ZERO, 3);
        assert!(sink.on_cleared(&[1]).is_ok());
        assert!(sink.on_cleared(&[2]).is_ok());
        assert!(sink.on_cleared(&[3]).is_err());
        assert_eq!(sink.delivered.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_simulation_completes() {
        let params = SimulateParams {
            producers: 3,
            items: 200,
            fail_every: 0,
            handler_delay: Duration::ZERO,
            duration: None,
        };
        let reason = run(config(10), params).await.unwrap();
        assert_eq!(reason, StopReason::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_simulation_stops_after_duration() {
        let params = SimulateParams {
            producers: 2,
            items: u64::MAX / 4,
            fail_every: 2,
            handler_delay: Duration::from_millis(1),
            duration: Some(Duration::from_millis(100)),
        };
        let reason = run(config(10), params).await.unwrap();
        assert_eq!(reason, StopReason::DurationElapsed);
    }
}
