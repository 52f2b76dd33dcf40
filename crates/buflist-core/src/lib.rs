//! buflist core - concurrent batching buffer
//!
//! Producers submit items from any number of threads; the buffer releases
//! them to a handler in batches with:
//!
//! - Size-triggered flushes once a full batch is queued
//! - Idle flushes after a period without submissions
//! - At most one flush pass running at any time
//! - A bounded fault queue retrying failed batches, dropping the oldest on overflow
//! - Backpressure on producers when the ingest queue is full
//! - A deadline-bounded drain on dispose
//!
//! ```no_run
//! use buflist_core::{BufferList, BufferOptions, HandlerResult};
//!
//! let buffer = BufferList::new(BufferOptions::new(100), |batch: &[String]| -> HandlerResult {
//!     println!("writing {} rows", batch.len());
//!     Ok(())
//! })?;
//!
//! buffer.add("row".to_string())?;
//! buffer.dispose();
//! # Ok::<(), buflist_core::Error>(())
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod flush;
pub mod handler;
pub mod metrics;

// Re-export commonly used types
pub use buffer::{BufferList, DisposeSummary};
pub use config::{BufferOptions, Config};
pub use error::{BufferError, Error, HandlerError, Result};
pub use flush::FlushTrigger;
pub use handler::{BatchHandler, HandlerResult};
pub use metrics::{BufferMetrics, BufferStats};
