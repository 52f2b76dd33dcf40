//! Buffer facade and the queues behind it.
//!
//! [`BufferList`] is the public entry point. [`ItemQueue`] backs both the
//! ingest queue and the fault queue.

mod buffer_list;
mod queue;

pub use buffer_list::{BufferList, DisposeSummary};
pub use queue::ItemQueue;
