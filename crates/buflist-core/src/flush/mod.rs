//! Flush machinery: clearing gate, idle timer and dispatcher.
//!
//! Every flush, whatever triggered it, goes through
//! [`ClearCoordinator::try_start_clearing`], so concurrent triggers collapse
//! into a single pass.

mod clearing;
mod dispatcher;
mod timer;

pub use clearing::{ClearCoordinator, ClearingGuard};
pub use dispatcher::{Dispatcher, PassOutcome};
pub use timer::IdleTimer;

/// What caused a flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// An add pushed the ingest queue to the batch size
    Threshold,
    /// The idle timer expired
    Idle,
    /// A caller invoked `clear`
    Explicit,
    /// Draining during dispose
    Dispose,
}

impl FlushTrigger {
    /// Label used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Idle => "idle",
            FlushTrigger::Explicit => "explicit",
            FlushTrigger::Dispose => "dispose",
        }
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
