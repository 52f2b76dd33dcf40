//! Downstream handler receiving flushed batches.

use crate::error::HandlerError;

/// Outcome of delivering one batch.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Receiver of buffer notifications.
///
/// `on_cleared` is called once per dispatched batch, on whichever thread runs
/// the flush pass (a producer, the idle timer or a caller of `clear`/`dispose`).
/// Returning an error, or panicking, fails the whole batch: every item moves
/// to the fault queue and is retried on a later pass.
pub trait BatchHandler<T>: Send + Sync {
    /// Deliver a non-empty batch.
    fn on_cleared(&self, batch: &[T]) -> HandlerResult;

    /// Items evicted from the fault queue on overflow, oldest first.
    fn on_dropped(&self, _items: Vec<T>) {}

    /// Items still buffered when dispose finished draining. Called once.
    fn on_disposed(&self, _remaining: Vec<T>) {}
}

impl<T, F> BatchHandler<T> for F
where
    F: Fn(&[T]) -> HandlerResult + Send + Sync,
{
    fn on_cleared(&self, batch: &[T]) -> HandlerResult {
        self(batch)
    }
}
