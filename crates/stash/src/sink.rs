use crate::Error;

use tracing::error;

/// Destination for per-value failures that backends absorb instead of
/// returning (decode and encode failures, store IO errors).
pub trait ErrorSink: Send + Sync {
    /// Reports a failure.
    fn report(&self, error: &Error);
}

/// Logs every reported error through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: &Error) {
        error!(%error, "storage error");
    }
}

/// Discards every reported error.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ErrorSink for NullSink {
    fn report(&self, _error: &Error) {}
}

impl<F> ErrorSink for F
where
    F: Fn(&Error) + Send + Sync,
{
    fn report(&self, error: &Error) {
        self(error);
    }
}
