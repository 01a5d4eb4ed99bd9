//! Persistence backend interface for the event store.
//!
//! A backend is an append-only table accepting atomic batch inserts. The
//! [`EventStore`](super::EventStore) is its only caller and serializes access
//! behind its own lock, so implementations take `&mut self` and need not be
//! `Sync`.
//!
//! # Error Classification
//!
//! - [`BackendError::Transient`] - contention (busy/locked); the batch is
//!   retried with backoff
//! - [`BackendError::Fatal`] - anything else; the batch is requeued after a
//!   single attempt

use thiserror::Error;

use crate::event::CrossingEvent;

/// Errors returned by persistence backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Temporary contention; retrying the same batch may succeed.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Non-retryable failure for this attempt.
    #[error("backend error: {0}")]
    Fatal(String),

    /// The backend was already released by `close`.
    #[error("backend is closed")]
    Closed,
}

impl BackendError {
    /// Whether the failed operation should be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Durable sink for batches of crossing events.
pub trait CountsBackend: Send + 'static {
    /// Persist `batch` atomically and in order: either every event is stored
    /// or none is.
    fn insert_batch(&mut self, batch: &[CrossingEvent]) -> Result<(), BackendError>;

    /// Release the underlying connection. Called once by the store on close.
    fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Short human-readable description (e.g. the database path) for logs and metrics.
    fn describe(&self) -> String;
}
