//! In-memory backend that captures persisted events.
//!
//! Handles are cheap clones sharing the same rows, so a caller can keep one
//! handle for inspection after boxing another into an
//! [`EventStore`](super::EventStore). Failures can be scripted to exercise
//! the store's retry and requeue paths.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::backend::{BackendError, CountsBackend};
use crate::event::CrossingEvent;

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<CrossingEvent>,
    scripted_failures: VecDeque<BackendError>,
    attempt_times: Vec<Instant>,
    closed: bool,
}

/// Capturing backend keeping rows in a vector.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next insert attempt fail with `error`.
    ///
    /// Calls queue up: each scripted failure is consumed by one attempt.
    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().scripted_failures.push_back(error);
    }

    /// Make the next `count` insert attempts fail with `error`.
    pub fn fail_times(&self, count: usize, error: BackendError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.scripted_failures.push_back(error.clone());
        }
    }

    /// Snapshot of persisted events in insertion order.
    pub fn rows(&self) -> Vec<CrossingEvent> {
        self.state.lock().rows.clone()
    }

    /// Number of persisted events.
    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Whether nothing has been persisted.
    pub fn is_empty(&self) -> bool {
        self.state.lock().rows.is_empty()
    }

    /// Total insert attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempt_times.len()
    }

    /// When each insert attempt started.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().attempt_times.clone()
    }

    /// Whether the store released this backend.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl CountsBackend for MemoryBackend {
    fn insert_batch(&mut self, batch: &[CrossingEvent]) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BackendError::Closed);
        }
        state.attempt_times.push(Instant::now());
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        state.rows.extend_from_slice(batch);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Direction;

    #[test]
    fn test_clones_share_rows() {
        let backend = MemoryBackend::new();
        let mut boxed: Box<dyn CountsBackend> = Box::new(backend.clone());

        boxed
            .insert_batch(&[CrossingEvent::now(Direction::In, 1)])
            .unwrap();

        assert_eq!(backend.len(), 1);
        assert_eq!(backend.attempts(), 1);
    }

    #[test]
    fn test_scripted_failures_are_consumed_in_order() {
        let mut backend = MemoryBackend::new();
        backend.fail_next(BackendError::Transient("busy".into()));
        backend.fail_next(BackendError::Fatal("broken".into()));
        let batch = [CrossingEvent::now(Direction::Out, 2)];

        assert!(backend.insert_batch(&batch).unwrap_err().is_transient());
        assert!(!backend.insert_batch(&batch).unwrap_err().is_transient());
        assert!(backend.insert_batch(&batch).is_ok());
        assert_eq!(backend.rows().len(), 1);
        assert_eq!(backend.attempts(), 3);
    }

    #[test]
    fn test_closed_backend_rejects_inserts() {
        let mut backend = MemoryBackend::new();
        backend.close().unwrap();
        let err = backend
            .insert_batch(&[CrossingEvent::now(Direction::In, 1)])
            .unwrap_err();
        assert_eq!(err, BackendError::Closed);
        assert!(backend.is_closed());
    }
}
