//! Event store counters and their point-in-time snapshot.
//!
//! ```text
//! EventStore ─────► FlushMetrics ─────► StoreMetrics ─────► Views
//!                   (under buffer lock)  (snapshot copy)     (logs, CLI JSON)
//! ```
//!
//! Counters live next to the pending buffer and are mutated under the same
//! lock, so a snapshot always agrees with the buffer occupancy it reports.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::event::TIMESTAMP_FORMAT;

/// Cumulative counters, owned by the store's buffer state.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlushMetrics {
    pub dropped_events: u64,
    pub enqueued_events: u64,
    pub flushed_events: u64,
    pub flush_success_count: u64,
    pub flush_failure_count: u64,
    pub retry_attempts: u64,
    pub rejected_events: u64,
    pub last_flush_batch_size: usize,
    pub last_flush_at: Option<DateTime<Local>>,
    pub last_flush_error: Option<String>,
}

impl FlushMetrics {
    pub fn record_success(&mut self, batch_size: usize) {
        self.flushed_events += batch_size as u64;
        self.flush_success_count += 1;
        self.last_flush_batch_size = batch_size;
        self.last_flush_at = Some(Local::now());
        self.last_flush_error = None;
    }

    pub fn record_failure(&mut self, error: String) {
        self.flush_failure_count += 1;
        self.last_flush_error = Some(error);
    }
}

/// Consistent snapshot of event store state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    /// Backend description (database path for SQLite).
    pub backend: String,
    /// When the store was started.
    pub started_at: String,
    /// Events currently waiting to be persisted.
    pub buffer_size: usize,
    /// Capacity of the pending buffer.
    pub max_buffer_size: usize,
    /// Events lost to overflow. The only events ever skipped.
    pub dropped_events: u64,
    /// Events accepted by `enqueue`.
    pub enqueued_events: u64,
    /// Events durably persisted.
    pub flushed_events: u64,
    /// Batches persisted.
    pub flush_success_count: u64,
    /// Batches that were requeued after failing.
    pub flush_failure_count: u64,
    /// Failed insert attempts that were retried after a backoff.
    pub retry_attempts: u64,
    /// Events offered after `close` (never persisted).
    pub rejected_events: u64,
    /// Size of the most recent persisted batch.
    pub last_flush_batch_size: usize,
    /// Local time of the most recent successful flush.
    pub last_flush_timestamp: Option<String>,
    /// Error of the most recent failed flush, cleared by the next success.
    pub last_flush_error: Option<String>,
    /// Whether `close` has been called.
    pub is_closed: bool,
}

impl StoreMetrics {
    pub(crate) fn from_parts(
        metrics: &FlushMetrics,
        backend: &str,
        started_at: DateTime<Local>,
        buffer_size: usize,
        max_buffer_size: usize,
        is_closed: bool,
    ) -> Self {
        Self {
            backend: backend.to_string(),
            started_at: started_at.format(TIMESTAMP_FORMAT).to_string(),
            buffer_size,
            max_buffer_size,
            dropped_events: metrics.dropped_events,
            enqueued_events: metrics.enqueued_events,
            flushed_events: metrics.flushed_events,
            flush_success_count: metrics.flush_success_count,
            flush_failure_count: metrics.flush_failure_count,
            retry_attempts: metrics.retry_attempts,
            rejected_events: metrics.rejected_events,
            last_flush_batch_size: metrics.last_flush_batch_size,
            last_flush_timestamp: metrics
                .last_flush_at
                .map(|at| at.format(TIMESTAMP_FORMAT).to_string()),
            last_flush_error: metrics.last_flush_error.clone(),
            is_closed,
        }
    }

    /// Buffer occupancy as a fraction of capacity.
    pub fn buffer_utilization(&self) -> f64 {
        if self.max_buffer_size == 0 {
            return 0.0;
        }
        self.buffer_size as f64 / self.max_buffer_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_clears_last_error() {
        let mut metrics = FlushMetrics::default();
        metrics.record_failure("database is locked".to_string());
        metrics.record_success(4);

        assert_eq!(metrics.flush_failure_count, 1);
        assert_eq!(metrics.flush_success_count, 1);
        assert_eq!(metrics.flushed_events, 4);
        assert_eq!(metrics.last_flush_batch_size, 4);
        assert!(metrics.last_flush_at.is_some());
        assert!(metrics.last_flush_error.is_none());
    }

    #[test]
    fn test_snapshot_serializes_with_field_names() {
        let snapshot = StoreMetrics::from_parts(
            &FlushMetrics::default(),
            "memory",
            Local::now(),
            5,
            10,
            false,
        );
        assert_eq!(snapshot.buffer_utilization(), 0.5);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["buffer_size"], 5);
        assert_eq!(json["max_buffer_size"], 10);
        assert_eq!(json["last_flush_timestamp"], serde_json::Value::Null);
        assert_eq!(json["is_closed"], false);
    }
}
