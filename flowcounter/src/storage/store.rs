//! Bounded, batching event store with background flushing.
//!
//! # Architecture
//!
//! ```text
//!  enqueue ──► ┌──────────────────────┐  dequeue   ┌──────────────┐
//! (producer)   │ PendingBuffer (FIFO) │ ─────────► │ insert_batch │ ──► backend
//!              │ + FlushMetrics       │ ◄───────── │ retry/backoff│
//!              └──────────────────────┘  requeue   └──────────────┘
//!                  buffer lock                        backend lock
//! ```
//!
//! # Locking
//!
//! - The buffer lock guards the pending queue, counters and the closed flag.
//!   `enqueue` only ever takes this lock and never performs I/O.
//! - The backend lock guards the connection. It is taken only for the insert
//!   itself, never while the buffer lock is held, so a slow insert does not
//!   stall producers.
//! - A flush gate serializes whole flushes (dequeue, persist, requeue) so a
//!   requeued batch always lands back in front of anything dequeued later.
//! - A close gate serializes `close` calls; a second close waits for the first.
//!
//! # Ordering
//!
//! Events are persisted in enqueue order. The only exception is the overflow
//! policy: when the buffer is full the oldest pending event is dropped and
//! counted in `dropped_events`. When a failed batch is requeued into a buffer
//! that filled up meanwhile, the newest queued events make room instead, so
//! what survives is still in order.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backend::{BackendError, CountsBackend};
use super::metrics::{FlushMetrics, StoreMetrics};
use super::worker;
use crate::config::EventStoreConfig;
use crate::event::{CrossingEvent, EventSink};

/// How long `close` waits for the background task before draining anyway.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Drop warnings are logged once per this many dropped events.
const DROP_WARN_EVERY: u64 = 100;

/// Minimum pause between drain attempts against a failing backend.
const DRAIN_RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Linear backoff before retry `attempt`, saturating at `Duration::MAX`.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}

/// Errors starting the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `start` was called outside a Tokio runtime.
    #[error("event store must be started inside a Tokio runtime: {0}")]
    NoRuntime(String),
}

/// Result of a single flush call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was due (empty buffer, or below batch size within the interval).
    Idle,
    /// A batch of this many events was persisted.
    Persisted(usize),
    /// The batch failed and went back to the front of the buffer.
    Requeued { batch_size: usize, error: String },
}

struct BufferState {
    pending: VecDeque<CrossingEvent>,
    metrics: FlushMetrics,
    last_flush: Instant,
    closed: bool,
}

/// State shared between the store handle, the background task and blocking flushes.
pub(crate) struct StoreShared {
    config: EventStoreConfig,
    capacity: usize,
    batch_size: usize,
    buffer: Mutex<BufferState>,
    backend: Mutex<Option<Box<dyn CountsBackend>>>,
    flush_gate: Mutex<()>,
    flush_requested: Notify,
    backend_name: String,
    started_at: DateTime<Local>,
}

impl StoreShared {
    pub(crate) fn new(config: EventStoreConfig, backend: Box<dyn CountsBackend>) -> Self {
        let backend_name = backend.describe();
        Self {
            capacity: config.max_buffer_size.max(1),
            batch_size: config.batch_size.max(1),
            buffer: Mutex::new(BufferState {
                pending: VecDeque::new(),
                metrics: FlushMetrics::default(),
                last_flush: Instant::now(),
                closed: false,
            }),
            backend: Mutex::new(Some(backend)),
            flush_gate: Mutex::new(()),
            flush_requested: Notify::new(),
            backend_name,
            started_at: Local::now(),
            config,
        }
    }

    pub(crate) fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Resolves when a producer filled a batch.
    pub(crate) async fn flush_requested(&self) {
        self.flush_requested.notified().await
    }

    /// Append an event, dropping the oldest on overflow.
    ///
    /// Returns `true` when a full batch is waiting.
    pub(crate) fn enqueue(&self, event: CrossingEvent) -> bool {
        let should_flush = {
            let mut state = self.buffer.lock();
            if state.closed {
                state.metrics.rejected_events += 1;
                warn!(
                    object_id = event.object_id,
                    direction = %event.direction,
                    "Event offered after close, not persisted"
                );
                return false;
            }

            if state.pending.len() >= self.capacity {
                state.pending.pop_front();
                state.metrics.dropped_events += 1;
                let dropped = state.metrics.dropped_events;
                if dropped % DROP_WARN_EVERY == 0 {
                    warn!(dropped, capacity = self.capacity, "Events dropped on full buffer");
                }
            }
            state.pending.push_back(event);
            state.metrics.enqueued_events += 1;
            state.pending.len() >= self.batch_size
        };

        if should_flush {
            self.flush_requested.notify_one();
        }
        should_flush
    }

    /// Persist one batch if due (always, when `force`).
    pub(crate) fn flush(&self, force: bool) -> FlushOutcome {
        let _gate = self.flush_gate.lock();

        let batch = self.dequeue_batch(force);
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        match self.persist_with_retry(&batch) {
            Ok(()) => {
                let mut state = self.buffer.lock();
                state.last_flush = Instant::now();
                state.metrics.record_success(batch.len());
                debug!(batch_size = batch.len(), "Persisted crossing events");
                FlushOutcome::Persisted(batch.len())
            }
            Err(e) => {
                let batch_size = batch.len();
                let message = e.to_string();
                error!(batch_size, error = %e, "Flush failed, batch requeued");
                self.requeue_front(batch, message.clone());
                FlushOutcome::Requeued {
                    batch_size,
                    error: message,
                }
            }
        }
    }

    /// Flush full batches until fewer than `batch_size` remain or a flush fails.
    pub(crate) fn flush_ready(&self) {
        while let FlushOutcome::Persisted(_) = self.flush(false) {}
    }

    fn dequeue_batch(&self, force: bool) -> Vec<CrossingEvent> {
        let mut state = self.buffer.lock();
        let len = state.pending.len();
        if len == 0 {
            return Vec::new();
        }

        let due = len >= self.batch_size || state.last_flush.elapsed() >= self.config.flush_interval;
        if !force && !due {
            return Vec::new();
        }

        let take = if force { len } else { len.min(self.batch_size) };
        state.pending.drain(..take).collect()
    }

    fn persist_with_retry(&self, batch: &[CrossingEvent]) -> Result<(), BackendError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt: u32 = 1;

        loop {
            let result = {
                let mut backend = self.backend.lock();
                match backend.as_mut() {
                    Some(backend) => backend.insert_batch(batch),
                    None => Err(BackendError::Closed),
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = retry_delay(self.config.retry_backoff, attempt);
                    self.buffer.lock().metrics.retry_attempts += 1;
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Flush attempt failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Put an unpersisted batch back at the front, in order.
    fn requeue_front(&self, batch: Vec<CrossingEvent>, error: String) {
        let mut state = self.buffer.lock();
        for event in batch.into_iter().rev() {
            if state.pending.len() >= self.capacity {
                state.pending.pop_back();
                state.metrics.dropped_events += 1;
            }
            state.pending.push_front(event);
        }
        state.metrics.record_failure(error);
    }

    /// Mark the store closed. Returns `false` if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.buffer.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        true
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.buffer.lock().pending.len()
    }

    /// Whether events are still pending or the backend is still held.
    fn has_unreleased_work(&self) -> bool {
        self.pending_len() > 0 || self.backend.lock().is_some()
    }

    /// Flush until the buffer is empty, then release the backend.
    ///
    /// Keeps retrying for as long as the backend keeps failing.
    pub(crate) fn drain_and_release(&self) {
        let pause = self.config.retry_backoff.max(DRAIN_RETRY_PAUSE);
        while self.pending_len() > 0 {
            if let FlushOutcome::Requeued { .. } = self.flush(true) {
                std::thread::sleep(pause);
            }
        }

        let backend = self.backend.lock().take();
        if let Some(mut backend) = backend {
            if let Err(e) = backend.close() {
                warn!(error = %e, "Failed to close backend cleanly");
            }
        }
    }

    pub(crate) fn metrics(&self) -> StoreMetrics {
        let state = self.buffer.lock();
        StoreMetrics::from_parts(
            &state.metrics,
            &self.backend_name,
            self.started_at,
            state.pending.len(),
            self.capacity,
            state.closed,
        )
    }
}

/// Shutdown state shared by the store handle and blocking close calls.
struct Lifecycle {
    shared: Arc<StoreShared>,
    shutdown: CancellationToken,
    /// Disconnects when the background task finishes or is dropped.
    worker_exit: Mutex<Option<Receiver<()>>>,
    close_gate: Mutex<()>,
}

impl Lifecycle {
    fn close_blocking(&self) {
        let _closing = self.close_gate.lock();

        let first = self.shared.mark_closed();
        if !first && !self.shared.has_unreleased_work() {
            return;
        }

        info!(
            pending = self.shared.pending_len(),
            resumed = !first,
            "Closing event store"
        );
        self.shutdown.cancel();
        self.wait_for_worker();
        self.shared.drain_and_release();

        let metrics = self.shared.metrics();
        info!(
            flushed = metrics.flushed_events,
            dropped = metrics.dropped_events,
            "Event store closed"
        );
    }

    fn wait_for_worker(&self) {
        let exit = self.worker_exit.lock().take();
        let Some(exit) = exit else {
            return;
        };
        if let Err(RecvTimeoutError::Timeout) = exit.recv_timeout(WORKER_JOIN_TIMEOUT) {
            warn!(
                timeout_secs = WORKER_JOIN_TIMEOUT.as_secs(),
                "Flush worker did not stop in time, draining anyway"
            );
        }
    }
}

/// Durable sink for crossing events.
///
/// Accepts events from the frame loop without blocking on I/O, batches them
/// and persists them from a background Tokio task.
///
/// # Shutdown
///
/// [`close`](Self::close) from async code, [`close_blocking`](Self::close_blocking)
/// from signal handlers and other threads without a runtime. Both persist
/// everything pending before releasing the backend. A close that was
/// interrupted part-way can be repeated and resumes the drain.
///
/// # Example
///
/// ```ignore
/// use flowcounter::config::EventStoreConfig;
/// use flowcounter::storage::{EventStore, SqliteBackend};
///
/// let backend = SqliteBackend::open(&path)?;
/// let store = EventStore::start(EventStoreConfig::default(), Box::new(backend))?;
///
/// store.enqueue(CrossingEvent::now(Direction::In, 7));
///
/// // Persist everything before exit
/// store.close().await;
/// ```
pub struct EventStore {
    lifecycle: Arc<Lifecycle>,
}

impl EventStore {
    /// Start the store and its background flush task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: EventStoreConfig,
        backend: Box<dyn CountsBackend>,
    ) -> Result<Self, StoreError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| StoreError::NoRuntime(e.to_string()))?;

        let shared = Arc::new(StoreShared::new(config, backend));
        let shutdown = CancellationToken::new();
        let (exit_tx, exit_rx) = mpsc::sync_channel::<()>(1);

        let worker_shared = Arc::clone(&shared);
        let worker_shutdown = shutdown.clone();
        runtime.spawn(async move {
            let _exit = exit_tx;
            worker::run_flush_loop(worker_shared, worker_shutdown).await;
        });

        info!(
            backend = %shared.backend_name,
            batch_size = shared.batch_size,
            max_buffer_size = shared.capacity,
            flush_interval_ms = shared.config.flush_interval.as_millis() as u64,
            "Event store started"
        );

        Ok(Self {
            lifecycle: Arc::new(Lifecycle {
                shared,
                shutdown,
                worker_exit: Mutex::new(Some(exit_rx)),
                close_gate: Mutex::new(()),
            }),
        })
    }

    fn shared(&self) -> &StoreShared {
        &self.lifecycle.shared
    }

    /// Queue an event for persistence.
    ///
    /// Never blocks on I/O. When a full batch is waiting, the background
    /// task is woken to flush it right away.
    pub fn enqueue(&self, event: CrossingEvent) {
        self.shared().enqueue(event);
    }

    /// Flush synchronously on the calling thread.
    ///
    /// Blocks on backend I/O and retry backoff; call it from a blocking
    /// context, not from async code.
    pub fn flush(&self, force: bool) -> FlushOutcome {
        self.shared().flush(force)
    }

    /// Snapshot of counters and buffer occupancy.
    pub fn metrics(&self) -> StoreMetrics {
        self.shared().metrics()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared().buffer.lock().closed
    }

    /// Stop the background task, persist everything pending and release the backend.
    ///
    /// Runs the blocking close on the runtime's blocking pool, or inline when
    /// awaited outside a runtime.
    pub async fn close(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            self.close_blocking();
            return;
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        match tokio::task::spawn_blocking(move || lifecycle.close_blocking()).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => self.close_blocking(),
            Err(e) => error!(error = %e, "Close did not complete"),
        }
    }

    /// Synchronous [`close`](Self::close) for shutdown hooks and plain threads.
    ///
    /// Waits at most [`WORKER_JOIN_TIMEOUT`] for the background task, then
    /// drains the buffer on the calling thread for as long as it takes.
    /// Calling it again after a completed close is a no-op.
    ///
    /// From async code use `close`: blocking a current-thread runtime here
    /// keeps the background task from stopping until the timeout.
    pub fn close_blocking(&self) {
        self.lifecycle.close_blocking();
    }
}

impl EventSink for EventStore {
    fn submit(&self, event: CrossingEvent) {
        self.enqueue(event);
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        self.lifecycle.shutdown.cancel();
        let pending = self.shared().pending_len();
        if !self.is_closed() && pending > 0 {
            warn!(pending, "Event store dropped without close, pending events lost");
        }
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("backend", &self.shared().backend_name)
            .field("config", &self.shared().config)
            .finish_non_exhaustive()
    }
}
