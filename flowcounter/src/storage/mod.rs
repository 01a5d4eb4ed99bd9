//! Durable, batched persistence of crossing events.
//!
//! The frame loop hands events to an [`EventStore`], which buffers them in a
//! bounded FIFO and writes them in batches to a [`CountsBackend`] from a
//! background task.
//!
//! # Architecture
//!
//! ```text
//! CrossingTracker ──submit──► EventStore ──insert_batch──► CountsBackend
//!                             │  buffer   │                ├── SqliteBackend
//!                             │  metrics  │                └── MemoryBackend
//!                             └─ worker ──┘
//!                          (interval + batch wakeups)
//! ```
//!
//! # Guarantees
//!
//! - `enqueue` never performs I/O
//! - events persist in enqueue order
//! - overflow drops the oldest pending events, counted in `dropped_events`
//! - failed batches are retried, then requeued in front of newer events
//! - `close` persists everything still pending before releasing the backend

mod backend;
mod memory;
mod metrics;
mod sqlite;
mod store;
mod worker;

pub use backend::{BackendError, CountsBackend};
pub use memory::MemoryBackend;
pub use metrics::StoreMetrics;
pub use sqlite::{classify_error, SqliteBackend, StorageError, StoredCount, BUSY_TIMEOUT};
pub use store::{EventStore, FlushOutcome, StoreError, WORKER_JOIN_TIMEOUT};
