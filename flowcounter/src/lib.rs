//! flowcounter - directional line-crossing counter with durable storage
//!
//! Counts objects crossing a horizontal virtual line in a video stream,
//! given per-frame `(object_id, y_top)` observations from an upstream
//! detector/tracker, and persists every crossing to SQLite without stalling
//! the frame loop.
//!
//! # Modules
//!
//! - [`counter`] - zone classification and the crossing state machine
//! - [`storage`] - buffered event store and its backends
//! - [`config`] - INI configuration
//! - [`logging`] - tracing subscriber setup
//! - [`event`] - crossing events and the sink trait joining the two halves

pub mod config;
pub mod counter;
pub mod event;
pub mod logging;
pub mod storage;
