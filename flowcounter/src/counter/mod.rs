//! Line-crossing counter.
//!
//! Turns per-frame `(object_id, y_top)` observations into IN/OUT crossing
//! events using three horizontal zones around a virtual counting line.
//!
//! # Architecture
//!
//! ```text
//! Observations ──► ZoneBand::classify ──► CrossingTracker ──► EventSink
//!  (per frame)     (TOP/MIDDLE/BOTTOM)   (state machine)     (EventStore)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use flowcounter::counter::{CrossingTracker, Observation};
//! use flowcounter::config::CounterConfig;
//!
//! let mut tracker = CrossingTracker::new(CounterConfig::default(), store.clone());
//! let counts = tracker.observe(720, &[Observation::new(1, 120.0)]);
//! println!("in={} out={}", counts.in_count, counts.out_count);
//! ```

mod tracker;
mod zone;

pub use tracker::{crossing_direction, CrossingCounts, CrossingTracker, Observation};
pub use zone::{classify, Position, ZoneBand};
