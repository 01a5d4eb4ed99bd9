//! Per-track zone state machine producing IN/OUT crossing events.
//!
//! # State Machine
//!
//! ```text
//! UNSEEN --first observation--> {TOP | MIDDLE | BOTTOM}
//! {TOP, MIDDLE} --BOTTOM--> BOTTOM, emit IN  (once per track)
//! {BOTTOM, MIDDLE} --TOP--> TOP, emit OUT    (once per track)
//! any --inactive > max_inactive--> UNSEEN    (history forgotten)
//! ```
//!
//! A track emits at most one event between its first observation and its
//! eviction. After counting, its zone keeps being followed so that nothing
//! fires again while it stays in the scene.
//!
//! TOP to BOTTOM in consecutive observations fires IN without a MIDDLE sample
//! in between; at low frame rates the band is often skipped entirely.
//!
//! # Thread Safety
//!
//! The tracker is driven by a single caller (the frame loop) and takes
//! `&mut self`; wrap it in a mutex if several threads must share it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use super::zone::{Position, ZoneBand};
use crate::config::CounterConfig;
use crate::event::{CrossingEvent, Direction, EventSink, ObjectId};

/// One tracked bounding box in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Persistent id from the upstream tracker.
    pub object_id: ObjectId,
    /// Top edge of the bounding box, in pixels from the top of the frame.
    pub y_top: f32,
}

impl Observation {
    pub fn new(object_id: ObjectId, y_top: f32) -> Self {
        Self { object_id, y_top }
    }
}

/// Cumulative crossing totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrossingCounts {
    pub in_count: u64,
    pub out_count: u64,
}

impl CrossingCounts {
    pub fn new(in_count: u64, out_count: u64) -> Self {
        Self {
            in_count,
            out_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackState {
    last_position: Position,
    last_seen_at: Instant,
}

/// Direction of the crossing implied by a zone transition, if any.
pub fn crossing_direction(previous: Position, current: Position) -> Option<Direction> {
    match (previous, current) {
        (Position::Top | Position::Middle, Position::Bottom) => Some(Direction::In),
        (Position::Bottom | Position::Middle, Position::Top) => Some(Direction::Out),
        _ => None,
    }
}

/// Converts per-frame observations into deduplicated crossing events.
pub struct CrossingTracker {
    config: CounterConfig,
    sink: Arc<dyn EventSink>,
    tracks: HashMap<ObjectId, TrackState>,
    counted: HashSet<ObjectId>,
    counts: CrossingCounts,
    last_cleanup_at: Instant,
}

impl std::fmt::Debug for CrossingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossingTracker")
            .field("config", &self.config)
            .field("tracks", &self.tracks.len())
            .field("counted", &self.counted.len())
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl CrossingTracker {
    /// Create a tracker starting from zero counts.
    pub fn new(config: CounterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::with_initial_counts(config, sink, CrossingCounts::default())
    }

    /// Create a tracker whose totals start at `initial` (e.g. today's stored totals).
    pub fn with_initial_counts(
        config: CounterConfig,
        sink: Arc<dyn EventSink>,
        initial: CrossingCounts,
    ) -> Self {
        info!(
            line_ratio = config.line_ratio,
            band_offset = config.band_offset,
            in_count = initial.in_count,
            out_count = initial.out_count,
            "Crossing tracker initialized"
        );
        Self {
            config,
            sink,
            tracks: HashMap::new(),
            counted: HashSet::new(),
            counts: initial,
            last_cleanup_at: Instant::now(),
        }
    }

    /// Process one frame's observations and return the running totals.
    pub fn observe(&mut self, frame_height: u32, observations: &[Observation]) -> CrossingCounts {
        self.observe_at(Instant::now(), frame_height, observations)
    }

    /// Same as [`observe`](Self::observe) with an explicit clock reading.
    pub fn observe_at(
        &mut self,
        now: Instant,
        frame_height: u32,
        observations: &[Observation],
    ) -> CrossingCounts {
        if observations.is_empty() {
            self.cleanup_stale_tracks(now);
            return self.counts;
        }

        let band = ZoneBand::from_config(frame_height, &self.config);

        for observation in observations {
            let id = observation.object_id;
            let position = band.classify(observation.y_top);

            let previous = self.tracks.insert(
                id,
                TrackState {
                    last_position: position,
                    last_seen_at: now,
                },
            );

            let Some(previous) = previous else {
                continue;
            };

            if self.counted.contains(&id) {
                continue;
            }

            if let Some(direction) = crossing_direction(previous.last_position, position) {
                self.register(id, direction);
            }
        }

        self.cleanup_stale_tracks(now);
        self.counts
    }

    /// Current totals.
    pub fn counts(&self) -> CrossingCounts {
        self.counts
    }

    /// Number of tracks currently remembered.
    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Whether `id` is currently remembered.
    pub fn is_tracked(&self, id: ObjectId) -> bool {
        self.tracks.contains_key(&id)
    }

    /// Whether `id` already produced its event.
    pub fn is_counted(&self, id: ObjectId) -> bool {
        self.counted.contains(&id)
    }

    /// Last known zone of `id`.
    pub fn position_of(&self, id: ObjectId) -> Option<Position> {
        self.tracks.get(&id).map(|state| state.last_position)
    }

    fn register(&mut self, id: ObjectId, direction: Direction) {
        match direction {
            Direction::In => self.counts.in_count += 1,
            Direction::Out => self.counts.out_count += 1,
        }
        self.counted.insert(id);
        self.sink.submit(CrossingEvent::now(direction, id));

        info!(object_id = id, direction = %direction, "{} detected", direction);
    }

    /// Forget tracks unseen for longer than `max_inactive`.
    ///
    /// Runs at most once per `cleanup_interval`.
    fn cleanup_stale_tracks(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_cleanup_at) < self.config.cleanup_interval {
            return;
        }

        let max_inactive = self.config.max_inactive;
        let before = self.tracks.len();
        let counted = &mut self.counted;
        self.tracks.retain(|id, state| {
            let stale = now.saturating_duration_since(state.last_seen_at) > max_inactive;
            if stale {
                counted.remove(id);
            }
            !stale
        });

        let evicted = before - self.tracks.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.tracks.len(), "Evicted stale tracks");
        }

        self.last_cleanup_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records submitted events.
    #[derive(Default)]
    struct CaptureSink {
        events: Mutex<Vec<(Direction, ObjectId)>>,
    }

    impl CaptureSink {
        fn events(&self) -> Vec<(Direction, ObjectId)> {
            self.events.lock().clone()
        }
    }

    impl EventSink for CaptureSink {
        fn submit(&self, event: CrossingEvent) {
            self.events
                .lock()
                .push((event.direction, event.object_id));
        }
    }

    const HEIGHT: u32 = 100;
    const TOP_Y: f32 = 40.0;
    const MIDDLE_Y: f32 = 50.0;
    const BOTTOM_Y: f32 = 60.0;

    /// Line at 0.5 with a 0.05 band: TOP < 45, BOTTOM > 55.
    fn test_config() -> CounterConfig {
        CounterConfig::default()
            .with_line_ratio(0.5)
            .with_band_offset(0.05)
            .with_max_inactive(Duration::from_millis(100))
            .with_cleanup_interval(Duration::ZERO)
    }

    fn create_tracker(config: CounterConfig) -> (CrossingTracker, Arc<CaptureSink>) {
        let sink = Arc::new(CaptureSink::default());
        let tracker = CrossingTracker::new(config, Arc::clone(&sink) as Arc<dyn EventSink>);
        (tracker, sink)
    }

    fn obs(id: ObjectId, y: f32) -> Vec<Observation> {
        vec![Observation::new(id, y)]
    }

    #[test]
    fn test_crossing_direction_table() {
        use Position::*;
        assert_eq!(crossing_direction(Top, Bottom), Some(Direction::In));
        assert_eq!(crossing_direction(Middle, Bottom), Some(Direction::In));
        assert_eq!(crossing_direction(Bottom, Top), Some(Direction::Out));
        assert_eq!(crossing_direction(Middle, Top), Some(Direction::Out));
        assert_eq!(crossing_direction(Top, Middle), None);
        assert_eq!(crossing_direction(Bottom, Middle), None);
        assert_eq!(crossing_direction(Middle, Middle), None);
        assert_eq!(crossing_direction(Top, Top), None);
        assert_eq!(crossing_direction(Bottom, Bottom), None);
    }

    #[test]
    fn test_first_observation_never_fires() {
        let (mut tracker, sink) = create_tracker(test_config());
        let counts = tracker.observe(HEIGHT, &obs(1, BOTTOM_Y));
        assert_eq!(counts, CrossingCounts::new(0, 0));
        assert_eq!(tracker.position_of(1), Some(Position::Bottom));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_top_middle_bottom_fires_single_in() {
        let (mut tracker, sink) = create_tracker(test_config());
        let start = Instant::now();

        tracker.observe_at(start, HEIGHT, &obs(1, TOP_Y));
        tracker.observe_at(start, HEIGHT, &obs(1, MIDDLE_Y));
        let counts = tracker.observe_at(start, HEIGHT, &obs(1, BOTTOM_Y));

        assert_eq!(counts, CrossingCounts::new(1, 0));
        assert_eq!(sink.events(), vec![(Direction::In, 1)]);

        // Walking back out does not count while the track is remembered
        tracker.observe_at(start, HEIGHT, &obs(1, MIDDLE_Y));
        let counts = tracker.observe_at(start, HEIGHT, &obs(1, TOP_Y));
        assert_eq!(counts, CrossingCounts::new(1, 0));
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_in_out_and_anti_duplication() {
        let (mut tracker, sink) = create_tracker(test_config());
        let start = Instant::now();

        tracker.observe_at(start, HEIGHT, &obs(1, TOP_Y));
        let counts = tracker.observe_at(start, HEIGHT, &obs(1, BOTTOM_Y));
        assert_eq!(counts, CrossingCounts::new(1, 0));

        let counts = tracker.observe_at(start, HEIGHT, &obs(1, TOP_Y));
        assert_eq!(counts, CrossingCounts::new(1, 0));

        tracker.observe_at(start, HEIGHT, &obs(2, BOTTOM_Y));
        let counts = tracker.observe_at(start, HEIGHT, &obs(2, TOP_Y));
        assert_eq!(counts, CrossingCounts::new(1, 1));

        assert_eq!(sink.events(), vec![(Direction::In, 1), (Direction::Out, 2)]);
    }

    #[test]
    fn test_repeated_crossing_attempts_emit_once_per_track() {
        let (mut tracker, sink) = create_tracker(test_config());
        let start = Instant::now();

        for _ in 0..10 {
            tracker.observe_at(start, HEIGHT, &obs(7, TOP_Y));
            tracker.observe_at(start, HEIGHT, &obs(7, BOTTOM_Y));
        }

        assert_eq!(tracker.counts(), CrossingCounts::new(1, 0));
        assert_eq!(sink.events(), vec![(Direction::In, 7)]);
        assert!(tracker.is_counted(7));
    }

    #[test]
    fn test_middle_only_movement_never_fires() {
        let (mut tracker, sink) = create_tracker(test_config());
        let start = Instant::now();

        for y in [46.0, 50.0, 54.0, 45.0, 55.0] {
            tracker.observe_at(start, HEIGHT, &obs(3, y));
        }

        assert_eq!(tracker.counts(), CrossingCounts::default());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_duplicate_ids_in_one_call_last_write_wins() {
        let (mut tracker, sink) = create_tracker(test_config());
        let start = Instant::now();

        let frame = vec![
            Observation::new(4, TOP_Y),
            Observation::new(4, BOTTOM_Y),
            Observation::new(4, MIDDLE_Y),
        ];
        let counts = tracker.observe_at(start, HEIGHT, &frame);

        // TOP seeds, BOTTOM fires IN, MIDDLE is the final state
        assert_eq!(counts, CrossingCounts::new(1, 0));
        assert_eq!(tracker.position_of(4), Some(Position::Middle));
        assert_eq!(sink.events(), vec![(Direction::In, 4)]);
    }

    #[test]
    fn test_multiple_tracks_in_one_frame() {
        let (mut tracker, sink) = create_tracker(test_config());
        let start = Instant::now();

        tracker.observe_at(
            start,
            HEIGHT,
            &[Observation::new(1, TOP_Y), Observation::new(2, BOTTOM_Y)],
        );
        let counts = tracker.observe_at(
            start,
            HEIGHT,
            &[Observation::new(1, BOTTOM_Y), Observation::new(2, TOP_Y)],
        );

        assert_eq!(counts, CrossingCounts::new(1, 1));
        assert_eq!(sink.events(), vec![(Direction::In, 1), (Direction::Out, 2)]);
    }

    #[test]
    fn test_empty_frame_runs_cleanup_only() {
        let (mut tracker, _sink) = create_tracker(test_config());
        let start = Instant::now();

        tracker.observe_at(start, HEIGHT, &obs(99, TOP_Y));
        tracker.observe_at(start, HEIGHT, &obs(99, BOTTOM_Y));
        assert!(tracker.is_counted(99));

        let counts = tracker.observe_at(start + Duration::from_secs(5), HEIGHT, &[]);

        assert_eq!(counts, CrossingCounts::new(1, 0));
        assert!(!tracker.is_tracked(99));
        assert!(!tracker.is_counted(99));
        assert_eq!(tracker.active_tracks(), 0);
    }

    #[test]
    fn test_eviction_resets_track_history() {
        let (mut tracker, sink) = create_tracker(test_config());
        let start = Instant::now();

        tracker.observe_at(start, HEIGHT, &obs(5, TOP_Y));
        tracker.observe_at(start, HEIGHT, &obs(5, BOTTOM_Y));

        // Unseen for more than 0.1s, swept by an unrelated frame
        let later = start + Duration::from_millis(150);
        tracker.observe_at(later, HEIGHT, &obs(6, TOP_Y));
        assert!(!tracker.is_tracked(5));

        // Same id number is a brand-new track: seeds, then may fire again
        tracker.observe_at(later, HEIGHT, &obs(5, BOTTOM_Y));
        let counts = tracker.observe_at(later, HEIGHT, &obs(5, TOP_Y));

        assert_eq!(counts, CrossingCounts::new(1, 1));
        assert_eq!(sink.events(), vec![(Direction::In, 5), (Direction::Out, 5)]);
    }

    #[test]
    fn test_recently_seen_tracks_survive_cleanup() {
        let (mut tracker, _sink) = create_tracker(test_config());
        let start = Instant::now();

        tracker.observe_at(start, HEIGHT, &obs(1, TOP_Y));
        tracker.observe_at(start + Duration::from_millis(80), HEIGHT, &obs(1, TOP_Y));
        tracker.observe_at(start + Duration::from_millis(160), HEIGHT, &[]);

        assert!(tracker.is_tracked(1));
    }

    #[test]
    fn test_cleanup_respects_interval() {
        let config = test_config().with_cleanup_interval(Duration::from_secs(1));
        let (mut tracker, _sink) = create_tracker(config);
        let start = Instant::now();

        tracker.observe_at(start, HEIGHT, &obs(1, TOP_Y));

        // Stale, but the sweep interval has not elapsed since construction
        tracker.observe_at(start + Duration::from_millis(500), HEIGHT, &[]);
        assert!(tracker.is_tracked(1));

        tracker.observe_at(start + Duration::from_secs(2), HEIGHT, &[]);
        assert!(!tracker.is_tracked(1));
    }

    #[test]
    fn test_initial_counts_are_carried() {
        let sink = Arc::new(CaptureSink::default());
        let mut tracker = CrossingTracker::with_initial_counts(
            test_config(),
            sink,
            CrossingCounts::new(10, 4),
        );
        let start = Instant::now();

        tracker.observe_at(start, HEIGHT, &obs(1, BOTTOM_Y));
        let counts = tracker.observe_at(start, HEIGHT, &obs(1, TOP_Y));

        assert_eq!(counts, CrossingCounts::new(10, 5));
    }

    #[test]
    fn test_default_line_end_to_end_counts() {
        let (mut tracker, sink) = create_tracker(CounterConfig::default());

        tracker.observe(HEIGHT, &obs(1, 10.0));
        let counts = tracker.observe(HEIGHT, &obs(1, 90.0));

        assert_eq!(counts, CrossingCounts::new(1, 0));
        assert_eq!(sink.events(), vec![(Direction::In, 1)]);
    }
}
