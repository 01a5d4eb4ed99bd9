//! Observations in, SQLite rows out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use flowcounter::config::{CounterConfig, EventStoreConfig};
use flowcounter::counter::{CrossingCounts, CrossingTracker, Observation};
use flowcounter::event::EventSink;
use flowcounter::storage::{EventStore, SqliteBackend};

const FRAME_HEIGHT: u32 = 100;

#[tokio::test]
async fn test_crossing_reaches_database() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("data").join("counts.db");

    let backend = SqliteBackend::open(&path).unwrap();
    let store = Arc::new(
        EventStore::start(
            EventStoreConfig::default().with_flush_interval(Duration::from_millis(50)),
            Box::new(backend),
        )
        .unwrap(),
    );
    let sink: Arc<dyn EventSink> = store.clone();
    let mut tracker = CrossingTracker::new(CounterConfig::default(), sink);

    tracker.observe(FRAME_HEIGHT, &[Observation::new(1, 10.0)]);
    let counts = tracker.observe(FRAME_HEIGHT, &[Observation::new(1, 90.0)]);
    assert_eq!(counts, CrossingCounts::new(1, 0));

    // Oscillating around the line afterwards changes nothing
    tracker.observe(FRAME_HEIGHT, &[Observation::new(1, 10.0)]);
    let counts = tracker.observe(FRAME_HEIGHT, &[Observation::new(1, 90.0)]);
    assert_eq!(counts, CrossingCounts::new(1, 0));

    store.close().await;

    let reopened = SqliteBackend::open(&path).unwrap();
    let rows = reopened.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].direction, "IN");
    assert_eq!(rows[0].object_id, 1);

    let today = reopened.daily_totals(Local::now().date_naive()).unwrap();
    assert_eq!(today, CrossingCounts::new(1, 0));
}

#[tokio::test]
async fn test_restart_resumes_daily_totals() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("counts.db");

    for (run, object_id) in [(1u64, 10u32), (2, 11)] {
        let backend = SqliteBackend::open(&path).unwrap();
        let initial = backend.daily_totals(Local::now().date_naive()).unwrap();
        assert_eq!(initial.out_count, run - 1);

        let store = Arc::new(EventStore::start(EventStoreConfig::default(), Box::new(backend)).unwrap());
        let sink: Arc<dyn EventSink> = store.clone();
        let mut tracker = CrossingTracker::with_initial_counts(CounterConfig::default(), sink, initial);

        tracker.observe(FRAME_HEIGHT, &[Observation::new(object_id, 90.0)]);
        let counts = tracker.observe(FRAME_HEIGHT, &[Observation::new(object_id, 10.0)]);
        assert_eq!(counts.out_count, run);

        store.close().await;
    }
}
