//! Replay a recorded observation log through the counter and event store.
//!
//! Input is CSV, one tracked box per line:
//!
//! ```text
//! frame,frame_height,object_id,y_top
//! 1,720,7,120.5
//! 1,720,9,610.0
//! 2,720,,          <- frame with no detections
//! ```
//!
//! Consecutive lines with the same frame number form one frame and must agree
//! on `frame_height`. Blank lines, `#` comments and the header are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use flowcounter::config::ConfigFile;
use flowcounter::counter::{CrossingCounts, CrossingTracker, Observation};
use flowcounter::event::EventSink;
use flowcounter::storage::{EventStore, SqliteBackend, StoreMetrics};
use tracing::{info, warn};

use crate::error::CliError;

/// One parsed input line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayRow {
    pub frame: u64,
    pub frame_height: u32,
    /// `None` for a frame without detections.
    pub observation: Option<Observation>,
}

/// All observations of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub number: u64,
    pub height: u32,
    pub observations: Vec<Observation>,
}

impl Frame {
    fn start(row: ReplayRow) -> Self {
        Self {
            number: row.frame,
            height: row.frame_height,
            observations: row.observation.into_iter().collect(),
        }
    }
}

/// Parse one CSV line. Returns `Ok(None)` for lines to skip.
pub fn parse_row(line: &str) -> Result<Option<ReplayRow>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.first() == Some(&"frame") {
        return Ok(None);
    }
    if fields.len() != 4 {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    }

    let frame = fields[0]
        .parse::<u64>()
        .map_err(|e| format!("invalid frame '{}': {}", fields[0], e))?;
    let frame_height = fields[1]
        .parse::<u32>()
        .map_err(|e| format!("invalid frame_height '{}': {}", fields[1], e))?;
    if frame_height == 0 {
        return Err("frame_height must be positive".to_string());
    }

    let observation = match (fields[2], fields[3]) {
        ("", "") => None,
        (id, y) => {
            let object_id = id
                .parse::<u32>()
                .map_err(|e| format!("invalid object_id '{}': {}", id, e))?;
            let y_top = y
                .parse::<f32>()
                .map_err(|e| format!("invalid y_top '{}': {}", y, e))?;
            if !y_top.is_finite() {
                return Err(format!("y_top must be finite, got {}", y));
            }
            Some(Observation::new(object_id, y_top))
        }
    };

    Ok(Some(ReplayRow {
        frame,
        frame_height,
        observation,
    }))
}

/// Groups parsed rows into frames, streaming from any reader.
pub struct FrameReader<R> {
    lines: io::Lines<R>,
    line_no: usize,
    carry: Option<ReplayRow>,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            carry: None,
        }
    }

    fn next_row(&mut self) -> Option<Result<ReplayRow, CliError>> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(CliError::Input(e))),
            };
            match parse_row(&line) {
                Ok(Some(row)) => return Some(Ok(row)),
                Ok(None) => continue,
                Err(reason) => {
                    return Some(Err(CliError::Parse {
                        line: self.line_no,
                        reason,
                    }))
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for FrameReader<R> {
    type Item = Result<Frame, CliError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut frame = self.carry.take().map(Frame::start);
        loop {
            let row = match self.next_row() {
                None => return frame.map(Ok),
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(row)) => row,
            };

            match frame.as_mut() {
                Some(current) if current.number == row.frame => {
                    if current.height != row.frame_height {
                        return Some(Err(CliError::Parse {
                            line: self.line_no,
                            reason: format!(
                                "frame {} has frame_height {}, earlier rows said {}",
                                row.frame, row.frame_height, current.height
                            ),
                        }));
                    }
                    current.observations.extend(row.observation);
                }
                Some(_) => {
                    self.carry = Some(row);
                    return frame.map(Ok);
                }
                None => frame = Some(Frame::start(row)),
            }
        }
    }
}

/// Outcome of a replay run.
#[derive(Debug)]
pub struct ReplaySummary {
    pub frames: u64,
    pub counts: CrossingCounts,
    pub interrupted: bool,
    pub metrics: StoreMetrics,
}

/// Run the replay command.
pub fn run(config: &ConfigFile, database: &Path, input: &Path) -> Result<(), CliError> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received shutdown signal, flushing pending counts...");
        stop_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let reader: Box<dyn BufRead> = if input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(input).map_err(CliError::Input)?))
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let summary = runtime.block_on(replay(config, database, FrameReader::new(reader), &stop))?;

    let report = serde_json::json!({
        "frames": summary.frames,
        "interrupted": summary.interrupted,
        "counts": summary.counts,
        "metrics": summary.metrics,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => warn!(error = %e, "Failed to render summary"),
    }
    Ok(())
}

/// Feed `frames` through a tracker backed by a SQLite event store.
///
/// Totals start from today's stored counts. The store is always closed,
/// also when reading fails or `stop` is raised.
pub async fn replay<I>(
    config: &ConfigFile,
    database: &Path,
    frames: I,
    stop: &AtomicBool,
) -> Result<ReplaySummary, CliError>
where
    I: Iterator<Item = Result<Frame, CliError>>,
{
    let backend = SqliteBackend::open(database)?;
    let initial = backend.daily_totals(Local::now().date_naive())?;

    let store = Arc::new(EventStore::start(
        config.storage.store.clone(),
        Box::new(backend),
    )?);
    let sink: Arc<dyn EventSink> = store.clone();
    let mut tracker = CrossingTracker::with_initial_counts(config.counter.clone(), sink, initial);

    let mut processed = 0u64;
    let mut interrupted = false;
    let mut failure = None;
    for frame in frames {
        if stop.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        match frame {
            Ok(frame) => {
                tracker.observe(frame.height, &frame.observations);
                processed += 1;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    store.close().await;
    if let Some(e) = failure {
        return Err(e);
    }

    let counts = tracker.counts();
    info!(
        frames = processed,
        in_count = counts.in_count,
        out_count = counts.out_count,
        interrupted,
        "Replay finished"
    );

    Ok(ReplaySummary {
        frames: processed,
        counts,
        interrupted,
        metrics: store.metrics(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frames(input: &str) -> Vec<Frame> {
        FrameReader::new(Cursor::new(input.to_string()))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_parse_row_fields() {
        let row = parse_row("3, 720, 7, 120.5").unwrap().unwrap();
        assert_eq!(row.frame, 3);
        assert_eq!(row.frame_height, 720);
        assert_eq!(row.observation, Some(Observation::new(7, 120.5)));
    }

    #[test]
    fn test_parse_row_skips_header_comments_and_blanks() {
        assert_eq!(parse_row("frame,frame_height,object_id,y_top"), Ok(None));
        assert_eq!(parse_row("# recorded 2024-05-01"), Ok(None));
        assert_eq!(parse_row("   "), Ok(None));
    }

    #[test]
    fn test_parse_row_empty_frame() {
        let row = parse_row("4,720,,").unwrap().unwrap();
        assert_eq!(row.observation, None);
    }

    #[test]
    fn test_parse_row_rejects_bad_input() {
        assert!(parse_row("1,720,7").is_err());
        assert!(parse_row("1,0,7,10").is_err());
        assert!(parse_row("1,720,-7,10").is_err());
        assert!(parse_row("1,720,7,abc").is_err());
        assert!(parse_row("1,720,7,NaN").is_err());
    }

    #[test]
    fn test_consecutive_rows_form_one_frame() {
        let parsed = frames("frame,frame_height,object_id,y_top\n1,100,1,10\n1,100,2,90\n2,100,1,50\n3,100,,\n");

        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].number, 1);
        assert_eq!(
            parsed[0].observations,
            vec![Observation::new(1, 10.0), Observation::new(2, 90.0)]
        );
        assert_eq!(parsed[1].observations, vec![Observation::new(1, 50.0)]);
        assert_eq!(parsed[2].number, 3);
        assert!(parsed[2].observations.is_empty());
    }

    #[test]
    fn test_parse_error_reports_line_number() {
        let result: Result<Vec<_>, _> =
            FrameReader::new(Cursor::new("frame,frame_height,object_id,y_top\n1,100,1,10\n1,100,x,10\n"))
                .collect();

        match result {
            Err(CliError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_height_must_agree_within_frame() {
        let result: Result<Vec<_>, _> =
            FrameReader::new(Cursor::new("1,100,1,10\n2,100,1,50\n2,200,2,90\n")).collect();

        match result {
            Err(CliError::Parse { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("frame_height 200"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_persists_crossings() {
        let temp = tempfile::tempdir().unwrap();
        let database = temp.path().join("counts.db");
        let config = ConfigFile::default();
        let stop = AtomicBool::new(false);

        // Line at 0.6 of 100px: band 55..65
        let input = "1,100,1,10\n2,100,1,90\n3,100,2,90\n4,100,2,10\n";
        let summary = replay(
            &config,
            &database,
            FrameReader::new(Cursor::new(input)),
            &stop,
        )
        .await
        .unwrap();

        assert_eq!(summary.frames, 4);
        assert_eq!(summary.counts, CrossingCounts::new(1, 1));
        assert!(!summary.interrupted);
        assert_eq!(summary.metrics.flushed_events, 2);
        assert!(summary.metrics.is_closed);

        let backend = SqliteBackend::open(&database).unwrap();
        let rows = backend.rows().unwrap();
        let stored: Vec<_> = rows
            .iter()
            .map(|r| (r.direction.as_str(), r.object_id))
            .collect();
        assert_eq!(stored, vec![("IN", 1), ("OUT", 2)]);
    }

    #[tokio::test]
    async fn test_replay_seeds_from_todays_totals() {
        let temp = tempfile::tempdir().unwrap();
        let database = temp.path().join("counts.db");
        let config = ConfigFile::default();
        let stop = AtomicBool::new(false);
        let input = "1,100,1,10\n2,100,1,90\n";

        replay(&config, &database, FrameReader::new(Cursor::new(input)), &stop)
            .await
            .unwrap();
        let second = replay(&config, &database, FrameReader::new(Cursor::new(input)), &stop)
            .await
            .unwrap();

        assert_eq!(second.counts, CrossingCounts::new(2, 0));
    }

    #[tokio::test]
    async fn test_replay_stops_when_interrupted() {
        let temp = tempfile::tempdir().unwrap();
        let database = temp.path().join("counts.db");
        let stop = AtomicBool::new(true);

        let summary = replay(
            &ConfigFile::default(),
            &database,
            FrameReader::new(Cursor::new("1,100,1,10\n")),
            &stop,
        )
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.frames, 0);
        assert!(summary.metrics.is_closed);
    }
}
