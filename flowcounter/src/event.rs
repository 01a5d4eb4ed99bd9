//! Crossing events shared between the tracker and the event store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Identifier assigned to a track by the upstream object tracker.
pub type ObjectId = u32;

/// Timestamp format used for persisted rows and metrics (second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Direction of a line crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Crossed from the top side to the bottom side.
    #[serde(rename = "IN")]
    In,
    /// Crossed from the bottom side to the top side.
    #[serde(rename = "OUT")]
    Out,
}

impl Direction {
    /// Text form stored in the `direction` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown direction string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDirection(pub String);

impl fmt::Display for UnknownDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown direction '{}'", self.0)
    }
}

impl std::error::Error for UnknownDirection {}

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Direction::In),
            "OUT" => Ok(Direction::Out),
            other => Err(UnknownDirection(other.to_string())),
        }
    }
}

/// A single detected crossing, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossingEvent {
    pub direction: Direction,
    pub object_id: ObjectId,
    pub occurred_at: DateTime<Local>,
}

impl CrossingEvent {
    /// Creates an event stamped with the current local time.
    pub fn now(direction: Direction, object_id: ObjectId) -> Self {
        Self::at(direction, object_id, Local::now())
    }

    /// Creates an event with an explicit timestamp.
    pub fn at(direction: Direction, object_id: ObjectId, occurred_at: DateTime<Local>) -> Self {
        Self {
            direction,
            object_id,
            occurred_at,
        }
    }

    /// Timestamp truncated to seconds, as persisted.
    pub fn timestamp(&self) -> String {
        self.occurred_at.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Destination for crossing events emitted by the tracker.
///
/// Implementations must not block on I/O; the tracker calls this from the
/// frame-processing path.
pub trait EventSink: Send + Sync {
    /// Hands over one event. Never fails from the caller's point of view.
    fn submit(&self, event: CrossingEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_round_trips_through_text() {
        assert_eq!("IN".parse::<Direction>().unwrap(), Direction::In);
        assert_eq!("OUT".parse::<Direction>().unwrap(), Direction::Out);
        assert_eq!(Direction::In.to_string(), "IN");
    }

    #[test]
    fn test_direction_rejects_lowercase() {
        let err = "in".parse::<Direction>().unwrap_err();
        assert_eq!(err, UnknownDirection("in".to_string()));
    }

    #[test]
    fn test_event_timestamp_has_second_precision() {
        use chrono::TimeZone;

        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let event = CrossingEvent::at(Direction::Out, 12, at);
        assert_eq!(event.timestamp(), "2024-03-09 14:05:07");
    }
}
