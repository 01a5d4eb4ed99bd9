//! Spatial zones around the counting line.
//!
//! ```text
//!   0 ┬──────────────────────  TOP      (y_top <  line_up)
//!     │
//!     ├ ─ ─ ─ ─ ─ line_up ─ ─
//!     │    neutral band        MIDDLE   (line_up <= y_top <= line_down)
//!     ├ ─ ─ ─ ─ line_down ─ ─
//!     │
//!   h ┴──────────────────────  BOTTOM   (y_top >  line_down)
//! ```

use crate::config::CounterConfig;

/// Zone occupied by the top edge of a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Top,
    Middle,
    Bottom,
}

/// Pixel thresholds of the neutral band for one frame height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneBand {
    pub line_up: i64,
    pub line_down: i64,
}

impl ZoneBand {
    /// Derive thresholds for a frame of `frame_height` pixels.
    ///
    /// Both thresholds are truncated to whole pixels.
    pub fn for_frame(frame_height: u32, line_ratio: f64, band_offset: f64) -> Self {
        let height = f64::from(frame_height);
        Self {
            line_up: (height * (line_ratio - band_offset)) as i64,
            line_down: (height * (line_ratio + band_offset)) as i64,
        }
    }

    /// Derive thresholds from counter configuration.
    pub fn from_config(frame_height: u32, config: &CounterConfig) -> Self {
        Self::for_frame(frame_height, config.line_ratio, config.band_offset)
    }

    /// Classify the top edge of a bounding box.
    pub fn classify(&self, y_top: f32) -> Position {
        classify(y_top, self.line_up, self.line_down)
    }
}

/// Map `y_top` to a zone given the band thresholds (`line_up <= line_down`).
pub fn classify(y_top: f32, line_up: i64, line_down: i64) -> Position {
    let y = f64::from(y_top);
    if y < line_up as f64 {
        Position::Top
    } else if y > line_down as f64 {
        Position::Bottom
    } else {
        Position::Middle
    }
}
