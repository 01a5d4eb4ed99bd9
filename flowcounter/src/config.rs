//! Configuration for the crossing counter and the event store.
//!
//! Settings live in an INI file (by default
//! `$XDG_CONFIG_HOME/flowcounter/config.ini`):
//!
//! ```ini
//! [counting_line]
//! y_ratio = 0.6
//! offset = 0.05
//! max_inactive_seconds = 10.0
//!
//! [storage]
//! database = /var/lib/flowcounter/counts.db
//! batch_size = 20
//! flush_interval_seconds = 1.0
//!
//! [logging]
//! level = info
//! ```
//!
//! Every key is optional. A missing file falls back to defaults; a present
//! but invalid value is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

// ==================== Counting Line Defaults ====================

/// Default vertical position of the counting line as a fraction of frame height.
pub const DEFAULT_LINE_RATIO: f64 = 0.6;

/// Default half-width of the neutral band around the line, as a fraction of height.
pub const DEFAULT_BAND_OFFSET: f64 = 0.05;

/// Default inactivity after which a track is forgotten, in seconds.
pub const DEFAULT_MAX_INACTIVE_SECS: f64 = 10.0;

/// Default minimum spacing between stale-track sweeps, in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: f64 = 1.0;

// ==================== Event Store Defaults ====================

/// Default number of buffered events that triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default period of the background flush task, in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 1.0;

/// Default capacity of the pending buffer.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 5000;

/// Default number of attempts per flush before the batch is requeued.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base backoff between retries, in seconds (multiplied by attempt number).
pub const DEFAULT_RETRY_BACKOFF_SECS: f64 = 0.05;

/// Default period between metrics log lines, in seconds.
pub const DEFAULT_METRICS_LOG_INTERVAL_SECS: f64 = 60.0;

/// Default log level when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid INI.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A key holds a value that cannot be used.
    #[error("invalid value for {section}.{key}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        reason: String,
    },
}

/// Placement of the counting line and track bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterConfig {
    /// Line position as a fraction of frame height (0.0 - 1.0).
    pub line_ratio: f64,

    /// Half-width of the neutral band as a fraction of frame height (0.0 - 1.0).
    pub band_offset: f64,

    /// Tracks unseen for longer than this are evicted.
    pub max_inactive: Duration,

    /// Stale-track sweeps run at most this often.
    pub cleanup_interval: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            line_ratio: DEFAULT_LINE_RATIO,
            band_offset: DEFAULT_BAND_OFFSET,
            max_inactive: Duration::from_secs_f64(DEFAULT_MAX_INACTIVE_SECS),
            cleanup_interval: Duration::from_secs_f64(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl CounterConfig {
    /// Set the line ratio.
    pub fn with_line_ratio(mut self, ratio: f64) -> Self {
        self.line_ratio = ratio;
        self
    }

    /// Set the band offset.
    pub fn with_band_offset(mut self, offset: f64) -> Self {
        self.band_offset = offset;
        self
    }

    /// Set the inactivity limit.
    pub fn with_max_inactive(mut self, max_inactive: Duration) -> Self {
        self.max_inactive = max_inactive;
        self
    }

    /// Set the sweep interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// Buffering, batching and retry settings for the event store.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStoreConfig {
    /// Buffered events that trigger an early flush; also the non-forced batch limit.
    pub batch_size: usize,

    /// Period of the background flush task.
    pub flush_interval: Duration,

    /// Maximum number of pending events; older ones are dropped beyond this.
    pub max_buffer_size: usize,

    /// Attempts per flush before the batch goes back to the buffer.
    pub max_retries: u32,

    /// Base retry delay; attempt `n` waits `retry_backoff * n`.
    pub retry_backoff: Duration,

    /// Period between aggregate metrics log lines.
    pub metrics_log_interval: Duration,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_secs_f64(DEFAULT_FLUSH_INTERVAL_SECS),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_secs_f64(DEFAULT_RETRY_BACKOFF_SECS),
            metrics_log_interval: Duration::from_secs_f64(DEFAULT_METRICS_LOG_INTERVAL_SECS),
        }
    }
}

impl EventStoreConfig {
    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the buffer capacity.
    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Set the retry limit.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Where crossings are persisted and how.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database: PathBuf,

    /// Event store tuning.
    pub store: EventStoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            store: EventStoreConfig::default(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`, `debug`).
    pub level: String,

    /// Directory for daily-rolling log files; console only when `None`.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

/// Complete configuration loaded from `config.ini`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub counter: CounterConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_default(&config_file_path())
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Configuration file not found, using defaults"
            );
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load from `path`; the file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse INI text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let reader = SectionReader { ini: &ini };
        let mut config = Self::default();

        let line = "counting_line";
        if let Some(ratio) = reader.fraction(line, "y_ratio")? {
            config.counter.line_ratio = ratio;
        }
        if let Some(offset) = reader.fraction(line, "offset")? {
            config.counter.band_offset = offset;
        }
        if let Some(max_inactive) = reader.duration(line, "max_inactive_seconds", true)? {
            config.counter.max_inactive = max_inactive;
        }
        if let Some(interval) = reader.duration(line, "cleanup_interval_seconds", true)? {
            config.counter.cleanup_interval = interval;
        }

        let storage = "storage";
        if let Some(database) = reader.get(storage, "database") {
            config.storage.database = PathBuf::from(database);
        }
        let store = &mut config.storage.store;
        if let Some(batch_size) = reader.positive_usize(storage, "batch_size")? {
            store.batch_size = batch_size;
        }
        if let Some(interval) = reader.duration(storage, "flush_interval_seconds", false)? {
            store.flush_interval = interval;
        }
        if let Some(size) = reader.positive_usize(storage, "max_buffer_size")? {
            store.max_buffer_size = size;
        }
        if let Some(retries) = reader.positive_usize(storage, "max_retries")? {
            store.max_retries =
                u32::try_from(retries).map_err(|_| ConfigError::InvalidValue {
                    section: storage,
                    key: "max_retries",
                    reason: "value is too large".to_string(),
                })?;
        }
        if let Some(backoff) = reader.duration(storage, "retry_backoff_seconds", true)? {
            store.retry_backoff = backoff;
        }
        if let Some(interval) = reader.duration(storage, "metrics_log_interval_seconds", false)? {
            store.metrics_log_interval = interval;
        }

        let logging = "logging";
        if let Some(level) = reader.get(logging, "level") {
            config.logging.level = level.to_string();
        }
        if let Some(directory) = reader.get(logging, "directory") {
            config.logging.directory = Some(PathBuf::from(directory));
        }

        Ok(config)
    }
}

/// Typed accessors over an INI document. Empty values count as unset.
struct SectionReader<'a> {
    ini: &'a Ini,
}

impl SectionReader<'_> {
    fn get(&self, section: &'static str, key: &'static str) -> Option<&str> {
        self.ini
            .section(Some(section))
            .and_then(|props| props.get(key))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn float(&self, section: &'static str, key: &'static str) -> Result<Option<f64>, ConfigError> {
        let Some(raw) = self.get(section, key) else {
            return Ok(None);
        };
        let value: f64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
            section,
            key,
            reason: format!("'{}' is not a number", raw),
        })?;
        if !value.is_finite() {
            return Err(ConfigError::InvalidValue {
                section,
                key,
                reason: format!("'{}' is not finite", raw),
            });
        }
        Ok(Some(value))
    }

    fn fraction(
        &self,
        section: &'static str,
        key: &'static str,
    ) -> Result<Option<f64>, ConfigError> {
        match self.float(section, key)? {
            Some(value) if !(0.0..=1.0).contains(&value) => Err(ConfigError::InvalidValue {
                section,
                key,
                reason: format!("{} is outside 0.0 - 1.0", value),
            }),
            other => Ok(other),
        }
    }

    fn duration(
        &self,
        section: &'static str,
        key: &'static str,
        allow_zero: bool,
    ) -> Result<Option<Duration>, ConfigError> {
        let Some(secs) = self.float(section, key)? else {
            return Ok(None);
        };
        if secs < 0.0 || (!allow_zero && secs == 0.0) {
            return Err(ConfigError::InvalidValue {
                section,
                key,
                reason: format!("{} seconds is not allowed", secs),
            });
        }
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                section,
                key,
                reason: e.to_string(),
            })
    }

    fn positive_usize(
        &self,
        section: &'static str,
        key: &'static str,
    ) -> Result<Option<usize>, ConfigError> {
        let Some(raw) = self.get(section, key) else {
            return Ok(None);
        };
        match raw.parse::<usize>() {
            Ok(0) => Err(ConfigError::InvalidValue {
                section,
                key,
                reason: "must be at least 1".to_string(),
            }),
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(ConfigError::InvalidValue {
                section,
                key,
                reason: format!("'{}' is not a positive integer", raw),
            }),
        }
    }
}

/// Default configuration file path.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowcounter")
        .join("config.ini")
}

/// Default SQLite database path.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowcounter")
        .join("counts.db")
}
