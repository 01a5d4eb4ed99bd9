//! CLI error type.

use std::fmt;

use flowcounter::config::ConfigError;
use flowcounter::logging::LoggingError;
use flowcounter::storage::{StorageError, StoreError};

/// Errors surfaced to the user by the `flowcounter` binary.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or was rejected.
    Config(String),
    /// Logging could not be set up.
    Logging(LoggingError),
    /// Database open, query or maintenance failed.
    Database(StorageError),
    /// The event store could not be started.
    Store(StoreError),
    /// Reading the replay input failed.
    Input(std::io::Error),
    /// A replay line could not be parsed.
    Parse { line: usize, reason: String },
    /// The async runtime could not be created.
    Runtime(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Logging error: {}", e),
            CliError::Database(e) => write!(f, "Database error: {}", e),
            CliError::Store(e) => write!(f, "Event store error: {}", e),
            CliError::Input(e) => write!(f, "Failed to read input: {}", e),
            CliError::Parse { line, reason } => write!(f, "Line {}: {}", line, reason),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Logging(e) => Some(e),
            CliError::Database(e) => Some(e),
            CliError::Store(e) => Some(e),
            CliError::Input(e) | CliError::Runtime(e) => Some(e),
            CliError::Config(_) | CliError::Parse { .. } => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Database(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}
