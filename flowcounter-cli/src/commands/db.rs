//! Database maintenance commands.

use std::path::Path;

use flowcounter::storage::SqliteBackend;
use tracing::warn;

use crate::error::CliError;

/// Create the database file, table and indexes.
pub fn init(database: &Path) -> Result<(), CliError> {
    let backend = SqliteBackend::open(database)?;
    let indexes = backend.index_names()?;

    println!("Database ready: {}", backend.path().display());
    println!("  Table:   counts");
    println!("  Indexes: {}", indexes.join(", "));
    Ok(())
}

/// Delete every stored count and restart the id sequence.
pub fn reset(database: &Path) -> Result<(), CliError> {
    if !database.exists() {
        warn!(path = %database.display(), "Database file not found, creating empty schema");
    }

    let mut backend = SqliteBackend::open(database)?;
    let removed = backend.reset()?;

    println!("Reset {}: removed {} rows", database.display(), removed);
    Ok(())
}
