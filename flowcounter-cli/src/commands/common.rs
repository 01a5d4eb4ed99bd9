//! Common helpers shared across CLI commands.

use std::path::PathBuf;

use flowcounter::config::ConfigFile;

/// Resolve the database path: CLI override first, then config.
pub fn resolve_database(cli_database: Option<PathBuf>, config: &ConfigFile) -> PathBuf {
    cli_database.unwrap_or_else(|| config.storage.database.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_database_takes_precedence() {
        let config = ConfigFile::default();
        let cli = PathBuf::from("/tmp/override.db");

        assert_eq!(resolve_database(Some(cli.clone()), &config), cli);
        assert_eq!(resolve_database(None, &config), config.storage.database);
    }
}
