//! Daily totals report.

use std::path::Path;

use chrono::NaiveDate;
use flowcounter::storage::SqliteBackend;

use crate::error::CliError;

/// Print IN/OUT totals for `date`.
pub fn run(database: &Path, date: NaiveDate, json: bool) -> Result<(), CliError> {
    let backend = SqliteBackend::open(database)?;
    let totals = backend.daily_totals(date)?;

    if json {
        let report = serde_json::json!({
            "date": date.format("%Y-%m-%d").to_string(),
            "in_count": totals.in_count,
            "out_count": totals.out_count,
        });
        println!("{}", report);
        return Ok(());
    }

    println!("Counts for {}", date.format("%Y-%m-%d"));
    println!("  IN:  {}", totals.in_count);
    println!("  OUT: {}", totals.out_count);
    println!(
        "  Net: {}",
        totals.in_count as i64 - totals.out_count as i64
    );
    Ok(())
}
