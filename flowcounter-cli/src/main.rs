//! flowcounter CLI - count directional line crossings and store them durably.

mod commands;
mod error;

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use flowcounter::config::{config_file_path, ConfigFile};
use flowcounter::logging::init_logging;

use commands::common::resolve_database;
use error::CliError;

#[derive(Parser)]
#[command(name = "flowcounter")]
#[command(version, about = "Count objects crossing a virtual line and persist every crossing", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/flowcounter/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file, table and indexes
    InitDb {
        /// Database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Delete all stored counts
    ResetDb {
        /// Database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Print IN/OUT totals for one day
    Report {
        /// Day to report, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Replay a CSV observation log (frame,frame_height,object_id,y_top) through the counter
    Replay {
        /// Input file, or '-' for stdin
        input: PathBuf,

        /// Database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load_or_default(&config_file_path())?,
    };
    let _log_guard = init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::InitDb { database } => {
            commands::db::init(&resolve_database(database, &config))
        }
        Commands::ResetDb { database } => {
            commands::db::reset(&resolve_database(database, &config))
        }
        Commands::Report {
            date,
            json,
            database,
        } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            commands::report::run(&resolve_database(database, &config), date, json)
        }
        Commands::Replay { input, database } => {
            commands::replay::run(&config, &resolve_database(database, &config), &input)
        }
    }
}
