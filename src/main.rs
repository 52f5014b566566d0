//! # csvault CLI
//!
//! Imports folders of CSV files into a local SQLite database, skipping
//! files and rows it has already seen, and searches the imported rows by
//! keyword.
//!
//! ## Usage
//!
//! ```bash
//! csvault --config ./config/csvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `csvault init` | Create the SQLite database and bookkeeping tables |
//! | `csvault import <folder>` | Import every CSV file in a folder |
//! | `csvault search <keywords...>` | Rows containing every keyword |
//! | `csvault stats` | Tables, row counts, and imported files |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csvault::config::{self, DEFAULT_CONFIG_PATH};
use csvault::progress::ProgressMode;
use csvault::sqlite_store::SqliteStore;
use csvault::{ingest, search, stats};
use csvault_core::import::CancelFlag;

/// csvault: deduplicating CSV import and keyword search over SQLite.
#[derive(Parser)]
#[command(
    name = "csvault",
    about = "Import folders of CSV files into SQLite with file- and row-level dedup, then search them by keyword",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/csvault.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging on stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `imported_files` and
    /// `csv_tables` bookkeeping tables. Safe to run repeatedly.
    Init,

    /// Import every CSV file in a folder.
    ///
    /// Byte-identical files are skipped, rows already present in the
    /// destination table are skipped, and malformed rows are reported
    /// without aborting the file.
    Import {
        /// Folder to scan for `.csv` files.
        folder: PathBuf,

        /// Parse and dedup everything, but write nothing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search imported rows.
    ///
    /// A row matches when every keyword occurs (case-insensitively) in at
    /// least one of its columns.
    Search {
        /// Keywords; all must match.
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Maximum rows to print (default: `search.limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Only search this table. Repeatable.
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Print one JSON object per row.
        #[arg(long)]
        json: bool,
    },

    /// Show tables, row counts, and the imported file registry.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            SqliteStore::open(&cfg.db.path).await?.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            folder,
            dry_run,
            progress,
        } => {
            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling import...");
                    on_signal.cancel();
                }
            });

            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            let report =
                ingest::run_import(&cfg, &folder, dry_run, reporter.as_ref(), cancel).await?;
            if report.has_failures() || report.cancelled {
                std::process::exit(1);
            }
        }
        Commands::Search {
            keywords,
            limit,
            tables,
            json,
        } => {
            search::run_search(&cfg, &keywords, limit, tables, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
