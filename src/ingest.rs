//! Import command orchestration.
//!
//! Scans the import folder, feeds every candidate file through the core
//! [`Importer`] against the SQLite store, reports progress on stderr, and
//! prints a run summary on stdout.

use anyhow::Result;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use csvault_core::error::ImportError;
use csvault_core::import::{CancelFlag, FileStatus, Importer, RunReport};

use crate::config::Config;
use crate::progress::{ImportProgressEvent, ImportProgressReporter};
use crate::scan;
use crate::sqlite_store::SqliteStore;

/// Import every CSV file under `folder`.
///
/// Per-file problems end up in the returned report; only store failures
/// are returned as errors. A cancelled run returns its partial report with
/// `cancelled` set.
pub async fn run_import(
    config: &Config,
    folder: &Path,
    dry_run: bool,
    progress: &dyn ImportProgressReporter,
    cancel: CancelFlag,
) -> Result<RunReport> {
    let options = config.import.to_options(dry_run)?;

    progress.report(ImportProgressEvent::Scanning {
        folder: folder.display().to_string(),
    });
    let files = scan::scan_folder(folder, &config.import)?;
    debug!(folder = %folder.display(), files = files.len(), "Scanned import folder");

    let store = SqliteStore::open(&config.db.path).await?;

    let total = files.len() as u64;
    let mut importer = Importer::new(&store, options, cancel);
    for (i, source) in files.iter().enumerate() {
        let result = match File::open(&source.path) {
            Ok(file) => importer.import(source, file).await,
            Err(e) => Ok(importer.record_open_failure(source, &e.to_string())),
        };
        match result {
            Ok(file) => progress.report(ImportProgressEvent::File {
                n: i as u64 + 1,
                total,
                path: file.path.clone(),
                status: file.status.label().to_string(),
            }),
            Err(ImportError::Cancelled) => break,
            Err(e) => {
                store.close().await;
                return Err(e.into());
            }
        }
    }
    let report = importer.finish();

    print_summary(folder, dry_run, files.len(), &report);

    store.close().await;
    Ok(report)
}

fn print_summary(folder: &Path, dry_run: bool, found: usize, report: &RunReport) {
    if dry_run {
        println!("import {} (dry-run)", folder.display());
    } else {
        println!("import {}", folder.display());
    }
    println!("  files found: {}", found);
    println!("  imported: {}", report.imported());
    println!("  partial: {}", report.partial());
    println!("  duplicate files: {}", report.duplicates());
    println!("  empty: {}", report.empty());
    println!("  failed: {}", report.failed());
    println!("  rows inserted: {}", report.rows_inserted());
    println!("  duplicate rows: {}", report.duplicate_rows());
    println!("  skipped rows: {}", report.skipped_rows());

    for file in &report.files {
        match &file.status {
            FileStatus::Partial => println!(
                "  partial {} -> {}",
                file.path,
                file.table.as_deref().unwrap_or("-")
            ),
            FileStatus::Failed(msg) if file.file_hash.is_empty() => {
                println!("  failed {}: {}", file.path, msg)
            }
            FileStatus::Failed(msg) => println!(
                "  failed {} [{}]: {}",
                file.path,
                short_hash(&file.file_hash),
                msg
            ),
            _ => {}
        }
    }

    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
}

/// First 12 hex digits of a file hash.
fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
