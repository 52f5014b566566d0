//! Import engine: drives files through parse, dedup and materialization.
//!
//! Each file is imported inside its own store transaction:
//!
//! 1. Read the whole input in 64 KiB chunks, hashing the bytes as they
//!    arrive. A read error ends the input early; cancellation is checked
//!    between chunks.
//! 2. Classify the file hash ([`check_file`]). A `Complete` match is a
//!    duplicate and the file is skipped before it is parsed.
//! 3. Parse with the [recovery parser](crate::recovery). Files without data
//!    rows are reported as empty and leave no trace in the store.
//! 4. Resolve or create the destination table ([`materialize`]).
//! 5. Filter rows through a [`RowGate`] and insert the survivors in
//!    batches, checking cancellation between batches.
//! 6. Register the file hash (or upgrade a `Partial` entry) and commit.
//!
//! A schema conflict fails only its file. Store errors and cancellation
//! end the run; the open transaction is dropped, so the interrupted file
//! is rolled back.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dedup::{check_file, FileDecision, RowGate};
use crate::error::{ImportError, Result};
use crate::hash::HashingReader;
use crate::models::{Completeness, FileHashRecord, SourceFile};
use crate::recovery::{self, Diagnostic, Outcome, ParseOptions};
use crate::store::{Store, StoreTx};
use crate::table::{materialize, TableRequest, DEFAULT_TABLE_PREFIX};

/// Bytes requested from the reader per chunk.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Shared cancellation switch.
///
/// Cloning yields a handle to the same flag, so a signal handler can hold
/// one clone while the importer checks another.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Engine configuration for one run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub parse: ParseOptions,
    pub table_prefix: String,
    /// Rows per insert batch.
    pub batch_size: usize,
    /// Run the full pipeline but never commit.
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            parse: ParseOptions::default(),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            batch_size: 500,
            dry_run: false,
        }
    }
}

/// The bytes of one input, as far as they could be read.
#[derive(Debug, Clone)]
pub struct RawInput {
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`.
    pub file_hash: String,
    /// The I/O error that ended reading early, if any.
    pub read_error: Option<String>,
}

/// Read `reader` to the end (or to its first I/O error).
///
/// Fails only with [`ImportError::Cancelled`].
pub fn read_input<R: Read>(reader: R, cancel: &CancelFlag) -> Result<RawInput> {
    let mut reader = HashingReader::new(reader);
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut read_error = None;

    loop {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => bytes.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                read_error = Some(e.to_string());
                break;
            }
        }
    }

    Ok(RawInput {
        bytes,
        file_hash: reader.finish(),
        read_error,
    })
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum FileStatus {
    /// Committed as `Complete`.
    Imported,
    /// Committed as `Partial`: the input ended early.
    Partial,
    /// Byte-identical to a completely imported file.
    Duplicate,
    /// No data rows; nothing was written.
    Empty,
    /// Not imported. The run continued.
    Failed(String),
}

impl FileStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FileStatus::Imported => "imported",
            FileStatus::Partial => "partial",
            FileStatus::Duplicate => "duplicate",
            FileStatus::Empty => "empty",
            FileStatus::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Failed(msg) => write!(f, "failed: {}", msg),
            other => f.write_str(other.label()),
        }
    }
}

/// Per-file result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: String,
    /// Empty when the file could not be read at all.
    pub file_hash: String,
    pub table: Option<String>,
    pub status: FileStatus,
    pub rows_parsed: usize,
    pub rows_inserted: u64,
    /// Rows rejected by the row gate.
    pub duplicate_rows: usize,
    /// Rows the parser could not import.
    pub skipped_rows: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileReport {
    fn new(path: &str, file_hash: &str, status: FileStatus) -> Self {
        Self {
            path: path.to_string(),
            file_hash: file_hash.to_string(),
            table: None,
            status,
            rows_parsed: 0,
            rows_inserted: 0,
            duplicate_rows: 0,
            skipped_rows: 0,
            diagnostics: Vec::new(),
        }
    }
}

/// Aggregate of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    /// The run stopped on a cancellation request.
    pub cancelled: bool,
}

impl RunReport {
    fn count(&self, label: &str) -> usize {
        self.files
            .iter()
            .filter(|f| f.status.label() == label)
            .count()
    }

    pub fn imported(&self) -> usize {
        self.count("imported")
    }

    pub fn partial(&self) -> usize {
        self.count("partial")
    }

    pub fn duplicates(&self) -> usize {
        self.count("duplicate")
    }

    pub fn empty(&self) -> usize {
        self.count("empty")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn rows_inserted(&self) -> u64 {
        self.files.iter().map(|f| f.rows_inserted).sum()
    }

    pub fn duplicate_rows(&self) -> usize {
        self.files.iter().map(|f| f.duplicate_rows).sum()
    }

    pub fn skipped_rows(&self) -> usize {
        self.files.iter().map(|f| f.skipped_rows).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Runs files through the pipeline and collects a [`RunReport`].
pub struct Importer<'s, S: Store + ?Sized> {
    store: &'s S,
    options: ImportOptions,
    cancel: CancelFlag,
    report: RunReport,
}

impl<'s, S: Store + ?Sized> Importer<'s, S> {
    pub fn new(store: &'s S, options: ImportOptions, cancel: CancelFlag) -> Self {
        Self {
            store,
            options,
            cancel,
            report: RunReport::default(),
        }
    }

    /// Import one file read from `reader`.
    ///
    /// Per-file failures are recorded in the report and returned as `Ok`.
    /// An `Err` means the run must stop: the store failed, or cancellation
    /// was requested (the report is then marked cancelled).
    pub async fn import<R: Read>(&mut self, source: &SourceFile, reader: R) -> Result<&FileReport> {
        let path = source.path.display().to_string();
        let outcome = match read_input(reader, &self.cancel) {
            Ok(raw) => self
                .import_file(source, &path, &raw)
                .await
                .map_err(|e| (e, raw.file_hash)),
            Err(e) => Err((e, String::new())),
        };
        let report = match outcome {
            Ok(report) => report,
            Err((e, file_hash)) if !e.is_fatal() => {
                warn!(path = %path, file_hash = %file_hash, error = %e, "File failed");
                FileReport::new(&path, &file_hash, FileStatus::Failed(e.to_string()))
            }
            Err((ImportError::Cancelled, _)) => {
                info!(path = %path, "Import cancelled");
                self.report.cancelled = true;
                return Err(ImportError::Cancelled);
            }
            Err((e, _)) => return Err(e),
        };
        self.report.files.push(report);
        Ok(&self.report.files[self.report.files.len() - 1])
    }

    /// Record a file that could not be opened.
    pub fn record_open_failure(&mut self, source: &SourceFile, error: &str) -> &FileReport {
        let path = source.path.display().to_string();
        warn!(path = %path, error, "Cannot open file");
        self.report
            .files
            .push(FileReport::new(&path, "", FileStatus::Failed(error.to_string())));
        &self.report.files[self.report.files.len() - 1]
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn finish(self) -> RunReport {
        self.report
    }

    async fn import_file(
        &self,
        source: &SourceFile,
        path: &str,
        raw: &RawInput,
    ) -> Result<FileReport> {
        if let Some(err) = &raw.read_error {
            warn!(path, bytes = raw.bytes.len(), error = %err, "Read ended early");
        }

        let mut tx = self.store.begin().await?;
        let decision = check_file(tx.as_mut(), &raw.file_hash).await?;
        debug!(path, file_hash = %raw.file_hash, ?decision, "File decision");

        let pinned = match &decision {
            FileDecision::Duplicate(previous) => {
                info!(path, table = %previous.table_name, "Duplicate file, skipping");
                let mut report = FileReport::new(path, &raw.file_hash, FileStatus::Duplicate);
                report.table = Some(previous.table_name.clone());
                return Ok(report);
            }
            FileDecision::Retry(previous) => Some(previous.table_name.clone()),
            FileDecision::New => None,
        };

        let parsed = recovery::parse(&raw.bytes, raw.read_error.as_deref(), &self.options.parse);
        for diagnostic in &parsed.diagnostics {
            warn!(path, line = diagnostic.line, "{}", diagnostic.kind);
        }

        let mut report = FileReport::new(path, &raw.file_hash, FileStatus::Empty);
        report.rows_parsed = parsed.rows.len();
        report.skipped_rows = parsed.skipped_rows();
        report.diagnostics = parsed.diagnostics.clone();

        if parsed.outcome == Outcome::Empty || parsed.column_count == 0 {
            info!(path, "No data rows");
            return Ok(report);
        }

        let stem = source.stem();
        let source_name = source.base_name();
        let request = TableRequest {
            path,
            source_name: &source_name,
            stem: &stem,
            prefix: &self.options.table_prefix,
            header: parsed.header.as_deref(),
            column_count: parsed.column_count,
            pinned: pinned.as_deref(),
        };
        let plan = materialize(tx.as_mut(), &request).await?;
        let table = plan.descriptor;
        report.table = Some(table.name.clone());

        let mut gate = if plan.created {
            RowGate::fresh(&table.name)
        } else {
            RowGate::new(&table.name)
        };
        let batch_size = self.options.batch_size.max(1);
        for batch in parsed.rows.chunks(batch_size) {
            if self.cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            let admitted = gate.filter(tx.as_mut(), batch.to_vec()).await?;
            if !admitted.is_empty() {
                report.rows_inserted += tx
                    .insert_rows(&table, &raw.file_hash, &admitted)
                    .await?;
            }
        }
        report.duplicate_rows = gate.duplicates();

        let completeness = if parsed.outcome == Outcome::Partial {
            Completeness::Partial
        } else {
            Completeness::Complete
        };
        let entry = FileHashRecord {
            file_hash: raw.file_hash.clone(),
            source_path: path.to_string(),
            table_name: table.name.clone(),
            imported_at: Utc::now().timestamp(),
            row_count: report.rows_parsed as u64,
            completeness,
        };
        register(tx.as_mut(), &decision, &entry).await?;

        if self.options.dry_run {
            debug!(path, "Dry run, rolling back");
            drop(tx);
        } else {
            tx.commit().await?;
        }

        report.status = match completeness {
            Completeness::Complete => FileStatus::Imported,
            Completeness::Partial => FileStatus::Partial,
        };
        info!(
            path,
            table = %table.name,
            status = report.status.label(),
            inserted = report.rows_inserted,
            duplicates = report.duplicate_rows,
            skipped = report.skipped_rows,
            "Imported file"
        );
        Ok(report)
    }
}

/// Write the registry entry for a file the pass has finished.
async fn register(
    tx: &mut dyn StoreTx,
    decision: &FileDecision,
    entry: &FileHashRecord,
) -> Result<()> {
    match decision {
        FileDecision::New => tx.record_file_import(entry).await?,
        FileDecision::Retry(_) if entry.completeness == Completeness::Complete => {
            tx.upgrade_file_import(&entry.file_hash, entry.row_count)
                .await?
        }
        // Still partial: the existing entry stays as it is.
        FileDecision::Retry(_) | FileDecision::Duplicate(_) => {}
    }
    Ok(())
}
