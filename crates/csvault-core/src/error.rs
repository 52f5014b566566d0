//! Error taxonomy of the import engine.
//!
//! Row-level and truncation problems never surface here: they are
//! diagnostics on the parsed file and counters on the run report. What
//! remains is a per-file failure the run survives ([`ImportError::SchemaConflict`])
//! and the conditions that end the run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    /// The destination table exists with a different column count.
    /// Nothing from the file is written; the run continues.
    #[error("schema conflict for {path}: table '{table}' has {expected} columns, file has {found}")]
    SchemaConflict {
        path: String,
        table: String,
        expected: usize,
        found: usize,
    },

    /// Cancellation was requested while the file was being read or written.
    #[error("import cancelled")]
    Cancelled,

    /// The store could not be reached, or a transaction could not be opened
    /// or committed.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl ImportError {
    /// Whether the whole run must stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ImportError::SchemaConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
