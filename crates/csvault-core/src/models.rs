//! Core data models shared by the import engine, the stores, and search.
//!
//! These types describe what flows through one import pass (source files
//! and normalized rows) and what the store persists between runs (file
//! hash records and table descriptors).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Name of the internal column holding each row's content hash.
pub const ROW_HASH_COLUMN: &str = "__row_hash";

/// Name of the internal column holding the hash of the file a row came from.
pub const FILE_HASH_COLUMN: &str = "__file_hash";

/// Column names the materializer never hands out to user data. The last
/// three are SQLite's aliases for the implicit row id, which a user column
/// of the same name would shadow.
pub const RESERVED_COLUMNS: [&str; 5] = [ROW_HASH_COLUMN, FILE_HASH_COLUMN, "rowid", "oid", "_rowid_"];

/// Bookkeeping tables kept next to the data tables.
pub const BOOKKEEPING_TABLES: [&str; 2] = ["imported_files", "csv_tables"];

/// A candidate CSV file supplied by the directory scanner.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Absolute path; the identity of the file within a run.
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl SourceFile {
    /// Base name without extension, used to derive the table name.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Base name with extension. Tables are registered per base name.
    pub fn base_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Whether a recorded import consumed its whole input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Partial,
}

impl Completeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completeness::Complete => "complete",
            Completeness::Partial => "partial",
        }
    }
}

impl fmt::Display for Completeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Completeness {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "complete" => Ok(Completeness::Complete),
            "partial" => Ok(Completeness::Partial),
            other => anyhow::bail!("Unknown completeness value: '{}'", other),
        }
    }
}

/// Registry entry for one distinct file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHashRecord {
    pub file_hash: String,
    pub source_path: String,
    /// Table the content was materialized into at first import.
    pub table_name: String,
    /// Unix timestamp (seconds) of the import.
    pub imported_at: i64,
    pub row_count: u64,
    pub completeness: Completeness,
}

/// Destination table of one source file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Base name of the source file the table was created for.
    pub source_name: String,
    /// User-visible columns, in file order. Internal hash columns are not listed.
    pub columns: Vec<String>,
    pub has_header: bool,
}

/// A parsed data row ready for dedup and insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    /// 1-based physical line the record started on.
    pub line: usize,
    pub fields: Vec<String>,
    pub hash: String,
}

/// One search hit, tagged with the table it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_round_trips_through_str() {
        for c in [Completeness::Complete, Completeness::Partial] {
            assert_eq!(c.as_str().parse::<Completeness>().unwrap(), c);
        }
        assert!("done".parse::<Completeness>().is_err());
    }

    #[test]
    fn test_source_file_names() {
        let file = SourceFile {
            path: PathBuf::from("/data/in/Sales 2024.csv"),
            size: 0,
            modified_at: Utc::now(),
        };
        assert_eq!(file.stem(), "Sales 2024");
        assert_eq!(file.base_name(), "Sales 2024.csv");
    }
}
