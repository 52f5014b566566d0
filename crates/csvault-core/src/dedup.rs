//! Dedup gate: file-level and row-level novelty decisions.
//!
//! [`check_file`] classifies a file hash against the file registry:
//!
//! | Registry | Decision |
//! |----------|----------|
//! | `Complete` record | [`FileDecision::Duplicate`]: skip the file entirely |
//! | `Partial` record | [`FileDecision::Retry`]: re-run row dedup into the recorded table |
//! | no record | [`FileDecision::New`] |
//!
//! [`RowGate`] then admits a row only if its hash is neither stored in the
//! destination table nor already admitted earlier in the same pass.

use std::collections::HashSet;

use anyhow::Result;

use crate::models::{Completeness, FileHashRecord, NormalizedRow};
use crate::store::StoreTx;

/// What to do with a file, given its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDecision {
    New,
    Retry(FileHashRecord),
    Duplicate(FileHashRecord),
}

/// Look the file hash up in the registry.
pub async fn check_file(tx: &mut dyn StoreTx, file_hash: &str) -> Result<FileDecision> {
    Ok(match tx.file_record(file_hash).await? {
        None => FileDecision::New,
        Some(record) => match record.completeness {
            Completeness::Complete => FileDecision::Duplicate(record),
            Completeness::Partial => FileDecision::Retry(record),
        },
    })
}

/// Row-level filter for one destination table within one pass.
pub struct RowGate {
    table: String,
    seen: HashSet<String>,
    /// Skip store lookups; set when the table was created in this pass.
    fresh: bool,
    duplicates: usize,
}

impl RowGate {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            seen: HashSet::new(),
            fresh: false,
            duplicates: 0,
        }
    }

    /// Gate for a table created in this transaction, which holds no rows yet.
    pub fn fresh(table: &str) -> Self {
        Self {
            fresh: true,
            ..Self::new(table)
        }
    }

    /// Admit `row` if its hash is new to the table and to this pass.
    pub async fn admit(&mut self, tx: &mut dyn StoreTx, row: &NormalizedRow) -> Result<bool> {
        if self.seen.contains(&row.hash) {
            self.duplicates += 1;
            return Ok(false);
        }
        if !self.fresh && tx.has_row_hash(&self.table, &row.hash).await? {
            self.seen.insert(row.hash.clone());
            self.duplicates += 1;
            return Ok(false);
        }
        self.seen.insert(row.hash.clone());
        Ok(true)
    }

    /// Keep only admitted rows, preserving file order.
    pub async fn filter(
        &mut self,
        tx: &mut dyn StoreTx,
        rows: Vec<NormalizedRow>,
    ) -> Result<Vec<NormalizedRow>> {
        let mut admitted = Vec::with_capacity(rows.len());
        for row in rows {
            if self.admit(tx, &row).await? {
                admitted.push(row);
            }
        }
        Ok(admitted)
    }

    /// Rows rejected so far, within the file or against the table.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
