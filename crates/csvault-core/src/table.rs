//! Table materializer: maps a source file to its destination table.
//!
//! # Naming
//!
//! The table name is `prefix + sanitized stem`: lowercased, every
//! character outside `[a-z0-9_]` replaced by `_`, and `t_` prepended when
//! the result would start with a digit or with SQLite's reserved `sqlite_`
//! prefix. Tables are registered per source base name, so the same file
//! name always resolves to the same table. A name that is already taken,
//! whether by another source's table, a bookkeeping table, or any other
//! object in the store, gets the first free numeric suffix (`_2`, `_3`, …).
//!
//! # Columns
//!
//! Header cells become column names (trimmed; empty cells become `col_N`;
//! repeats and reserved internal names get `_2`, `_3`, … suffixes).
//! Header-less files get `col_1 .. col_N`. Every table also carries the
//! internal row-hash and file-hash columns, which are never listed in a
//! [`TableDescriptor`].

use std::collections::HashSet;

use anyhow::Context;
use tracing::debug;

use crate::error::{ImportError, Result};
use crate::models::{TableDescriptor, BOOKKEEPING_TABLES, RESERVED_COLUMNS};
use crate::store::StoreTx;

pub const DEFAULT_TABLE_PREFIX: &str = "csv_";

/// Derive a SQL-safe table name from a file stem.
pub fn sanitize_table_name(prefix: &str, stem: &str) -> String {
    let mut body: String = stem
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if body.is_empty() {
        body.push_str("unnamed");
    }

    let name = format!("{}{}", prefix, body);
    if name.starts_with(|c: char| c.is_ascii_digit()) || name.starts_with("sqlite_") {
        format!("t_{}", name)
    } else {
        name
    }
}

/// Column names for a file with `column_count` columns.
pub fn derive_columns(header: Option<&[String]>, column_count: usize) -> Vec<String> {
    let mut used: HashSet<String> = RESERVED_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut columns = Vec::with_capacity(column_count);

    for i in 0..column_count {
        let raw = header
            .and_then(|h| h.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("col_{}", i + 1));

        let mut name = raw.clone();
        let mut n = 2;
        while used.contains(&name.to_lowercase()) {
            name = format!("{}_{}", raw, n);
            n += 1;
        }
        used.insert(name.to_lowercase());
        columns.push(name);
    }

    columns
}

/// Quote an identifier for SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Everything the materializer needs to know about the incoming file.
#[derive(Debug, Clone)]
pub struct TableRequest<'a> {
    /// Source path, for error context.
    pub path: &'a str,
    /// Source base name, the key of the table registry.
    pub source_name: &'a str,
    pub stem: &'a str,
    pub prefix: &'a str,
    pub header: Option<&'a [String]>,
    pub column_count: usize,
    /// Table recorded for this content by an earlier partial import.
    pub pinned: Option<&'a str>,
}

/// The resolved destination.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub descriptor: TableDescriptor,
    /// Whether the table was created in this transaction.
    pub created: bool,
}

/// Resolve, and create if needed, the destination table for a file.
///
/// Fails with [`ImportError::SchemaConflict`] when the resolved table
/// already exists with a different column count.
pub async fn materialize(tx: &mut dyn StoreTx, req: &TableRequest<'_>) -> Result<TablePlan> {
    let existing = match req.pinned {
        Some(name) => tx.table_by_name(name).await?,
        None => tx.table_for_source(req.source_name).await?,
    };

    if let Some(table) = existing {
        if table.columns.len() != req.column_count {
            return Err(ImportError::SchemaConflict {
                path: req.path.to_string(),
                table: table.name,
                expected: table.columns.len(),
                found: req.column_count,
            });
        }
        debug!(table = %table.name, source = req.source_name, "Reusing existing table");
        return Ok(TablePlan {
            descriptor: table,
            created: false,
        });
    }

    let name = match req.pinned {
        Some(name) => name.to_string(),
        None => free_table_name(tx, &sanitize_table_name(req.prefix, req.stem)).await?,
    };

    let descriptor = TableDescriptor {
        name,
        source_name: req.source_name.to_string(),
        columns: derive_columns(req.header, req.column_count),
        has_header: req.header.is_some(),
    };
    let created = tx
        .create_table_if_absent(&descriptor)
        .await
        .with_context(|| format!("Failed to create table '{}'", descriptor.name))?;
    debug!(table = %descriptor.name, columns = descriptor.columns.len(), created, "Materialized table");

    Ok(TablePlan {
        descriptor,
        created,
    })
}

async fn free_table_name(tx: &mut dyn StoreTx, base: &str) -> Result<String> {
    let mut candidate = base.to_string();
    let mut n = 2;
    while is_bookkeeping(&candidate) || tx.name_in_use(&candidate).await? {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    Ok(candidate)
}

fn is_bookkeeping(name: &str) -> bool {
    BOOKKEEPING_TABLES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(name))
}
