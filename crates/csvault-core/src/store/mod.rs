//! Storage abstraction for csvault.
//!
//! The [`Store`] trait is the relational store the import engine and the
//! search engine talk to. Every write happens through a [`StoreTx`] opened
//! with [`Store::begin`]; the engine opens one per file and commits it only
//! once the whole file has been written. Dropping a transaction without
//! committing discards everything it did, so a failed or cancelled file
//! leaves no trace.
//!
//! Implementations must serialize transactions well enough that two files
//! targeting the same table cannot race on its creation or on its hash
//! records.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::{FileHashRecord, NormalizedRow, TableDescriptor};
use crate::search::KeywordQuery;

/// Matching rows of one table: user column values, in insertion order.
pub type RowStream<'a> = BoxStream<'a, Result<Vec<String>>>;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`begin`](Store::begin) | Open a write transaction |
/// | [`list_tables`](Store::list_tables) | All materialized tables, in creation order |
/// | [`table_by_name`](Store::table_by_name) | Look up one table |
/// | [`file_records`](Store::file_records) | The file hash registry |
/// | [`row_count`](Store::row_count) | Rows stored in a table |
/// | [`query_keywords`](Store::query_keywords) | Lazy keyword scan over one table |
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    async fn list_tables(&self) -> Result<Vec<TableDescriptor>>;

    async fn table_by_name(&self, name: &str) -> Result<Option<TableDescriptor>>;

    async fn file_records(&self) -> Result<Vec<FileHashRecord>>;

    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Stream the rows of `table` that satisfy `query`.
    ///
    /// Nothing is fetched until the stream is polled, and rows arrive in
    /// insertion order.
    fn query_keywords<'a>(&'a self, table: TableDescriptor, query: &'a KeywordQuery)
        -> RowStream<'a>;
}

/// One open write transaction.
#[async_trait]
pub trait StoreTx: Send {
    /// Registry entry for a file hash, if any.
    async fn file_record(&mut self, file_hash: &str) -> Result<Option<FileHashRecord>>;

    async fn table_by_name(&mut self, name: &str) -> Result<Option<TableDescriptor>>;

    /// Table registered for a source base name, if any.
    async fn table_for_source(&mut self, source_name: &str) -> Result<Option<TableDescriptor>>;

    /// Whether creating a table called `name` would clash with anything the
    /// backend already holds, registered data table or not. Names compare
    /// case-insensitively.
    async fn name_in_use(&mut self, name: &str) -> Result<bool>;

    /// Create the table with its hash columns and indexes, and register it.
    /// Returns `false` if a table of that name already existed.
    async fn create_table_if_absent(&mut self, table: &TableDescriptor) -> Result<bool>;

    async fn has_row_hash(&mut self, table: &str, row_hash: &str) -> Result<bool>;

    /// Append rows, tagging each with its row hash and `file_hash`.
    async fn insert_rows(
        &mut self,
        table: &TableDescriptor,
        file_hash: &str,
        rows: &[NormalizedRow],
    ) -> Result<u64>;

    /// Add a registry entry. Fails if the hash is already registered.
    async fn record_file_import(&mut self, record: &FileHashRecord) -> Result<()>;

    /// Turn a `Partial` registry entry into `Complete`.
    ///
    /// Fails unless the entry exists and is currently `Partial`.
    async fn upgrade_file_import(&mut self, file_hash: &str, row_count: u64) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
