//! In-memory [`Store`] implementation for tests and embedding.
//!
//! State lives behind an async mutex. A transaction holds the lock for its
//! whole lifetime and works on a staged copy of the state, which replaces
//! the shared state on commit. Transactions are therefore fully serialized,
//! and an uncommitted transaction changes nothing.
//!
//! Rows keep their values and row hash only; the originating file hash is
//! not tracked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::lock::{Mutex, OwnedMutexGuard};
use futures::stream::{self, StreamExt};

use crate::models::{Completeness, FileHashRecord, NormalizedRow, TableDescriptor};
use crate::search::KeywordQuery;

use super::{RowStream, Store, StoreTx};

#[derive(Clone)]
struct StoredTable {
    descriptor: TableDescriptor,
    /// User column values, in insertion order.
    rows: Vec<Vec<String>>,
    hashes: HashSet<String>,
}

#[derive(Clone, Default)]
struct State {
    /// In creation order.
    tables: Vec<StoredTable>,
    files: HashMap<String, FileHashRecord>,
    /// Registration order of `files`.
    file_order: Vec<String>,
}

impl State {
    fn table(&self, name: &str) -> Option<&StoredTable> {
        self.tables.iter().find(|t| t.descriptor.name == name)
    }

    fn table_mut(&mut self, name: &str) -> Option<&mut StoredTable> {
        self.tables.iter_mut().find(|t| t.descriptor.name == name)
    }
}

/// In-memory store.
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTx { guard, staged }))
    }

    async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let state = self.state.lock().await;
        Ok(state.tables.iter().map(|t| t.descriptor.clone()).collect())
    }

    async fn table_by_name(&self, name: &str) -> Result<Option<TableDescriptor>> {
        let state = self.state.lock().await;
        Ok(state.table(name).map(|t| t.descriptor.clone()))
    }

    async fn file_records(&self) -> Result<Vec<FileHashRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .file_order
            .iter()
            .filter_map(|h| state.files.get(h).cloned())
            .collect())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let state = self.state.lock().await;
        state
            .table(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| anyhow!("Unknown table: '{}'", table))
    }

    fn query_keywords<'a>(
        &'a self,
        table: TableDescriptor,
        query: &'a KeywordQuery,
    ) -> RowStream<'a> {
        stream::once(async move {
            let state = self.state.lock().await;
            match state.table(&table.name) {
                Some(stored) => stored
                    .rows
                    .iter()
                    .filter(|values| query.matches(values))
                    .map(|values| Ok(values.clone()))
                    .collect::<Vec<_>>(),
                None => vec![Err(anyhow!("Unknown table: '{}'", table.name))],
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn file_record(&mut self, file_hash: &str) -> Result<Option<FileHashRecord>> {
        Ok(self.staged.files.get(file_hash).cloned())
    }

    async fn table_by_name(&mut self, name: &str) -> Result<Option<TableDescriptor>> {
        Ok(self.staged.table(name).map(|t| t.descriptor.clone()))
    }

    async fn table_for_source(&mut self, source_name: &str) -> Result<Option<TableDescriptor>> {
        Ok(self
            .staged
            .tables
            .iter()
            .find(|t| t.descriptor.source_name == source_name)
            .map(|t| t.descriptor.clone()))
    }

    async fn name_in_use(&mut self, name: &str) -> Result<bool> {
        Ok(self
            .staged
            .tables
            .iter()
            .any(|t| t.descriptor.name.eq_ignore_ascii_case(name)))
    }

    async fn create_table_if_absent(&mut self, table: &TableDescriptor) -> Result<bool> {
        if self.staged.table(&table.name).is_some() {
            return Ok(false);
        }
        self.staged.tables.push(StoredTable {
            descriptor: table.clone(),
            rows: Vec::new(),
            hashes: HashSet::new(),
        });
        Ok(true)
    }

    async fn has_row_hash(&mut self, table: &str, row_hash: &str) -> Result<bool> {
        Ok(self
            .staged
            .table(table)
            .map(|t| t.hashes.contains(row_hash))
            .unwrap_or(false))
    }

    async fn insert_rows(
        &mut self,
        table: &TableDescriptor,
        _file_hash: &str,
        rows: &[NormalizedRow],
    ) -> Result<u64> {
        let stored = self
            .staged
            .table_mut(&table.name)
            .ok_or_else(|| anyhow!("Unknown table: '{}'", table.name))?;
        for row in rows {
            if row.fields.len() != stored.descriptor.columns.len() {
                bail!(
                    "Row from line {} has {} fields, table '{}' has {} columns",
                    row.line,
                    row.fields.len(),
                    table.name,
                    stored.descriptor.columns.len()
                );
            }
            if !stored.hashes.insert(row.hash.clone()) {
                bail!(
                    "UNIQUE constraint failed: {}.__row_hash ({})",
                    table.name,
                    row.hash
                );
            }
            stored.rows.push(row.fields.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn record_file_import(&mut self, record: &FileHashRecord) -> Result<()> {
        if self.staged.files.contains_key(&record.file_hash) {
            bail!("File hash already registered: {}", record.file_hash);
        }
        self.staged
            .files
            .insert(record.file_hash.clone(), record.clone());
        self.staged.file_order.push(record.file_hash.clone());
        Ok(())
    }

    async fn upgrade_file_import(&mut self, file_hash: &str, row_count: u64) -> Result<()> {
        match self.staged.files.get_mut(file_hash) {
            Some(record) if record.completeness == Completeness::Partial => {
                record.completeness = Completeness::Complete;
                record.row_count = row_count;
                Ok(())
            }
            Some(_) => bail!("File hash {} is not a partial import", file_hash),
            None => bail!("File hash not registered: {}", file_hash),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
