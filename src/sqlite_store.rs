//! SQLite-backed [`Store`] implementation.
//!
//! Each source file name gets a data table with one `TEXT` column per CSV
//! column plus the internal `__row_hash` (unique index) and `__file_hash`
//! (index) columns. The `csv_tables` and `imported_files` bookkeeping
//! tables (see [`crate::migrate`]) hold the table registry and the file
//! hash registry.
//!
//! Keyword queries are paged by `rowid`, so rows stream in insertion order
//! without holding a whole table in memory. ASCII queries are pushed down
//! as a `LIKE` filter; other queries are filtered in Rust, since SQLite's
//! `LIKE` only folds ASCII case.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::path::Path;
use std::time::Duration;

use csvault_core::models::{
    Completeness, FileHashRecord, NormalizedRow, TableDescriptor, FILE_HASH_COLUMN,
    ROW_HASH_COLUMN,
};
use csvault_core::search::{keyword_where_clause, KeywordQuery};
use csvault_core::store::{RowStream, Store, StoreTx};
use csvault_core::table::quote_ident;

use crate::migrate;

/// Rows fetched per keyword query round trip.
const PAGE_SIZE: i64 = 256;

const MAX_CONNECTIONS: u32 = 5;

/// How long a statement waits on a locked database before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path`, creating the file and its directory if
    /// needed, and apply the bookkeeping schema.
    ///
    /// The database runs in WAL mode; writers wait up to
    /// [`BUSY_TIMEOUT`] for a lock held by another process.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        migrate::apply(&pool)
            .await
            .with_context(|| format!("Failed to prepare schema in {}", path.display()))?;
        Ok(Self { pool })
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn table_from_row(row: &SqliteRow) -> Result<TableDescriptor> {
    let columns_json: String = row.try_get("columns_json")?;
    Ok(TableDescriptor {
        name: row.try_get("table_name")?,
        source_name: row.try_get("source_name")?,
        columns: serde_json::from_str(&columns_json)
            .with_context(|| format!("Corrupt column list: {}", columns_json))?,
        has_header: row.try_get("has_header")?,
    })
}

fn file_record_from_row(row: &SqliteRow) -> Result<FileHashRecord> {
    let completeness: String = row.try_get("completeness")?;
    let row_count: i64 = row.try_get("row_count")?;
    Ok(FileHashRecord {
        file_hash: row.try_get("file_hash")?,
        source_path: row.try_get("source_path")?,
        table_name: row.try_get("table_name")?,
        imported_at: row.try_get("imported_at")?,
        row_count: row_count as u64,
        completeness: completeness.parse()?,
    })
}

const TABLE_COLUMNS: &str = "table_name, source_name, columns_json, has_header";
const FILE_COLUMNS: &str =
    "file_hash, source_path, table_name, imported_at, row_count, completeness";

async fn fetch_table(
    conn: &mut SqliteConnection,
    key: &str,
    value: &str,
) -> Result<Option<TableDescriptor>> {
    let sql = format!("SELECT {} FROM csv_tables WHERE {} = ?", TABLE_COLUMNS, key);
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(table_from_row).transpose()
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to open transaction")?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let sql = format!("SELECT {} FROM csv_tables ORDER BY rowid", TABLE_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(table_from_row).collect()
    }

    async fn table_by_name(&self, name: &str) -> Result<Option<TableDescriptor>> {
        let mut conn = self.pool.acquire().await?;
        fetch_table(&mut conn, "table_name", name).await
    }

    async fn file_records(&self) -> Result<Vec<FileHashRecord>> {
        let sql = format!("SELECT {} FROM imported_files ORDER BY rowid", FILE_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(file_record_from_row).collect()
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        if self.table_by_name(table).await?.is_none() {
            bail!("Unknown table: '{}'", table);
        }
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    fn query_keywords<'a>(
        &'a self,
        table: TableDescriptor,
        query: &'a KeywordQuery,
    ) -> RowStream<'a> {
        let column_list = table
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        // Non-ASCII queries scan every row and filter below.
        let (filter, binds) = if query.is_ascii() {
            let (clause, binds) = keyword_where_clause(&table.columns, query);
            (format!(" AND ({})", clause), binds)
        } else {
            (String::new(), Vec::new())
        };
        let page = PageQuery {
            sql: format!(
                "SELECT rowid, {} FROM {} WHERE rowid > ?{} ORDER BY rowid LIMIT {}",
                column_list,
                quote_ident(&table.name),
                filter,
                PAGE_SIZE
            ),
            binds,
            width: table.columns.len(),
            prefiltered: query.is_ascii(),
        };

        let pool = &self.pool;
        stream::try_unfold(Some(0i64), move |after| next_page(pool, query, page.clone(), after))
            .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<_, anyhow::Error>)))
            .try_flatten()
            .boxed()
    }
}

/// Fetch the page after rowid `after`; `None` once the table is exhausted.
async fn next_page(
    pool: &SqlitePool,
    query: &KeywordQuery,
    page: PageQuery,
    after: Option<i64>,
) -> Result<Option<(Vec<Vec<String>>, Option<i64>)>> {
    let Some(after) = after else {
        return Ok(None);
    };
    let (rows, next) = page.fetch(pool, after).await?;
    let rows = rows
        .into_iter()
        .map(|(_, values)| values)
        .filter(|values| page.prefiltered || query.matches(values))
        .collect();
    Ok(Some((rows, next)))
}

/// One page of a keyword scan.
#[derive(Clone)]
struct PageQuery {
    sql: String,
    binds: Vec<String>,
    width: usize,
    /// Whether `sql` already applies the keyword filter.
    prefiltered: bool,
}

impl PageQuery {
    /// Rows after `after`, plus the last rowid seen (`None` when the page
    /// came back short, i.e. the table is exhausted).
    async fn fetch(
        &self,
        pool: &SqlitePool,
        after: i64,
    ) -> Result<(Vec<(i64, Vec<String>)>, Option<i64>)> {
        let mut q = sqlx::query(&self.sql).bind(after);
        for value in &self.binds {
            q = q.bind(value);
        }
        let rows = q.fetch_all(pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let rowid: i64 = row.try_get(0)?;
            let mut values = Vec::with_capacity(self.width);
            for i in 0..self.width {
                let value: Option<String> = row.try_get(i + 1)?;
                values.push(value.unwrap_or_default());
            }
            out.push((rowid, values));
        }

        let last = if (out.len() as i64) < PAGE_SIZE {
            None
        } else {
            out.last().map(|(rowid, _)| *rowid)
        };
        Ok((out, last))
    }
}

/// An open SQLite transaction. Dropping it rolls back.
struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn file_record(&mut self, file_hash: &str) -> Result<Option<FileHashRecord>> {
        let sql = format!("SELECT {} FROM imported_files WHERE file_hash = ?", FILE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(file_hash)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(file_record_from_row).transpose()
    }

    async fn table_by_name(&mut self, name: &str) -> Result<Option<TableDescriptor>> {
        fetch_table(&mut self.tx, "table_name", name).await
    }

    async fn table_for_source(&mut self, source_name: &str) -> Result<Option<TableDescriptor>> {
        fetch_table(&mut self.tx, "source_name", source_name).await
    }

    async fn name_in_use(&mut self, name: &str) -> Result<bool> {
        // Tables and indexes share one namespace, so the indexes a new
        // table would create count too.
        let in_use: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE lower(name) IN (lower(?1), lower('idx_' || ?1 || '_row_hash'), lower('idx_' || ?1 || '_file_hash')))
                OR EXISTS(SELECT 1 FROM csv_tables WHERE lower(table_name) = lower(?1))",
        )
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(in_use)
    }

    async fn create_table_if_absent(&mut self, table: &TableDescriptor) -> Result<bool> {
        if fetch_table(&mut self.tx, "table_name", &table.name)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let mut columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} TEXT NOT NULL DEFAULT ''", quote_ident(c)))
            .collect();
        columns.push(format!("{} TEXT NOT NULL", quote_ident(ROW_HASH_COLUMN)));
        columns.push(format!("{} TEXT NOT NULL", quote_ident(FILE_HASH_COLUMN)));

        let ident = quote_ident(&table.name);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            ident,
            columns.join(", ")
        ))
        .execute(&mut *self.tx)
        .await?;
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("idx_{}_row_hash", table.name)),
            ident,
            quote_ident(ROW_HASH_COLUMN)
        ))
        .execute(&mut *self.tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("idx_{}_file_hash", table.name)),
            ident,
            quote_ident(FILE_HASH_COLUMN)
        ))
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            "INSERT INTO csv_tables (table_name, source_name, columns_json, has_header, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&table.name)
        .bind(&table.source_name)
        .bind(serde_json::to_string(&table.columns)?)
        .bind(table.has_header)
        .bind(Utc::now().timestamp())
        .execute(&mut *self.tx)
        .await?;

        Ok(true)
    }

    async fn has_row_hash(&mut self, table: &str, row_hash: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?)",
            quote_ident(table),
            quote_ident(ROW_HASH_COLUMN)
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(row_hash)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn insert_rows(
        &mut self,
        table: &TableDescriptor,
        file_hash: &str,
        rows: &[NormalizedRow],
    ) -> Result<u64> {
        let mut columns: Vec<String> = table.columns.iter().map(|c| quote_ident(c)).collect();
        columns.push(quote_ident(ROW_HASH_COLUMN));
        columns.push(quote_ident(FILE_HASH_COLUMN));
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table.name),
            columns.join(", "),
            placeholders
        );

        let mut inserted = 0u64;
        for row in rows {
            if row.fields.len() != table.columns.len() {
                bail!(
                    "Row from line {} has {} fields, table '{}' has {} columns",
                    row.line,
                    row.fields.len(),
                    table.name,
                    table.columns.len()
                );
            }
            let mut q = sqlx::query(&sql);
            for field in &row.fields {
                q = q.bind(field);
            }
            q.bind(&row.hash)
                .bind(file_hash)
                .execute(&mut *self.tx)
                .await
                .with_context(|| format!("Failed to insert line {} into '{}'", row.line, table.name))?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn record_file_import(&mut self, record: &FileHashRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO imported_files ({}) VALUES (?, ?, ?, ?, ?, ?)",
            FILE_COLUMNS
        ))
        .bind(&record.file_hash)
        .bind(&record.source_path)
        .bind(&record.table_name)
        .bind(record.imported_at)
        .bind(record.row_count as i64)
        .bind(record.completeness.as_str())
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to register file hash {}", record.file_hash))?;
        Ok(())
    }

    async fn upgrade_file_import(&mut self, file_hash: &str, row_count: u64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE imported_files SET completeness = ?, row_count = ? WHERE file_hash = ? AND completeness = ?",
        )
        .bind(Completeness::Complete.as_str())
        .bind(row_count as i64)
        .bind(file_hash)
        .bind(Completeness::Partial.as_str())
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            bail!("No partial import registered for file hash {}", file_hash);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }
}
