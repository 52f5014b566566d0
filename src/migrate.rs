//! Bookkeeping schema.
//!
//! Data tables are created on demand by the import engine; only the two
//! registries exist up front:
//!
//! - `imported_files`: one row per distinct file content (file hash).
//! - `csv_tables`: one row per materialized data table, with its source
//!   base name and column list.

use anyhow::Result;
use sqlx::SqlitePool;

/// Create the bookkeeping tables if they do not exist yet.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imported_files (
            file_hash TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            table_name TEXT NOT NULL,
            imported_at INTEGER NOT NULL,
            row_count INTEGER NOT NULL,
            completeness TEXT NOT NULL CHECK (completeness IN ('complete', 'partial'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS csv_tables (
            table_name TEXT PRIMARY KEY,
            source_name TEXT NOT NULL UNIQUE,
            columns_json TEXT NOT NULL,
            has_header INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_imported_files_table ON imported_files(table_name)")
        .execute(pool)
        .await?;

    Ok(())
}
