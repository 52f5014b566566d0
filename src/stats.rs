//! Database statistics overview.
//!
//! Summarizes what has been imported: data tables with their row counts,
//! and the file hash registry with the completeness of each import. Used by
//! `csvault stats`.

use anyhow::Result;

use csvault_core::models::Completeness;
use csvault_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;

    let tables = store.list_tables().await?;
    let files = store.file_records().await?;
    let partial = files
        .iter()
        .filter(|f| f.completeness == Completeness::Partial)
        .count();

    let mut table_rows = Vec::with_capacity(tables.len());
    let mut total_rows = 0u64;
    for table in &tables {
        let rows = store.row_count(&table.name).await?;
        total_rows += rows;
        table_rows.push(rows);
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("csvault database stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Tables:      {}", tables.len());
    println!("  Rows:        {}", total_rows);
    println!("  Files:       {} ({} partial)", files.len(), partial);

    if !tables.is_empty() {
        println!();
        println!("  By table:");
        println!(
            "  {:<32} {:>8} {:>8}   {}",
            "TABLE", "COLUMNS", "ROWS", "SOURCE"
        );
        println!("  {}", "-".repeat(76));
        for (table, rows) in tables.iter().zip(&table_rows) {
            println!(
                "  {:<32} {:>8} {:>8}   {}",
                table.name,
                table.columns.len(),
                rows,
                table.source_name
            );
        }
    }

    if !files.is_empty() {
        println!();
        println!("  Imported files:");
        println!(
            "  {:<12} {:<9} {:>8}  {:<16}  {}",
            "HASH", "STATUS", "ROWS", "IMPORTED", "PATH"
        );
        println!("  {}", "-".repeat(76));
        for f in &files {
            println!(
                "  {:<12} {:<9} {:>8}  {:<16}  {}",
                &f.file_hash[..f.file_hash.len().min(12)],
                f.completeness.as_str(),
                f.row_count,
                format_ts_iso(f.imported_at),
                f.source_path
            );
        }
    }

    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
