//! Search command: keyword search over every imported table.

use anyhow::Result;
use futures::StreamExt;
use tracing::warn;

use csvault_core::models::TableRow;
use csvault_core::search::{search, KeywordQuery, SearchEvent};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Print up to `limit` matching rows (default `search.limit`).
///
/// Returns the number of rows printed.
pub async fn run_search(
    config: &Config,
    keywords: &[String],
    limit: Option<usize>,
    tables: Vec<String>,
    json: bool,
) -> Result<usize> {
    let query = KeywordQuery::new(keywords);
    let limit = limit.unwrap_or(config.search.limit);
    let tables = if tables.is_empty() { None } else { Some(tables) };
    let options = config.search.to_options(tables);

    let store = SqliteStore::open(&config.db.path).await?;

    let mut shown = 0usize;
    {
        let mut events = search(&store, &query, &options).await?;
        while shown < limit {
            let Some(event) = events.next().await else {
                break;
            };
            match event {
                SearchEvent::Row(row) => {
                    shown += 1;
                    if json {
                        println!("{}", serde_json::to_string(&row)?);
                    } else {
                        println!("{}", format_row(&row));
                    }
                }
                SearchEvent::TableError { table, error } => {
                    warn!(table = %table, error = %error, "Search skipped table");
                    eprintln!("warning: table {}: {}", table, error);
                }
            }
        }
    }

    if shown == 0 && !json {
        println!("No matches found.");
    }

    store.close().await;
    Ok(shown)
}

/// `[table] col=value | col=value`
fn format_row(row: &TableRow) -> String {
    let cells: Vec<String> = row
        .columns
        .iter()
        .zip(row.values.iter())
        .map(|(c, v)| format!("{}={}", c, v))
        .collect();
    format!("[{}] {}", row.table, cells.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_row() {
        let row = TableRow {
            table: "csv_people".to_string(),
            columns: vec!["name".to_string(), "age".to_string()],
            values: vec!["Alice".to_string(), "30".to_string()],
        };
        assert_eq!(format_row(&row), "[csv_people] name=Alice | age=30");
    }
}
