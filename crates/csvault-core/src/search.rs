//! Keyword search across every materialized table.
//!
//! A [`KeywordQuery`] matches a row when **every** keyword occurs, case
//! insensitively, as a substring of **at least one** user column. Keywords
//! may match different columns. Internal hash columns never take part.
//!
//! [`search`] resolves the target tables up front and returns a lazy
//! stream of [`SearchEvent`]s. Tables are scanned one after another, or
//! with up to `workers` tables in flight, in which case events of different
//! tables interleave. Rows of one table always arrive in insertion order.
//! A table that cannot be queried produces a [`SearchEvent::TableError`]
//! and the remaining tables are still searched.
//!
//! Backends that can push the predicate down use [`keyword_where_clause`],
//! which builds the equivalent SQL `LIKE` filter.

use anyhow::Result;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{TableDescriptor, TableRow};
use crate::store::Store;
use crate::table::quote_ident;

/// A normalized set of search keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordQuery {
    keywords: Vec<String>,
}

impl KeywordQuery {
    /// Lowercase, drop empty keywords, and remove repeats (first wins).
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !normalized.contains(&keyword) {
                normalized.push(keyword);
            }
        }
        Self {
            keywords: normalized,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Whether every keyword is plain ASCII.
    ///
    /// SQLite's `LIKE` only folds ASCII case, so non-ASCII queries must be
    /// filtered with [`matches`](Self::matches) instead.
    pub fn is_ascii(&self) -> bool {
        self.keywords.iter().all(|k| k.is_ascii())
    }

    /// Evaluate the query against a row's user column values.
    ///
    /// An empty query matches nothing.
    pub fn matches<S: AsRef<str>>(&self, values: &[S]) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let lowered: Vec<String> = values.iter().map(|v| v.as_ref().to_lowercase()).collect();
        self.keywords
            .iter()
            .all(|k| lowered.iter().any(|v| v.contains(k.as_str())))
    }
}

/// `%keyword%` with `\`, `%` and `_` escaped for `LIKE ... ESCAPE '\'`.
pub fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// SQL predicate equivalent to [`KeywordQuery::matches`] for ASCII
/// keywords, plus its bind values in placeholder order.
///
/// Each keyword becomes a parenthesized `OR` over all columns; the keyword
/// groups are joined with `AND`.
pub fn keyword_where_clause(columns: &[String], query: &KeywordQuery) -> (String, Vec<String>) {
    if columns.is_empty() || query.is_empty() {
        return ("0".to_string(), Vec::new());
    }

    let mut groups = Vec::with_capacity(query.keywords().len());
    let mut binds = Vec::with_capacity(query.keywords().len() * columns.len());
    for keyword in query.keywords() {
        let pattern = like_pattern(keyword);
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{} LIKE ? ESCAPE '\\'", quote_ident(c)))
            .collect();
        binds.extend(std::iter::repeat(pattern).take(columns.len()));
        groups.push(format!("({})", ors.join(" OR ")));
    }
    (groups.join(" AND "), binds)
}

/// Search tuning.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Tables scanned concurrently. `0` and `1` both mean sequential.
    pub workers: usize,
    /// Restrict the search to these table names.
    pub tables: Option<Vec<String>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            tables: None,
        }
    }
}

/// One item of a search result stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchEvent {
    Row(TableRow),
    TableError { table: String, error: String },
}

enum Target {
    Table(TableDescriptor),
    Missing(String),
}

/// Stream matching rows from every table (or the requested ones).
///
/// Only resolving the table list can fail; per-table failures surface as
/// [`SearchEvent::TableError`] events. Nothing is read from a table until
/// the stream reaches it, so a consumer that stops early (e.g. with
/// `take(limit)`) never scans the remaining tables.
pub async fn search<'a, S>(
    store: &'a S,
    query: &'a KeywordQuery,
    options: &SearchOptions,
) -> Result<BoxStream<'a, SearchEvent>>
where
    S: Store + ?Sized,
{
    if query.is_empty() {
        return Ok(stream::empty().boxed());
    }

    let targets = match &options.tables {
        Some(names) => {
            let mut targets = Vec::with_capacity(names.len());
            for name in names {
                targets.push(match store.table_by_name(name).await? {
                    Some(table) => Target::Table(table),
                    None => Target::Missing(name.clone()),
                });
            }
            targets
        }
        None => store
            .list_tables()
            .await?
            .into_iter()
            .map(Target::Table)
            .collect(),
    };
    debug!(
        tables = targets.len(),
        keywords = ?query.keywords(),
        workers = options.workers,
        "Starting search"
    );

    let per_table = stream::iter(
        targets
            .into_iter()
            .map(move |target| table_events(store, query, target)),
    );
    Ok(if options.workers <= 1 {
        per_table.flatten().boxed()
    } else {
        per_table.flatten_unordered(options.workers).boxed()
    })
}

fn table_events<'a, S>(
    store: &'a S,
    query: &'a KeywordQuery,
    target: Target,
) -> BoxStream<'a, SearchEvent>
where
    S: Store + ?Sized,
{
    match target {
        Target::Missing(name) => stream::once(future::ready(SearchEvent::TableError {
            error: format!("Unknown table: '{}'", name),
            table: name,
        }))
        .boxed(),
        Target::Table(table) => {
            let name = table.name.clone();
            let columns = table.columns.clone();
            store
                .query_keywords(table, query)
                .map(move |result| match result {
                    Ok(values) => SearchEvent::Row(TableRow {
                        table: name.clone(),
                        columns: columns.clone(),
                        values,
                    }),
                    Err(e) => {
                        warn!(table = %name, error = %format!("{:#}", e), "Table search failed");
                        SearchEvent::TableError {
                            table: name.clone(),
                            error: format!("{:#}", e),
                        }
                    }
                })
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::row_hash;
    use crate::models::NormalizedRow;
    use crate::store::memory::InMemoryStore;

    async fn store_with(tables: &[(&str, &[&[&str]])]) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for (name, rows) in tables {
            let width = rows.first().map(|r| r.len()).unwrap_or(1);
            let descriptor = TableDescriptor {
                name: name.to_string(),
                source_name: format!("{}.csv", name),
                columns: (1..=width).map(|i| format!("col_{}", i)).collect(),
                has_header: false,
            };
            tx.create_table_if_absent(&descriptor).await.unwrap();
            let rows: Vec<NormalizedRow> = rows
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let fields: Vec<String> = r.iter().map(|s| s.to_string()).collect();
                    NormalizedRow {
                        line: i + 1,
                        hash: row_hash(&fields),
                        fields,
                    }
                })
                .collect();
            tx.insert_rows(&descriptor, "f", &rows).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    fn row_values(events: &[SearchEvent]) -> Vec<(String, Vec<String>)> {
        events
            .iter()
            .filter_map(|e| match e {
                SearchEvent::Row(row) => Some((row.table.clone(), row.values.clone())),
                SearchEvent::TableError { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_query_normalization() {
        let query = KeywordQuery::new(["Alice", "", "  ", "alice", "42"]);
        assert_eq!(query.keywords(), &["alice".to_string(), "42".to_string()]);
        assert!(KeywordQuery::new(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_keywords_may_match_different_columns() {
        let query = KeywordQuery::new(["alice", "42"]);
        assert!(query.matches(&["Alice", "b42c"]));
        assert!(query.matches(&["ALICE42"]));
        assert!(!query.matches(&["Alice", "bob"]));
        assert!(!query.matches(&["bob", "42"]));
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        assert!(!KeywordQuery::new([""]).matches(&["anything"]));
    }

    #[test]
    fn test_non_ascii_matching() {
        let query = KeywordQuery::new(["ÉCOLE"]);
        assert!(!query.is_ascii());
        assert!(query.matches(&["Grande école"]));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn test_where_clause_shape() {
        let columns = vec!["name".to_string(), "id".to_string()];
        let (clause, binds) = keyword_where_clause(&columns, &KeywordQuery::new(["a", "b"]));
        assert_eq!(
            clause,
            "(\"name\" LIKE ? ESCAPE '\\' OR \"id\" LIKE ? ESCAPE '\\') AND \
             (\"name\" LIKE ? ESCAPE '\\' OR \"id\" LIKE ? ESCAPE '\\')"
        );
        assert_eq!(binds, vec!["%a%", "%a%", "%b%", "%b%"]);
    }

    #[tokio::test]
    async fn test_search_across_tables_in_order() {
        let store = store_with(&[
            ("people", &[&["Alice", "b42c"], &["Bob", "42"], &["alice", "420"]]),
            ("other", &[&["nothing", "here"]]),
        ])
        .await;
        let query = KeywordQuery::new(["alice", "42"]);
        let events: Vec<SearchEvent> = search(&store, &query, &SearchOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            row_values(&events),
            vec![
                ("people".to_string(), vec!["Alice".to_string(), "b42c".to_string()]),
                ("people".to_string(), vec!["alice".to_string(), "420".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_table_does_not_abort_search() {
        let store = store_with(&[("people", &[&["alice"]])]).await;
        let query = KeywordQuery::new(["alice"]);
        let options = SearchOptions {
            workers: 1,
            tables: Some(vec!["missing".to_string(), "people".to_string()]),
        };
        let events: Vec<SearchEvent> = search(&store, &query, &options)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SearchEvent::TableError { table, .. } if table == "missing"));
        assert_eq!(row_values(&events).len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_search_finds_same_rows() {
        let store = store_with(&[
            ("a", &[&["x1"], &["y"]]),
            ("b", &[&["x2"]]),
            ("c", &[&["x3"], &["x4"]]),
        ])
        .await;
        let query = KeywordQuery::new(["x"]);
        let options = SearchOptions {
            workers: 3,
            tables: None,
        };
        let events: Vec<SearchEvent> = search(&store, &query, &options)
            .await
            .unwrap()
            .collect()
            .await;
        let mut found: Vec<String> = row_values(&events)
            .into_iter()
            .map(|(_, v)| v[0].clone())
            .collect();
        found.sort();
        assert_eq!(found, vec!["x1", "x2", "x3", "x4"]);
    }

    #[tokio::test]
    async fn test_take_stops_early() {
        let store = store_with(&[("a", &[&["x1"], &["x2"], &["x3"]])]).await;
        let query = KeywordQuery::new(["x"]);
        let events: Vec<SearchEvent> = search(&store, &query, &SearchOptions::default())
            .await
            .unwrap()
            .take(2)
            .collect()
            .await;
        assert_eq!(events.len(), 2);
    }
}
