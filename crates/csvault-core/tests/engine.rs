use std::path::PathBuf;

use chrono::Utc;
use futures::StreamExt;

use csvault_core::error::ImportError;
use csvault_core::import::{CancelFlag, FileStatus, ImportOptions, Importer, RunReport};
use csvault_core::models::{Completeness, SourceFile};
use csvault_core::search::{search, KeywordQuery, SearchEvent, SearchOptions};
use csvault_core::store::memory::InMemoryStore;
use csvault_core::store::Store;

fn source(name: &str) -> SourceFile {
    SourceFile {
        path: PathBuf::from("/data").join(name),
        size: 0,
        modified_at: Utc::now(),
    }
}

async fn import_all(
    store: &InMemoryStore,
    options: ImportOptions,
    files: &[(&str, &str)],
) -> RunReport {
    let mut importer = Importer::new(store, options, CancelFlag::new());
    for (name, content) in files {
        importer
            .import(&source(name), content.as_bytes())
            .await
            .unwrap();
    }
    importer.finish()
}

async fn import(store: &InMemoryStore, files: &[(&str, &str)]) -> RunReport {
    import_all(store, ImportOptions::default(), files).await
}

const PEOPLE: &str = "name,age\nalice,30\nbob,41\n";

#[tokio::test]
async fn test_identical_files_recorded_once() {
    let store = InMemoryStore::new();
    let report = import(&store, &[("people.csv", PEOPLE), ("copy.csv", PEOPLE)]).await;

    assert_eq!(report.files[0].status, FileStatus::Imported);
    assert_eq!(report.files[0].rows_inserted, 2);
    assert_eq!(report.files[1].status, FileStatus::Duplicate);
    assert_eq!(report.files[1].rows_inserted, 0);
    assert_eq!(report.files[1].table.as_deref(), Some("csv_people"));

    assert_eq!(store.file_records().await.unwrap().len(), 1);
    assert_eq!(store.list_tables().await.unwrap().len(), 1);
    assert_eq!(store.row_count("csv_people").await.unwrap(), 2);
}

#[tokio::test]
async fn test_repeated_rows_persisted_once() {
    let store = InMemoryStore::new();
    let report = import(
        &store,
        &[("people.csv", "name,age\nalice,30\nalice,30\nbob,41\n")],
    )
    .await;

    let file = &report.files[0];
    assert_eq!(file.rows_parsed, 3);
    assert_eq!(file.rows_inserted, 2);
    assert_eq!(file.duplicate_rows, 1);
    assert_eq!(store.row_count("csv_people").await.unwrap(), 2);

    // The registry counts parsed rows, not inserted ones.
    assert_eq!(store.file_records().await.unwrap()[0].row_count, 3);
}

#[tokio::test]
async fn test_reimport_after_complete_changes_nothing() {
    let store = InMemoryStore::new();
    import(&store, &[("people.csv", PEOPLE)]).await;
    let before = store.list_tables().await.unwrap();

    let report = import(&store, &[("people.csv", PEOPLE)]).await;
    assert_eq!(report.duplicates(), 1);
    assert_eq!(report.rows_inserted(), 0);
    assert_eq!(store.list_tables().await.unwrap(), before);
    assert_eq!(store.row_count("csv_people").await.unwrap(), 2);
}

#[tokio::test]
async fn test_changed_file_inserts_only_new_rows() {
    let store = InMemoryStore::new();
    import(&store, &[("people.csv", "name,age\nalice,30\n")]).await;
    let report = import(&store, &[("people.csv", PEOPLE)]).await;

    let file = &report.files[0];
    assert_eq!(file.status, FileStatus::Imported);
    assert_eq!(file.table.as_deref(), Some("csv_people"));
    assert_eq!(file.rows_inserted, 1);
    assert_eq!(file.duplicate_rows, 1);
    assert_eq!(store.row_count("csv_people").await.unwrap(), 2);
    assert_eq!(store.file_records().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_truncated_file_is_partial() {
    let store = InMemoryStore::new();
    let report = import(&store, &[("people.csv", "name,age\nalice,30\nbob,41\ncarol")]).await;

    let file = &report.files[0];
    assert_eq!(file.status, FileStatus::Partial);
    assert_eq!(file.rows_inserted, 2);
    assert_eq!(file.skipped_rows, 1);

    let records = store.file_records().await.unwrap();
    assert_eq!(records[0].completeness, Completeness::Partial);
    assert_eq!(records[0].table_name, "csv_people");

    let query = KeywordQuery::new(["carol"]);
    let hits: Vec<SearchEvent> = search(&store, &query, &SearchOptions::default())
        .await
        .unwrap()
        .collect()
        .await;
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_partial_retry_targets_recorded_table() {
    let store = InMemoryStore::new();
    let truncated = "name,age\nalice,30\nbob,41\ncarol";
    let report = import(&store, &[("a.csv", truncated), ("b.csv", truncated)]).await;

    let retry = &report.files[1];
    assert_eq!(retry.status, FileStatus::Partial);
    assert_eq!(retry.table.as_deref(), Some("csv_a"));
    assert_eq!(retry.rows_inserted, 0);
    assert_eq!(retry.duplicate_rows, 2);

    assert_eq!(store.list_tables().await.unwrap().len(), 1);
    let records = store.file_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].completeness, Completeness::Partial);
}

#[tokio::test]
async fn test_headerless_columns_are_stable() {
    let first = InMemoryStore::new();
    let second = InMemoryStore::new();
    import(&first, &[("codes.csv", "1,alpha\n2,beta\n")]).await;
    import(&second, &[("codes.csv", "1,alpha\n2,beta\n")]).await;

    let a = first.table_by_name("csv_codes").await.unwrap().unwrap();
    let b = second.table_by_name("csv_codes").await.unwrap().unwrap();
    assert_eq!(a.columns, vec!["col_1", "col_2"]);
    assert!(!a.has_header);
    assert_eq!(a, b);

    import(&first, &[("codes.csv", "3,gamma\n")]).await;
    assert_eq!(first.list_tables().await.unwrap(), vec![a]);
    assert_eq!(first.row_count("csv_codes").await.unwrap(), 3);
}

#[tokio::test]
async fn test_schema_conflict_fails_only_that_file() {
    let store = InMemoryStore::new();
    let report = import(
        &store,
        &[
            ("people.csv", PEOPLE),
            ("sub/people.csv", "name,age,city\ndave,50,x\n"),
            ("codes.csv", "1,alpha\n2,beta\n"),
        ],
    )
    .await;

    assert!(matches!(report.files[1].status, FileStatus::Failed(_)));
    assert_eq!(
        report.files[1].file_hash,
        csvault_core::hash::file_hash(b"name,age,city\ndave,50,x\n")
    );
    assert_eq!(report.files[2].status, FileStatus::Imported);
    assert!(report.has_failures());
    assert_eq!(report.failed(), 1);
    assert_eq!(store.row_count("csv_people").await.unwrap(), 2);
    assert_eq!(store.file_records().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_colliding_names_get_suffix() {
    let store = InMemoryStore::new();
    import(
        &store,
        &[("my-data.csv", PEOPLE), ("my_data.csv", "1,alpha,x\n2,beta,y\n")],
    )
    .await;

    let names: Vec<String> = store
        .list_tables()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["csv_my_data", "csv_my_data_2"]);
}

#[tokio::test]
async fn test_bookkeeping_names_are_never_reused() {
    let store = InMemoryStore::new();
    let options = ImportOptions {
        table_prefix: String::new(),
        ..ImportOptions::default()
    };
    let report = import_all(
        &store,
        options,
        &[("imported_files.csv", "a,b\nx,1\n"), ("CSV_Tables.csv", "a,b\ny,2\n")],
    )
    .await;

    assert_eq!(report.imported(), 2);
    assert_eq!(report.files[0].table.as_deref(), Some("imported_files_2"));
    assert_eq!(report.files[1].table.as_deref(), Some("csv_tables_2"));
}

#[tokio::test]
async fn test_stray_quote_loses_only_its_row() {
    let store = InMemoryStore::new();
    let mut content = String::from("id,name,note\n1,alice,\"oops\n");
    for i in 2..=200 {
        content.push_str(&format!("{},user{},fine\n", i, i));
    }
    let report = import(&store, &[("notes.csv", &content)]).await;

    let file = &report.files[0];
    assert_eq!(file.rows_inserted, 199);
    assert_eq!(file.skipped_rows, 1);
    assert_eq!(file.diagnostics[0].line, 2);
    assert_eq!(store.row_count("csv_notes").await.unwrap(), 199);

    let query = KeywordQuery::new(["user200"]);
    let hits: Vec<SearchEvent> = search(&store, &query, &SearchOptions::default())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_empty_files_leave_no_trace() {
    let store = InMemoryStore::new();
    let report = import(&store, &[("empty.csv", ""), ("header.csv", "name,city\n")]).await;

    assert_eq!(report.empty(), 2);
    assert!(store.list_tables().await.unwrap().is_empty());
    assert!(store.file_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let store = InMemoryStore::new();
    let options = ImportOptions {
        dry_run: true,
        ..ImportOptions::default()
    };
    let report = import_all(&store, options, &[("people.csv", PEOPLE)]).await;

    assert_eq!(report.files[0].status, FileStatus::Imported);
    assert_eq!(report.files[0].rows_inserted, 2);
    assert!(store.list_tables().await.unwrap().is_empty());
    assert!(store.file_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_rolls_back() {
    let store = InMemoryStore::new();
    let cancel = CancelFlag::new();
    let mut importer = Importer::new(&store, ImportOptions::default(), cancel.clone());
    importer
        .import(&source("people.csv"), PEOPLE.as_bytes())
        .await
        .unwrap();

    cancel.cancel();
    let err = importer
        .import(&source("codes.csv"), "1,alpha\n".as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Cancelled));

    let report = importer.finish();
    assert!(report.cancelled);
    assert_eq!(report.files.len(), 1);
    assert_eq!(store.list_tables().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_imported_rows_are_searchable() {
    let store = InMemoryStore::new();
    import(
        &store,
        &[
            ("people.csv", "name,code\nAlice,b42c\nBob,42\nalice,7\n"),
            ("notes.csv", "1,\"alice, 42\"\n2,nothing\n"),
        ],
    )
    .await;

    let query = KeywordQuery::new(["alice", "42"]);
    let events: Vec<SearchEvent> = search(&store, &query, &SearchOptions::default())
        .await
        .unwrap()
        .collect()
        .await;
    let hits: Vec<(String, Vec<String>)> = events
        .into_iter()
        .filter_map(|e| match e {
            SearchEvent::Row(row) => Some((row.table, row.values)),
            SearchEvent::TableError { .. } => None,
        })
        .collect();
    assert_eq!(
        hits,
        vec![
            (
                "csv_people".to_string(),
                vec!["Alice".to_string(), "b42c".to_string()]
            ),
            (
                "csv_notes".to_string(),
                vec!["1".to_string(), "alice, 42".to_string()]
            ),
        ]
    );
}
