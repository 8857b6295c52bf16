use rusqlite::Connection;
use treenote_core::db::migrations::latest_version;
use treenote_core::db::{ensure_connection_ready, open_db, open_db_in_memory, DbError, REQUIRED_TABLES};

fn user_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap()
}

fn has_table(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
        [table],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn fresh_memory_store_is_ready() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(user_version(&conn), latest_version());
    for table in REQUIRED_TABLES {
        assert!(has_table(&conn, table), "missing table {table}");
    }
    ensure_connection_ready(&conn).unwrap();
}

#[test]
fn reopened_file_keeps_rows_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("treenote.sqlite3");

    let conn = open_db(&path).unwrap();
    conn.execute(
        "INSERT INTO collections (name, created_at) VALUES ('items', 0);",
        [],
    )
    .unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    assert_eq!(user_version(&conn), latest_version());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM collections;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn version_one_file_gains_later_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.sqlite3");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE collections (name TEXT PRIMARY KEY NOT NULL, created_at INTEGER NOT NULL);
         CREATE TABLE documents (
             collection TEXT NOT NULL, doc_id TEXT NOT NULL, body TEXT NOT NULL,
             is_deleted INTEGER NOT NULL DEFAULT 0, seq INTEGER NOT NULL,
             updated_at INTEGER NOT NULL, PRIMARY KEY (collection, doc_id));
         PRAGMA user_version = 1;",
    )
    .unwrap();
    assert!(!has_table(&conn, "change_log"));
    drop(conn);

    let conn = open_db(&path).unwrap();
    assert!(has_table(&conn, "change_log"));
    assert!(has_table(&conn, "replication_cursors"));
    ensure_connection_ready(&conn).unwrap();
}

#[test]
fn newer_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");
    let conn = Connection::open(&path).unwrap();
    conn.pragma_update(None, "user_version", 999).unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unmigrated_connection_fails_readiness_check() {
    let conn = Connection::open_in_memory().unwrap();

    assert!(matches!(
        ensure_connection_ready(&conn),
        Err(DbError::UninitializedConnection {
            actual_version: 0,
            ..
        })
    ));
}
