//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist documents as JSON bodies keyed by `(collection, doc_id)`.
//! - Append every write to `change_log` for replication cursors.
//! - Remember how far each replication endpoint has been served.
//! - Fan out written documents to change-feed subscribers.
//!
//! # Invariants
//! - `documents.is_deleted` mirrors the body's `deleted` flag.
//! - Subscribers are notified only after the transaction commits.
//! - Disconnected subscribers are pruned on the next notification.

use crate::db::{ensure_connection_ready, open_db, open_db_in_memory};
use crate::model::change::Document;
use crate::model::item::ItemId;
use crate::store::{ChangeEntry, DocumentStore, StoreError, StoreResult, LOCAL_ORIGIN};
use log::{debug, error};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

/// Document store over one migrated SQLite connection.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    subscribers: Mutex<HashMap<String, Vec<Sender<Document>>>>,
}

impl SqliteDocumentStore {
    /// Wraps a connection produced by `open_db`/`open_db_in_memory`.
    pub fn try_new(conn: Connection) -> StoreResult<Self> {
        ensure_connection_ready(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    /// Opens (and migrates) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::try_new(open_db(path)?)
    }

    /// Opens a fresh in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::try_new(open_db_in_memory()?)
    }

    /// Lists collection names in creation order.
    pub fn collections(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY rowid ASC;")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn lock_conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_documents(
        &self,
        collection: &str,
        documents: &[Document],
        origin: &str,
        create_missing: bool,
    ) -> StoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.lock_conn()?;
            let tx = conn.transaction()?;
            if create_missing {
                insert_collection(&tx, collection)?;
            } else if !collection_exists(&tx, collection)? {
                return Err(StoreError::UnknownCollection(collection.to_string()));
            }
            for document in documents {
                upsert_document(&tx, collection, document, origin)?;
            }
            tx.commit()?;
        }
        debug!(
            "event=store_write module=store status=ok collection={} origin={} count={}",
            collection,
            origin,
            documents.len()
        );
        self.notify(collection, documents);
        Ok(())
    }

    fn notify(&self, collection: &str, documents: &[Document]) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(senders) = subscribers.get_mut(collection) {
            senders.retain(|sender| {
                documents
                    .iter()
                    .all(|document| sender.send(document.clone()).is_ok())
            });
        }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn create(&self, collection: &str) -> StoreResult<bool> {
        if collection.trim().is_empty() {
            return Err(StoreError::InvalidCollectionName);
        }
        let conn = self.lock_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO collections (name, created_at)
             VALUES (?1, (strftime('%s', 'now') * 1000));",
            [collection],
        )?;
        Ok(inserted == 1)
    }

    fn get(&self, collection: &str, id: ItemId) -> StoreResult<Option<Document>> {
        let conn = self.lock_conn()?;
        let body = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2;",
                params![collection, id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn put(&self, collection: &str, document: &Document) -> StoreResult<()> {
        self.write_documents(collection, std::slice::from_ref(document), LOCAL_ORIGIN, false)
    }

    fn put_batch(&self, collection: &str, documents: &[Document]) -> StoreResult<()> {
        self.write_documents(collection, documents, LOCAL_ORIGIN, false)
    }

    fn query(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Document) -> bool,
    ) -> StoreResult<Vec<Document>> {
        let conn = self.lock_conn()?;
        if !collection_exists(&conn, collection)? {
            return Err(StoreError::UnknownCollection(collection.to_string()));
        }
        let mut stmt = conn
            .prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY rowid ASC;")?;
        let bodies = stmt
            .query_map([collection], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut matches = Vec::new();
        for body in bodies {
            let document: Document = serde_json::from_str(&body)?;
            if predicate(&document) {
                matches.push(document);
            }
        }
        Ok(matches)
    }

    fn subscribe(&self, collection: &str) -> StoreResult<Receiver<Document>> {
        let (sender, receiver) = mpsc::channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        subscribers
            .entry(collection.to_string())
            .or_default()
            .push(sender);
        Ok(receiver)
    }

    fn changes_since(&self, collection: &str, seq: i64) -> StoreResult<Vec<ChangeEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, body
             FROM change_log
             WHERE collection = ?1 AND origin = ?2 AND seq > ?3
             ORDER BY seq ASC;",
        )?;
        let rows = stmt
            .query_map(params![collection, LOCAL_ORIGIN, seq], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(seq, body)| -> StoreResult<ChangeEntry> {
                Ok(ChangeEntry {
                    seq,
                    document: serde_json::from_str(&body)?,
                })
            })
            .collect()
    }

    fn apply_replicated(
        &self,
        collection: &str,
        documents: &[Document],
        origin: &str,
    ) -> StoreResult<()> {
        if origin == LOCAL_ORIGIN {
            error!(
                "event=store_replicate module=store status=error collection={} error_code=local_origin_rejected",
                collection
            );
            return Err(StoreError::Unavailable(
                "replicated writes must not use the local origin".to_string(),
            ));
        }
        self.write_documents(collection, documents, origin, true)
    }

    fn replication_cursor(&self, collection: &str, endpoint: &str) -> StoreResult<i64> {
        let conn = self.lock_conn()?;
        let seq = conn
            .query_row(
                "SELECT seq FROM replication_cursors WHERE collection = ?1 AND endpoint = ?2;",
                params![collection, endpoint],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0))
    }

    fn save_replication_cursor(&self, collection: &str, endpoint: &str, seq: i64) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        if !collection_exists(&conn, collection)? {
            return Err(StoreError::UnknownCollection(collection.to_string()));
        }
        conn.execute(
            "INSERT INTO replication_cursors (collection, endpoint, seq, updated_at)
             VALUES (?1, ?2, ?3, (strftime('%s', 'now') * 1000))
             ON CONFLICT(collection, endpoint) DO UPDATE SET
                seq = excluded.seq,
                updated_at = excluded.updated_at
             WHERE excluded.seq > replication_cursors.seq;",
            params![collection, endpoint, seq],
        )?;
        debug!(
            "event=replication_cursor module=store status=ok collection={} endpoint={} seq={}",
            collection, endpoint, seq
        );
        Ok(())
    }
}

fn collection_exists(conn: &Connection, collection: &str) -> StoreResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1);",
        [collection],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn insert_collection(tx: &Transaction<'_>, collection: &str) -> StoreResult<()> {
    tx.execute(
        "INSERT OR IGNORE INTO collections (name, created_at)
         VALUES (?1, (strftime('%s', 'now') * 1000));",
        [collection],
    )?;
    Ok(())
}

fn upsert_document(
    tx: &Transaction<'_>,
    collection: &str,
    document: &Document,
    origin: &str,
) -> StoreResult<()> {
    let body = serde_json::to_string(document)?;
    let doc_id = document.id().to_string();
    tx.execute(
        "INSERT INTO change_log (collection, doc_id, body, origin, created_at)
         VALUES (?1, ?2, ?3, ?4, (strftime('%s', 'now') * 1000));",
        params![collection, doc_id, body, origin],
    )?;
    let seq = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO documents (collection, doc_id, body, is_deleted, seq, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, (strftime('%s', 'now') * 1000))
         ON CONFLICT(collection, doc_id) DO UPDATE SET
            body = excluded.body,
            is_deleted = excluded.is_deleted,
            seq = excluded.seq,
            updated_at = excluded.updated_at;",
        params![
            collection,
            doc_id,
            body,
            bool_to_int(document.item.deleted),
            seq
        ],
    )?;
    Ok(())
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteDocumentStore;
    use crate::model::change::{ChangeRecord, Document};
    use crate::model::item::{Item, ItemType};
    use crate::store::{DocumentStore, StoreError};

    fn doc(text: &str) -> Document {
        Document::new(Item::new(ItemType::Note, text), None)
    }

    #[test]
    fn put_requires_created_collection() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let err = store.put("missing", &doc("a")).unwrap_err();
        assert!(matches!(err, StoreError::UnknownCollection(_)));
    }

    #[test]
    fn put_batch_notifies_subscribers_in_order() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        assert!(store.create("outline").unwrap());
        assert!(!store.create("outline").unwrap());
        let feed = store.subscribe("outline").unwrap();

        let first = doc("first");
        let second = doc("second");
        store
            .put_batch("outline", &[first.clone(), second.clone()])
            .unwrap();

        let delivered: Vec<_> = feed.try_iter().collect();
        assert_eq!(delivered, vec![first.clone(), second]);
        assert_eq!(store.get("outline", first.id()).unwrap(), Some(first));
    }

    #[test]
    fn replicated_writes_are_not_in_local_change_log() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("outline").unwrap();
        let local = Document::new(
            Item::new(ItemType::Task, "local"),
            Some(ChangeRecord::updated("host-a")),
        );
        store.put("outline", &local).unwrap();
        store
            .apply_replicated("outline", &[doc("remote")], "replica:backup")
            .unwrap();

        let changes = store.changes_since("outline", 0).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].document, local);
        assert!(store.changes_since("outline", changes[0].seq).unwrap().is_empty());
        assert_eq!(store.query("outline", &|_: &Document| true).unwrap().len(), 2);
    }

    #[test]
    fn replication_cursor_is_per_endpoint_and_monotonic() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("outline").unwrap();
        assert_eq!(store.replication_cursor("outline", "backup").unwrap(), 0);

        store.save_replication_cursor("outline", "backup", 7).unwrap();
        store.save_replication_cursor("outline", "backup", 3).unwrap();
        assert_eq!(store.replication_cursor("outline", "backup").unwrap(), 7);
        assert_eq!(store.replication_cursor("outline", "laptop").unwrap(), 0);
        assert!(matches!(
            store.save_replication_cursor("missing", "backup", 1),
            Err(StoreError::UnknownCollection(_))
        ));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("outline").unwrap();
        drop(store.subscribe("outline").unwrap());
        store.put("outline", &doc("a")).unwrap();
        let subscribers = store.subscribers.lock().unwrap();
        assert!(subscribers.get("outline").unwrap().is_empty());
    }
}
