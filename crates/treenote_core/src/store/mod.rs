//! Document store contracts.
//!
//! # Responsibility
//! - Define the `DocumentStore` boundary the tree model writes through.
//! - Define change-feed and change-log shapes used by replay and replication.
//!
//! # Invariants
//! - A `put_batch` is all-or-nothing and its documents are delivered to
//!   subscribers, in order, before the call returns.
//! - `changes_since` only returns locally-originated writes.
//! - A saved replication cursor never moves backwards.

use crate::db::DbError;
use crate::model::change::Document;
use crate::model::item::ItemId;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Receiver;

pub mod sqlite_store;

pub use sqlite_store::SqliteDocumentStore;

/// Origin tag stored in the change log for writes made through `put`.
pub const LOCAL_ORIGIN: &str = "local";

/// Result type used by document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from document store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Stored body cannot be encoded or decoded as a document.
    Serialization(serde_json::Error),
    /// Collection has not been created.
    UnknownCollection(String),
    /// Collection name is blank.
    InvalidCollectionName,
    /// Store lock was poisoned by a panicking writer.
    LockPoisoned,
    /// Store rejected the write for a reason outside SQLite.
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "invalid document body: {err}"),
            Self::UnknownCollection(name) => write!(f, "collection not found: {name}"),
            Self::InvalidCollectionName => write!(f, "collection name must not be blank"),
            Self::LockPoisoned => write!(f, "document store lock poisoned"),
            Self::Unavailable(message) => write!(f, "document store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// One entry of the append-only change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    /// Monotonic log sequence number; used as replication cursor.
    pub seq: i64,
    pub document: Document,
}

/// Persistence boundary for outline documents.
///
/// Implementations must be shareable across threads; the replicator reads
/// the change log from a background thread while the tree model writes.
pub trait DocumentStore: Send + Sync {
    /// Creates a collection. Returns `false` when it already existed.
    fn create(&self, collection: &str) -> StoreResult<bool>;
    /// Loads one document by id, tombstoned or not.
    fn get(&self, collection: &str, id: ItemId) -> StoreResult<Option<Document>>;
    /// Inserts or replaces one document.
    fn put(&self, collection: &str, document: &Document) -> StoreResult<()>;
    /// Inserts or replaces several documents atomically.
    fn put_batch(&self, collection: &str, documents: &[Document]) -> StoreResult<()>;
    /// Returns every document matching `predicate`, in first-write order.
    fn query(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Document) -> bool,
    ) -> StoreResult<Vec<Document>>;
    /// Registers a change-feed receiver for the collection.
    fn subscribe(&self, collection: &str) -> StoreResult<Receiver<Document>>;
    /// Returns locally-originated change log entries after `seq`.
    fn changes_since(&self, collection: &str, seq: i64) -> StoreResult<Vec<ChangeEntry>>;
    /// Writes documents received from another store.
    ///
    /// Creates the collection when missing. Entries are logged under `origin`
    /// and therefore never returned by `changes_since`.
    fn apply_replicated(
        &self,
        collection: &str,
        documents: &[Document],
        origin: &str,
    ) -> StoreResult<()>;
    /// Last change-log `seq` delivered to `endpoint`; `0` when never saved.
    fn replication_cursor(&self, collection: &str, endpoint: &str) -> StoreResult<i64>;
    /// Records that every local change up to `seq` reached `endpoint`.
    ///
    /// Lower values than the saved one are ignored.
    fn save_replication_cursor(&self, collection: &str, endpoint: &str, seq: i64) -> StoreResult<()>;
}
