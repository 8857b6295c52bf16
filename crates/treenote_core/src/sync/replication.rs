//! Continuous one-way replication of locally-originated changes.
//!
//! # Responsibility
//! - Read the store's local change log after a cursor.
//! - Push the documents to a `ReplicationEndpoint` on a background thread.
//!
//! # Invariants
//! - The cursor only advances after the endpoint accepted a batch.
//! - The cursor is saved per `(collection, endpoint)`; a restarted loop
//!   resumes from it instead of re-sending older copies of documents.
//! - One outage logs one warning, however many attempts fail.
//! - Replicated documents are never pushed back to their origin.

use crate::model::change::Document;
use crate::store::{DocumentStore, StoreError, LOCAL_ORIGIN};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest number of documents pushed in one endpoint call.
pub const MAX_BATCH_DOCUMENTS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    ConnectionRefused(String),
    Unauthorized(String),
    Other(String),
}

impl ReplicationError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionRefused(_) => "connection_refused",
            Self::Unauthorized(_) => "unauthorized",
            Self::Other(_) => "other",
        }
    }
}

impl Display for ReplicationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionRefused(message) => write!(f, "connection refused: {message}"),
            Self::Unauthorized(message) => write!(f, "unauthorized: {message}"),
            Self::Other(message) => write!(f, "replication failed: {message}"),
        }
    }
}

impl Error for ReplicationError {}

impl From<StoreError> for ReplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(message) => Self::ConnectionRefused(message),
            StoreError::LockPoisoned => Self::ConnectionRefused(value.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

/// Receiving side of replication.
pub trait ReplicationEndpoint: Send + Sync {
    /// Name used as origin tag and in log lines.
    fn name(&self) -> &str;

    /// Delivers documents in change-log order.
    fn push(&self, collection: &str, documents: &[Document]) -> Result<(), ReplicationError>;
}

/// Endpoint that writes into another `DocumentStore`.
pub struct StoreEndpoint {
    name: String,
    store: Arc<dyn DocumentStore>,
}

impl StoreEndpoint {
    /// # Errors
    /// - `Other` when `name` is blank or equals the local origin tag.
    pub fn new(name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Result<Self, ReplicationError> {
        let name = name.into().trim().to_string();
        if name.is_empty() || name == LOCAL_ORIGIN {
            return Err(ReplicationError::Other(format!(
                "invalid endpoint name `{name}`"
            )));
        }
        Ok(Self { name, store })
    }
}

impl ReplicationEndpoint for StoreEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, collection: &str, documents: &[Document]) -> Result<(), ReplicationError> {
        self.store
            .apply_replicated(collection, documents, &self.name)
            .map_err(ReplicationError::from)
    }
}

/// Pushes every local change after `cursor` and returns the new cursor.
///
/// On error the returned cursor is never past the last accepted batch.
pub fn replicate_once(
    store: &dyn DocumentStore,
    collection: &str,
    endpoint: &dyn ReplicationEndpoint,
    cursor: i64,
) -> Result<i64, (i64, ReplicationError)> {
    let entries = store
        .changes_since(collection, cursor)
        .map_err(|err| (cursor, ReplicationError::from(err)))?;
    let mut cursor = cursor;
    for batch in entries.chunks(MAX_BATCH_DOCUMENTS) {
        let documents: Vec<Document> = batch.iter().map(|entry| entry.document.clone()).collect();
        endpoint
            .push(collection, &documents)
            .map_err(|err| (cursor, err))?;
        if let Some(last) = batch.last() {
            cursor = last.seq;
        }
        debug!(
            "event=replicate_batch module=sync status=ok endpoint={} collection={} documents={} cursor={}",
            endpoint.name(),
            collection,
            documents.len(),
            cursor
        );
    }
    Ok(cursor)
}

fn load_cursor(store: &dyn DocumentStore, collection: &str, endpoint: &str) -> i64 {
    match store.replication_cursor(collection, endpoint) {
        Ok(cursor) => cursor,
        Err(err) => {
            warn!(
                "event=replication_cursor module=sync status=error endpoint={} collection={} action=load error={}",
                endpoint, collection, err
            );
            0
        }
    }
}

fn save_cursor(store: &dyn DocumentStore, collection: &str, endpoint: &str, cursor: i64) {
    if let Err(err) = store.save_replication_cursor(collection, endpoint, cursor) {
        warn!(
            "event=replication_cursor module=sync status=error endpoint={} collection={} action=save cursor={} error={}",
            endpoint, collection, cursor, err
        );
    }
}

/// Snapshot of a replicator's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStatus {
    pub cursor: i64,
    /// Error of the current outage; cleared on recovery.
    pub last_error: Option<ReplicationError>,
}

/// Background replication loop.
pub struct Replicator {
    status: Arc<Mutex<ReplicationStatus>>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Replicator {
    /// Starts replicating `collection` from the endpoint's saved cursor.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        collection: &str,
        endpoint: Arc<dyn ReplicationEndpoint>,
        interval: Duration,
    ) -> Self {
        let status = Arc::new(Mutex::new(ReplicationStatus::default()));
        let (stop, stop_signal) = mpsc::channel::<()>();
        let collection = collection.to_string();
        let thread_status = Arc::clone(&status);

        let handle = thread::spawn(move || {
            info!(
                "event=replication module=sync status=start endpoint={} collection={}",
                endpoint.name(),
                collection
            );
            let mut cursor = load_cursor(store.as_ref(), &collection, endpoint.name());
            let mut in_outage = false;
            loop {
                let outcome = replicate_once(store.as_ref(), &collection, endpoint.as_ref(), cursor);
                let (next, error) = match outcome {
                    Ok(next) => (next, None),
                    Err((next, err)) => (next, Some(err)),
                };
                if next > cursor {
                    save_cursor(store.as_ref(), &collection, endpoint.name(), next);
                }
                cursor = next;

                match &error {
                    Some(err) if !in_outage => {
                        in_outage = true;
                        warn!(
                            "event=replication module=sync status=error endpoint={} collection={} error_code={} error={}",
                            endpoint.name(),
                            collection,
                            err.code(),
                            err
                        );
                    }
                    None if in_outage => {
                        in_outage = false;
                        info!(
                            "event=replication module=sync status=recovered endpoint={} collection={} cursor={}",
                            endpoint.name(),
                            collection,
                            cursor
                        );
                    }
                    _ => {}
                }
                if let Ok(mut snapshot) = thread_status.lock() {
                    snapshot.cursor = cursor;
                    snapshot.last_error = error;
                }

                match stop_signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!(
                "event=replication module=sync status=stop collection={} cursor={}",
                collection, cursor
            );
        });

        Self {
            status,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    pub fn status(&self) -> ReplicationStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Signals the loop and joins the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("event=replication module=sync status=error reason=thread_panicked");
            }
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::{replicate_once, ReplicationEndpoint, ReplicationError};
    use crate::model::change::Document;
    use crate::model::item::{Item, ItemType};
    use crate::store::{DocumentStore, SqliteDocumentStore};
    use std::sync::Mutex;

    struct FlakyEndpoint {
        fail: Mutex<bool>,
        received: Mutex<Vec<Document>>,
    }

    impl ReplicationEndpoint for FlakyEndpoint {
        fn name(&self) -> &str {
            "flaky"
        }

        fn push(&self, _collection: &str, documents: &[Document]) -> Result<(), ReplicationError> {
            if *self.fail.lock().unwrap() {
                return Err(ReplicationError::ConnectionRefused("offline".to_string()));
            }
            self.received.lock().unwrap().extend_from_slice(documents);
            Ok(())
        }
    }

    #[test]
    fn cursor_holds_during_outage_and_catches_up() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("items").unwrap();
        store
            .put("items", &Document::new(Item::new(ItemType::Note, "a"), None))
            .unwrap();
        let endpoint = FlakyEndpoint {
            fail: Mutex::new(true),
            received: Mutex::new(Vec::new()),
        };

        let (cursor, err) = replicate_once(&store, "items", &endpoint, 0).unwrap_err();
        assert_eq!(cursor, 0);
        assert_eq!(err.code(), "connection_refused");

        *endpoint.fail.lock().unwrap() = false;
        let cursor = replicate_once(&store, "items", &endpoint, cursor).unwrap();
        assert!(cursor > 0);
        assert_eq!(endpoint.received.lock().unwrap().len(), 1);
        assert_eq!(replicate_once(&store, "items", &endpoint, cursor).unwrap(), cursor);
    }
}
