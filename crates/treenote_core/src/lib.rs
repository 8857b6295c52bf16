//! Core domain logic for TreeNote.
//! This crate is the single source of truth for the outline tree, its
//! derived views and its persistence.

pub mod db;
pub mod logging;
pub mod model;
pub mod search;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;
pub mod tags;
pub mod transfer;
pub mod tree;
pub mod view;

pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::change::{ChangeMethod, ChangeRecord, Document};
pub use model::field::{FieldKind, FieldValue};
pub use model::item::{Item, ItemColor, ItemId, ItemType, ItemValidationError, ROOT_ID};
pub use search::{Query, QueryError, SortKey};
pub use service::{ItemService, BOOKMARKS_COLLECTION};
pub use session::{DatabaseBookmark, Session, SessionConfig, SessionError, SessionState};
pub use store::{DocumentStore, SqliteDocumentStore, StoreError, StoreResult};
pub use sync::{ReplicationEndpoint, ReplicationError, Replicator, StoreEndpoint};
pub use tags::{TagIndex, TagNode};
pub use transfer::{
    export_json, export_outline, import_json, paste_outline, TransferError, TransferResult,
};
pub use tree::{
    Origin, ReplayOutcome, SharedTree, TreeError, TreeEvent, TreeModel, TreeResult,
};
pub use view::{FilterView, FlattenView, Row, RowSource};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
