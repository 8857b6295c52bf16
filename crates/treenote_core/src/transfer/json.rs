//! Flat JSON document import and export.

use crate::model::change::Document;
use crate::model::item::ROOT_ID;
use crate::store::DocumentStore;
use crate::transfer::{TransferError, TransferResult};
use log::{info, warn};
use std::collections::HashSet;

/// Bulk-inserts a JSON array of documents into a fresh collection.
///
/// Embedded change records are dropped. Returns the number of documents.
///
/// # Errors
/// - `CollectionNotEmpty` when the collection already holds documents.
/// - `Json`, `InvalidItem`, `DuplicateDocument` for bad input; nothing is
///   written in that case.
pub fn import_json(store: &dyn DocumentStore, collection: &str, json: &str) -> TransferResult<usize> {
    let parsed: Vec<Document> = serde_json::from_str(json)?;
    let mut seen = HashSet::with_capacity(parsed.len());
    let mut documents = Vec::with_capacity(parsed.len());
    for document in parsed {
        document.item.validate()?;
        if !seen.insert(document.id()) {
            return Err(TransferError::DuplicateDocument(document.id()));
        }
        documents.push(document.without_change());
    }
    if !seen.contains(&ROOT_ID) {
        warn!(
            "event=import_json module=transfer status=skip reason=no_root collection={}",
            collection
        );
    }

    if !store.create(collection)? && !store.query(collection, &|_: &Document| true)?.is_empty() {
        return Err(TransferError::CollectionNotEmpty(collection.to_string()));
    }
    store.put_batch(collection, &documents)?;
    info!(
        "event=import_json module=transfer status=ok collection={} documents={}",
        collection,
        documents.len()
    );
    Ok(documents.len())
}

/// Serializes every live document as a pretty JSON array.
pub fn export_json(store: &dyn DocumentStore, collection: &str) -> TransferResult<String> {
    let documents: Vec<Document> = store
        .query(collection, &|document: &Document| !document.item.deleted)?
        .iter()
        .map(Document::without_change)
        .collect();
    let json = serde_json::to_string_pretty(&documents)?;
    info!(
        "event=export_json module=transfer status=ok collection={} documents={}",
        collection,
        documents.len()
    );
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::{export_json, import_json};
    use crate::model::change::{ChangeRecord, Document};
    use crate::model::item::{Item, ItemType};
    use crate::store::{DocumentStore, SqliteDocumentStore};
    use crate::transfer::TransferError;

    #[test]
    fn export_skips_tombstones_and_strips_change() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("items").unwrap();
        let mut root = Item::root();
        let live = Item::new(ItemType::Task, "live");
        let mut gone = Item::new(ItemType::Note, "gone");
        gone.deleted = true;
        root.children = vec![live.id, gone.id];
        let change = ChangeRecord::added("host", root.id, 0, &[live.id, gone.id]);
        store
            .put_batch(
                "items",
                &[
                    Document::new(root, Some(change)),
                    Document::new(live, None),
                    Document::new(gone, None),
                ],
            )
            .unwrap();

        let json = export_json(&store, "items").unwrap();
        let values: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|value| value.get("change").is_none()));
        assert!(!json.contains("gone"));
    }

    #[test]
    fn import_rejects_populated_collection() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let json = serde_json::to_string(&[Document::new(Item::root(), None)]).unwrap();
        assert_eq!(import_json(&store, "items", &json).unwrap(), 1);
        assert!(matches!(
            import_json(&store, "items", &json),
            Err(TransferError::CollectionNotEmpty(_))
        ));
    }

    #[test]
    fn import_rejects_duplicate_ids_before_writing() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let item = Item::new(ItemType::Note, "twice");
        let json = serde_json::to_string(&[
            Document::new(item.clone(), None),
            Document::new(item, None),
        ])
        .unwrap();
        assert!(matches!(
            import_json(&store, "items", &json),
            Err(TransferError::DuplicateDocument(_))
        ));
        assert!(store.collections().unwrap().is_empty());
    }
}
