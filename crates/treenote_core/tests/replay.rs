use std::sync::Arc;
use std::thread;
use std::time::Duration;
use treenote_core::tree::SharedTree;
use treenote_core::{
    ChangeRecord, Document, DocumentStore, FieldValue, Item, ItemId, ItemType, ReplayOutcome,
    SqliteDocumentStore, TreeError, TreeModel, ROOT_ID,
};
use uuid::Uuid;

type Shape = Vec<(ItemId, usize, String, bool, ItemType)>;

fn shared_store() -> Arc<dyn DocumentStore> {
    Arc::new(SqliteDocumentStore::open_in_memory().unwrap())
}

fn shape(model: &TreeModel) -> Shape {
    model
        .preorder(ROOT_ID, true)
        .into_iter()
        .map(|(id, depth)| {
            let item = model.item(id).unwrap();
            (id, depth, item.text.clone(), item.deleted, item.kind)
        })
        .collect()
}

fn note(model: &mut TreeModel, parent: ItemId, position: usize, text: &str) -> ItemId {
    model
        .insert_item(position, parent, Item::new(ItemType::Note, text), false)
        .unwrap()
}

fn last_seq(store: &Arc<dyn DocumentStore>) -> i64 {
    store
        .changes_since("outline", 0)
        .unwrap()
        .last()
        .map_or(0, |entry| entry.seq)
}

/// Re-applies every record written after `cursor` and asserts none of them
/// changes the tree.
fn replay_window(model: &mut TreeModel, store: &Arc<dyn DocumentStore>, cursor: i64) -> i64 {
    let before = shape(model);
    let entries = store.changes_since("outline", cursor).unwrap();
    for entry in &entries {
        let outcome = model.apply_remote_change(entry.document.clone()).unwrap();
        assert_ne!(outcome, ReplayOutcome::Applied, "{:?}", entry.document.change);
    }
    assert_eq!(shape(model), before);
    entries.last().map_or(cursor, |entry| entry.seq)
}

#[test]
fn second_model_converges_through_the_feed() {
    let store = shared_store();
    let mut local = TreeModel::open(Arc::clone(&store), "outline", "host-a").unwrap();
    let mut remote = TreeModel::open(Arc::clone(&store), "outline", "host-b").unwrap();

    let a = note(&mut local, ROOT_ID, 0, "A");
    let b = note(&mut local, ROOT_ID, 1, "B");
    let c = note(&mut local, ROOT_ID, 2, "C");
    let b1 = note(&mut local, b, 0, "B1");
    local.move_vertical(&[c], -1).unwrap();
    local.move_horizontal(&[c], 1).unwrap();
    local
        .set_field(b1, FieldValue::Type(ItemType::Task))
        .unwrap();
    local.set_field(a, FieldValue::Text("A!".to_string())).unwrap();
    local.set_deleted(b, true).unwrap();
    local.set_deleted(b, false).unwrap();
    local.remove_rows(b, 0, 1).unwrap();
    local.undo().unwrap();

    assert!(remote.pump() > 0);
    assert_eq!(local.pump(), 0);
    assert_eq!(shape(&remote), shape(&local));
    assert_eq!(remote.children(a), [c].as_slice());
}

#[test]
fn edits_flow_both_ways() {
    let store = shared_store();
    let mut left = TreeModel::open(Arc::clone(&store), "outline", "left").unwrap();
    let mut right = TreeModel::open(Arc::clone(&store), "outline", "right").unwrap();

    let a = note(&mut left, ROOT_ID, 0, "A");
    right.pump();
    let r = note(&mut right, a, 0, "from right");
    left.pump();
    right.pump();

    assert_eq!(left.children(a), [r].as_slice());
    assert_eq!(shape(&left), shape(&right));
}

#[test]
fn replaying_own_records_leaves_tree_unchanged() {
    let store = shared_store();
    let mut model = TreeModel::open(Arc::clone(&store), "outline", "host-a").unwrap();
    let mut cursor = last_seq(&store);

    let a = note(&mut model, ROOT_ID, 0, "A");
    let b = note(&mut model, ROOT_ID, 1, "B");
    let c = note(&mut model, ROOT_ID, 2, "C");
    model.pump();
    cursor = replay_window(&mut model, &store, cursor);

    model.move_vertical(&[c], -1).unwrap();
    model.pump();
    cursor = replay_window(&mut model, &store, cursor);

    model.move_horizontal(&[c], 1).unwrap();
    model.pump();
    cursor = replay_window(&mut model, &store, cursor);

    model.set_field(b, FieldValue::Estimate(Some(20))).unwrap();
    model.pump();
    cursor = replay_window(&mut model, &store, cursor);

    model.set_deleted(a, true).unwrap();
    model.pump();
    cursor = replay_window(&mut model, &store, cursor);

    model.remove_rows(ROOT_ID, 1, 1).unwrap();
    model.pump();
    replay_window(&mut model, &store, cursor);
}

#[test]
fn own_pending_records_are_acknowledged() {
    let store = shared_store();
    let mut model = TreeModel::open(Arc::clone(&store), "outline", "host-a").unwrap();
    let cursor = last_seq(&store);
    note(&mut model, ROOT_ID, 0, "A");

    let parent_record = store
        .changes_since("outline", cursor)
        .unwrap()
        .into_iter()
        .map(|entry| entry.document)
        .find(|document| document.id() == ROOT_ID)
        .unwrap();
    assert_eq!(
        model.apply_remote_change(parent_record.clone()).unwrap(),
        ReplayOutcome::Acknowledged
    );
    assert_eq!(
        model.apply_remote_change(parent_record).unwrap(),
        ReplayOutcome::AlreadyApplied
    );
}

#[test]
fn unknown_and_malformed_records_are_dropped() {
    let store = shared_store();
    let mut model = TreeModel::open(Arc::clone(&store), "outline", "host-a").unwrap();
    note(&mut model, ROOT_ID, 0, "A");
    let before = shape(&model);

    let stranger = Item::new(ItemType::Note, "stranger");
    let outcome = model
        .apply_remote_change(Document::new(
            stranger,
            Some(ChangeRecord::updated("host-z")),
        ))
        .unwrap();
    assert_eq!(outcome, ReplayOutcome::UnknownDocument);

    let bogus = ChangeRecord::added("host-z", ROOT_ID, 99, &[Uuid::new_v4()]);
    let result = model.apply_remote_change(Document::new(model.root().clone(), Some(bogus)));
    assert!(matches!(
        result,
        Err(TreeError::MalformedChangeRecord { .. })
    ));

    let plain = model.apply_remote_change(Document::new(model.root().clone(), None));
    assert_eq!(plain.unwrap(), ReplayOutcome::NoChange);
    assert_eq!(shape(&model), before);
}

#[test]
fn shared_tree_pump_applies_remote_edits() {
    let store = shared_store();
    let mut local = TreeModel::open(Arc::clone(&store), "outline", "host-a").unwrap();
    let remote = SharedTree::new(TreeModel::open(Arc::clone(&store), "outline", "host-b").unwrap());
    let pump = remote.spawn_pump(Duration::from_millis(5));

    let a = note(&mut local, ROOT_ID, 0, "A");
    let mut seen = false;
    for _ in 0..400 {
        if remote.with(|model| model.contains(a)) {
            seen = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    pump.stop();

    assert!(seen);
    assert_eq!(remote.with(|model| shape(model)), shape(&local));
}
