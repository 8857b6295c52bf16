use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use treenote_core::store::{ChangeEntry, StoreResult};
use treenote_core::tree::UNDO_STACK_LIMIT;
use treenote_core::{
    Document, DocumentStore, FieldValue, Item, ItemId, ItemType, SqliteDocumentStore, StoreError,
    TreeError, TreeModel, ROOT_ID,
};

/// Store whose writes can be switched off.
struct FailingStore {
    inner: SqliteDocumentStore,
    failing: AtomicBool,
}

impl FailingStore {
    fn new() -> Self {
        Self {
            inner: SqliteDocumentStore::open_in_memory().unwrap(),
            failing: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk detached".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for FailingStore {
    fn create(&self, collection: &str) -> StoreResult<bool> {
        self.inner.create(collection)
    }

    fn get(&self, collection: &str, id: ItemId) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id)
    }

    fn put(&self, collection: &str, document: &Document) -> StoreResult<()> {
        self.check()?;
        self.inner.put(collection, document)
    }

    fn put_batch(&self, collection: &str, documents: &[Document]) -> StoreResult<()> {
        self.check()?;
        self.inner.put_batch(collection, documents)
    }

    fn query(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Document) -> bool,
    ) -> StoreResult<Vec<Document>> {
        self.inner.query(collection, predicate)
    }

    fn subscribe(&self, collection: &str) -> StoreResult<Receiver<Document>> {
        self.inner.subscribe(collection)
    }

    fn changes_since(&self, collection: &str, seq: i64) -> StoreResult<Vec<ChangeEntry>> {
        self.inner.changes_since(collection, seq)
    }

    fn apply_replicated(
        &self,
        collection: &str,
        documents: &[Document],
        origin: &str,
    ) -> StoreResult<()> {
        self.check()?;
        self.inner.apply_replicated(collection, documents, origin)
    }

    fn replication_cursor(&self, collection: &str, endpoint: &str) -> StoreResult<i64> {
        self.inner.replication_cursor(collection, endpoint)
    }

    fn save_replication_cursor(&self, collection: &str, endpoint: &str, seq: i64) -> StoreResult<()> {
        self.check()?;
        self.inner.save_replication_cursor(collection, endpoint, seq)
    }
}

fn setup() -> TreeModel {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    TreeModel::open(store, "outline", "host-a").unwrap()
}

fn note(model: &mut TreeModel, parent: ItemId, position: usize, text: &str) -> ItemId {
    model
        .insert_item(position, parent, Item::new(ItemType::Note, text), false)
        .unwrap()
}

fn text(model: &TreeModel, id: ItemId) -> String {
    model.item(id).unwrap().text.clone()
}

#[test]
fn undo_and_redo_insert() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");

    assert!(model.undo().unwrap());
    assert!(!model.contains(a));
    assert!(model.children(ROOT_ID).is_empty());

    assert!(model.redo().unwrap());
    assert_eq!(model.children(ROOT_ID), [a].as_slice());
    assert!(!model.item(a).unwrap().deleted);
}

#[test]
fn undo_remove_restores_subtree_in_place() {
    let mut model = setup();
    note(&mut model, ROOT_ID, 0, "A");
    let b = note(&mut model, ROOT_ID, 1, "B");
    let b1 = note(&mut model, b, 0, "B1");
    note(&mut model, ROOT_ID, 2, "C");
    let order = model.children(ROOT_ID).to_vec();

    model.remove_rows(ROOT_ID, 1, 1).unwrap();
    assert!(!model.contains(b1));

    model.undo().unwrap();
    assert_eq!(model.children(ROOT_ID), order.as_slice());
    assert_eq!(model.children(b), [b1].as_slice());
    assert!(!model.item(b1).unwrap().deleted);

    model.redo().unwrap();
    assert!(!model.contains(b));
}

#[test]
fn undo_moves_and_field_edits() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let b = note(&mut model, ROOT_ID, 1, "B");

    model.move_vertical(&[b], -1).unwrap();
    model.move_horizontal(&[a], 1).unwrap();
    model.set_field(a, FieldValue::Text("A!".to_string())).unwrap();
    assert_eq!(model.parent_of(a), Some(b));

    model.undo().unwrap();
    assert_eq!(text(&model, a), "A");
    model.undo().unwrap();
    assert_eq!(model.children(ROOT_ID), [b, a].as_slice());
    model.undo().unwrap();
    assert_eq!(model.children(ROOT_ID), [a, b].as_slice());
    assert!(!model.undo().unwrap());

    model.redo().unwrap();
    model.redo().unwrap();
    model.redo().unwrap();
    assert_eq!(model.children(b), [a].as_slice());
    assert_eq!(text(&model, a), "A!");
    assert!(!model.redo().unwrap());
}

#[test]
fn undo_tombstone_restores_flags() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let a1 = note(&mut model, a, 0, "A1");
    model.set_deleted(a1, true).unwrap();
    model.set_deleted(a, true).unwrap();

    model.undo().unwrap();
    assert!(!model.item(a).unwrap().deleted);
    assert!(model.item(a1).unwrap().deleted);
}

#[test]
fn grouped_edits_undo_in_one_step() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let b = note(&mut model, ROOT_ID, 1, "B");

    model
        .grouped(|model| {
            model.set_field(a, FieldValue::Text("a :x".to_string()))?;
            model.set_field(b, FieldValue::Text("b :x".to_string()))?;
            model.move_vertical(&[b], -1)
        })
        .unwrap();

    model.undo().unwrap();
    assert_eq!(text(&model, a), "A");
    assert_eq!(text(&model, b), "B");
    assert_eq!(model.children(ROOT_ID), [a, b].as_slice());

    model.redo().unwrap();
    assert_eq!(text(&model, b), "b :x");
    assert_eq!(model.children(ROOT_ID), [b, a].as_slice());
}

#[test]
fn new_edit_clears_redo() {
    let mut model = setup();
    note(&mut model, ROOT_ID, 0, "A");
    model.undo().unwrap();
    assert!(model.can_redo());

    note(&mut model, ROOT_ID, 0, "B");
    assert!(!model.can_redo());
    assert!(!model.redo().unwrap());
}

#[test]
fn history_is_bounded() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    for step in 0..UNDO_STACK_LIMIT + 10 {
        model
            .set_field(a, FieldValue::Estimate(Some(step as u32 + 1)))
            .unwrap();
    }

    let mut undone = 0;
    while model.undo().unwrap() {
        undone += 1;
    }
    assert_eq!(undone, UNDO_STACK_LIMIT);
    assert_eq!(model.item(a).unwrap().estimate, Some(10));
}

#[test]
fn failed_write_reverts_edit() {
    let store = Arc::new(FailingStore::new());
    let shared: Arc<dyn DocumentStore> = store.clone();
    let mut model = TreeModel::open(shared, "outline", "host-a").unwrap();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let b = note(&mut model, ROOT_ID, 1, "B");
    let a1 = note(&mut model, a, 0, "A1");
    let events = model.subscribe();

    store.set_failing(true);
    assert!(matches!(
        model.insert_row(0, ROOT_ID),
        Err(TreeError::StoreUnavailable(_))
    ));
    assert!(matches!(
        model.move_vertical(&[b], -1),
        Err(TreeError::StoreUnavailable(_))
    ));
    assert!(matches!(
        model.move_horizontal(&[b], 1),
        Err(TreeError::StoreUnavailable(_))
    ));
    assert!(matches!(
        model.remove_rows(a, 0, 1),
        Err(TreeError::StoreUnavailable(_))
    ));
    assert!(matches!(
        model.set_field(a, FieldValue::Text("lost".to_string())),
        Err(TreeError::StoreUnavailable(_))
    ));

    assert_eq!(model.children(ROOT_ID), [a, b].as_slice());
    assert_eq!(model.children(a), [a1].as_slice());
    assert!(!model.item(a1).unwrap().deleted);
    assert_eq!(text(&model, a), "A");
    assert_eq!(model.len(), 4);
    assert!(events.try_recv().is_err());

    store.set_failing(false);
    model.undo().unwrap();
    assert!(!model.contains(a1));
    model.set_field(a, FieldValue::Text("kept".to_string())).unwrap();
    assert_eq!(text(&model, a), "kept");
}

fn two_hosts() -> (TreeModel, TreeModel) {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let a = TreeModel::open(Arc::clone(&store), "outline", "host-a").unwrap();
    let b = TreeModel::open(store, "outline", "host-b").unwrap();
    (a, b)
}

#[test]
fn undo_insert_after_remote_insert_removes_own_item() {
    let (mut a, mut b) = two_hosts();
    let x = note(&mut a, ROOT_ID, 0, "X");
    b.pump();
    let y = note(&mut b, ROOT_ID, 0, "Y");
    a.pump();
    assert_eq!(a.children(ROOT_ID), [y, x].as_slice());

    assert!(a.undo().unwrap());
    assert_eq!(a.children(ROOT_ID), [y].as_slice());
    assert!(!a.item(y).unwrap().deleted);
    assert!(a.item(x).unwrap().deleted);

    b.pump();
    assert_eq!(b.children(ROOT_ID), [y].as_slice());

    assert!(a.redo().unwrap());
    assert_eq!(a.children(ROOT_ID), [y, x].as_slice());
}

#[test]
fn undo_move_after_remote_insert_moves_same_block() {
    let (mut a, mut b) = two_hosts();
    let p = note(&mut a, ROOT_ID, 0, "P");
    let q = note(&mut a, ROOT_ID, 1, "Q");
    let r = note(&mut a, ROOT_ID, 2, "R");
    a.move_vertical(&[r], -1).unwrap();
    b.pump();
    assert_eq!(b.children(ROOT_ID), [p, r, q].as_slice());

    let z = note(&mut b, ROOT_ID, 0, "Z");
    a.pump();
    assert_eq!(a.children(ROOT_ID), [z, p, r, q].as_slice());

    a.undo().unwrap();
    assert_eq!(a.children(ROOT_ID), [z, p, q, r].as_slice());
    a.redo().unwrap();
    assert_eq!(a.children(ROOT_ID), [z, p, r, q].as_slice());
}

#[test]
fn undo_remove_reattaches_after_former_sibling() {
    let (mut a, mut b) = two_hosts();
    let p = note(&mut a, ROOT_ID, 0, "P");
    let q = note(&mut a, ROOT_ID, 1, "Q");
    a.remove_rows(ROOT_ID, 1, 1).unwrap();
    b.pump();
    let z = note(&mut b, ROOT_ID, 0, "Z");
    a.pump();
    assert_eq!(a.children(ROOT_ID), [z, p].as_slice());

    a.undo().unwrap();
    assert_eq!(a.children(ROOT_ID), [z, p, q].as_slice());
    assert!(!a.item(q).unwrap().deleted);
}

#[test]
fn undo_refuses_block_removed_elsewhere() {
    let (mut a, mut b) = two_hosts();
    let x = note(&mut a, ROOT_ID, 0, "X");
    let w = note(&mut a, ROOT_ID, 1, "W");
    b.pump();
    b.remove_rows(ROOT_ID, 0, 1).unwrap();
    a.pump();
    assert_eq!(a.children(ROOT_ID), [w].as_slice());
    assert!(!a.contains(x));

    // The newest entry is the insert of W, which is still attached.
    a.undo().unwrap();
    assert!(a.children(ROOT_ID).is_empty());
    assert!(matches!(a.undo(), Err(TreeError::InvalidSelection(_))));
    assert!(a.children(ROOT_ID).is_empty());
    assert!(a.can_undo());
}

#[test]
fn failed_group_undo_rolls_back_earlier_steps() {
    let (mut a, mut b) = two_hosts();
    let (x, y) = a
        .grouped(|model| {
            let x = model.insert_row(0, ROOT_ID)?;
            let y = model.insert_row(1, ROOT_ID)?;
            Ok((x, y))
        })
        .unwrap();
    b.pump();
    b.remove_rows(ROOT_ID, 0, 1).unwrap();
    a.pump();
    assert_eq!(a.children(ROOT_ID), [y].as_slice());
    let events = a.subscribe();

    assert!(matches!(a.undo(), Err(TreeError::InvalidSelection(_))));
    assert_eq!(a.children(ROOT_ID), [y].as_slice());
    assert!(!a.item(y).unwrap().deleted);
    assert!(!a.contains(x));
    assert!(events.try_recv().is_err());
}
