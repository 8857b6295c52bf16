use std::sync::Arc;
use treenote_core::{
    DocumentStore, FieldValue, Item, ItemId, ItemType, SqliteDocumentStore, TreeError, TreeEvent,
    TreeModel, ROOT_ID,
};

fn setup() -> TreeModel {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    TreeModel::open(store, "outline", "host-a").unwrap()
}

fn note(model: &mut TreeModel, parent: ItemId, position: usize, text: &str) -> ItemId {
    model
        .insert_item(position, parent, Item::new(ItemType::Note, text), false)
        .unwrap()
}

fn texts(model: &TreeModel, parent: ItemId) -> Vec<String> {
    model
        .children(parent)
        .iter()
        .map(|id| model.item(*id).unwrap().text.clone())
        .collect()
}

#[test]
fn move_vertical_then_demote_builds_expected_tree() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    note(&mut model, ROOT_ID, 1, "B");
    let c = note(&mut model, ROOT_ID, 2, "C");

    model.move_vertical(&[c], -1).unwrap();
    assert_eq!(texts(&model, ROOT_ID), vec!["A", "C", "B"]);

    model.move_horizontal(&[c], 1).unwrap();
    assert_eq!(texts(&model, ROOT_ID), vec!["A", "B"]);
    assert_eq!(texts(&model, a), vec!["C"]);
    assert_eq!(model.parent_of(c), Some(a));
    assert_eq!(model.depth(c), 2);
}

#[test]
fn move_vertical_is_self_inverse() {
    let mut model = setup();
    for (position, text) in ["A", "B", "C", "D"].into_iter().enumerate() {
        note(&mut model, ROOT_ID, position, text);
    }
    let block = model.children(ROOT_ID)[1..3].to_vec();

    model.move_vertical(&block, 1).unwrap();
    assert_eq!(texts(&model, ROOT_ID), vec!["A", "D", "B", "C"]);
    model.move_vertical(&block, -1).unwrap();
    assert_eq!(texts(&model, ROOT_ID), vec!["A", "B", "C", "D"]);
}

#[test]
fn move_vertical_at_boundary_changes_nothing() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let b = note(&mut model, ROOT_ID, 1, "B");

    assert!(matches!(
        model.move_vertical(&[a], -1),
        Err(TreeError::BoundaryReached)
    ));
    assert!(matches!(
        model.move_vertical(&[b], 1),
        Err(TreeError::BoundaryReached)
    ));
    assert!(matches!(
        model.move_horizontal(&[a], -1),
        Err(TreeError::BoundaryReached)
    ));
    assert!(matches!(
        model.move_horizontal(&[a], 1),
        Err(TreeError::NoPrecedingSibling(_))
    ));
    assert_eq!(texts(&model, ROOT_ID), vec!["A", "B"]);
}

#[test]
fn promote_places_block_after_former_parent() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    note(&mut model, ROOT_ID, 1, "B");
    let a1 = note(&mut model, a, 0, "A1");
    note(&mut model, a, 1, "A2");

    model.move_horizontal(&[a1], -1).unwrap();
    assert_eq!(texts(&model, ROOT_ID), vec!["A", "A1", "B"]);
    assert_eq!(texts(&model, a), vec!["A2"]);
}

#[test]
fn move_to_rejects_cycles() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let a1 = note(&mut model, a, 0, "A1");

    assert!(matches!(
        model.move_to(a, a1, 0),
        Err(TreeError::CycleRejected { .. })
    ));
    assert!(matches!(
        model.move_to(a, a, 0),
        Err(TreeError::CycleRejected { .. })
    ));
    assert_eq!(model.parent_of(a1), Some(a));
}

#[test]
fn move_to_same_parent_measures_position_after_removal() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    note(&mut model, ROOT_ID, 1, "B");
    note(&mut model, ROOT_ID, 2, "C");

    model.move_to(a, ROOT_ID, 2).unwrap();
    assert_eq!(texts(&model, ROOT_ID), vec!["B", "C", "A"]);
    assert!(matches!(
        model.move_to(a, ROOT_ID, 3),
        Err(TreeError::InvalidPosition { .. })
    ));
}

#[test]
fn soft_delete_and_restore_keep_order() {
    let mut model = setup();
    note(&mut model, ROOT_ID, 0, "A");
    let b = note(&mut model, ROOT_ID, 1, "B");
    let b1 = note(&mut model, b, 0, "B1");
    note(&mut model, ROOT_ID, 2, "C");
    let order = model.children(ROOT_ID).to_vec();

    model.set_deleted(b, true).unwrap();
    assert!(!model.is_visible(b));
    assert!(!model.is_visible(b1));
    assert_eq!(model.children(ROOT_ID), order.as_slice());
    let live: Vec<ItemId> = model.live_items().map(|item| item.id).collect();
    assert!(!live.contains(&b1));

    model.set_deleted(b, false).unwrap();
    assert!(model.is_visible(b1));
    assert_eq!(model.children(ROOT_ID), order.as_slice());
}

#[test]
fn remove_rows_detaches_and_reports_expanded_items() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let a1 = note(&mut model, a, 0, "A1");
    note(&mut model, ROOT_ID, 1, "B");
    model.set_expanded(a, true);

    let removed = model.remove_rows(ROOT_ID, 0, 1).unwrap();
    assert_eq!(removed.ids, vec![a]);
    assert_eq!(removed.expanded, vec![a]);
    assert!(!model.contains(a));
    assert!(!model.contains(a1));
    assert!(!model.is_expanded(a));
    assert!(model.item(a).unwrap().deleted);
    assert!(matches!(
        model.remove_rows(ROOT_ID, 1, 1),
        Err(TreeError::InvalidPosition { .. })
    ));
}

#[test]
fn insert_rejects_tombstoned_parent_unless_allowed() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    model.set_deleted(a, true).unwrap();

    assert!(matches!(
        model.insert_row(0, a),
        Err(TreeError::InvalidParent(_))
    ));
    model
        .insert_item(0, a, Item::new(ItemType::Note, "hidden"), true)
        .unwrap();
    assert_eq!(model.children(a).len(), 1);
}

#[test]
fn set_field_emits_item_changed_and_skips_equal_values() {
    let mut model = setup();
    let a = note(&mut model, ROOT_ID, 0, "A");
    let events = model.subscribe();

    model.set_field(a, FieldValue::Text("A".to_string())).unwrap();
    assert!(events.try_recv().is_err());

    model.set_field(a, FieldValue::Text("renamed".to_string())).unwrap();
    assert!(matches!(
        events.try_recv().unwrap(),
        TreeEvent::ItemChanged { id, .. } if id == a
    ));
    assert!(!model.can_redo());
}

#[test]
fn tree_survives_reopen_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outline.sqlite3");
    let (a, a1) = {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open(&path).unwrap());
        let mut model = TreeModel::open(store, "outline", "host-a").unwrap();
        let a = note(&mut model, ROOT_ID, 0, "A");
        let a1 = note(&mut model, a, 0, "A1");
        note(&mut model, ROOT_ID, 1, "B");
        model.remove_rows(ROOT_ID, 1, 1).unwrap();
        (a, a1)
    };

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open(&path).unwrap());
    let model = TreeModel::open(store, "outline", "host-a").unwrap();
    assert_eq!(model.children(ROOT_ID), [a].as_slice());
    assert_eq!(model.children(a), [a1].as_slice());
    assert_eq!(model.item(a1).unwrap().text, "A1");
}

#[test]
fn projects_expose_next_available_task() {
    let mut model = setup();
    let project = model
        .insert_item(
            0,
            ROOT_ID,
            Item::new(ItemType::SequentialProject, "project"),
            false,
        )
        .unwrap();
    let done = model
        .insert_item(0, project, Item::new(ItemType::Done, "done"), false)
        .unwrap();
    let first = model
        .insert_item(1, project, Item::new(ItemType::Task, "first"), false)
        .unwrap();
    let second = model
        .insert_item(2, project, Item::new(ItemType::Task, "second"), false)
        .unwrap();

    assert_eq!(model.next_available_task(project), Some(first));
    assert!(model.is_actionable(first));
    assert!(!model.is_actionable(second));
    assert!(!model.is_actionable(done));

    model
        .set_field(project, FieldValue::Type(ItemType::ParallelProject))
        .unwrap();
    assert!(model.is_actionable(second));

    model
        .set_field(project, FieldValue::Type(ItemType::PausedProject))
        .unwrap();
    assert_eq!(model.next_available_task(project), None);
    assert!(!model.is_actionable(first));
}
