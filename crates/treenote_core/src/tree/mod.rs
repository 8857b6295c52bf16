//! Authoritative in-memory tree over one store collection.
//!
//! # Responsibility
//! - Own the item tree, its id→location index and expansion annotations.
//! - Translate structural and field edits into document-store writes.
//! - Record undo entries and notify observers with typed events.
//!
//! # Invariants
//! - The root is never removed, moved or tombstoned.
//! - `index` holds exactly the attached non-root items; detached items stay
//!   in `items` for undo but are never indexed.
//! - Validation happens before mutation; a failed store write reverts the
//!   in-memory edit and surfaces `TreeError::StoreUnavailable`.

use crate::model::change::{ChangeRecord, Document};
use crate::model::field::FieldValue;
use crate::model::item::{Item, ItemId, ItemType, ROOT_ID};
use crate::store::{DocumentStore, StoreError};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use uuid::Uuid;

mod error;
mod events;
mod project;
mod replay;
mod shared;
mod undo;

pub use error::{TreeError, TreeResult};
pub use events::{Origin, TreeEvent};
pub use replay::ReplayOutcome;
pub use shared::{PumpHandle, SharedTree};
pub use undo::{Edit, UndoEntry, UndoStack, UNDO_STACK_LIMIT};

static EMPTY_ROOT: Lazy<Item> = Lazy::new(Item::root);

/// Position of an attached item inside its parent's `children`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub parent: ItemId,
    pub position: usize,
}

/// Result of `remove_rows`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedRows {
    /// Detached top-level ids, in former sibling order.
    pub ids: Vec<ItemId>,
    /// Items of the removed subtrees that were expanded.
    pub expanded: Vec<ItemId>,
}

/// Writes and notifications produced by one in-memory edit.
#[derive(Debug, Default)]
struct Step {
    writes: Vec<Document>,
    events: Vec<TreeEvent>,
}

pub struct TreeModel {
    collection: String,
    store: Arc<dyn DocumentStore>,
    actor: String,
    items: HashMap<ItemId, Item>,
    index: HashMap<ItemId, Location>,
    expanded: HashSet<ItemId>,
    undo: UndoStack,
    observers: Vec<Sender<TreeEvent>>,
    pending_acks: HashSet<Uuid>,
    feed: Receiver<Document>,
}

impl TreeModel {
    /// Opens the collection, creating it and its root when missing.
    ///
    /// The store feed is subscribed before loading; writes that land between
    /// subscription and load are replayed idempotently by `pump`.
    pub fn open(
        store: Arc<dyn DocumentStore>,
        collection: &str,
        actor: impl Into<String>,
    ) -> TreeResult<Self> {
        let actor = actor.into();
        if store.create(collection)? {
            info!(
                "event=collection_create module=tree status=ok collection={}",
                collection
            );
        }
        if store.get(collection, ROOT_ID)?.is_none() {
            store.put(collection, &Document::new(Item::root(), None))?;
        }
        let feed = store.subscribe(collection)?;

        let mut model = Self {
            collection: collection.to_string(),
            store,
            actor,
            items: HashMap::new(),
            index: HashMap::new(),
            expanded: HashSet::new(),
            undo: UndoStack::new(),
            observers: Vec::new(),
            pending_acks: HashSet::new(),
            feed,
        };
        model.reload()?;
        info!(
            "event=tree_open module=tree status=ok collection={} actor={} items={}",
            model.collection,
            model.actor,
            model.items.len()
        );
        Ok(model)
    }

    /// Reloads the whole tree from the store and emits `Reset`.
    pub fn reload(&mut self) -> TreeResult<()> {
        let mut stored: HashMap<ItemId, Item> = self
            .store
            .query(&self.collection, &|_: &Document| true)?
            .into_iter()
            .map(|document| (document.id(), document.item))
            .collect();

        let mut loaded = Vec::new();
        let mut seen = HashSet::new();
        let mut fetch = |id: ItemId| -> TreeResult<Option<Item>> { Ok(stored.remove(&id)) };
        if !collect_subtree(ROOT_ID, &mut fetch, &mut loaded, &mut seen)? {
            loaded.push(Item::root());
        }

        self.items.clear();
        self.index.clear();
        for mut item in loaded {
            if item.is_root() && item.deleted {
                warn!("event=tree_load module=tree status=repair reason=deleted_root");
                item.restore();
            }
            self.items.insert(item.id, item);
        }
        self.index_subtree(ROOT_ID);
        self.emit(TreeEvent::Reset);
        Ok(())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Looks up an item, attached or detached.
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn root(&self) -> &Item {
        self.items.get(&ROOT_ID).unwrap_or(&*EMPTY_ROOT)
    }

    /// Children of an item; empty for unknown ids.
    pub fn children(&self, id: ItemId) -> &[ItemId] {
        self.items
            .get(&id)
            .map_or(&[][..], |item| item.children.as_slice())
    }

    pub fn location(&self, id: ItemId) -> Option<Location> {
        self.index.get(&id).copied()
    }

    pub fn parent_of(&self, id: ItemId) -> Option<ItemId> {
        self.index.get(&id).map(|location| location.parent)
    }

    /// Returns whether the item is the root or attached to the tree.
    pub fn contains(&self, id: ItemId) -> bool {
        id == ROOT_ID || self.index.contains_key(&id)
    }

    /// Number of attached items, root included.
    pub fn len(&self) -> usize {
        self.index.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of ancestors between the item and the root.
    pub fn depth(&self, id: ItemId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Returns whether `ancestor` is a proper ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: ItemId, id: ItemId) -> bool {
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Returns whether the item is attached and neither it nor any ancestor
    /// carries a tombstone.
    pub fn is_visible(&self, id: ItemId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut current = Some(id);
        while let Some(cursor) = current {
            if self.items.get(&cursor).map_or(true, |item| item.deleted) {
                return false;
            }
            current = self.parent_of(cursor);
        }
        true
    }

    /// Preorder ids of the item and all of its descendants.
    pub fn subtree_ids(&self, id: ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Preorder `(id, depth)` rows below `root`, root excluded.
    ///
    /// Depth 0 is a direct child of `root`. Tombstoned items and their
    /// subtrees are skipped unless `include_deleted` is set.
    pub fn preorder(&self, root: ItemId, include_deleted: bool) -> Vec<(ItemId, usize)> {
        let mut rows = Vec::new();
        let mut stack: Vec<(ItemId, usize)> = self
            .children(root)
            .iter()
            .rev()
            .map(|child| (*child, 0))
            .collect();
        while let Some((id, depth)) = stack.pop() {
            let Some(item) = self.items.get(&id) else {
                continue;
            };
            if item.deleted && !include_deleted {
                continue;
            }
            rows.push((id, depth));
            stack.extend(item.children.iter().rev().map(|child| (*child, depth + 1)));
        }
        rows
    }

    /// Live items of the whole tree, root excluded, in document order.
    pub fn live_items(&self) -> impl Iterator<Item = &Item> + '_ {
        self.preorder(ROOT_ID, false)
            .into_iter()
            .filter_map(move |(id, _)| self.items.get(&id))
    }

    pub fn subscribe(&mut self) -> Receiver<TreeEvent> {
        let (sender, receiver) = mpsc::channel();
        self.observers.push(sender);
        receiver
    }

    /// Toggles the expansion annotation and emits `ExpansionChanged` when it
    /// actually changed.
    pub fn set_expanded(&mut self, id: ItemId, expanded: bool) {
        let changed = if expanded {
            self.expanded.insert(id)
        } else {
            self.expanded.remove(&id)
        };
        if changed {
            self.emit(TreeEvent::ExpansionChanged { id, expanded });
        }
    }

    pub fn is_expanded(&self, id: ItemId) -> bool {
        self.expanded.contains(&id)
    }

    /// Re-applies expansion annotations; unknown ids are ignored.
    pub fn restore_expanded(&mut self, ids: &[ItemId]) {
        for id in ids {
            if self.items.contains_key(id) {
                self.set_expanded(*id, true);
            }
        }
    }

    /// Expanded ids in document order.
    pub fn expanded_ids(&self) -> Vec<ItemId> {
        self.subtree_ids(ROOT_ID)
            .into_iter()
            .filter(|id| self.expanded.contains(id))
            .collect()
    }

    /// Inserts a new empty note under `parent` and returns its id.
    pub fn insert_row(&mut self, position: usize, parent: ItemId) -> TreeResult<ItemId> {
        self.insert_item(position, parent, Item::new(ItemType::Note, ""), false)
    }

    /// Inserts a prepared item under `parent`.
    ///
    /// The item's `children` are ignored; use `insert_subtree` for nested
    /// inserts. `allow_tombstoned` permits inserting below a tombstoned parent.
    pub fn insert_item(
        &mut self,
        position: usize,
        parent: ItemId,
        mut item: Item,
        allow_tombstoned: bool,
    ) -> TreeResult<ItemId> {
        self.ensure_insert_parent(parent, allow_tombstoned)?;
        item.children.clear();
        let id = item.id;
        self.execute(Edit::Insert {
            parent,
            position,
            roots: vec![id],
            items: vec![item],
        })?;
        Ok(id)
    }

    /// Inserts several new subtrees at once.
    ///
    /// `items` holds every new item; `roots` lists the top-level ones in
    /// order. Every child referenced by an item must be part of `items`.
    pub fn insert_subtree(
        &mut self,
        position: usize,
        parent: ItemId,
        roots: Vec<ItemId>,
        items: Vec<Item>,
    ) -> TreeResult<()> {
        self.ensure_insert_parent(parent, false)?;
        let new_ids: HashSet<ItemId> = items.iter().map(|item| item.id).collect();
        let dangling = items
            .iter()
            .flat_map(|item| item.children.iter())
            .chain(roots.iter())
            .find(|id| !new_ids.contains(id));
        if let Some(id) = dangling {
            return Err(TreeError::InvalidSelection(format!(
                "subtree references unknown item {id}"
            )));
        }
        self.execute(Edit::Insert {
            parent,
            position,
            roots,
            items,
        })
    }

    /// Detaches `count` children of `parent` starting at `position`.
    pub fn remove_rows(
        &mut self,
        parent: ItemId,
        position: usize,
        count: usize,
    ) -> TreeResult<RemovedRows> {
        if !self.contains(parent) {
            return Err(TreeError::InvalidParent(parent));
        }
        let len = self.children(parent).len();
        if count == 0 || position + count > len {
            return Err(TreeError::InvalidPosition {
                parent,
                position: position + count,
                len,
            });
        }
        let ids = self.children(parent)[position..position + count].to_vec();
        let expanded: Vec<ItemId> = ids
            .iter()
            .flat_map(|id| self.subtree_ids(*id))
            .filter(|id| self.expanded.contains(id))
            .collect();

        self.execute(Edit::Remove {
            parent,
            ids: ids.clone(),
        })?;
        for id in &expanded {
            self.expanded.remove(id);
        }
        Ok(RemovedRows { ids, expanded })
    }

    /// Moves a contiguous sibling block one slot up (`-1`) or down (`+1`).
    pub fn move_vertical(&mut self, item_ids: &[ItemId], direction: i8) -> TreeResult<()> {
        let (parent, position, count) = self.resolve_selection(item_ids)?;
        if !matches!(direction, -1 | 1) {
            return Err(TreeError::InvalidSelection(format!(
                "direction must be -1 or 1, got {direction}"
            )));
        }
        let len = self.children(parent).len();
        if (direction < 0 && position == 0) || (direction > 0 && position + count >= len) {
            return Err(TreeError::BoundaryReached);
        }
        let ids = self.children(parent)[position..position + count].to_vec();
        self.execute(Edit::MoveVertical {
            parent,
            ids,
            direction,
        })
    }

    /// Promotes (`-1`) or demotes (`+1`) a contiguous sibling block.
    ///
    /// Promote places the block right after its former parent; demote
    /// appends it to the preceding sibling's children.
    pub fn move_horizontal(&mut self, item_ids: &[ItemId], direction: i8) -> TreeResult<()> {
        let (parent, position, count) = self.resolve_selection(item_ids)?;
        let ids = self.children(parent)[position..position + count].to_vec();
        let (to_parent, to_position) = match direction {
            1 => {
                if position == 0 {
                    return Err(TreeError::NoPrecedingSibling(ids[0]));
                }
                let sibling = self.children(parent)[position - 1];
                (sibling, self.children(sibling).len())
            }
            -1 => {
                let Some(parent_location) = self.location(parent) else {
                    return Err(TreeError::BoundaryReached);
                };
                (parent_location.parent, parent_location.position + 1)
            }
            other => {
                return Err(TreeError::InvalidSelection(format!(
                    "direction must be -1 or 1, got {other}"
                )))
            }
        };
        self.execute(Edit::Reparent {
            ids,
            from_parent: parent,
            to_parent,
            to_position,
        })
    }

    /// Moves one item under `new_parent` at `position`.
    ///
    /// `position` is measured after the item left its current parent.
    pub fn move_to(&mut self, item_id: ItemId, new_parent: ItemId, position: usize) -> TreeResult<()> {
        let Some(from) = self.location(item_id) else {
            return Err(if item_id == ROOT_ID {
                TreeError::InvalidSelection("root cannot be moved".to_string())
            } else {
                TreeError::NotFound(item_id)
            });
        };
        if !self.contains(new_parent) {
            return Err(TreeError::InvalidParent(new_parent));
        }
        if new_parent == item_id || self.is_ancestor(item_id, new_parent) {
            return Err(TreeError::CycleRejected {
                item: item_id,
                parent: new_parent,
            });
        }
        if from.parent == new_parent && from.position == position {
            return Ok(());
        }
        self.execute(Edit::Reparent {
            ids: vec![item_id],
            from_parent: from.parent,
            to_parent: new_parent,
            to_position: position,
        })
    }

    /// Tombstones (or restores) an item and its whole subtree in place.
    pub fn set_deleted(&mut self, item_id: ItemId, deleted: bool) -> TreeResult<()> {
        if item_id == ROOT_ID {
            return Err(TreeError::InvalidSelection(
                "root cannot be tombstoned".to_string(),
            ));
        }
        if !self.contains(item_id) {
            return Err(TreeError::NotFound(item_id));
        }
        let flags: Vec<(ItemId, bool)> = self
            .subtree_ids(item_id)
            .into_iter()
            .filter(|id| self.items.get(id).is_some_and(|item| item.deleted != deleted))
            .map(|id| (id, deleted))
            .collect();
        if flags.is_empty() {
            return Ok(());
        }
        self.execute(Edit::SetDeleted { flags })
    }

    /// Updates one scalar field.
    pub fn set_field(&mut self, item_id: ItemId, value: FieldValue) -> TreeResult<()> {
        let Some(item) = self.items.get(&item_id) else {
            return Err(TreeError::NotFound(item_id));
        };
        if !self.contains(item_id) {
            return Err(TreeError::NotFound(item_id));
        }
        if FieldValue::read(item, value.kind()) == value {
            return Ok(());
        }
        self.execute(Edit::SetField { id: item_id, value })
    }

    /// Reverts the last recorded edit. Returns `false` when there is none.
    pub fn undo(&mut self) -> TreeResult<bool> {
        let Some(entry) = self.undo.pop_undo() else {
            return Ok(false);
        };
        match self.perform(entry.undo.clone()) {
            Ok(redo) => {
                self.undo.push_redo(UndoEntry {
                    undo: entry.undo,
                    redo,
                });
                Ok(true)
            }
            Err(err) => {
                self.undo.push_undo(entry);
                Err(err)
            }
        }
    }

    /// Re-applies the last undone edit. Returns `false` when there is none.
    pub fn redo(&mut self) -> TreeResult<bool> {
        let Some(entry) = self.undo.pop_redo() else {
            return Ok(false);
        };
        match self.perform(entry.redo.clone()) {
            Ok(undo) => {
                self.undo.push_undo(UndoEntry {
                    undo,
                    redo: entry.redo,
                });
                Ok(true)
            }
            Err(err) => {
                self.undo.push_redo(entry);
                Err(err)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Runs `f` and records every edit it makes as one undo entry.
    pub fn grouped<T>(&mut self, f: impl FnOnce(&mut Self) -> TreeResult<T>) -> TreeResult<T> {
        self.undo.begin_group();
        let result = f(self);
        self.undo.end_group();
        result
    }

    fn ensure_insert_parent(&self, parent: ItemId, allow_tombstoned: bool) -> TreeResult<()> {
        if !self.contains(parent) {
            return Err(TreeError::InvalidParent(parent));
        }
        if !allow_tombstoned && self.items.get(&parent).map_or(true, |item| item.deleted) {
            return Err(TreeError::InvalidParent(parent));
        }
        Ok(())
    }

    /// Resolves a selection to `(parent, first position, count)`.
    fn resolve_selection(&self, item_ids: &[ItemId]) -> TreeResult<(ItemId, usize, usize)> {
        if item_ids.is_empty() {
            return Err(TreeError::InvalidSelection("selection is empty".to_string()));
        }
        let mut locations = Vec::with_capacity(item_ids.len());
        for id in item_ids {
            if *id == ROOT_ID {
                return Err(TreeError::InvalidSelection(
                    "root cannot be moved".to_string(),
                ));
            }
            locations.push(self.location(*id).ok_or(TreeError::NotFound(*id))?);
        }
        let parent = locations[0].parent;
        if locations.iter().any(|location| location.parent != parent) {
            return Err(TreeError::InvalidSelection(
                "selection spans several parents".to_string(),
            ));
        }
        let mut positions: Vec<usize> = locations.iter().map(|location| location.position).collect();
        positions.sort_unstable();
        positions.dedup();
        if positions.len() != item_ids.len() {
            return Err(TreeError::InvalidSelection(
                "selection lists an item twice".to_string(),
            ));
        }
        let first = positions[0];
        if positions
            .iter()
            .enumerate()
            .any(|(offset, position)| *position != first + offset)
        {
            return Err(TreeError::InvalidSelection(
                "selection is not contiguous".to_string(),
            ));
        }
        Ok((parent, first, positions.len()))
    }

    /// Applies a new local edit and records it for undo.
    fn execute(&mut self, edit: Edit) -> TreeResult<()> {
        let inverse = self.perform(edit.clone())?;
        self.undo.record(UndoEntry {
            undo: inverse,
            redo: edit,
        });
        Ok(())
    }

    /// Applies an edit in memory, persists it and notifies observers.
    ///
    /// Returns the inverse edit.
    fn perform(&mut self, edit: Edit) -> TreeResult<Edit> {
        let created = created_ids(&edit);
        let mut step = Step::default();
        let inverse = self.apply_edit(edit, &mut step)?;
        if let Err(err) = self.flush(&step.writes) {
            warn!(
                "event=tree_write module=tree status=error collection={} error_code=store_unavailable error={}",
                self.collection, err
            );
            let mut discarded = Step::default();
            if let Err(revert_err) = self.apply_edit(inverse, &mut discarded) {
                error!(
                    "event=tree_revert module=tree status=error collection={} error={}",
                    self.collection, revert_err
                );
            }
            for id in created {
                self.items.remove(&id);
            }
            return Err(TreeError::StoreUnavailable(err));
        }
        debug!(
            "event=tree_write module=tree status=ok collection={} documents={}",
            self.collection,
            step.writes.len()
        );
        for event in step.events {
            self.emit(event);
        }
        Ok(inverse)
    }

    fn flush(&mut self, writes: &[Document]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let change_ids: Vec<Uuid> = writes
            .iter()
            .filter_map(|document| document.change.as_ref().map(|change| change.change_id))
            .collect();
        self.pending_acks.extend(change_ids.iter().copied());
        let result = self.store.put_batch(&self.collection, writes);
        if result.is_err() {
            for change_id in &change_ids {
                self.pending_acks.remove(change_id);
            }
        }
        result
    }

    fn apply_edit(&mut self, edit: Edit, step: &mut Step) -> TreeResult<Edit> {
        match edit {
            Edit::Insert {
                parent,
                position,
                roots,
                items,
            } => self.apply_insert(parent, position, roots, items, step),
            Edit::Attach {
                parent,
                anchor,
                position,
                ids,
                revive,
            } => {
                let position = self.anchored_position(parent, anchor, position);
                self.apply_attach(parent, position, ids, revive, step)
            }
            Edit::Remove { parent, ids } => self.apply_remove(parent, ids, step),
            Edit::MoveVertical {
                parent,
                ids,
                direction,
            } => self.apply_move_vertical(parent, ids, direction, step),
            Edit::Reparent {
                ids,
                from_parent,
                to_parent,
                to_position,
            } => self.apply_reparent(ids, from_parent, to_parent, to_position, step),
            Edit::SetField { id, value } => self.apply_set_field(id, value, step),
            Edit::SetDeleted { flags } => self.apply_set_deleted(flags, step),
            Edit::Batch(edits) => {
                let mut inverses = Vec::with_capacity(edits.len());
                for edit in edits {
                    match self.apply_edit(edit, step) {
                        Ok(inverse) => inverses.push(inverse),
                        Err(err) => {
                            for inverse in inverses.into_iter().rev() {
                                if let Err(revert_err) = self.apply_edit(inverse, &mut Step::default()) {
                                    error!(
                                        "event=tree_revert module=tree status=error collection={} scope=batch error={}",
                                        self.collection, revert_err
                                    );
                                }
                            }
                            return Err(err);
                        }
                    }
                }
                inverses.reverse();
                Ok(Edit::Batch(inverses))
            }
        }
    }

    fn check_position(&self, parent: ItemId, position: usize) -> TreeResult<()> {
        if !self.contains(parent) {
            return Err(TreeError::InvalidParent(parent));
        }
        let len = self.children(parent).len();
        if position > len {
            return Err(TreeError::InvalidPosition {
                parent,
                position,
                len,
            });
        }
        Ok(())
    }

    /// Current position of the contiguous sibling block `ids` under `parent`.
    fn locate_block(&self, parent: ItemId, ids: &[ItemId]) -> TreeResult<usize> {
        if !self.contains(parent) {
            return Err(TreeError::InvalidParent(parent));
        }
        let Some(first) = ids.first() else {
            return Err(TreeError::InvalidSelection("selection is empty".to_string()));
        };
        let position = match self.location(*first) {
            Some(location) if location.parent == parent => location.position,
            _ => {
                return Err(TreeError::InvalidSelection(format!(
                    "item {first} is no longer under {parent}"
                )))
            }
        };
        let children = self.children(parent);
        if position + ids.len() > children.len() || children[position..position + ids.len()] != *ids {
            return Err(TreeError::InvalidSelection(
                "block is no longer contiguous".to_string(),
            ));
        }
        Ok(position)
    }

    /// Slot right after `anchor` under `parent`; `fallback` once the anchor moved away.
    fn anchored_position(&self, parent: ItemId, anchor: Option<ItemId>, fallback: usize) -> usize {
        let Some(anchor) = anchor else {
            return 0;
        };
        match self.location(anchor) {
            Some(location) if location.parent == parent => location.position + 1,
            _ => fallback.min(self.children(parent).len()),
        }
    }

    fn apply_insert(
        &mut self,
        parent: ItemId,
        position: usize,
        roots: Vec<ItemId>,
        items: Vec<Item>,
        step: &mut Step,
    ) -> TreeResult<Edit> {
        self.check_position(parent, position)?;
        if roots.is_empty() {
            return Err(TreeError::InvalidSelection("nothing to insert".to_string()));
        }
        if let Some(existing) = items.iter().find(|item| self.items.contains_key(&item.id)) {
            return Err(TreeError::InvalidSelection(format!(
                "item {} already exists",
                existing.id
            )));
        }

        for item in items {
            step.writes.push(Document::new(item.clone(), None));
            self.items.insert(item.id, item);
        }
        self.splice_in(parent, position, &roots);
        self.push_parent_write(
            parent,
            ChangeRecord::added(&self.actor, parent, position, &roots),
            step,
        );
        step.events.push(TreeEvent::RowsInserted {
            parent,
            position,
            ids: roots.clone(),
            origin: Origin::Local,
        });
        Ok(Edit::Remove { parent, ids: roots })
    }

    fn apply_attach(
        &mut self,
        parent: ItemId,
        position: usize,
        ids: Vec<ItemId>,
        revive: Vec<ItemId>,
        step: &mut Step,
    ) -> TreeResult<Edit> {
        self.check_position(parent, position)?;
        for id in &ids {
            if !self.items.contains_key(id) || self.contains(*id) {
                return Err(TreeError::InvalidSelection(format!(
                    "item {id} is not detached"
                )));
            }
        }
        if ids.iter().any(|id| *id == parent || self.is_ancestor(*id, parent)) {
            return Err(TreeError::CycleRejected {
                item: ids[0],
                parent,
            });
        }

        for id in &revive {
            if let Some(item) = self.items.get_mut(id) {
                item.restore();
                step.writes.push(Document::new(
                    item.clone(),
                    Some(ChangeRecord::deleted(&self.actor)),
                ));
            }
        }
        self.splice_in(parent, position, &ids);
        self.push_parent_write(
            parent,
            ChangeRecord::added(&self.actor, parent, position, &ids),
            step,
        );
        step.events.push(TreeEvent::RowsInserted {
            parent,
            position,
            ids: ids.clone(),
            origin: Origin::Local,
        });
        Ok(Edit::Remove { parent, ids })
    }

    fn apply_remove(
        &mut self,
        parent: ItemId,
        ids: Vec<ItemId>,
        step: &mut Step,
    ) -> TreeResult<Edit> {
        let position = self.locate_block(parent, &ids)?;
        let count = ids.len();
        let anchor = position
            .checked_sub(1)
            .map(|above| self.children(parent)[above]);

        let mut revive = Vec::new();
        for id in ids.iter().flat_map(|id| self.subtree_ids(*id)).collect::<Vec<_>>() {
            if let Some(item) = self.items.get_mut(&id) {
                if !item.deleted {
                    item.soft_delete();
                    revive.push(id);
                    step.writes.push(Document::new(
                        item.clone(),
                        Some(ChangeRecord::deleted(&self.actor)),
                    ));
                }
            }
        }
        self.splice_out(parent, position, count);
        self.push_parent_write(
            parent,
            ChangeRecord::removed(&self.actor, parent, position, &ids),
            step,
        );
        step.events.push(TreeEvent::RowsRemoved {
            parent,
            position,
            ids: ids.clone(),
            origin: Origin::Local,
        });
        Ok(Edit::Attach {
            parent,
            anchor,
            position,
            ids,
            revive,
        })
    }

    fn apply_move_vertical(
        &mut self,
        parent: ItemId,
        ids: Vec<ItemId>,
        direction: i8,
        step: &mut Step,
    ) -> TreeResult<Edit> {
        if !matches!(direction, -1 | 1) {
            return Err(TreeError::InvalidSelection(format!(
                "direction must be -1 or 1, got {direction}"
            )));
        }
        let position = self.locate_block(parent, &ids)?;
        let count = ids.len();
        let len = self.children(parent).len();
        if (direction < 0 && position == 0) || (direction > 0 && position + count >= len) {
            return Err(TreeError::BoundaryReached);
        }

        self.shift_block(parent, position, count, direction);
        let to = shifted(position, direction);
        self.push_parent_write(
            parent,
            ChangeRecord::moved_vertical(&self.actor, parent, position, &ids, direction),
            step,
        );
        step.events.push(TreeEvent::RowsMoved {
            parent,
            from: position,
            count,
            to,
            origin: Origin::Local,
        });
        Ok(Edit::MoveVertical {
            parent,
            ids,
            direction: -direction,
        })
    }

    fn apply_reparent(
        &mut self,
        ids: Vec<ItemId>,
        from_parent: ItemId,
        to_parent: ItemId,
        to_position: usize,
        step: &mut Step,
    ) -> TreeResult<Edit> {
        let from_position = self.locate_block(from_parent, &ids)?;
        if !self.contains(to_parent) {
            return Err(TreeError::InvalidParent(to_parent));
        }
        let count = ids.len();
        if let Some(id) = ids
            .iter()
            .find(|id| **id == to_parent || self.is_ancestor(**id, to_parent))
        {
            return Err(TreeError::CycleRejected {
                item: *id,
                parent: to_parent,
            });
        }
        let mut target_len = self.children(to_parent).len();
        if from_parent == to_parent {
            target_len -= count;
        }
        if to_position > target_len {
            return Err(TreeError::InvalidPosition {
                parent: to_parent,
                position: to_position,
                len: target_len,
            });
        }

        self.splice_out_detach_only(from_parent, from_position, count);
        self.push_parent_write(
            from_parent,
            ChangeRecord::removed(&self.actor, from_parent, from_position, &ids),
            step,
        );
        self.splice_in_attached(to_parent, to_position, &ids);
        self.push_parent_write(
            to_parent,
            ChangeRecord::added(&self.actor, to_parent, to_position, &ids),
            step,
        );
        step.events.push(TreeEvent::Reparented {
            ids: ids.clone(),
            from_parent,
            from_position,
            to_parent,
            to_position,
            origin: Origin::Local,
        });
        Ok(Edit::Reparent {
            ids,
            from_parent: to_parent,
            to_parent: from_parent,
            to_position: from_position,
        })
    }

    fn apply_set_field(
        &mut self,
        id: ItemId,
        value: FieldValue,
        step: &mut Step,
    ) -> TreeResult<Edit> {
        let actor = self.actor.clone();
        let Some(item) = self.items.get_mut(&id) else {
            return Err(TreeError::NotFound(id));
        };
        let kind = value.kind();
        let previous = FieldValue::read(item, kind);
        value.apply_to(item);
        step.writes.push(Document::new(
            item.clone(),
            Some(ChangeRecord::updated(&actor)),
        ));
        step.events.push(TreeEvent::ItemChanged {
            id,
            field: kind,
            origin: Origin::Local,
        });
        if matches!(value, FieldValue::Type(_)) {
            step.events.extend(self.availability_events(id));
        }
        Ok(Edit::SetField {
            id,
            value: previous,
        })
    }

    fn apply_set_deleted(
        &mut self,
        flags: Vec<(ItemId, bool)>,
        step: &mut Step,
    ) -> TreeResult<Edit> {
        for (id, deleted) in &flags {
            if !self.items.contains_key(id) {
                return Err(TreeError::NotFound(*id));
            }
            if *id == ROOT_ID && *deleted {
                return Err(TreeError::InvalidSelection(
                    "root cannot be tombstoned".to_string(),
                ));
            }
        }
        let mut previous = Vec::with_capacity(flags.len());
        for (id, deleted) in flags {
            if let Some(item) = self.items.get_mut(&id) {
                previous.push((id, item.deleted));
                item.deleted = deleted;
                step.writes.push(Document::new(
                    item.clone(),
                    Some(ChangeRecord::deleted(&self.actor)),
                ));
                step.events.push(TreeEvent::TombstoneChanged {
                    id,
                    deleted,
                    origin: Origin::Local,
                });
            }
        }
        previous.reverse();
        Ok(Edit::SetDeleted { flags: previous })
    }

    fn push_parent_write(&self, parent: ItemId, change: ChangeRecord, step: &mut Step) {
        if let Some(item) = self.items.get(&parent) {
            step.writes.push(Document::new(item.clone(), Some(change)));
        }
    }

    /// Inserts detached subtrees into `parent` and indexes them.
    fn splice_in(&mut self, parent: ItemId, position: usize, ids: &[ItemId]) {
        self.splice_in_attached(parent, position, ids);
        for id in ids {
            self.index_subtree(*id);
        }
    }

    /// Inserts ids into `parent` and re-indexes the parent's children only.
    fn splice_in_attached(&mut self, parent: ItemId, position: usize, ids: &[ItemId]) {
        if let Some(item) = self.items.get_mut(&parent) {
            let position = position.min(item.children.len());
            item.children.splice(position..position, ids.iter().copied());
        }
        self.reindex_children(parent);
    }

    /// Removes a block from `parent` and drops its subtrees from the index.
    fn splice_out(&mut self, parent: ItemId, position: usize, count: usize) {
        let removed = self.splice_out_detach_only(parent, position, count);
        for id in removed {
            for descendant in self.subtree_ids(id) {
                self.index.remove(&descendant);
            }
        }
    }

    /// Removes a block from `parent`, unindexing only the block itself.
    fn splice_out_detach_only(
        &mut self,
        parent: ItemId,
        position: usize,
        count: usize,
    ) -> Vec<ItemId> {
        let removed: Vec<ItemId> = match self.items.get_mut(&parent) {
            Some(item) => item.children.drain(position..position + count).collect(),
            None => Vec::new(),
        };
        for id in &removed {
            self.index.remove(id);
        }
        self.reindex_children(parent);
        removed
    }

    /// Moves a block one slot and re-indexes the parent's children.
    fn shift_block(&mut self, parent: ItemId, position: usize, count: usize, direction: i8) {
        if let Some(item) = self.items.get_mut(&parent) {
            if direction < 0 {
                let above = item.children.remove(position - 1);
                item.children.insert(position + count - 1, above);
            } else {
                let below = item.children.remove(position + count);
                item.children.insert(position, below);
            }
        }
        self.reindex_children(parent);
    }

    fn reindex_children(&mut self, parent: ItemId) {
        if let Some(item) = self.items.get(&parent) {
            for (position, child) in item.children.iter().enumerate() {
                self.index.insert(*child, Location { parent, position });
            }
        }
    }

    /// Indexes every descendant of `id` (not `id` itself).
    fn index_subtree(&mut self, id: ItemId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.reindex_children(current);
            stack.extend(self.children(current).iter().copied());
        }
    }

    fn emit(&mut self, event: TreeEvent) {
        self.observers
            .retain(|observer| observer.send(event.clone()).is_ok());
    }
}

fn shifted(position: usize, direction: i8) -> usize {
    if direction < 0 {
        position - 1
    } else {
        position + 1
    }
}

/// Collects the subtree rooted at `id` in preorder.
///
/// Children that cannot be fetched, or that were already visited, are logged
/// and dropped from their parent's `children`. Returns `false` when `id`
/// itself cannot be fetched.
fn collect_subtree(
    id: ItemId,
    fetch: &mut dyn FnMut(ItemId) -> TreeResult<Option<Item>>,
    out: &mut Vec<Item>,
    seen: &mut HashSet<ItemId>,
) -> TreeResult<bool> {
    if !seen.insert(id) {
        warn!(
            "event=tree_load module=tree status=skip reason=duplicate_reference item={}",
            id
        );
        return Ok(false);
    }
    let Some(mut item) = fetch(id)? else {
        warn!(
            "event=tree_load module=tree status=skip reason=dangling_reference item={}",
            id
        );
        return Ok(false);
    };
    let children = std::mem::take(&mut item.children);
    let slot = out.len();
    out.push(item);
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        if collect_subtree(child, fetch, out, seen)? {
            kept.push(child);
        }
    }
    out[slot].children = kept;
    Ok(true)
}

/// Ids of the items an edit creates.
fn created_ids(edit: &Edit) -> Vec<ItemId> {
    match edit {
        Edit::Insert { items, .. } => items.iter().map(|item| item.id).collect(),
        Edit::Batch(edits) => edits.iter().flat_map(created_ids).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{TreeError, TreeModel};
    use crate::model::item::ROOT_ID;
    use crate::store::{DocumentStore, SqliteDocumentStore};
    use std::sync::Arc;

    fn model() -> TreeModel {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
        TreeModel::open(store, "outline", "host-a").unwrap()
    }

    #[test]
    fn open_creates_root() {
        let model = model();
        assert_eq!(model.root().id, ROOT_ID);
        assert!(model.is_empty());
    }

    #[test]
    fn selection_must_be_contiguous() {
        let mut model = model();
        let a = model.insert_row(0, ROOT_ID).unwrap();
        let _b = model.insert_row(1, ROOT_ID).unwrap();
        let c = model.insert_row(2, ROOT_ID).unwrap();
        assert!(matches!(
            model.move_vertical(&[a, c], 1),
            Err(TreeError::InvalidSelection(_))
        ));
    }

    #[test]
    fn index_tracks_positions_after_insert_at_front() {
        let mut model = model();
        let a = model.insert_row(0, ROOT_ID).unwrap();
        let b = model.insert_row(0, ROOT_ID).unwrap();
        assert_eq!(model.location(b).unwrap().position, 0);
        assert_eq!(model.location(a).unwrap().position, 1);
    }
}
