//! Change-feed replay.
//!
//! # Responsibility
//! - Apply change records delivered by the store feed to the in-memory tree.
//! - Acknowledge optimistic local edits when their records come back.
//!
//! # Invariants
//! - Replay never writes to the store.
//! - Every structural record is guarded so that applying it twice is a no-op.
//! - A record for an id outside the index is dropped, not queued.

use crate::model::change::{ChangeMethod, ChangeRecord, Document};
use crate::model::field::{copy_scalar_fields, FieldKind, FieldValue};
use crate::model::item::{Item, ItemId};
use crate::tree::events::{Origin, TreeEvent};
use crate::tree::{collect_subtree, TreeError, TreeModel, TreeResult};
use log::{debug, warn};
use std::collections::HashSet;

/// What `apply_remote_change` did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The record changed the tree.
    Applied,
    /// The record was this model's own pending write.
    Acknowledged,
    /// The tree already reflects the record.
    AlreadyApplied,
    /// The document id is not attached to this tree.
    UnknownDocument,
    /// The document carries no change record.
    NoChange,
}

const SCALAR_FIELDS: [FieldKind; 7] = [
    FieldKind::Text,
    FieldKind::Type,
    FieldKind::Color,
    FieldKind::StartDate,
    FieldKind::Estimate,
    FieldKind::Shortcut,
    FieldKind::SearchText,
];

impl TreeModel {
    /// Applies one document delivered by the store feed.
    ///
    /// # Errors
    /// - `MalformedChangeRecord` when the record contradicts the local tree.
    /// - `StoreUnavailable` when an `added` subtree cannot be loaded.
    pub fn apply_remote_change(&mut self, document: Document) -> TreeResult<ReplayOutcome> {
        let Some(change) = document.change.clone() else {
            return Ok(ReplayOutcome::NoChange);
        };
        if change.actor == self.actor && self.pending_acks.remove(&change.change_id) {
            return Ok(ReplayOutcome::Acknowledged);
        }

        let id = document.id();
        if !self.contains(id) {
            debug!(
                "event=tree_replay module=tree status=skip reason=unknown_document method={} item={}",
                change.method.as_str(),
                id
            );
            return Ok(ReplayOutcome::UnknownDocument);
        }
        change
            .check_consistency(id)
            .map_err(|reason| TreeError::MalformedChangeRecord {
                document: id,
                reason,
            })?;

        let outcome = match change.method {
            ChangeMethod::Added => self.replay_added(id, &change)?,
            ChangeMethod::Removed => self.replay_removed(id, &change)?,
            ChangeMethod::MovedVertical => self.replay_moved_vertical(id, &change)?,
            ChangeMethod::Updated => self.replay_updated(&document.item),
            ChangeMethod::Deleted => self.replay_deleted(id, document.item.deleted),
        };
        debug!(
            "event=tree_replay module=tree status=ok method={} item={} outcome={:?}",
            change.method.as_str(),
            id,
            outcome
        );
        Ok(outcome)
    }

    /// Drains the store feed. Returns the number of documents that changed
    /// the tree.
    ///
    /// Replay errors are logged and the offending document is dropped.
    pub fn pump(&mut self) -> usize {
        let documents: Vec<Document> = self.feed.try_iter().collect();
        let mut applied = 0;
        for document in documents {
            let id = document.id();
            match self.apply_remote_change(document) {
                Ok(ReplayOutcome::Applied) => applied += 1,
                Ok(_) => {}
                Err(err) => warn!(
                    "event=tree_replay module=tree status=error item={} error_code={} error={}",
                    id,
                    err.code(),
                    err
                ),
            }
        }
        applied
    }

    fn replay_added(&mut self, parent: ItemId, change: &ChangeRecord) -> TreeResult<ReplayOutcome> {
        let position = change.position.unwrap_or_default();
        let ids = &change.id_list;
        if self.children(parent).contains(&ids[0]) {
            return Ok(ReplayOutcome::AlreadyApplied);
        }
        let len = self.children(parent).len();
        if position > len {
            return Err(malformed(
                parent,
                format!("added at {position} beyond {len} children"),
            ));
        }
        if let Some(attached) = ids.iter().find(|id| self.contains(**id)) {
            return Err(malformed(
                parent,
                format!("added item {attached} is still attached elsewhere"),
            ));
        }

        let mut loaded: Vec<Item> = Vec::new();
        let mut seen: HashSet<ItemId> = HashSet::new();
        let store = self.store.clone();
        let collection = self.collection.clone();
        let mut fetch = |id: ItemId| -> TreeResult<Option<Item>> {
            Ok(store.get(&collection, id)?.map(|document| document.item))
        };
        for id in ids {
            if !collect_subtree(*id, &mut fetch, &mut loaded, &mut seen)? {
                return Err(malformed(parent, format!("added item {id} is not stored")));
            }
        }

        for item in loaded {
            self.items.insert(item.id, item);
        }
        self.splice_in(parent, position, ids);
        self.emit(TreeEvent::RowsInserted {
            parent,
            position,
            ids: ids.clone(),
            origin: Origin::Remote,
        });
        Ok(ReplayOutcome::Applied)
    }

    fn replay_removed(&mut self, parent: ItemId, change: &ChangeRecord) -> TreeResult<ReplayOutcome> {
        let position = change.position.unwrap_or_default();
        let ids = &change.id_list;
        let children = self.children(parent);
        let end = position + ids.len();
        if end > children.len() || children[position..end] != ids[..] {
            if ids.iter().all(|id| !children.contains(id)) {
                return Ok(ReplayOutcome::AlreadyApplied);
            }
            return Err(malformed(
                parent,
                format!("removed block not found at {position}"),
            ));
        }

        for id in ids.iter().flat_map(|id| self.subtree_ids(*id)).collect::<Vec<_>>() {
            if let Some(item) = self.items.get_mut(&id) {
                item.soft_delete();
            }
        }
        self.splice_out(parent, position, ids.len());
        self.emit(TreeEvent::RowsRemoved {
            parent,
            position,
            ids: ids.clone(),
            origin: Origin::Remote,
        });
        Ok(ReplayOutcome::Applied)
    }

    fn replay_moved_vertical(
        &mut self,
        parent: ItemId,
        change: &ChangeRecord,
    ) -> TreeResult<ReplayOutcome> {
        let position = change.position.unwrap_or_default();
        let direction = change.up_or_down.unwrap_or_default();
        let ids = &change.id_list;
        let count = ids.len();
        let children = self.children(parent);
        let block_at = |start: usize| {
            start + count <= children.len() && children[start..start + count] == ids[..]
        };

        if !block_at(position) {
            let target = position.checked_add_signed(direction as isize);
            if target.is_some_and(block_at) {
                return Ok(ReplayOutcome::AlreadyApplied);
            }
            return Err(malformed(
                parent,
                format!("moved block not found at {position}"),
            ));
        }
        if (direction < 0 && position == 0) || (direction > 0 && position + count >= children.len())
        {
            return Err(malformed(
                parent,
                format!("moved block at {position} cannot shift by {direction}"),
            ));
        }

        self.shift_block(parent, position, count, direction);
        let to = if direction < 0 { position - 1 } else { position + 1 };
        self.emit(TreeEvent::RowsMoved {
            parent,
            from: position,
            count,
            to,
            origin: Origin::Remote,
        });
        Ok(ReplayOutcome::Applied)
    }

    fn replay_updated(&mut self, incoming: &Item) -> ReplayOutcome {
        let id = incoming.id;
        let Some(item) = self.items.get_mut(&id) else {
            return ReplayOutcome::UnknownDocument;
        };
        let changed: Vec<FieldKind> = SCALAR_FIELDS
            .into_iter()
            .filter(|kind| FieldValue::read(item, *kind) != FieldValue::read(incoming, *kind))
            .collect();
        if changed.is_empty() {
            return ReplayOutcome::AlreadyApplied;
        }
        copy_scalar_fields(incoming, item);

        for field in &changed {
            self.emit(TreeEvent::ItemChanged {
                id,
                field: *field,
                origin: Origin::Remote,
            });
        }
        if changed.contains(&FieldKind::Type) {
            for event in self.availability_events(id) {
                self.emit(event);
            }
        }
        ReplayOutcome::Applied
    }

    fn replay_deleted(&mut self, id: ItemId, deleted: bool) -> ReplayOutcome {
        let Some(item) = self.items.get_mut(&id) else {
            return ReplayOutcome::UnknownDocument;
        };
        if item.is_root() || item.deleted == deleted {
            return ReplayOutcome::AlreadyApplied;
        }
        item.deleted = deleted;
        self.emit(TreeEvent::TombstoneChanged {
            id,
            deleted,
            origin: Origin::Remote,
        });
        ReplayOutcome::Applied
    }
}

fn malformed(document: ItemId, reason: String) -> TreeError {
    TreeError::MalformedChangeRecord { document, reason }
}
