//! Undo/redo bookkeeping for one tree model.
//!
//! # Responsibility
//! - Describe every local mutation as an invertible `Edit`.
//! - Keep bounded undo and redo stacks, with grouping.
//!
//! # Invariants
//! - At most `UNDO_STACK_LIMIT` entries are kept; the oldest are dropped first.
//! - Recording a new entry clears the redo side.
//! - Entries recorded inside a group collapse into one `Edit::Batch` entry.
//! - Structural edits name their blocks by id; positions are re-resolved
//!   when an edit is performed, since replayed changes may shift siblings.

use crate::model::field::FieldValue;
use crate::model::item::{Item, ItemId};

pub const UNDO_STACK_LIMIT: usize = 500;

/// One invertible tree mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Creates `items` and attaches `roots` under `parent` at `position`.
    ///
    /// `items` holds every new item, descendants included.
    Insert {
        parent: ItemId,
        position: usize,
        roots: Vec<ItemId>,
        items: Vec<Item>,
    },
    /// Re-attaches detached items; clears the tombstone of `revive`.
    ///
    /// The block lands right after `anchor`, or first when `anchor` is
    /// `None`. `position` is only used once `anchor` left `parent`.
    Attach {
        parent: ItemId,
        anchor: Option<ItemId>,
        position: usize,
        ids: Vec<ItemId>,
        revive: Vec<ItemId>,
    },
    /// Detaches the sibling block `ids` and tombstones their subtrees.
    Remove { parent: ItemId, ids: Vec<ItemId> },
    /// Moves the sibling block `ids` one slot up (`-1`) or down (`+1`).
    MoveVertical {
        parent: ItemId,
        ids: Vec<ItemId>,
        direction: i8,
    },
    /// Removes a block from one parent and inserts it into another.
    ///
    /// `to_position` is measured after the block left `from_parent`.
    Reparent {
        ids: Vec<ItemId>,
        from_parent: ItemId,
        to_parent: ItemId,
        to_position: usize,
    },
    SetField {
        id: ItemId,
        value: FieldValue,
    },
    /// Sets the tombstone flag per item.
    SetDeleted {
        flags: Vec<(ItemId, bool)>,
    },
    Batch(Vec<Edit>),
}

/// Undo stack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    /// Edit that reverts the recorded change.
    pub undo: Edit,
    /// Edit that re-applies it.
    pub redo: Edit,
}

#[derive(Debug, Default)]
pub struct UndoStack {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
    group: Vec<UndoEntry>,
    group_depth: usize,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new local edit. Clears the redo stack.
    pub fn record(&mut self, entry: UndoEntry) {
        if self.group_depth > 0 {
            self.group.push(entry);
            return;
        }
        self.push_undo(entry);
        self.redo.clear();
    }

    pub fn begin_group(&mut self) {
        self.group_depth += 1;
    }

    /// Closes one group level; the outermost close records the collapsed entry.
    pub fn end_group(&mut self) {
        if self.group_depth == 0 {
            return;
        }
        self.group_depth -= 1;
        if self.group_depth > 0 {
            return;
        }
        let entries = std::mem::take(&mut self.group);
        match entries.len() {
            0 => {}
            1 => {
                if let Some(entry) = entries.into_iter().next() {
                    self.record(entry);
                }
            }
            _ => {
                let mut undo = Vec::with_capacity(entries.len());
                let mut redo = Vec::with_capacity(entries.len());
                for entry in entries {
                    undo.push(entry.undo);
                    redo.push(entry.redo);
                }
                undo.reverse();
                self.record(UndoEntry {
                    undo: Edit::Batch(undo),
                    redo: Edit::Batch(redo),
                });
            }
        }
    }

    pub fn is_grouping(&self) -> bool {
        self.group_depth > 0
    }

    pub fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<UndoEntry> {
        self.redo.pop()
    }

    /// Pushes an entry produced by redo; keeps the redo stack.
    pub fn push_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
        if self.undo.len() > UNDO_STACK_LIMIT {
            self.undo.drain(..self.undo.len() - UNDO_STACK_LIMIT);
        }
    }

    pub fn push_redo(&mut self, entry: UndoEntry) {
        self.redo.push(entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.group.clear();
        self.group_depth = 0;
    }
}
