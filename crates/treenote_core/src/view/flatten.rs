//! Depth-first projection without hierarchy.

use crate::model::item::{ItemId, ROOT_ID};
use crate::tree::{TreeEvent, TreeModel};
use crate::view::{Row, RowSource};
use log::debug;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, TryRecvError};

/// Preorder sequence of live items below a root.
///
/// Tombstoned items hide their whole subtree. The sequence is rebuilt
/// lazily on `sync` after any structural event.
pub struct FlattenView {
    root: ItemId,
    rows: Vec<ItemId>,
    positions: HashMap<ItemId, usize>,
    events: Receiver<TreeEvent>,
    dirty: bool,
}

impl FlattenView {
    pub fn new(model: &mut TreeModel) -> Self {
        Self::with_root(model, ROOT_ID)
    }

    /// Flattens the subtree of `root`, excluding `root` itself.
    pub fn with_root(model: &mut TreeModel, root: ItemId) -> Self {
        let events = model.subscribe();
        let mut view = Self {
            root,
            rows: Vec::new(),
            positions: HashMap::new(),
            events,
            dirty: true,
        };
        view.sync(model);
        view
    }

    pub fn root(&self) -> ItemId {
        self.root
    }

    pub fn set_root(&mut self, root: ItemId) {
        if self.root != root {
            self.root = root;
            self.dirty = true;
        }
    }

    /// Drains model events and rebuilds when needed. Returns whether the
    /// rows were rebuilt.
    pub fn sync(&mut self, model: &TreeModel) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.dirty |= event.is_structural(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.dirty = true;
                    break;
                }
            }
        }
        if !self.dirty {
            return false;
        }
        if !model.contains(self.root) {
            debug!(
                "event=flatten_sync module=view status=skip reason=root_gone root={}",
                self.root
            );
            self.root = ROOT_ID;
        }
        self.rows = model
            .preorder(self.root, false)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        self.positions = self
            .rows
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();
        self.dirty = false;
        true
    }

    pub fn rows(&self) -> &[ItemId] {
        &self.rows
    }

    pub fn position_of(&self, id: ItemId) -> Option<usize> {
        self.positions.get(&id).copied()
    }
}

impl RowSource for FlattenView {
    fn count(&self) -> usize {
        self.rows.len()
    }

    fn id_at(&self, position: usize) -> Option<ItemId> {
        self.rows.get(position).copied()
    }

    fn sequence_at(&self, position: usize) -> Option<Row> {
        self.id_at(position).map(|id| Row {
            id,
            depth: 0,
            matched: true,
            expanded: false,
        })
    }

    fn position_of_id(&self, id: ItemId) -> Option<usize> {
        self.position_of(id)
    }
}
