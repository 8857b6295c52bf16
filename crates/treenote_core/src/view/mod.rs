//! Derived row views over a `TreeModel`.
//!
//! # Responsibility
//! - Expose one row interface shared by the tree, the flattened projection
//!   and the filtered projection.
//! - Keep views id-keyed so selection and expansion survive recomputes.
//!
//! # Invariants
//! - Views never mutate the model; they only read it during `sync`.
//! - A view is stale between a model event and the next `sync` call.

use crate::model::item::{ItemId, ROOT_ID};
use crate::tree::TreeModel;

pub mod filter;
pub mod flatten;

pub use filter::FilterView;
pub use flatten::FlattenView;

/// One displayed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub id: ItemId,
    /// Indentation level; direct children of the view root are depth 0.
    pub depth: usize,
    /// `false` for ancestor rows kept only as context for a match.
    pub matched: bool,
    pub expanded: bool,
}

/// Uniform positional access to a sequence of rows.
pub trait RowSource {
    fn count(&self) -> usize;

    fn id_at(&self, position: usize) -> Option<ItemId>;

    fn sequence_at(&self, position: usize) -> Option<Row>;

    /// Position of the first row showing `id`.
    fn position_of_id(&self, id: ItemId) -> Option<usize> {
        (0..self.count()).find(|position| self.id_at(*position) == Some(id))
    }
}

/// Hierarchical preorder of every live item, root excluded.
///
/// Computed on each call; views cache their own rows.
impl RowSource for TreeModel {
    fn count(&self) -> usize {
        self.preorder(ROOT_ID, false).len()
    }

    fn id_at(&self, position: usize) -> Option<ItemId> {
        self.preorder(ROOT_ID, false)
            .get(position)
            .map(|(id, _)| *id)
    }

    fn sequence_at(&self, position: usize) -> Option<Row> {
        self.preorder(ROOT_ID, false)
            .get(position)
            .map(|(id, depth)| Row {
                id: *id,
                depth: *depth,
                matched: true,
                expanded: self.is_expanded(*id),
            })
    }
}
