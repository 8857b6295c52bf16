use crate::model::item::ItemId;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by tree model operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors from tree model operations and change replay.
#[derive(Debug)]
pub enum TreeError {
    /// Item id is not known to the model.
    NotFound(ItemId),
    /// Parent is unknown, detached or tombstoned.
    InvalidParent(ItemId),
    /// Position is outside `0..=len` of the parent's children.
    InvalidPosition {
        parent: ItemId,
        position: usize,
        len: usize,
    },
    /// Selection is empty, contains the root, spans several parents or has gaps.
    InvalidSelection(String),
    /// Reparent target is the item itself or one of its descendants.
    CycleRejected { item: ItemId, parent: ItemId },
    /// Move would leave the parent's bounds; nothing changed.
    BoundaryReached,
    /// Demote requested for a block that has no preceding sibling.
    NoPrecedingSibling(ItemId),
    /// Store write failed; the in-memory edit was rolled back.
    StoreUnavailable(StoreError),
    /// Incoming change record contradicts the local tree.
    MalformedChangeRecord { document: ItemId, reason: String },
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::InvalidParent(id) => write!(f, "invalid parent: {id}"),
            Self::InvalidPosition {
                parent,
                position,
                len,
            } => write!(
                f,
                "position {position} out of range for parent {parent} with {len} children"
            ),
            Self::InvalidSelection(message) => write!(f, "invalid selection: {message}"),
            Self::CycleRejected { item, parent } => write!(
                f,
                "move would create cycle: item {item} under parent {parent}"
            ),
            Self::BoundaryReached => write!(f, "move reached the parent boundary"),
            Self::NoPrecedingSibling(id) => write!(f, "item {id} has no preceding sibling"),
            Self::StoreUnavailable(err) => write!(f, "document store unavailable: {err}"),
            Self::MalformedChangeRecord { document, reason } => {
                write!(f, "malformed change record on {document}: {reason}")
            }
        }
    }
}

impl Error for TreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for TreeError {
    fn from(value: StoreError) -> Self {
        Self::StoreUnavailable(value)
    }
}

impl TreeError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidParent(_) => "invalid_parent",
            Self::InvalidPosition { .. } => "invalid_position",
            Self::InvalidSelection(_) => "invalid_selection",
            Self::CycleRejected { .. } => "cycle_rejected",
            Self::BoundaryReached => "boundary_reached",
            Self::NoPrecedingSibling(_) => "no_preceding_sibling",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::MalformedChangeRecord { .. } => "malformed_change_record",
        }
    }
}
