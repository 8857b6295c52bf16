use crate::model::field::FieldKind;
use crate::model::item::ItemId;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Edit made through this model, including undo/redo.
    Local,
    /// Edit replayed from the store feed.
    Remote,
}

/// Typed structural-change notification sent to observers.
///
/// Positions are positions inside the parent's `children` sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    RowsInserted {
        parent: ItemId,
        position: usize,
        ids: Vec<ItemId>,
        origin: Origin,
    },
    RowsRemoved {
        parent: ItemId,
        position: usize,
        ids: Vec<ItemId>,
        origin: Origin,
    },
    /// A block of `count` siblings starting at `from` now starts at `to`.
    RowsMoved {
        parent: ItemId,
        from: usize,
        count: usize,
        to: usize,
        origin: Origin,
    },
    /// Remove-then-insert applied as one step.
    Reparented {
        ids: Vec<ItemId>,
        from_parent: ItemId,
        from_position: usize,
        to_parent: ItemId,
        to_position: usize,
        origin: Origin,
    },
    ItemChanged {
        id: ItemId,
        field: FieldKind,
        origin: Origin,
    },
    TombstoneChanged {
        id: ItemId,
        deleted: bool,
        origin: Origin,
    },
    /// Expansion annotation of an item was toggled.
    ExpansionChanged { id: ItemId, expanded: bool },
    /// Next available task of a project was recomputed.
    AvailabilityChanged {
        project: ItemId,
        next: Option<ItemId>,
    },
    /// Whole tree was reloaded.
    Reset,
}

impl TreeEvent {
    pub fn origin(&self) -> Option<Origin> {
        match self {
            Self::RowsInserted { origin, .. }
            | Self::RowsRemoved { origin, .. }
            | Self::RowsMoved { origin, .. }
            | Self::Reparented { origin, .. }
            | Self::ItemChanged { origin, .. }
            | Self::TombstoneChanged { origin, .. } => Some(*origin),
            Self::ExpansionChanged { .. } | Self::AvailabilityChanged { .. } | Self::Reset => None,
        }
    }

    /// Returns whether the event changes which rows exist or their order.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::RowsInserted { .. }
                | Self::RowsRemoved { .. }
                | Self::RowsMoved { .. }
                | Self::Reparented { .. }
                | Self::TombstoneChanged { .. }
                | Self::Reset
        )
    }
}
