//! Item domain model.
//!
//! # Responsibility
//! - Define the canonical outline node shared by every view.
//! - Provide lifecycle helpers for soft-delete semantics.
//!
//! # Invariants
//! - `id` is stable and never reused for another item.
//! - `deleted` is the source of truth for tombstone state.
//! - `children` order is the manual order and is semantically significant.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for every outline item.
pub type ItemId = Uuid;

/// Fixed id of the root item of every tree.
pub const ROOT_ID: ItemId = Uuid::nil();

/// Row kind. Serialized as `type` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Plain note row.
    #[default]
    Note,
    /// Open task.
    Task,
    /// Completed task.
    Done,
    /// Project where only the next open task is actionable.
    SequentialProject,
    /// Project where every open task is actionable.
    ParallelProject,
    /// Project with no actionable tasks.
    PausedProject,
}

impl ItemType {
    /// Returns whether this type is one of the project variants.
    pub fn is_project(self) -> bool {
        matches!(
            self,
            Self::SequentialProject | Self::ParallelProject | Self::PausedProject
        )
    }

    /// Stable wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Task => "task",
            Self::Done => "done",
            Self::SequentialProject => "sequential_project",
            Self::ParallelProject => "parallel_project",
            Self::PausedProject => "paused_project",
        }
    }
}

/// Row highlight color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemColor {
    #[default]
    None,
    Green,
    Yellow,
    Blue,
    Red,
    Orange,
}

impl ItemColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Blue => "blue",
            Self::Red => "red",
            Self::Orange => "orange",
        }
    }

    /// Parses a color name as used by query tokens.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" | "no" => Some(Self::None),
            "green" => Some(Self::Green),
            "yellow" => Some(Self::Yellow),
            "blue" => Some(Self::Blue),
            "red" => Some(Self::Red),
            "orange" => Some(Self::Orange),
            _ => None,
        }
    }
}

/// Validation errors for item invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemValidationError {
    /// An item lists itself as a child.
    SelfChild(ItemId),
    /// The same child id appears twice in one `children` sequence.
    DuplicateChild { parent: ItemId, child: ItemId },
    /// The root item carries a tombstone.
    DeletedRoot,
}

impl Display for ItemValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfChild(id) => write!(f, "item {id} lists itself as a child"),
            Self::DuplicateChild { parent, child } => {
                write!(f, "item {parent} lists child {child} more than once")
            }
            Self::DeletedRoot => write!(f, "root item must not be deleted"),
        }
    }
}

impl Error for ItemValidationError {}

/// Canonical outline node.
///
/// Bookmark rows reuse this shape and fill `shortcut` and `search_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "_id")]
    pub id: ItemId,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: ItemType,
    #[serde(default)]
    pub color: ItemColor,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Estimate in minutes.
    #[serde(default)]
    pub estimate: Option<u32>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub children: Vec<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
}

impl Item {
    /// Creates an item with a generated stable id and no children.
    pub fn new(kind: ItemType, text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), kind, text)
    }

    /// Creates an item with a caller-provided id.
    ///
    /// Used by import/replay paths where identity already exists.
    pub fn with_id(id: ItemId, kind: ItemType, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            kind,
            color: ItemColor::None,
            start_date: None,
            estimate: None,
            deleted: false,
            children: Vec::new(),
            shortcut: None,
            search_text: None,
        }
    }

    /// Creates the empty root item of a fresh tree.
    pub fn root() -> Self {
        Self::with_id(ROOT_ID, ItemType::Note, "")
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    /// Marks this item as softly deleted (tombstoned).
    pub fn soft_delete(&mut self) {
        self.deleted = true;
    }

    /// Clears the tombstone.
    pub fn restore(&mut self) {
        self.deleted = false;
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Returns whether this row is a saved-filter bookmark.
    pub fn is_bookmark(&self) -> bool {
        self.search_text.is_some()
    }

    /// Validates structural invariants local to one item.
    pub fn validate(&self) -> Result<(), ItemValidationError> {
        if self.is_root() && self.deleted {
            return Err(ItemValidationError::DeletedRoot);
        }
        let mut seen = std::collections::HashSet::with_capacity(self.children.len());
        for child in &self.children {
            if *child == self.id {
                return Err(ItemValidationError::SelfChild(self.id));
            }
            if !seen.insert(*child) {
                return Err(ItemValidationError::DuplicateChild {
                    parent: self.id,
                    child: *child,
                });
            }
        }
        Ok(())
    }
}
