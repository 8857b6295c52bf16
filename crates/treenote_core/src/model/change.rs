//! Change records embedded in stored documents.
//!
//! # Responsibility
//! - Describe every mutation, local or remote, in one wire shape.
//! - Check internal consistency before a record is replayed.
//!
//! # Invariants
//! - Structural records (`added`, `removed`, `moved_vertical`) live on the
//!   parent's document and name the parent in `parent_id`.
//! - `updated` and `deleted` records live on the changed item's document.
//! - `change_id` is unique per write and is used to acknowledge optimistic
//!   local edits when they come back through the feed.

use crate::model::item::{Item, ItemId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutation kind carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMethod {
    Added,
    Removed,
    Updated,
    MovedVertical,
    Deleted,
}

impl ChangeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Updated => "updated",
            Self::MovedVertical => "moved_vertical",
            Self::Deleted => "deleted",
        }
    }

    /// Returns whether records of this kind change a `children` sequence.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Added | Self::Removed | Self::MovedVertical)
    }
}

/// Change description embedded in a document as its `change` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub method: ChangeMethod,
    /// Identity of the writer; compared against the local actor on replay.
    pub actor: String,
    pub change_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_list: Vec<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_or_down: Option<i8>,
}

impl ChangeRecord {
    fn base(method: ChangeMethod, actor: &str) -> Self {
        Self {
            method,
            actor: actor.to_string(),
            change_id: Uuid::new_v4(),
            parent_id: None,
            position: None,
            count: None,
            id_list: Vec::new(),
            up_or_down: None,
        }
    }

    pub fn added(actor: &str, parent_id: ItemId, position: usize, ids: &[ItemId]) -> Self {
        Self {
            parent_id: Some(parent_id),
            position: Some(position),
            count: Some(ids.len()),
            id_list: ids.to_vec(),
            ..Self::base(ChangeMethod::Added, actor)
        }
    }

    pub fn removed(actor: &str, parent_id: ItemId, position: usize, ids: &[ItemId]) -> Self {
        Self {
            parent_id: Some(parent_id),
            position: Some(position),
            count: Some(ids.len()),
            id_list: ids.to_vec(),
            ..Self::base(ChangeMethod::Removed, actor)
        }
    }

    pub fn moved_vertical(
        actor: &str,
        parent_id: ItemId,
        position: usize,
        ids: &[ItemId],
        up_or_down: i8,
    ) -> Self {
        Self {
            parent_id: Some(parent_id),
            position: Some(position),
            count: Some(ids.len()),
            id_list: ids.to_vec(),
            up_or_down: Some(up_or_down),
            ..Self::base(ChangeMethod::MovedVertical, actor)
        }
    }

    pub fn updated(actor: &str) -> Self {
        Self::base(ChangeMethod::Updated, actor)
    }

    pub fn deleted(actor: &str) -> Self {
        Self::base(ChangeMethod::Deleted, actor)
    }

    /// Checks the record against the id of the document carrying it.
    ///
    /// Returns a human-readable reason when the record is internally
    /// inconsistent.
    pub fn check_consistency(&self, document_id: ItemId) -> Result<(), String> {
        if !self.method.is_structural() {
            return Ok(());
        }
        match self.parent_id {
            Some(parent) if parent == document_id => {}
            Some(parent) => {
                return Err(format!(
                    "parent_id {parent} does not match carrying document {document_id}"
                ))
            }
            None => return Err("structural record without parent_id".to_string()),
        }
        if self.position.is_none() {
            return Err("structural record without position".to_string());
        }
        if self.id_list.is_empty() {
            return Err("structural record with empty id_list".to_string());
        }
        if let Some(count) = self.count {
            if count != self.id_list.len() {
                return Err(format!(
                    "count {count} does not match id_list length {}",
                    self.id_list.len()
                ));
            }
        }
        if self.method == ChangeMethod::MovedVertical
            && !matches!(self.up_or_down, Some(-1) | Some(1))
        {
            return Err(format!("invalid up_or_down {:?}", self.up_or_down));
        }
        Ok(())
    }
}

/// Stored document: one item plus the change that produced this revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    pub item: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeRecord>,
}

impl Document {
    pub fn new(item: Item, change: Option<ChangeRecord>) -> Self {
        Self { item, change }
    }

    pub fn id(&self) -> ItemId {
        self.item.id
    }

    /// Returns a copy without the embedded change, as used by exports.
    pub fn without_change(&self) -> Self {
        Self {
            item: self.item.clone(),
            change: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeMethod, ChangeRecord, Document};
    use crate::model::item::{Item, ItemType};

    #[test]
    fn structural_record_must_match_carrying_document() {
        let parent = Item::new(ItemType::Note, "parent");
        let child = Item::new(ItemType::Note, "child");
        let record = ChangeRecord::added("host-a", parent.id, 0, &[child.id]);
        assert!(record.check_consistency(parent.id).is_ok());
        assert!(record.check_consistency(child.id).is_err());
    }

    #[test]
    fn moved_vertical_requires_unit_direction() {
        let parent = Item::new(ItemType::Note, "parent");
        let child = Item::new(ItemType::Note, "child");
        let mut record = ChangeRecord::moved_vertical("host-a", parent.id, 1, &[child.id], -1);
        assert!(record.check_consistency(parent.id).is_ok());
        record.up_or_down = Some(2);
        assert!(record.check_consistency(parent.id).is_err());
    }

    #[test]
    fn document_round_trips_with_embedded_change() {
        let item = Item::new(ItemType::Task, "write tests");
        let doc = Document::new(item, Some(ChangeRecord::updated("host-a")));
        let json = serde_json::to_string(&doc).expect("document should serialize");
        assert!(json.contains("\"method\":\"updated\""));
        let decoded: Document = serde_json::from_str(&json).expect("document should parse");
        assert_eq!(decoded, doc);
        assert_eq!(
            decoded.change.map(|change| change.method),
            Some(ChangeMethod::Updated)
        );
    }
}
