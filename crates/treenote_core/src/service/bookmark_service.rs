//! Saved filter bookmarks.
//!
//! Bookmarks are ordinary items in their own tree; `search_text` carries
//! the saved query and `shortcut` an optional key sequence.

use crate::model::field::FieldValue;
use crate::model::item::{Item, ItemId, ItemType, ROOT_ID};
use crate::search::{Query, QueryError};
use crate::tree::{TreeError, TreeModel};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Collection holding the bookmark tree.
pub const BOOKMARKS_COLLECTION: &str = "bookmarks";

#[derive(Debug)]
pub enum BookmarkError {
    /// Bookmark name is blank after trim.
    InvalidName,
    /// Saved query does not parse.
    Query(QueryError),
    /// Target row is not a bookmark.
    NotABookmark(ItemId),
    Tree(TreeError),
}

impl Display for BookmarkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "bookmark name must not be blank"),
            Self::Query(err) => write!(f, "{err}"),
            Self::NotABookmark(id) => write!(f, "item is not a bookmark: {id}"),
            Self::Tree(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BookmarkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Query(err) => Some(err),
            Self::Tree(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QueryError> for BookmarkError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<TreeError> for BookmarkError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

/// Appends a bookmark to the top level of the bookmark tree.
pub fn add_bookmark(
    model: &mut TreeModel,
    name: &str,
    search_text: &str,
    shortcut: Option<&str>,
) -> Result<ItemId, BookmarkError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BookmarkError::InvalidName);
    }
    Query::parse(search_text)?;

    let mut item = Item::new(ItemType::Note, name);
    item.search_text = Some(search_text.to_string());
    item.shortcut = shortcut
        .map(str::trim)
        .filter(|shortcut| !shortcut.is_empty())
        .map(str::to_string);
    let position = model.children(ROOT_ID).len();
    let id = model.insert_item(position, ROOT_ID, item, false)?;
    info!(
        "event=bookmark_add module=service status=ok item={} collection={}",
        id,
        model.collection()
    );
    Ok(id)
}

/// Replaces the saved query of an existing bookmark.
pub fn update_bookmark_query(
    model: &mut TreeModel,
    id: ItemId,
    search_text: &str,
) -> Result<(), BookmarkError> {
    if bookmark_query(model, id).is_none() {
        return Err(BookmarkError::NotABookmark(id));
    }
    Query::parse(search_text)?;
    model.set_field(id, FieldValue::SearchText(Some(search_text.to_string())))?;
    Ok(())
}

/// Saved query of a live bookmark.
pub fn bookmark_query(model: &TreeModel, id: ItemId) -> Option<&str> {
    if !model.is_visible(id) {
        return None;
    }
    model.item(id)?.search_text.as_deref()
}

/// Live bookmarks that carry a shortcut, in tree order.
pub fn bookmark_shortcuts(model: &TreeModel) -> Vec<(ItemId, &str)> {
    model
        .live_items()
        .filter(|item| item.is_bookmark())
        .filter_map(|item| item.shortcut.as_deref().map(|shortcut| (item.id, shortcut)))
        .collect()
}
