//! Core use-case services.
//!
//! # Responsibility
//! - Bundle multi-step item edits into single undoable use cases.
//! - Keep callers decoupled from raw field edits.

pub mod bookmark_service;
pub mod item_service;

pub use bookmark_service::{
    add_bookmark, bookmark_query, bookmark_shortcuts, update_bookmark_query, BookmarkError,
    BOOKMARKS_COLLECTION,
};
pub use item_service::{ItemService, RepeatInterval, DEFAULT_REPEAT};
