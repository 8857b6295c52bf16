//! Import and export of outline data.
//!
//! # Responsibility
//! - Move whole collections in and out as flat JSON documents.
//! - Render and parse the indented plain-text outline format.

use crate::model::item::{ItemId, ItemValidationError};
use crate::store::StoreError;
use crate::tree::TreeError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod json;
pub mod outline;

pub use json::{export_json, import_json};
pub use outline::{export_outline, paste_outline};

pub type TransferResult<T> = Result<T, TransferError>;

#[derive(Debug)]
pub enum TransferError {
    /// Import target already holds documents.
    CollectionNotEmpty(String),
    /// Input is not a JSON array of documents.
    Json(serde_json::Error),
    /// A document breaks an item invariant.
    InvalidItem(ItemValidationError),
    /// Two documents share one id.
    DuplicateDocument(ItemId),
    /// Outline text holds no rows.
    EmptyOutline,
    Store(StoreError),
    Tree(TreeError),
}

impl Display for TransferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CollectionNotEmpty(name) => {
                write!(f, "collection `{name}` already holds documents")
            }
            Self::Json(err) => write!(f, "invalid document json: {err}"),
            Self::InvalidItem(err) => write!(f, "invalid document: {err}"),
            Self::DuplicateDocument(id) => write!(f, "document {id} appears more than once"),
            Self::EmptyOutline => write!(f, "outline text holds no rows"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TransferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::InvalidItem(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Tree(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ItemValidationError> for TransferError {
    fn from(value: ItemValidationError) -> Self {
        Self::InvalidItem(value)
    }
}

impl From<StoreError> for TransferError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<TreeError> for TransferError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}
