//! Scalar item fields addressed by single-field edits.

use crate::model::item::{Item, ItemColor, ItemType};
use chrono::NaiveDate;

/// Field selector carried by change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Type,
    Color,
    StartDate,
    Estimate,
    Shortcut,
    SearchText,
}

/// New value for one scalar field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Type(ItemType),
    Color(ItemColor),
    StartDate(Option<NaiveDate>),
    Estimate(Option<u32>),
    Shortcut(Option<String>),
    SearchText(Option<String>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Text(_) => FieldKind::Text,
            Self::Type(_) => FieldKind::Type,
            Self::Color(_) => FieldKind::Color,
            Self::StartDate(_) => FieldKind::StartDate,
            Self::Estimate(_) => FieldKind::Estimate,
            Self::Shortcut(_) => FieldKind::Shortcut,
            Self::SearchText(_) => FieldKind::SearchText,
        }
    }

    /// Reads the current value of `kind` from `item`.
    pub fn read(item: &Item, kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text => Self::Text(item.text.clone()),
            FieldKind::Type => Self::Type(item.kind),
            FieldKind::Color => Self::Color(item.color),
            FieldKind::StartDate => Self::StartDate(item.start_date),
            FieldKind::Estimate => Self::Estimate(item.estimate),
            FieldKind::Shortcut => Self::Shortcut(item.shortcut.clone()),
            FieldKind::SearchText => Self::SearchText(item.search_text.clone()),
        }
    }

    /// Writes this value into `item`.
    pub fn apply_to(&self, item: &mut Item) {
        match self {
            Self::Text(value) => item.text = value.clone(),
            Self::Type(value) => item.kind = *value,
            Self::Color(value) => item.color = *value,
            Self::StartDate(value) => item.start_date = *value,
            Self::Estimate(value) => item.estimate = *value,
            Self::Shortcut(value) => item.shortcut = value.clone(),
            Self::SearchText(value) => item.search_text = value.clone(),
        }
    }
}

/// Copies every scalar field from `source` into `target`.
///
/// Identity, tombstone and children are left untouched.
pub fn copy_scalar_fields(source: &Item, target: &mut Item) {
    target.text = source.text.clone();
    target.kind = source.kind;
    target.color = source.color;
    target.start_date = source.start_date;
    target.estimate = source.estimate;
    target.shortcut = source.shortcut.clone();
    target.search_text = source.search_text.clone();
}
