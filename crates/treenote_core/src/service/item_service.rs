//! Item-level use cases over a tree model.
//!
//! # Responsibility
//! - Cycle item types the way the outline toolbar does.
//! - Apply repeat directives and bulk tag renames.
//!
//! # Invariants
//! - Every call goes through `TreeModel` edits, so it is undoable.
//! - Multi-item operations record one undo entry.

use crate::model::field::FieldValue;
use crate::model::item::{Item, ItemColor, ItemId, ItemType};
use crate::tags::rename_tag_in_text;
use crate::tree::{TreeError, TreeModel, TreeResult};
use chrono::{Days, Months, NaiveDate};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;

static REPEAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)repeat=(\d+)([dwmy])(?:\s|$)").expect("valid repeat regex"));

/// Repeat suffix appended by `append_repeat`.
pub const DEFAULT_REPEAT: &str = " repeat=1w";

/// Recurrence interval parsed from `repeat=<n><unit>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatInterval {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

impl RepeatInterval {
    /// Finds the first repeat directive in `text`.
    pub fn parse(text: &str) -> Option<Self> {
        let captures = REPEAT_RE.captures(text)?;
        let amount = captures[1].parse::<u32>().ok()?;
        match &captures[2] {
            "d" => Some(Self::Days(amount)),
            "w" => Some(Self::Weeks(amount)),
            "m" => Some(Self::Months(amount)),
            "y" => Some(Self::Years(amount)),
            _ => None,
        }
    }

    pub fn advance(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Days(days) => date.checked_add_days(Days::new(u64::from(days))),
            Self::Weeks(weeks) => date.checked_add_days(Days::new(u64::from(weeks) * 7)),
            Self::Months(months) => date.checked_add_months(Months::new(months)),
            Self::Years(years) => date.checked_add_months(Months::new(years.checked_mul(12)?)),
        }
    }
}

/// Use-case facade over one tree model.
pub struct ItemService<'m> {
    model: &'m mut TreeModel,
}

impl<'m> ItemService<'m> {
    pub fn new(model: &'m mut TreeModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &TreeModel {
        &*self.model
    }

    /// Cycles note → task → done → note; other types become a task.
    ///
    /// Completing a task that carries a repeat directive and a start date
    /// moves the start date forward instead and keeps it open.
    pub fn toggle_task(&mut self, id: ItemId) -> TreeResult<ItemType> {
        let item = self.live_item(id)?;
        if item.kind == ItemType::Task {
            let repeat = RepeatInterval::parse(&item.text);
            if let (Some(repeat), Some(start)) = (repeat, item.start_date) {
                let next = repeat
                    .advance(start)
                    .ok_or_else(|| TreeError::InvalidSelection(format!("repeat overflows {start}")))?;
                self.model
                    .set_field(id, FieldValue::StartDate(Some(next)))?;
                info!(
                    "event=task_repeat module=service status=ok item={} next={}",
                    id, next
                );
                return Ok(ItemType::Task);
            }
        }
        let next = match item.kind {
            ItemType::Note => ItemType::Task,
            ItemType::Task => ItemType::Done,
            ItemType::Done => ItemType::Note,
            _ => ItemType::Task,
        };
        self.model.set_field(id, FieldValue::Type(next))?;
        Ok(next)
    }

    /// Cycles note → sequential → parallel → paused → note.
    pub fn toggle_project(&mut self, id: ItemId) -> TreeResult<ItemType> {
        let next = match self.live_item(id)?.kind {
            ItemType::SequentialProject => ItemType::ParallelProject,
            ItemType::ParallelProject => ItemType::PausedProject,
            ItemType::PausedProject => ItemType::Note,
            _ => ItemType::SequentialProject,
        };
        self.model.set_field(id, FieldValue::Type(next))?;
        Ok(next)
    }

    pub fn set_color(&mut self, id: ItemId, color: ItemColor) -> TreeResult<()> {
        self.model.set_field(id, FieldValue::Color(color))
    }

    /// Sets the estimate in minutes; `None` clears it.
    pub fn set_estimate(&mut self, id: ItemId, minutes: Option<u32>) -> TreeResult<()> {
        self.model.set_field(id, FieldValue::Estimate(minutes))
    }

    pub fn set_start_date(&mut self, id: ItemId, date: Option<NaiveDate>) -> TreeResult<()> {
        self.model.set_field(id, FieldValue::StartDate(date))
    }

    /// Turns the item into a weekly repeating task starting `today`.
    pub fn append_repeat(&mut self, id: ItemId, today: NaiveDate) -> TreeResult<()> {
        let text = format!("{}{DEFAULT_REPEAT}", self.live_item(id)?.text);
        self.model.grouped(|model| {
            model.set_field(id, FieldValue::Type(ItemType::Task))?;
            model.set_field(id, FieldValue::StartDate(Some(today)))?;
            model.set_field(id, FieldValue::Text(text))
        })
    }

    /// Rewrites `old` (and its sub-tags) to `new` in every live item.
    ///
    /// Returns the number of items changed.
    pub fn rename_tag(&mut self, old: &str, new: &str) -> TreeResult<usize> {
        if !old.starts_with(':') || !new.starts_with(':') || new.contains(char::is_whitespace) {
            return Err(TreeError::InvalidSelection(format!(
                "cannot rename tag `{old}` to `{new}`"
            )));
        }
        let updates: Vec<(ItemId, String)> = self
            .model
            .live_items()
            .filter_map(|item| rename_tag_in_text(&item.text, old, new).map(|text| (item.id, text)))
            .collect();
        let count = updates.len();
        if count == 0 {
            return Ok(0);
        }
        self.model.grouped(|model| {
            for (id, text) in updates {
                model.set_field(id, FieldValue::Text(text))?;
            }
            Ok(())
        })?;
        info!(
            "event=tag_rename module=service status=ok old={} new={} items={}",
            old, new, count
        );
        Ok(count)
    }

    fn live_item(&self, id: ItemId) -> TreeResult<Item> {
        match self.model.item(id) {
            Some(item) if self.model.contains(id) && !item.is_root() => Ok(item.clone()),
            _ => Err(TreeError::NotFound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RepeatInterval;
    use chrono::NaiveDate;

    #[test]
    fn repeat_directive_is_found_anywhere_in_text() {
        assert_eq!(
            RepeatInterval::parse("water plants repeat=3d :home"),
            Some(RepeatInterval::Days(3))
        );
        assert_eq!(RepeatInterval::parse("norepeat=1w"), None);
        assert_eq!(RepeatInterval::parse("repeat=2x"), None);
    }

    #[test]
    fn month_repeat_clamps_to_month_end() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            RepeatInterval::Months(1).advance(start),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(
            RepeatInterval::Weeks(1).advance(start),
            NaiveDate::from_ymd_opt(2024, 2, 7)
        );
    }
}
