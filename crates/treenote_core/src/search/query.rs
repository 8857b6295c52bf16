//! Filter query parsing and item matching.
//!
//! # Responsibility
//! - Parse space-separated query tokens into a typed `Query`.
//! - Evaluate the per-item predicate against a reference day.
//!
//! # Invariants
//! - All predicate tokens combine with logical AND.
//! - Tokens that name a known key but carry an invalid value are rejected.
//! - Parsing is pure: identical text always yields an identical `Query`.

use crate::model::item::{Item, ItemColor, ItemId, ItemType};
use crate::tags::has_tag;
use chrono::{Days, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};

static ESTIMATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^e(<=|>=|<|>|=)(.*)$").expect("valid estimate regex"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^d(<=|>=|<|>|=)(.*)$").expect("valid date regex"));

/// Errors from query parsing and evaluation setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Token uses a known key with an unusable value.
    Malformed { token: String, reason: &'static str },
    /// `focus=` names an item that is not attached to the tree.
    UnknownFocus(ItemId),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { token, reason } => {
                write!(f, "malformed query token `{token}`: {reason}")
            }
            Self::UnknownFocus(id) => write!(f, "focus item not found: {id}"),
        }
    }
}

impl Error for QueryError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "=" => Some(Self::Eq),
            ">=" => Some(Self::Ge),
            ">" => Some(Self::Gt),
            _ => None,
        }
    }

    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ge => ordering != Ordering::Less,
            Self::Gt => ordering == Ordering::Greater,
        }
    }
}

/// Date operand: fixed ISO date or a day offset from the reference day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    Absolute(NaiveDate),
    Relative(i64),
}

impl DateBound {
    pub fn resolve(self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Absolute(date) => Some(date),
            Self::Relative(days) if days >= 0 => today.checked_add_days(Days::new(days as u64)),
            Self::Relative(days) => today.checked_sub_days(Days::new(days.unsigned_abs())),
        }
    }
}

/// `t=` filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFilter {
    Note,
    Task,
    Done,
    Project,
    Sequential,
    Parallel,
    Paused,
}

impl TypeFilter {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "note" => Some(Self::Note),
            "task" => Some(Self::Task),
            "done" => Some(Self::Done),
            "project" => Some(Self::Project),
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    pub fn accepts(self, kind: ItemType) -> bool {
        match self {
            Self::Note => kind == ItemType::Note,
            Self::Task => kind == ItemType::Task,
            Self::Done => kind == ItemType::Done,
            Self::Project => kind.is_project(),
            Self::Sequential => kind == ItemType::SequentialProject,
            Self::Parallel => kind == ItemType::ParallelProject,
            Self::Paused => kind == ItemType::PausedProject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Manual order as stored in `children`.
    #[default]
    Manual,
    StartDateAsc,
    StartDateDesc,
    EstimateAsc,
    EstimateDesc,
}

impl SortKey {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "all" | "manual" => Some(Self::Manual),
            "startdate_asc" => Some(Self::StartDateAsc),
            "startdate_desc" => Some(Self::StartDateDesc),
            "estimate_asc" => Some(Self::EstimateAsc),
            "estimate_desc" => Some(Self::EstimateDesc),
            _ => None,
        }
    }

    /// Orders two items; items lacking the key sort last in both directions.
    pub fn compare(self, left: &Item, right: &Item) -> Ordering {
        match self {
            Self::Manual => Ordering::Equal,
            Self::StartDateAsc => missing_last(left.start_date, right.start_date, false),
            Self::StartDateDesc => missing_last(left.start_date, right.start_date, true),
            Self::EstimateAsc => missing_last(left.estimate, right.estimate, false),
            Self::EstimateDesc => missing_last(left.estimate, right.estimate, true),
        }
    }
}

fn missing_last<T: Ord>(left: Option<T>, right: Option<T>, descending: bool) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) if descending => right.cmp(&left),
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Parsed filter query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    /// Lowercased free-text terms.
    pub text_terms: Vec<String>,
    /// Tag paths with leading colon.
    pub tags: Vec<String>,
    pub types: Vec<TypeFilter>,
    pub colors: Vec<ItemColor>,
    pub estimates: Vec<(Comparison, u32)>,
    pub dates: Vec<(Comparison, DateBound)>,
    pub hide_future_start_date: bool,
    pub only_start_date: bool,
    /// `has_tag=no`: only items without any tag.
    pub without_tags: bool,
    /// `deleted=yes`: match tombstoned items instead of live ones.
    pub deleted: bool,
    pub sort: SortKey,
    pub focus: Option<ItemId>,
    pub flatten: bool,
}

impl Query {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let mut query = Self::default();
        for token in text.split_whitespace() {
            query.push_token(token)?;
        }
        Ok(query)
    }

    fn push_token(&mut self, token: &str) -> Result<(), QueryError> {
        let malformed = |reason| QueryError::Malformed {
            token: token.to_string(),
            reason,
        };

        if let Some((key, value)) = token.split_once('=') {
            let handled = match key {
                "t" => {
                    self.types
                        .push(TypeFilter::parse(value).ok_or_else(|| malformed("unknown type"))?);
                    true
                }
                "c" => {
                    self.colors
                        .push(ItemColor::parse(value).ok_or_else(|| malformed("unknown color"))?);
                    true
                }
                "sort" => {
                    self.sort = SortKey::parse(value).ok_or_else(|| malformed("unknown sort"))?;
                    true
                }
                "focus" => {
                    let id = ItemId::parse_str(value).map_err(|_| malformed("invalid item id"))?;
                    self.focus = Some(id);
                    true
                }
                "flatten" => {
                    self.flatten = parse_switch(value).ok_or_else(|| malformed("expected yes|all"))?;
                    true
                }
                "deleted" => {
                    self.deleted = parse_switch(value).ok_or_else(|| malformed("expected yes|all"))?;
                    true
                }
                "hide_future_startdate" => {
                    self.hide_future_start_date =
                        parse_switch(value).ok_or_else(|| malformed("expected yes|all"))?;
                    true
                }
                "only_startdate" => {
                    self.only_start_date =
                        parse_switch(value).ok_or_else(|| malformed("expected yes|all"))?;
                    true
                }
                "has_tag" => {
                    self.without_tags = match value {
                        "no" => true,
                        "all" | "yes" => false,
                        _ => return Err(malformed("expected no|all")),
                    };
                    true
                }
                _ => false,
            };
            if handled {
                return Ok(());
            }
        }

        if let Some(captures) = ESTIMATE_RE.captures(token) {
            let comparison = Comparison::parse(&captures[1]).ok_or_else(|| malformed("bad operator"))?;
            let minutes = captures[2]
                .parse::<u32>()
                .map_err(|_| malformed("estimate must be a non-negative integer"))?;
            self.estimates.push((comparison, minutes));
            return Ok(());
        }

        if let Some(captures) = DATE_RE.captures(token) {
            let comparison = Comparison::parse(&captures[1]).ok_or_else(|| malformed("bad operator"))?;
            let bound = parse_date_bound(&captures[2]).ok_or_else(|| malformed("invalid date"))?;
            self.dates.push((comparison, bound));
            return Ok(());
        }

        if let Some(tag) = token.strip_prefix("tag:") {
            let tag = tag.trim_start_matches(':');
            if tag.is_empty() {
                return Err(malformed("empty tag"));
            }
            self.tags.push(format!(":{tag}"));
            return Ok(());
        }

        if token.starts_with(':') && token.len() > 1 {
            self.tags.push(token.to_string());
            return Ok(());
        }

        self.text_terms.push(token.to_lowercase());
        Ok(())
    }

    /// Returns whether any predicate token is present.
    ///
    /// `sort`, `focus` and `flatten` shape the view but do not filter.
    pub fn is_filtering(&self) -> bool {
        !self.text_terms.is_empty()
            || !self.tags.is_empty()
            || !self.types.is_empty()
            || !self.colors.is_empty()
            || !self.estimates.is_empty()
            || !self.dates.is_empty()
            || self.hide_future_start_date
            || self.only_start_date
            || self.without_tags
            || self.deleted
    }

    /// Evaluates the item-level predicate.
    ///
    /// The tombstone flag must equal `deleted`; everything else is ANDed.
    pub fn matches(&self, item: &Item, today: NaiveDate) -> bool {
        if item.deleted != self.deleted {
            return false;
        }
        let text = item.text.to_lowercase();
        if !self.text_terms.iter().all(|term| text.contains(term.as_str())) {
            return false;
        }
        if !self.tags.iter().all(|tag| has_tag(&item.text, tag)) {
            return false;
        }
        if self.without_tags && !crate::tags::item_tags(&item.text).is_empty() {
            return false;
        }
        if !self.types.iter().all(|filter| filter.accepts(item.kind)) {
            return false;
        }
        if !self.colors.iter().all(|color| *color == item.color) {
            return false;
        }
        let estimates_hold = self.estimates.iter().all(|(comparison, minutes)| {
            item.estimate
                .is_some_and(|estimate| comparison.holds(estimate.cmp(minutes)))
        });
        if !estimates_hold {
            return false;
        }
        let dates_hold = self.dates.iter().all(|(comparison, bound)| {
            match (item.start_date, bound.resolve(today)) {
                (Some(start), Some(limit)) => comparison.holds(start.cmp(&limit)),
                _ => false,
            }
        });
        if !dates_hold {
            return false;
        }
        if self.hide_future_start_date && item.start_date.is_some_and(|start| start > today) {
            return false;
        }
        if self.only_start_date && item.start_date.is_none() {
            return false;
        }
        true
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "yes" => Some(true),
        "all" | "no" => Some(false),
        _ => None,
    }
}

fn parse_date_bound(value: &str) -> Option<DateBound> {
    if let Some(days) = value.strip_prefix('+') {
        return days.parse::<u32>().ok().map(|days| DateBound::Relative(i64::from(days)));
    }
    if let Some(days) = value.strip_prefix('-') {
        return days
            .parse::<u32>()
            .ok()
            .map(|days| DateBound::Relative(-i64::from(days)));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(DateBound::Absolute)
}
