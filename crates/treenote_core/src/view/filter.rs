//! Query-driven subset and ordering of the tree.
//!
//! # Responsibility
//! - Evaluate a `Query` against the focus subtree.
//! - Keep an id-keyed selection consistent across recomputes.
//!
//! # Invariants
//! - Identical (tree, query, reference day) always yield identical rows.
//! - Sorting is stable; ties keep document order.
//! - `SortKey::Manual` yields the raw `children` order.

use crate::model::item::{Item, ItemId, ROOT_ID};
use crate::search::{Query, QueryError};
use crate::tree::{Origin, TreeEvent, TreeModel};
use crate::view::{Row, RowSource};
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::mpsc::{Receiver, TryRecvError};

/// Selection change requested by a local edit, resolved after recompute.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectionHint {
    Rows(Vec<ItemId>),
    RemovedAt { parent: ItemId, position: usize },
}

pub struct FilterView {
    query_text: String,
    query: Query,
    today: NaiveDate,
    events: Receiver<TreeEvent>,
    rows: Vec<Row>,
    selection: Vec<ItemId>,
    dirty: bool,
}

impl FilterView {
    /// Creates an unfiltered view. `today` is the reference day for
    /// relative date tokens.
    pub fn new(model: &mut TreeModel, today: NaiveDate) -> Self {
        let events = model.subscribe();
        let mut view = Self {
            query_text: String::new(),
            query: Query::default(),
            today,
            events,
            rows: Vec::new(),
            selection: Vec::new(),
            dirty: true,
        };
        view.sync(model);
        view
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Parses and applies a new query, then recomputes.
    ///
    /// # Errors
    /// - `QueryError::Malformed` for unusable tokens.
    /// - `QueryError::UnknownFocus` when `focus=` names a detached item.
    ///
    /// On error the previous query stays active.
    pub fn set_query(&mut self, model: &TreeModel, text: &str) -> Result<(), QueryError> {
        let query = Query::parse(text)?;
        if let Some(focus) = query.focus {
            if !model.contains(focus) {
                return Err(QueryError::UnknownFocus(focus));
            }
        }
        info!(
            "event=filter_query module=view status=ok filtering={} flatten={} sort={:?}",
            query.is_filtering(),
            query.flatten,
            query.sort
        );
        self.query_text = text.to_string();
        self.query = query;
        self.dirty = true;
        self.sync(model);
        Ok(())
    }

    pub fn set_today(&mut self, model: &TreeModel, today: NaiveDate) {
        if self.today != today {
            self.today = today;
            self.dirty = true;
            self.sync(model);
        }
    }

    /// Drains model events and recomputes when anything changed. Returns
    /// whether the rows were recomputed.
    pub fn sync(&mut self, model: &TreeModel) -> bool {
        let mut hint = None;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Some(next) = selection_hint(&event) {
                        hint = Some(next);
                    }
                    self.dirty |= !matches!(event, TreeEvent::AvailabilityChanged { .. });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.dirty = true;
                    break;
                }
            }
        }
        if !self.dirty {
            return false;
        }
        self.rows = self.compute_rows(model);
        self.dirty = false;
        self.reconcile_selection(model, hint);
        debug!(
            "event=filter_sync module=view status=ok rows={} selected={}",
            self.rows.len(),
            self.selection.len()
        );
        true
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn selection(&self) -> &[ItemId] {
        &self.selection
    }

    /// Replaces the selection; ids not shown by the view are ignored.
    pub fn select(&mut self, ids: &[ItemId]) {
        let shown: HashSet<ItemId> = self.rows.iter().map(|row| row.id).collect();
        self.selection = ids.iter().copied().filter(|id| shown.contains(id)).collect();
    }

    fn focus(&self, model: &TreeModel) -> ItemId {
        match self.query.focus {
            Some(focus) if model.contains(focus) => focus,
            Some(focus) => {
                debug!(
                    "event=filter_sync module=view status=skip reason=focus_gone focus={}",
                    focus
                );
                ROOT_ID
            }
            None => ROOT_ID,
        }
    }

    fn compute_rows(&self, model: &TreeModel) -> Vec<Row> {
        let focus = self.focus(model);
        if self.query.flatten {
            self.flat_rows(model, focus)
        } else {
            let mut rows = Vec::new();
            self.hierarchical_rows(model, focus, 0, &mut rows);
            rows
        }
    }

    fn row_matches(&self, item: &Item) -> bool {
        !self.query.is_filtering() || self.query.matches(item, self.today)
    }

    fn expanded(&self, model: &TreeModel, id: ItemId) -> bool {
        self.query.is_filtering() || model.is_expanded(id)
    }

    fn flat_rows(&self, model: &TreeModel, focus: ItemId) -> Vec<Row> {
        let mut matches: Vec<&Item> = model
            .preorder(focus, self.query.deleted)
            .into_iter()
            .filter_map(|(id, _)| model.item(id))
            .filter(|item| self.row_matches(item))
            .collect();
        let sort = self.query.sort;
        matches.sort_by(|left, right| sort.compare(left, right));
        matches
            .into_iter()
            .map(|item| Row {
                id: item.id,
                depth: 0,
                matched: true,
                expanded: self.expanded(model, item.id),
            })
            .collect()
    }

    /// Appends the rows for the children of `parent`. Returns whether any
    /// row was appended.
    fn hierarchical_rows(
        &self,
        model: &TreeModel,
        parent: ItemId,
        depth: usize,
        out: &mut Vec<Row>,
    ) -> bool {
        let include_deleted = self.query.deleted;
        let mut children: Vec<&Item> = model
            .children(parent)
            .iter()
            .filter_map(|id| model.item(*id))
            .filter(|item| include_deleted || !item.deleted)
            .collect();
        let sort = self.query.sort;
        children.sort_by(|left, right| sort.compare(left, right));

        let start = out.len();
        for child in children {
            let matched = self.row_matches(child);
            let row_index = out.len();
            out.push(Row {
                id: child.id,
                depth,
                matched,
                expanded: self.expanded(model, child.id),
            });
            let has_descendants = self.hierarchical_rows(model, child.id, depth + 1, out);
            if !matched && !has_descendants {
                out.truncate(row_index);
            }
        }
        out.len() > start
    }

    fn reconcile_selection(&mut self, model: &TreeModel, hint: Option<SelectionHint>) {
        let shown: HashSet<ItemId> = self.rows.iter().map(|row| row.id).collect();
        match hint {
            Some(SelectionHint::Rows(ids)) => self.selection = ids,
            Some(SelectionHint::RemovedAt { parent, position }) => {
                let children = model.children(parent);
                let candidate = [
                    children.get(position).copied(),
                    position.checked_sub(1).and_then(|above| children.get(above).copied()),
                    Some(parent),
                ]
                .into_iter()
                .flatten()
                .find(|id| shown.contains(id));
                self.selection = candidate.into_iter().collect();
            }
            None => {}
        }
        self.selection.retain(|id| shown.contains(id));
        if self.selection.is_empty() {
            self.selection.extend(self.rows.first().map(|row| row.id));
        }
    }
}

fn selection_hint(event: &TreeEvent) -> Option<SelectionHint> {
    match event {
        TreeEvent::RowsInserted {
            ids,
            origin: Origin::Local,
            ..
        }
        | TreeEvent::Reparented {
            ids,
            origin: Origin::Local,
            ..
        } => Some(SelectionHint::Rows(ids.clone())),
        TreeEvent::RowsRemoved {
            parent,
            position,
            origin: Origin::Local,
            ..
        } => Some(SelectionHint::RemovedAt {
            parent: *parent,
            position: *position,
        }),
        _ => None,
    }
}

impl RowSource for FilterView {
    fn count(&self) -> usize {
        self.rows.len()
    }

    fn id_at(&self, position: usize) -> Option<ItemId> {
        self.rows.get(position).map(|row| row.id)
    }

    fn sequence_at(&self, position: usize) -> Option<Row> {
        self.rows.get(position).copied()
    }
}
