//! Indented plain-text outline format.
//!
//! One row per item: `depth` tabs, `- `, then the text. Continuation lines
//! of multi-line text carry one extra tab and no bullet.

use crate::model::item::{Item, ItemId, ItemType};
use crate::transfer::{TransferError, TransferResult};
use crate::tree::TreeModel;
use log::info;
use std::collections::BTreeMap;

/// Renders the live subtree below `root`, `root` itself excluded.
pub fn export_outline(model: &TreeModel, root: ItemId) -> String {
    let mut out = String::new();
    for (id, depth) in model.preorder(root, false) {
        let Some(item) = model.item(id) else {
            continue;
        };
        let indent = "\t".repeat(depth);
        out.push_str(&indent);
        out.push_str("- ");
        out.push_str(&item.text.replace('\n', &format!("\n{indent}\t")));
        out.push('\n');
    }
    out
}

/// One parsed row before insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OutlineRow {
    indent: usize,
    text: String,
}

/// Splits outline text into rows.
///
/// When any line starts with a bullet, lines without one continue the
/// previous row; otherwise every line is a row.
fn parse_rows(text: &str) -> Vec<OutlineRow> {
    let normalized = text.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.trim_matches('\n').split('\n').collect();
    let bulleted = lines
        .iter()
        .any(|line| line.trim_start_matches('\t').starts_with('-'));

    let mut rows: Vec<OutlineRow> = Vec::new();
    for line in lines {
        let stripped = line.trim_start_matches('\t');
        let indent = line.len() - stripped.len();
        if bulleted && !stripped.starts_with('-') {
            if let Some(previous) = rows.last_mut() {
                previous.text.push('\n');
                previous.text.push_str(stripped);
                continue;
            }
        }
        let cleaned = stripped
            .strip_prefix('-')
            .or_else(|| stripped.strip_prefix('*'))
            .unwrap_or(stripped)
            .trim_start_matches(' ');
        rows.push(OutlineRow {
            indent,
            text: cleaned.to_string(),
        });
    }
    rows
}

/// Builds a subtree from indented rows and inserts it under `parent` at
/// `position` as one undoable edit.
///
/// A row's parent is the closest preceding row with a smaller indent.
/// Returns the created ids in row order.
pub fn paste_outline(
    model: &mut TreeModel,
    parent: ItemId,
    position: usize,
    text: &str,
) -> TransferResult<Vec<ItemId>> {
    if text.trim().is_empty() {
        return Err(TransferError::EmptyOutline);
    }
    let rows = parse_rows(text);

    let mut items: Vec<Item> = Vec::with_capacity(rows.len());
    let mut roots: Vec<ItemId> = Vec::new();
    // indent -> index into `items` of the latest row at that indent
    let mut open: BTreeMap<usize, usize> = BTreeMap::new();
    for row in rows {
        open.retain(|indent, _| *indent < row.indent);
        let item = Item::new(ItemType::Note, row.text);
        match open.values().next_back() {
            Some(parent_index) => {
                let child_id = item.id;
                items[*parent_index].children.push(child_id);
            }
            None => roots.push(item.id),
        }
        open.insert(row.indent, items.len());
        items.push(item);
    }

    let ids: Vec<ItemId> = items.iter().map(|item| item.id).collect();
    model.insert_subtree(position, parent, roots, items)?;
    info!(
        "event=paste_outline module=transfer status=ok parent={} items={}",
        parent,
        ids.len()
    );
    Ok(ids)
}
