//! Tag extraction and the hierarchical tag index.
//!
//! # Responsibility
//! - Extract `:seg(:seg)*` tag tokens from item text.
//! - Build the tag tree shown next to the outline.
//!
//! # Invariants
//! - A tag starts at the beginning of the text or after whitespace and ends
//!   at whitespace.
//! - `TagNode::count` counts each live item once per node, including items
//!   tagged with a sub-tag.
//! - The index is rebuilt in full; there is no incremental update.

use crate::tree::TreeModel;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:[^\s:]+(?::[^\s:]+)*$").expect("valid tag regex"));

/// Returns the tag tokens of `text` in order of appearance.
pub fn item_tags(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter(|token| TAG_RE.is_match(token))
        .collect()
}

/// Returns whether `text` carries `tag` or one of its sub-tags.
///
/// Comparison is case-insensitive.
pub fn has_tag(text: &str, tag: &str) -> bool {
    item_tags(text)
        .into_iter()
        .any(|candidate| sub_tag_suffix(candidate, tag).is_some())
}

/// Returns the part of `candidate` below `tag` (empty, or starting with `:`)
/// when `candidate` is `tag` or one of its sub-tags. Case-insensitive.
fn sub_tag_suffix<'a>(candidate: &'a str, tag: &str) -> Option<&'a str> {
    let depth = tag.split(':').count();
    let cut = candidate
        .match_indices(':')
        .map(|(at, _)| at)
        .chain(std::iter::once(candidate.len()))
        .nth(depth - 1)?;
    (candidate[..cut].to_lowercase() == tag.to_lowercase()).then(|| &candidate[cut..])
}

/// Rewrites every occurrence of `old` (and its sub-tags) to `new`.
///
/// Matching ignores case, like `has_tag`. Returns `None` when the text does
/// not carry the tag.
pub fn rename_tag_in_text(text: &str, old: &str, new: &str) -> Option<String> {
    let mut changed = false;
    let mut out = String::with_capacity(text.len());
    for piece in text.split_inclusive(char::is_whitespace) {
        let token = piece.trim_end_matches(char::is_whitespace);
        let trailing = &piece[token.len()..];
        match sub_tag_suffix(token, old).filter(|_| TAG_RE.is_match(token)) {
            Some(suffix) => {
                out.push_str(new);
                out.push_str(suffix);
                changed = true;
            }
            None => out.push_str(token),
        }
        out.push_str(trailing);
    }
    changed.then_some(out)
}

/// One node of the tag tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagNode {
    /// Last path segment, without colon.
    pub name: String,
    /// Full tag, e.g. `:work:meeting`.
    pub full_path: String,
    pub count: usize,
    pub children: Vec<TagNode>,
}

#[derive(Debug, Default)]
struct NodeBuilder {
    count: usize,
    children: BTreeMap<String, NodeBuilder>,
}

impl NodeBuilder {
    fn finish(self, name: String, full_path: String) -> TagNode {
        let children = self
            .children
            .into_iter()
            .map(|(child, builder)| {
                let path = format!("{full_path}:{child}");
                builder.finish(child, path)
            })
            .collect();
        TagNode {
            name,
            full_path,
            count: self.count,
            children,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex {
    roots: Vec<TagNode>,
}

impl TagIndex {
    /// Scans every live item of the model.
    pub fn build(model: &TreeModel) -> Self {
        Self::from_texts(model.live_items().map(|item| item.text.as_str()))
    }

    /// Builds the index from raw texts, one per item.
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut root = NodeBuilder::default();
        for text in texts {
            let mut paths: BTreeSet<Vec<&str>> = BTreeSet::new();
            for tag in item_tags(text) {
                let segments: Vec<&str> = tag[1..].split(':').collect();
                for depth in 1..=segments.len() {
                    paths.insert(segments[..depth].to_vec());
                }
            }
            for path in paths {
                let mut node = &mut root;
                for segment in path {
                    node = node.children.entry(segment.to_string()).or_default();
                }
                node.count += 1;
            }
        }
        let roots = root
            .children
            .into_iter()
            .map(|(name, builder)| {
                let path = format!(":{name}");
                builder.finish(name, path)
            })
            .collect();
        Self { roots }
    }

    pub fn roots(&self) -> &[TagNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Finds a node by its full path.
    pub fn find(&self, full_path: &str) -> Option<&TagNode> {
        let mut nodes = &self.roots;
        let mut found = None;
        for segment in full_path.strip_prefix(':')?.split(':') {
            let node = nodes.iter().find(|node| node.name == segment)?;
            nodes = &node.children;
            found = Some(node);
        }
        found
    }

    /// Every full path, depth-first.
    pub fn all_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<&TagNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node.full_path.clone());
            stack.extend(node.children.iter().rev());
        }
        out
    }
}
