//! Outline domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by the tree model and its views.
//! - Define the change record shape shared by local writes and replay.
//!
//! # Invariants
//! - Every item is identified by a stable `ItemId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod change;
pub mod field;
pub mod item;
