//! Filter query language.
//!
//! # Responsibility
//! - Parse the token-based query typed into the search field.
//! - Decide per item whether it matches, independent of any view.

pub mod query;

pub use query::{Comparison, DateBound, Query, QueryError, SortKey, TypeFilter};
