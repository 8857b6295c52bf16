//! Replication to secondary stores.
//!
//! # Responsibility
//! - Keep a secondary endpoint up to date with locally-originated changes.
//! - Report outages without blocking local edits.

pub mod replication;

pub use replication::{
    replicate_once, ReplicationEndpoint, ReplicationError, ReplicationStatus, Replicator,
    StoreEndpoint, MAX_BATCH_DOCUMENTS,
};
