//! EngramDB Storage
//!
//! Provides snapshot persistence for the memory graph.
//!
//! # Architecture
//!
//! The storage layer is organized into:
//! - A binary snapshot codec for canonical node and edge records
//! - A `SnapshotStorage` abstraction over byte-level blob I/O
//! - File and in-memory backends
//! - Retry options for transient failures
//!
//! Indices (Bloom filter, key index, LSH tables) are never persisted; they
//! are rebuilt from the records on load.

pub mod backend;
pub mod options;
pub mod snapshot;

pub use backend::{FileSnapshotStorage, InMemorySnapshotStorage, SnapshotStorage};
pub use options::StorageOptions;
pub use snapshot::{EdgeRecord, NodeRecord, Snapshot, SnapshotHeader};
