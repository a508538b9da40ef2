//! Error types for EngramDB
//!
//! Write-gate outcomes such as `Blocked`, `NeedsAuth` and `Duplicate` are
//! ordinary return values, not errors. This enum covers the failures.

use crate::id::{EdgeId, NodeId, SessionId};
use crate::types::Scope;
use thiserror::Error;

/// The main error type for EngramDB operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Graph Errors ==========
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("Session not resident: {0}")]
    SessionNotFound(SessionId),

    #[error("Version link {old} -> {new} would close a cycle")]
    VersionCycle { old: NodeId, new: NodeId },

    #[error("Invalid graph operation: {0}")]
    InvalidGraphOperation(String),

    // ========== Capacity Errors ==========
    #[error("Capacity exceeded in scope {0}")]
    CapacityExceeded(Scope),

    #[error("Resource exhausted in scope {scope}: {count} records, limit {limit}")]
    ResourceExhausted {
        scope: Scope,
        count: usize,
        limit: usize,
    },

    // ========== Index Errors ==========
    #[error("Index inconsistency: bloom filter reported '{0}' but no index holds it")]
    IndexInconsistency(String),

    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    // ========== Authorization Errors ==========
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ========== Storage Errors ==========
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Configuration Errors ==========
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========== Internal Errors ==========
    #[error("Engine channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for EngramDB operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Io(_) | Error::CapacityExceeded(_)
        )
    }

    /// Returns true if this error indicates data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::DataCorruption(_))
    }

    /// Returns true if this error came from a capacity limit
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Error::CapacityExceeded(_) | Error::ResourceExhausted { .. }
        )
    }
}
