//! Handle types for EngramDB
//!
//! Provides strongly-typed handles for graph records. Node handles index an
//! append-only arena, so they stay valid for the lifetime of the graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Internal numeric ID for efficient storage and lookup
pub type InternalId = u64;

/// Trait for all record handles
pub trait EntityId: Clone + Copy + Eq + std::hash::Hash + fmt::Debug + fmt::Display {
    /// Create from internal numeric ID
    fn from_internal(id: InternalId) -> Self;

    /// Get the internal numeric representation
    fn as_internal(&self) -> InternalId;

    /// Persisted (signed) representation used by the snapshot format
    fn as_persisted(&self) -> i64 {
        self.as_internal() as i64
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(InternalId);

        impl EntityId for $name {
            fn from_internal(id: InternalId) -> Self {
                Self(id)
            }

            fn as_internal(&self) -> InternalId {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Handle of a node; equal to its position in the node arena
    NodeId
);

impl NodeId {
    /// Arena position of this node
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

entity_id!(
    /// Identifier of an edge
    EdgeId
);

entity_id!(
    /// Identifier of a session; never reused once a session ends or is evicted
    SessionId
);

/// Sequential identifier generator for edges and sessions
#[derive(Debug)]
pub struct IdGenerator {
    next_edge_id: AtomicU64,
    next_session_id: AtomicU64,
}

impl IdGenerator {
    /// Create a new ID generator
    pub fn new() -> Self {
        Self::with_start(1, 1)
    }

    /// Create with starting values (for recovery)
    pub fn with_start(edge_start: u64, session_start: u64) -> Self {
        Self {
            next_edge_id: AtomicU64::new(edge_start),
            next_session_id: AtomicU64::new(session_start),
        }
    }

    /// Generate the next edge ID
    pub fn next_edge_id(&self) -> EdgeId {
        EdgeId::from_internal(self.next_edge_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Generate the next session ID
    pub fn next_session_id(&self) -> SessionId {
        SessionId::from_internal(self.next_session_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Get current edge ID counter value
    pub fn current_edge_id(&self) -> u64 {
        self.next_edge_id.load(Ordering::SeqCst)
    }

    /// Get current session ID counter value
    pub fn current_session_id(&self) -> u64 {
        self.next_session_id.load(Ordering::SeqCst)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for IdGenerator {
    fn clone(&self) -> Self {
        Self::with_start(self.current_edge_id(), self.current_session_id())
    }
}
