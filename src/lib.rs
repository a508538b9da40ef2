//! EngramDB - tiered semantic memory graph for AI agents
//!
//! This is the main library crate that re-exports all EngramDB components.

pub use engram_core as core;
pub use engram_graph as graph;
pub use engram_memory as memory;
pub use engram_storage as storage;

// Re-export commonly used types
pub use engram_core::{
    Clock, Domain, Edge, EdgeId, EdgeType, Error, ManualClock, Node, NodeId, NodeKind, Result,
    Scope, SessionId, SystemClock, Tier,
};

pub use engram_graph::{DecayConfig, TierConfig, TierLimits};
pub use engram_memory::{
    ActorConfig, AdminCommand, EdgeOutcome, EdgeWrite, EngineConfig, FactWrite, Ingestor,
    MemoryActor, MemoryGraph, MemoryHandle, Persistence, RankRequest, RankedResults, WriteGate,
    WriteOutcome,
};
pub use engram_storage::{SnapshotStorage, StorageOptions};
