//! EngramDB Graph Engine
//!
//! Provides the canonical record store and the tiered hierarchy built on top
//! of it.
//!
//! # Overview
//!
//! The graph engine provides:
//! - Append-only node arena and edge map with version links
//! - Identity, Consolidated and Session scopes with hard capacities
//! - Session consolidation and LRU slot eviction
//! - Decay and pruning of unprotected edges

pub mod consolidation;
pub mod graph;
pub mod hierarchy;
pub mod scheduler;
pub mod store;

pub use consolidation::{ConsolidationResult, ReleaseResult};
pub use graph::{EdgeInsert, TieredGraph};
pub use hierarchy::{NodeRole, ScopeEdges, TierConfig, TierHierarchy, TierLimits};
pub use scheduler::{DecayConfig, MaintenanceReport, MaintenanceTrigger, Scheduler};
pub use store::{GraphStore, NewNode};
