//! EngramDB Core Library
//!
//! This crate provides the fundamental types, traits, and error handling
//! for the EngramDB memory graph.
//!
//! # Overview
//!
//! EngramDB is a tiered, deduplicating, self-pruning semantic memory graph
//! for AI agents. Facts extracted from conversation are stored as nodes,
//! related by typed weighted edges, and partitioned into capacity-bounded
//! scopes.
//!
//! # Modules
//!
//! - `types` - Core data types (Node, Edge, Scope, Tier, etc.)
//! - `domain` - Semantic domains and the isolation table
//! - `error` - Error types and result aliases
//! - `id` - Record handles and generation
//! - `temporal` - Clock abstraction

pub mod domain;
pub mod error;
pub mod id;
pub mod temporal;
pub mod types;

pub use domain::Domain;
pub use error::{Error, Result};
pub use id::{EdgeId, EntityId, IdGenerator, NodeId, SessionId};
pub use temporal::{Clock, ManualClock, SystemClock};
pub use types::{Edge, EdgeTriple, EdgeType, Node, NodeKind, Scope, Tier};
