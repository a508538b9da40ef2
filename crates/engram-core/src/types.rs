//! Core graph types for EngramDB
//!
//! Defines the fundamental building blocks: nodes, edges, tiers and scopes.

use crate::domain::Domain;
use crate::id::{EdgeId, NodeId, SessionId};
use serde::{Deserialize, Serialize};

/// What a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Entity,
    Fact,
    Event,
    Relation,
}

impl NodeKind {
    /// Persisted discriminant
    pub fn as_u8(self) -> u8 {
        match self {
            NodeKind::Entity => 0,
            NodeKind::Fact => 1,
            NodeKind::Event => 2,
            NodeKind::Relation => 3,
        }
    }

    /// Decode a persisted discriminant
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NodeKind::Entity),
            1 => Some(NodeKind::Fact),
            2 => Some(NodeKind::Event),
            3 => Some(NodeKind::Relation),
            _ => None,
        }
    }
}

/// Type of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    IsA,
    Has,
    Created,
    Likes,
    Related,
    Supersedes,
    Temporal,
    Causes,
    Prevents,
    Identity,
}

impl EdgeType {
    /// Edge types that decay and pruning never touch
    pub fn is_protected(self) -> bool {
        matches!(self, EdgeType::Supersedes | EdgeType::Identity)
    }

    /// Persisted discriminant
    pub fn as_u8(self) -> u8 {
        match self {
            EdgeType::IsA => 0,
            EdgeType::Has => 1,
            EdgeType::Created => 2,
            EdgeType::Likes => 3,
            EdgeType::Related => 4,
            EdgeType::Supersedes => 5,
            EdgeType::Temporal => 6,
            EdgeType::Causes => 7,
            EdgeType::Prevents => 8,
            EdgeType::Identity => 9,
        }
    }

    /// Decode a persisted discriminant
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EdgeType::IsA),
            1 => Some(EdgeType::Has),
            2 => Some(EdgeType::Created),
            3 => Some(EdgeType::Likes),
            4 => Some(EdgeType::Related),
            5 => Some(EdgeType::Supersedes),
            6 => Some(EdgeType::Temporal),
            7 => Some(EdgeType::Causes),
            8 => Some(EdgeType::Prevents),
            9 => Some(EdgeType::Identity),
            _ => None,
        }
    }
}

/// Capacity-bounded partition of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Constitutional facts, authorization-gated
    Identity,
    /// Learned facts, populated by promotion
    Consolidated,
    /// Ephemeral chat-local facts
    Session,
}

impl Tier {
    /// Query priority; lower comes first
    pub fn priority(self) -> u8 {
        match self {
            Tier::Identity => 0,
            Tier::Consolidated => 1,
            Tier::Session => 2,
        }
    }
}

/// The scope that owns a node or an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Identity,
    Consolidated,
    Session(SessionId),
}

impl Scope {
    /// Tier this scope belongs to
    pub fn tier(&self) -> Tier {
        match self {
            Scope::Identity => Tier::Identity,
            Scope::Consolidated => Tier::Consolidated,
            Scope::Session(_) => Tier::Session,
        }
    }

    /// Session id, if this is a session scope
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Scope::Session(id) => Some(*id),
            _ => None,
        }
    }

    /// Persisted form: (tier discriminant, session id or 0)
    pub fn to_parts(&self) -> (u8, u64) {
        use crate::id::EntityId;
        match self {
            Scope::Identity => (0, 0),
            Scope::Consolidated => (1, 0),
            Scope::Session(id) => (2, id.as_internal()),
        }
    }

    /// Decode the persisted form
    pub fn from_parts(tier: u8, session: u64) -> Option<Self> {
        use crate::id::EntityId;
        match tier {
            0 => Some(Scope::Identity),
            1 => Some(Scope::Consolidated),
            2 => Some(Scope::Session(SessionId::from_internal(session))),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Identity => write!(f, "identity"),
            Scope::Consolidated => write!(f, "consolidated"),
            Scope::Session(id) => write!(f, "session:{}", id),
        }
    }
}

/// A fact, entity, event or relation in the memory graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable handle
    pub id: NodeId,

    /// What the node represents
    pub kind: NodeKind,

    /// Semantic category
    pub domain: Domain,

    /// Dedup key (may be empty)
    pub key: String,

    /// Text payload
    pub value: String,

    /// Embedding vector, absent when the provider failed
    pub embedding: Option<Vec<f32>>,

    /// Retained importance (0.0 - 1.0)
    pub salience: f32,

    /// Exempt from decay and eviction
    pub pinned: bool,

    /// Cleared when the node is tombstoned
    pub active: bool,

    /// Creation time (millis since epoch)
    pub created_at: i64,

    /// Last access time (millis since epoch)
    pub last_accessed: i64,

    /// Number of accesses, including the creating write
    pub access_count: u32,

    /// Newer version of this fact
    pub superseded_by: Option<NodeId>,

    /// Older versions that converged into this node
    pub merge_parents: Vec<NodeId>,

    /// Owning scope
    pub scope: Scope,
}

impl Node {
    /// Create a new, active node
    pub fn new(
        id: NodeId,
        kind: NodeKind,
        domain: Domain,
        key: impl Into<String>,
        value: impl Into<String>,
        scope: Scope,
        now: i64,
    ) -> Self {
        Self {
            id,
            kind,
            domain,
            key: key.into(),
            value: value.into(),
            embedding: None,
            salience: 1.0,
            pinned: false,
            active: true,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            superseded_by: None,
            merge_parents: Vec::new(),
            scope,
        }
    }

    /// Builder: attach an embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Builder: set salience, clamped to [0, 1]
    pub fn with_salience(mut self, salience: f32) -> Self {
        self.salience = salience.clamp(0.0, 1.0);
        self
    }

    /// True when this node is the current version of its fact
    pub fn is_head(&self) -> bool {
        self.active && self.superseded_by.is_none()
    }

    /// Record an access
    pub fn touch(&mut self, now: i64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now.max(self.last_accessed);
    }

    /// Nodes that decay never touches
    pub fn is_decay_exempt(&self) -> bool {
        self.pinned || self.scope == Scope::Identity
    }

    /// Packed flag byte for persistence (bit0 pinned, bit1 active)
    pub fn flags(&self) -> u8 {
        (self.pinned as u8) | ((self.active as u8) << 1)
    }

    /// Apply a packed flag byte
    pub fn apply_flags(&mut self, flags: u8) {
        self.pinned = flags & 0b01 != 0;
        self.active = flags & 0b10 != 0;
    }
}

/// A typed, weighted edge owned by one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier
    pub id: EdgeId,

    /// Source node
    pub source: NodeId,

    /// Target node
    pub target: NodeId,

    /// Edge type
    pub edge_type: EdgeType,

    /// Weight (0.0 - 1.0)
    pub weight: f32,

    /// Creation time (millis since epoch)
    pub created_at: i64,

    /// Owning scope
    pub scope: Scope,
}

impl Edge {
    /// Create a new edge; weight is clamped to [0, 1]
    pub fn new(
        id: EdgeId,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        weight: f32,
        scope: Scope,
        now: i64,
    ) -> Self {
        Self {
            id,
            source,
            target,
            edge_type,
            weight: weight.clamp(0.0, 1.0),
            created_at: now,
            scope,
        }
    }

    /// Dedup key within a scope
    pub fn triple(&self) -> EdgeTriple {
        EdgeTriple {
            source: self.source,
            target: self.target,
            edge_type: self.edge_type,
        }
    }

    /// Protected edges are never decayed or pruned
    pub fn is_protected(&self) -> bool {
        self.edge_type.is_protected() || self.scope == Scope::Identity
    }

    /// The endpoint opposite to `node`
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.source == node {
            self.target
        } else {
            self.source
        }
    }
}

/// (source, target, type): at most one edge per triple per scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeTriple {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
}

impl EdgeTriple {
    pub fn new(source: NodeId, target: NodeId, edge_type: EdgeType) -> Self {
        Self {
            source,
            target,
            edge_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityId;

    fn node(id: u64) -> Node {
        Node::new(
            NodeId::from_internal(id),
            NodeKind::Fact,
            Domain::Identity,
            "user_name",
            "Marcus",
            Scope::Consolidated,
            1_000,
        )
    }

    #[test]
    fn test_node_defaults() {
        let n = node(0);
        assert!(n.is_head());
        assert_eq!(n.access_count, 1);
        assert_eq!(n.salience, 1.0);
        assert!(n.embedding.is_none());
    }

    #[test]
    fn test_node_touch() {
        let mut n = node(0);
        n.touch(2_000);
        assert_eq!(n.access_count, 2);
        assert_eq!(n.last_accessed, 2_000);

        // clock going backwards never rewinds last_accessed
        n.touch(500);
        assert_eq!(n.last_accessed, 2_000);
    }

    #[test]
    fn test_node_flags_roundtrip() {
        let mut n = node(0);
        n.pinned = true;
        n.active = false;
        let flags = n.flags();

        let mut other = node(1);
        other.apply_flags(flags);
        assert!(other.pinned);
        assert!(!other.active);
    }

    #[test]
    fn test_salience_clamped() {
        assert_eq!(node(0).with_salience(3.0).salience, 1.0);
        assert_eq!(node(0).with_salience(-1.0).salience, 0.0);
    }

    #[test]
    fn test_edge_protection() {
        let a = NodeId::from_internal(0);
        let b = NodeId::from_internal(1);
        let id = EdgeId::from_internal(1);

        let related = Edge::new(id, a, b, EdgeType::Related, 0.5, Scope::Consolidated, 0);
        assert!(!related.is_protected());

        let supersedes = Edge::new(id, a, b, EdgeType::Supersedes, 1.0, Scope::Consolidated, 0);
        assert!(supersedes.is_protected());

        let identity_scoped = Edge::new(id, a, b, EdgeType::Likes, 0.1, Scope::Identity, 0);
        assert!(identity_scoped.is_protected());
        assert_eq!(identity_scoped.other_end(a), b);
    }

    #[test]
    fn test_scope_parts() {
        let scope = Scope::Session(SessionId::from_internal(9));
        let (tier, session) = scope.to_parts();
        assert_eq!(Scope::from_parts(tier, session), Some(scope));
        assert_eq!(scope.to_string(), "session:9");
        assert_eq!(Scope::from_parts(7, 0), None);
    }

    #[test]
    fn test_node_serde() {
        let n = node(3).with_embedding(vec![0.5, 0.5]);
        let json = serde_json::to_string(&n).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn test_discriminants() {
        for value in 0..10u8 {
            assert_eq!(EdgeType::from_u8(value).map(EdgeType::as_u8), Some(value));
        }
        assert_eq!(NodeKind::from_u8(4), None);
        assert!(Tier::Identity.priority() < Tier::Consolidated.priority());
    }
}
