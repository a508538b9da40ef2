//! Canonical node and edge records
//!
//! Nodes live in an append-only arena addressed by [`NodeId`]; they are
//! tombstoned, never removed. Edges are keyed by [`EdgeId`] and physically
//! removed on prune, consolidation or slot eviction.
//!
//! The arena is split into shared fixed-size chunks: a cloned store (a
//! published snapshot) copies only chunk pointers, and a later write copies
//! just the chunk it touches.

use engram_core::{
    Domain, Edge, EdgeId, EdgeType, EntityId, Error, IdGenerator, Node, NodeId, NodeKind, Result,
    Scope,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Everything needed to create a node except its handle
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub kind: NodeKind,
    pub domain: Domain,
    pub key: String,
    pub value: String,
    pub embedding: Option<Vec<f32>>,
    pub salience: f32,
    pub pinned: bool,
    pub scope: Scope,
}

impl NewNode {
    /// A fact node with full salience
    pub fn fact(
        domain: Domain,
        key: impl Into<String>,
        value: impl Into<String>,
        scope: Scope,
    ) -> Self {
        Self {
            kind: NodeKind::Fact,
            domain,
            key: key.into(),
            value: value.into(),
            embedding: None,
            salience: 1.0,
            pinned: false,
            scope,
        }
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_salience(mut self, salience: f32) -> Self {
        self.salience = salience;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }
}

const CHUNK_SIZE: usize = 256;

/// A node and the ids of the edges touching it
#[derive(Debug, Clone)]
struct NodeSlot {
    node: Node,
    edges: BTreeSet<EdgeId>,
}

/// Append-only arena of copy-on-write chunks; handle == index
#[derive(Debug, Clone, Default)]
struct NodeArena {
    chunks: Vec<Arc<Vec<NodeSlot>>>,
    len: usize,
}

impl NodeArena {
    fn len(&self) -> usize {
        self.len
    }

    fn push(&mut self, node: Node) {
        if self.len % CHUNK_SIZE == 0 {
            self.chunks.push(Arc::new(Vec::with_capacity(CHUNK_SIZE)));
        }
        if let Some(chunk) = self.chunks.last_mut() {
            Arc::make_mut(chunk).push(NodeSlot {
                node,
                edges: BTreeSet::new(),
            });
            self.len += 1;
        }
    }

    fn get(&self, index: usize) -> Option<&NodeSlot> {
        self.chunks.get(index / CHUNK_SIZE)?.get(index % CHUNK_SIZE)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut NodeSlot> {
        if index >= self.len {
            return None;
        }
        let chunk = self.chunks.get_mut(index / CHUNK_SIZE)?;
        Arc::make_mut(chunk).get_mut(index % CHUNK_SIZE)
    }

    fn iter(&self) -> impl Iterator<Item = &NodeSlot> {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    #[cfg(test)]
    fn shares_chunks_with(&self, other: &NodeArena) -> usize {
        self.chunks
            .iter()
            .zip(&other.chunks)
            .filter(|(a, b)| Arc::ptr_eq(a, b))
            .count()
    }
}

/// Owner of all canonical records
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    /// Nodes with their incidence sets
    nodes: NodeArena,

    /// Edges by id
    edges: HashMap<EdgeId, Edge>,

    /// Edge and session id generator
    id_gen: IdGenerator,
}

impl GraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared id generator (edges and sessions)
    pub fn id_generator(&self) -> &IdGenerator {
        &self.id_gen
    }

    // ========== Node Operations ==========

    /// Append a node to the arena
    pub fn create_node(&mut self, new: NewNode, now: i64) -> NodeId {
        let id = NodeId::from_internal(self.nodes.len() as u64);
        let mut node = Node::new(id, new.kind, new.domain, new.key, new.value, new.scope, now)
            .with_salience(new.salience);
        node.embedding = new.embedding;
        node.pinned = new.pinned;

        debug!("Created node {:?} key='{}' in {}", id, node.key, node.scope);
        self.nodes.push(node);
        id
    }

    /// Put back a node decoded from a snapshot. Handles must arrive in arena order.
    pub fn restore_node(&mut self, node: Node) -> Result<()> {
        if node.id.index() != self.nodes.len() {
            return Err(Error::DataCorruption(format!(
                "node {} out of order, expected {}",
                node.id,
                self.nodes.len()
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Get a node by handle
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).map(|slot| &slot.node)
    }

    /// Get a node or fail with `NodeNotFound`
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(Error::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .map(|slot| &mut slot.node)
            .ok_or(Error::NodeNotFound(id))
    }

    /// Record an access on a node
    pub fn touch(&mut self, id: NodeId, now: i64) -> Result<()> {
        self.node_mut(id)?.touch(now);
        Ok(())
    }

    pub fn set_pinned(&mut self, id: NodeId, pinned: bool) -> Result<()> {
        self.node_mut(id)?.pinned = pinned;
        Ok(())
    }

    /// Set salience, clamped to [0, 1]
    pub fn set_salience(&mut self, id: NodeId, salience: f32) -> Result<()> {
        self.node_mut(id)?.salience = salience.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_scope(&mut self, id: NodeId, scope: Scope) -> Result<()> {
        self.node_mut(id)?.scope = scope;
        Ok(())
    }

    pub fn set_merge_parents(&mut self, id: NodeId, parents: Vec<NodeId>) -> Result<()> {
        for parent in &parents {
            self.node(*parent)?;
        }
        self.node_mut(id)?.merge_parents = parents;
        Ok(())
    }

    /// Deactivate a node; it stays in the arena
    pub fn tombstone(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        node.active = false;
        debug!("Tombstoned node {:?} key='{}'", id, node.key);
        Ok(())
    }

    /// Link `old` to its newer version `new`.
    ///
    /// Fails with `VersionCycle` when `new` already leads back to `old`
    /// (including `old == new`).
    pub fn mark_superseded(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.node(new)?;
        if let Some(existing) = self.node(old)?.superseded_by {
            return Err(Error::InvalidGraphOperation(format!(
                "node {} is already superseded by {}",
                old, existing
            )));
        }

        let mut cursor = Some(new);
        let mut hops = 0usize;
        while let Some(current) = cursor {
            if current == old {
                return Err(Error::VersionCycle { old, new });
            }
            hops += 1;
            if hops > self.nodes.len() {
                return Err(Error::Internal(format!(
                    "version chain from {} does not terminate",
                    new
                )));
            }
            cursor = self.get(current).and_then(|n| n.superseded_by);
        }

        self.node_mut(old)?.superseded_by = Some(new);
        debug!("Node {:?} superseded by {:?}", old, new);
        Ok(())
    }

    /// Undo a `mark_superseded` link, making `old` a head again
    pub fn clear_superseded(&mut self, old: NodeId) -> Result<()> {
        self.node_mut(old)?.superseded_by = None;
        Ok(())
    }

    /// Versions from `id` forward to the current one, inclusive
    pub fn version_chain(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut chain = vec![id];
        let mut cursor = self.node(id)?.superseded_by;
        while let Some(next) = cursor {
            if chain.len() > self.nodes.len() {
                return Err(Error::Internal(format!(
                    "version chain from {} does not terminate",
                    id
                )));
            }
            chain.push(next);
            cursor = self.node(next)?.superseded_by;
        }
        Ok(chain)
    }

    /// Newest version reachable from `id`
    pub fn current_version(&self, id: NodeId) -> Result<NodeId> {
        let chain = self.version_chain(id)?;
        Ok(*chain.last().unwrap_or(&id))
    }

    /// Nodes this node directly replaced, following SUPERSEDES edges
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.incident_edges(id)
            .filter(|e| e.edge_type == EdgeType::Supersedes && e.source == id)
            .map(|e| e.target)
            .collect()
    }

    /// Number of nodes ever created, tombstones included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes not tombstoned
    pub fn active_node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.node.active).count()
    }

    /// All nodes in handle order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|slot| &slot.node)
    }

    // ========== Edge Operations ==========

    /// Create an edge between two existing nodes
    pub fn create_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        weight: f32,
        scope: Scope,
        now: i64,
    ) -> Result<EdgeId> {
        self.node(source)?;
        self.node(target)?;

        let id = self.id_gen.next_edge_id();
        let edge = Edge::new(id, source, target, edge_type, weight, scope, now);
        self.link(&edge);
        debug!(
            "Created edge {:?} {:?} -[{:?}]-> {:?} in {}",
            id, source, edge_type, target, scope
        );
        self.edges.insert(id, edge);
        Ok(id)
    }

    /// Put back an edge decoded from a snapshot
    pub fn restore_edge(&mut self, edge: Edge) -> Result<()> {
        if self.get(edge.source).is_none() || self.get(edge.target).is_none() {
            return Err(Error::DataCorruption(format!(
                "edge {} references a missing node",
                edge.id
            )));
        }
        if self.edges.contains_key(&edge.id) {
            return Err(Error::DataCorruption(format!("duplicate edge {}", edge.id)));
        }
        if edge.id.as_internal() >= self.id_gen.current_edge_id() {
            self.id_gen = IdGenerator::with_start(
                edge.id.as_internal() + 1,
                self.id_gen.current_session_id(),
            );
        }
        self.link(&edge);
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    /// Make sure future session ids start above `session`
    pub fn reserve_session_ids(&mut self, session: u64) {
        if session >= self.id_gen.current_session_id() {
            self.id_gen = IdGenerator::with_start(self.id_gen.current_edge_id(), session + 1);
        }
    }

    fn link(&mut self, edge: &Edge) {
        for end in [edge.source, edge.target] {
            if let Some(slot) = self.nodes.get_mut(end.index()) {
                slot.edges.insert(edge.id);
            }
        }
    }

    /// Get an edge by id
    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Update an edge weight, clamped to [0, 1]
    pub fn set_edge_weight(&mut self, id: EdgeId, weight: f32) -> Result<()> {
        let edge = self.edges.get_mut(&id).ok_or(Error::EdgeNotFound(id))?;
        edge.weight = weight.clamp(0.0, 1.0);
        Ok(())
    }

    /// Move an edge to another scope
    pub fn set_edge_scope(&mut self, id: EdgeId, scope: Scope) -> Result<()> {
        let edge = self.edges.get_mut(&id).ok_or(Error::EdgeNotFound(id))?;
        edge.scope = scope;
        Ok(())
    }

    /// Physically remove an edge
    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&id)?;
        for end in [edge.source, edge.target] {
            if let Some(slot) = self.nodes.get_mut(end.index()) {
                slot.edges.remove(&id);
            }
        }
        Some(edge)
    }

    /// Edges touching `node`, in id order
    pub fn incident_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.nodes
            .get(node.index())
            .into_iter()
            .flat_map(|slot| slot.edges.iter())
            .filter_map(|id| self.edges.get(id))
    }

    /// Number of incident edges
    pub fn degree(&self, node: NodeId) -> usize {
        self.nodes.get(node.index()).map_or(0, |slot| slot.edges.len())
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All edges, in no particular order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }
}
