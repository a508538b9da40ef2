//! Snapshot binary format
//!
//! A snapshot is a header followed by `node_count` node records and
//! `edge_count` edge records, each encoded with bincode's fixed-int,
//! little-endian layout. Only canonical records are written; every index is
//! rebuilt on load.

use engram_core::{
    Domain, Edge, EdgeId, EdgeType, EntityId, Error, Node, NodeId, NodeKind, Result, Scope,
};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// File magic
pub const MAGIC: [u8; 4] = *b"ENGR";

/// Current format version
pub const FORMAT_VERSION: u32 = 1;

/// Fixed-size snapshot header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub format_version: u32,
    pub node_count: u32,
    pub edge_count: u32,
    /// Embedding dimension; every stored embedding has exactly this length
    pub dimension: u32,
}

/// Persisted node layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub kind: u8,
    pub domain: u8,
    /// bit0 pinned, bit1 active
    pub flags: u8,
    pub salience: f32,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u32,
    /// -1 when the node is current
    pub superseded_by: i64,
    pub scope_tier: u8,
    pub scope_session: u64,
    pub merge_parents: Vec<i64>,
    pub key: String,
    pub value: String,
    /// Empty when the node has no embedding
    pub embedding: Vec<f32>,
}

impl NodeRecord {
    pub fn from_node(node: &Node) -> Self {
        let (scope_tier, scope_session) = node.scope.to_parts();
        Self {
            id: node.id.as_persisted(),
            kind: node.kind.as_u8(),
            domain: node.domain.as_u8(),
            flags: node.flags(),
            salience: node.salience,
            created_at: node.created_at,
            last_accessed: node.last_accessed,
            access_count: node.access_count,
            superseded_by: node.superseded_by.map_or(-1, |id| id.as_persisted()),
            scope_tier,
            scope_session,
            merge_parents: node.merge_parents.iter().map(|p| p.as_persisted()).collect(),
            key: node.key.clone(),
            value: node.value.clone(),
            embedding: node.embedding.clone().unwrap_or_default(),
        }
    }

    pub fn into_node(self, dimension: usize) -> Result<Node> {
        let id = node_handle(self.id)?;
        let kind = NodeKind::from_u8(self.kind)
            .ok_or_else(|| corrupt(format!("node {} has unknown kind {}", self.id, self.kind)))?;
        let domain = Domain::from_u8(self.domain).ok_or_else(|| {
            corrupt(format!("node {} has unknown domain {}", self.id, self.domain))
        })?;
        let scope = Scope::from_parts(self.scope_tier, self.scope_session).ok_or_else(|| {
            corrupt(format!("node {} has unknown tier {}", self.id, self.scope_tier))
        })?;
        let superseded_by = match self.superseded_by {
            -1 => None,
            other => Some(node_handle(other)?),
        };
        let embedding = match self.embedding.len() {
            0 => None,
            len if len == dimension => Some(self.embedding),
            len => {
                return Err(corrupt(format!(
                    "node {} embedding has {} values, expected {}",
                    self.id, len, dimension
                )));
            }
        };
        let merge_parents = self
            .merge_parents
            .into_iter()
            .map(node_handle)
            .collect::<Result<Vec<_>>>()?;

        let mut node = Node::new(id, kind, domain, self.key, self.value, scope, self.created_at);
        node.apply_flags(self.flags);
        node.salience = self.salience.clamp(0.0, 1.0);
        node.last_accessed = self.last_accessed;
        node.access_count = self.access_count;
        node.superseded_by = superseded_by;
        node.merge_parents = merge_parents;
        node.embedding = embedding;
        Ok(node)
    }
}

/// Persisted edge layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: i64,
    pub source: i64,
    pub target: i64,
    pub edge_type: u8,
    pub weight: f32,
    pub created_at: i64,
    pub scope_tier: u8,
    pub scope_session: u64,
}

impl EdgeRecord {
    pub fn from_edge(edge: &Edge) -> Self {
        let (scope_tier, scope_session) = edge.scope.to_parts();
        Self {
            id: edge.id.as_persisted(),
            source: edge.source.as_persisted(),
            target: edge.target.as_persisted(),
            edge_type: edge.edge_type.as_u8(),
            weight: edge.weight,
            created_at: edge.created_at,
            scope_tier,
            scope_session,
        }
    }

    pub fn into_edge(self) -> Result<Edge> {
        if self.id < 0 {
            return Err(corrupt(format!("negative edge id {}", self.id)));
        }
        let edge_type = EdgeType::from_u8(self.edge_type).ok_or_else(|| {
            corrupt(format!("edge {} has unknown type {}", self.id, self.edge_type))
        })?;
        let scope = Scope::from_parts(self.scope_tier, self.scope_session).ok_or_else(|| {
            corrupt(format!("edge {} has unknown tier {}", self.id, self.scope_tier))
        })?;
        Ok(Edge::new(
            EdgeId::from_internal(self.id as u64),
            node_handle(self.source)?,
            node_handle(self.target)?,
            edge_type,
            self.weight,
            scope,
            self.created_at,
        ))
    }
}

fn node_handle(raw: i64) -> Result<NodeId> {
    if raw < 0 {
        return Err(corrupt(format!("negative node handle {}", raw)));
    }
    Ok(NodeId::from_internal(raw as u64))
}

fn corrupt(message: String) -> Error {
    Error::DataCorruption(message)
}

/// Canonical records of a graph at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub dimension: usize,
    /// Nodes in handle order
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Snapshot {
    pub fn new(dimension: usize, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            dimension,
            nodes,
            edges,
        }
    }

    /// Encode to the binary format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = SnapshotHeader {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            node_count: count_u32(self.nodes.len())?,
            edge_count: count_u32(self.edges.len())?,
            dimension: count_u32(self.dimension)?,
        };

        let mut buffer = Vec::new();
        bincode::serialize_into(&mut buffer, &header)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        for node in &self.nodes {
            if let Some(embedding) = &node.embedding {
                if embedding.len() != self.dimension {
                    return Err(Error::DimensionMismatch {
                        expected: self.dimension,
                        got: embedding.len(),
                    });
                }
            }
            bincode::serialize_into(&mut buffer, &NodeRecord::from_node(node))
                .map_err(|e| Error::Serialization(e.to_string()))?;
        }

        let mut edges: Vec<&Edge> = self.edges.iter().collect();
        edges.sort_by_key(|edge| edge.id);
        for edge in edges {
            bincode::serialize_into(&mut buffer, &EdgeRecord::from_edge(edge))
                .map_err(|e| Error::Serialization(e.to_string()))?;
        }

        Ok(buffer)
    }

    /// Decode the binary format. Bad magic, an unknown version, truncation
    /// and trailing bytes all fail with `DataCorruption`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);

        let header: SnapshotHeader = bincode::deserialize_from(&mut cursor)
            .map_err(|e| corrupt(format!("unreadable header: {}", e)))?;
        if header.magic != MAGIC {
            return Err(corrupt(format!("bad magic {:?}", header.magic)));
        }
        if header.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                header.format_version
            )));
        }

        let dimension = header.dimension as usize;
        // counts come from untrusted input; let the vectors grow as records decode
        let mut nodes = Vec::new();
        for index in 0..header.node_count {
            let record: NodeRecord = bincode::deserialize_from(&mut cursor)
                .map_err(|e| corrupt(format!("node record {}: {}", index, e)))?;
            nodes.push(record.into_node(dimension)?);
        }

        let mut edges = Vec::new();
        for index in 0..header.edge_count {
            let record: EdgeRecord = bincode::deserialize_from(&mut cursor)
                .map_err(|e| corrupt(format!("edge record {}: {}", index, e)))?;
            edges.push(record.into_edge()?);
        }

        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(corrupt(format!(
                "{} trailing bytes after last record",
                bytes.len() - consumed
            )));
        }

        Ok(Self {
            dimension,
            nodes,
            edges,
        })
    }
}

fn count_u32(count: usize) -> Result<u32> {
    u32::try_from(count)
        .map_err(|_| Error::Serialization(format!("count {} does not fit the header", count)))
}
