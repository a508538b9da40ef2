//! Memory engine context
//!
//! `MemoryGraph` owns everything one memory instance needs: the tiered graph,
//! the dedup index, running counters, configuration and the clock. Mutations
//! take `&mut self`; reads take `&self`. A clone is an immutable snapshot for
//! concurrent readers.

use crate::dedup::DedupIndex;
use crate::types::{EngineConfig, GraphStats, WriteCounters};
use engram_core::{
    Clock, Error, Node, NodeId, Result, Scope, SessionId, SystemClock,
};
use engram_graph::{ConsolidationResult, MaintenanceReport, ReleaseResult, TieredGraph};
use engram_storage::Snapshot;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Current head for a key plus its older versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLookup {
    pub head: NodeId,

    /// Older versions, newest first
    pub history: Vec<NodeId>,
}

/// One memory instance
#[derive(Debug, Clone)]
pub struct MemoryGraph {
    config: Arc<EngineConfig>,
    graph: TieredGraph,
    dedup: DedupIndex,
    counters: WriteCounters,
    clock: Arc<dyn Clock>,
}

impl MemoryGraph {
    /// Create an empty engine on the wall clock
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty engine reading time from `clock`
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let graph = TieredGraph::new(config.tiers.clone(), config.decay.clone());
        let dedup = DedupIndex::new(&config);
        info!(
            "Created memory graph: dimension {}, {} session slots",
            config.dimension, config.tiers.session_slots
        );
        Ok(Self {
            config: Arc::new(config),
            graph,
            dedup,
            counters: WriteCounters::default(),
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &TieredGraph {
        &self.graph
    }

    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    pub fn counters(&self) -> &WriteCounters {
        &self.counters
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time in millis
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub(crate) fn graph_mut(&mut self) -> &mut TieredGraph {
        &mut self.graph
    }

    pub(crate) fn dedup_mut(&mut self) -> &mut DedupIndex {
        &mut self.dedup
    }

    pub(crate) fn counters_mut(&mut self) -> &mut WriteCounters {
        &mut self.counters
    }

    // ========== Reads ==========

    /// Get a node or fail with `NodeNotFound`
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.graph.node(id)
    }

    /// Current head for `key` visible from `current`, with its history.
    ///
    /// Heads owned by another session, or by an evicted one, are not visible.
    pub fn lookup_key(&self, key: &str, current: Option<SessionId>) -> Option<KeyLookup> {
        let head = self.dedup.lookup_key(key)?;
        let node = self.graph.store().get(head)?;
        let visible = match node.scope {
            Scope::Session(owner) => {
                current == Some(owner) && self.graph.hierarchy().is_resident(node.scope)
            }
            _ => true,
        };
        if !visible {
            return None;
        }

        let mut replaced: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in self.graph.store().nodes() {
            if let Some(newer) = node.superseded_by {
                replaced.entry(newer).or_default().push(node.id);
            }
        }

        let mut history = Vec::new();
        let mut frontier = vec![head];
        while let Some(id) = frontier.pop() {
            if let Some(older) = replaced.get(&id) {
                for old in older.iter().rev() {
                    history.push(*old);
                    frontier.push(*old);
                }
            }
        }
        Some(KeyLookup { head, history })
    }

    pub fn stats(&self) -> GraphStats {
        let store = self.graph.store();
        let hierarchy = self.graph.hierarchy();
        let sessions = hierarchy.resident_sessions();

        GraphStats {
            nodes: store.node_count(),
            active_nodes: store.active_node_count(),
            edges: store.edge_count(),
            identity_edges: hierarchy.edge_count(Scope::Identity),
            consolidated_edges: hierarchy.edge_count(Scope::Consolidated),
            session_edges: sessions
                .iter()
                .map(|s| hierarchy.edge_count(Scope::Session(*s)))
                .sum(),
            resident_sessions: sessions.len(),
            indexed_keys: self.dedup.keys().len(),
            indexed_embeddings: self.dedup.lsh().len(),
            bloom_fp_estimate: self.dedup.bloom().estimated_fp_rate(),
            key_index_depth_warnings: self.dedup.keys().depth_warnings(),
            degraded: false,
            counters: self.counters.clone(),
        }
    }

    // ========== Sessions ==========

    /// Bind a new session, evicting the least recently used one if needed
    pub fn start_session(&mut self) -> Result<SessionId> {
        let now = self.now();
        let (session, released) = self.graph.start_session(now)?;
        if let Some(released) = released {
            self.counters.evictions += 1;
            if released.consolidation.is_some() {
                self.counters.consolidations += 1;
            }
        }
        Ok(session)
    }

    /// Free a session's slot; its nodes become orphans
    pub fn end_session(&mut self, session: SessionId) -> Result<ReleaseResult> {
        let result = self.graph.end_session(session)?;
        if result.consolidation.is_some() {
            self.counters.consolidations += 1;
        }
        Ok(result)
    }

    pub fn touch_session(&mut self, session: SessionId) -> Result<()> {
        let now = self.now();
        self.graph.touch_session(session, now)
    }

    /// Promote a session's strong edges now
    pub fn consolidate(&mut self, session: SessionId) -> Result<ConsolidationResult> {
        let result = self.graph.consolidate(session)?;
        self.counters.consolidations += 1;
        Ok(result)
    }

    // ========== Access & Maintenance ==========

    /// Record an access on each active node; returns how many were touched
    pub fn touch_hits(&mut self, ids: &[NodeId]) -> Result<usize> {
        let now = self.now();
        let mut touched = 0;
        for id in ids {
            if self.graph.node(*id)?.active {
                self.graph.touch(*id, now)?;
                touched += 1;
            }
        }
        debug!("Touched {} of {} hits", touched, ids.len());
        Ok(touched)
    }

    /// Run a full maintenance pass over every resident scope
    pub fn maintain(&mut self) -> Result<Vec<MaintenanceReport>> {
        let reports = self.graph.maintain()?;
        self.absorb(&reports);
        Ok(reports)
    }

    /// Count maintenance work and drop tombstoned nodes from the indices
    pub(crate) fn absorb(&mut self, reports: &[MaintenanceReport]) {
        for report in reports {
            self.counters.maintenance_runs += 1;
            self.counters.pruned_edges += report.pruned_edges as u64;
        }
        self.sync_tombstones();
    }

    pub(crate) fn sync_tombstones(&mut self) {
        for id in self.graph.take_tombstoned() {
            if let Some(node) = self.graph.store().get(id) {
                self.dedup.unindex_node(node);
                self.counters.tombstoned_nodes += 1;
            }
        }
    }

    // ========== Snapshots ==========

    /// Canonical records, detached from this instance
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.config.dimension,
            self.graph.store().nodes().cloned().collect(),
            self.graph.store().edges().cloned().collect(),
        )
    }

    /// Rebuild an engine from canonical records
    pub fn from_snapshot(
        config: EngineConfig,
        snapshot: Snapshot,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if snapshot.dimension != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                got: snapshot.dimension,
            });
        }

        let now = clock.now_millis();
        let graph = TieredGraph::restore(
            config.tiers.clone(),
            config.decay.clone(),
            snapshot.nodes,
            snapshot.edges,
            now,
        )?;
        let mut dedup = DedupIndex::new(&config);
        dedup.rebuild(graph.store().nodes())?;

        Ok(Self {
            config: Arc::new(config),
            graph,
            dedup,
            counters: WriteCounters::default(),
            clock,
        })
    }
}
