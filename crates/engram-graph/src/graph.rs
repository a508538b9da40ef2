//! Tiered graph instance
//!
//! Combines the record store, the tier hierarchy and the scheduler, and
//! enforces the capacity protocol around every write.

use crate::consolidation::{self, ConsolidationResult, ReleaseResult};
use crate::hierarchy::{TierConfig, TierHierarchy};
use crate::scheduler::{DecayConfig, MaintenanceReport, MaintenanceTrigger, Scheduler};
use crate::store::{GraphStore, NewNode};
use engram_core::{
    Edge, EdgeId, EdgeTriple, EdgeType, EntityId, Error, Node, NodeId, Result, Scope, SessionId,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Result of an edge write
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInsert {
    /// New edge, or the existing edge holding the same triple
    pub edge: EdgeId,

    /// False when the weight was averaged into an existing edge
    pub created: bool,

    /// Maintenance passes that ran for this write
    pub maintenance: Vec<MaintenanceReport>,

    /// Set when the write found its session slot full
    pub consolidation: Option<ConsolidationResult>,
}

/// A graph partitioned into capacity-bounded scopes
#[derive(Debug, Clone)]
pub struct TieredGraph {
    store: GraphStore,
    hierarchy: TierHierarchy,
    scheduler: Scheduler,

    /// Nodes tombstoned by maintenance, not yet drained by the owner
    tombstoned: Vec<NodeId>,
}

impl TieredGraph {
    pub fn new(tiers: TierConfig, decay: DecayConfig) -> Self {
        Self {
            store: GraphStore::new(),
            hierarchy: TierHierarchy::new(tiers),
            scheduler: Scheduler::new(decay),
            tombstoned: Vec::new(),
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn hierarchy(&self) -> &TierHierarchy {
        &self.hierarchy
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Get a node or fail with `NodeNotFound`
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.store.node(id)
    }

    fn ensure_resident(&self, scope: Scope) -> Result<()> {
        if self.hierarchy.is_resident(scope) {
            return Ok(());
        }
        match scope {
            Scope::Session(id) => Err(Error::SessionNotFound(id)),
            _ => Err(Error::Internal(format!("scope {} not resident", scope))),
        }
    }

    // ========== Node Operations ==========

    /// Create a node in a resident scope. The Identity tier rejects
    /// overflow outright.
    pub fn create_node(&mut self, new: NewNode, now: i64) -> Result<NodeId> {
        let scope = new.scope;
        self.ensure_resident(scope)?;

        if scope == Scope::Identity {
            let limit = self.hierarchy.config().identity.hard_cap;
            let count = self
                .hierarchy
                .scope(scope)
                .map_or(0, |edges| edges.members().len());
            if count >= limit {
                warn!("Identity tier full: {} nodes, limit {}", count, limit);
                return Err(Error::ResourceExhausted {
                    scope,
                    count,
                    limit,
                });
            }
        }

        let id = self.store.create_node(new, now);
        self.hierarchy.add_node(scope, id)?;
        if let Scope::Session(session) = scope {
            self.hierarchy.touch_session(session, now)?;
        }
        self.after_write()?;
        Ok(id)
    }

    /// Record an access on a node
    pub fn touch(&mut self, id: NodeId, now: i64) -> Result<()> {
        self.store.touch(id, now)
    }

    pub fn set_pinned(&mut self, id: NodeId, pinned: bool) -> Result<()> {
        self.store.set_pinned(id, pinned)
    }

    pub fn set_salience(&mut self, id: NodeId, salience: f32) -> Result<()> {
        self.store.set_salience(id, salience)
    }

    pub fn set_merge_parents(&mut self, id: NodeId, parents: Vec<NodeId>) -> Result<()> {
        self.store.set_merge_parents(id, parents)
    }

    pub fn mark_superseded(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.store.mark_superseded(old, new)
    }

    pub fn clear_superseded(&mut self, old: NodeId) -> Result<()> {
        self.store.clear_superseded(old)
    }

    /// Deactivate a node and drop it from its scope
    pub fn tombstone(&mut self, id: NodeId) -> Result<()> {
        let scope = self.store.node(id)?.scope;
        self.store.tombstone(id)?;
        self.hierarchy.forget_node(id, scope);
        Ok(())
    }

    /// Drain nodes tombstoned by maintenance since the last call
    pub fn take_tombstoned(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.tombstoned)
    }

    // ========== Edge Operations ==========

    /// Insert an edge, running the capacity protocol for its scope first.
    ///
    /// An existing edge with the same triple in the scope gets the average
    /// of both weights instead. A full session slot is consolidated; any
    /// other scope at its hard cap is emergency-pruned. If the scope is
    /// still full afterwards (only protected edges left) the write fails
    /// with `ResourceExhausted`.
    pub fn write_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        weight: f32,
        scope: Scope,
        now: i64,
    ) -> Result<EdgeInsert> {
        self.store.node(source)?;
        self.store.node(target)?;
        self.ensure_resident(scope)?;

        let triple = EdgeTriple::new(source, target, edge_type);
        if let Some(existing) = self.hierarchy.find_edge(scope, &triple) {
            let current = self
                .store
                .get_edge(existing)
                .ok_or(Error::EdgeNotFound(existing))?
                .weight;
            self.store
                .set_edge_weight(existing, (current + weight.clamp(0.0, 1.0)) / 2.0)?;
            self.touch_scope(scope, now)?;
            debug!("Edge {:?} already in {}, weights averaged", existing, scope);
            return Ok(EdgeInsert {
                edge: existing,
                created: false,
                maintenance: Vec::new(),
                consolidation: None,
            });
        }

        let limits = self.hierarchy.limits(scope);
        let mut maintenance = Vec::new();
        let mut consolidation = None;

        match scope {
            Scope::Identity => {}
            Scope::Session(session) if self.hierarchy.edge_count(scope) >= limits.hard_cap => {
                let result =
                    consolidation::consolidate_session(&mut self.store, &mut self.hierarchy, session)?;
                consolidation = Some(result);
                let report = self.scheduler.before_write(
                    &mut self.store,
                    &mut self.hierarchy,
                    Scope::Consolidated,
                )?;
                maintenance.push(report);
            }
            _ => {
                let report =
                    self.scheduler
                        .before_write(&mut self.store, &mut self.hierarchy, scope)?;
                maintenance.push(report);
            }
        }

        let count = self.hierarchy.edge_count(scope);
        if count >= limits.hard_cap {
            warn!(
                "Scope {} still full after maintenance: {} edges, hard cap {}",
                scope, count, limits.hard_cap
            );
            return Err(Error::ResourceExhausted {
                scope,
                count,
                limit: limits.hard_cap,
            });
        }

        let id = self
            .store
            .create_edge(source, target, edge_type, weight, scope, now)?;
        self.hierarchy.add_edge(scope, id, triple)?;
        self.touch_scope(scope, now)?;

        maintenance.extend(self.after_write()?);
        self.collect_tombstones(&maintenance);
        maintenance.retain(|report| report.trigger != MaintenanceTrigger::Idle);

        Ok(EdgeInsert {
            edge: id,
            created: true,
            maintenance,
            consolidation,
        })
    }

    /// Remove an edge from the store and its scope
    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge> {
        let edge = self.store.remove_edge(id).ok_or(Error::EdgeNotFound(id))?;
        self.hierarchy.remove_edge(edge.scope, id, &edge.triple());
        Ok(edge)
    }

    /// Incident edges of `node` visible from `current`, Identity first
    pub fn edges_of(&self, node: NodeId, current: Option<SessionId>) -> Vec<&Edge> {
        let order = self.hierarchy.ordered_scopes(current);
        let mut edges: Vec<&Edge> = self
            .store
            .incident_edges(node)
            .filter(|edge| order.contains(&edge.scope))
            .collect();
        edges.sort_by_key(|edge| {
            (
                order.iter().position(|scope| *scope == edge.scope),
                edge.id,
            )
        });
        edges
    }

    /// Identity, then Consolidated, then the caller's session
    pub fn ordered_scopes(&self, current: Option<SessionId>) -> Vec<Scope> {
        self.hierarchy.ordered_scopes(current)
    }

    fn touch_scope(&mut self, scope: Scope, now: i64) -> Result<()> {
        if let Scope::Session(session) = scope {
            self.hierarchy.touch_session(session, now)?;
        }
        Ok(())
    }

    // ========== Maintenance ==========

    fn after_write(&mut self) -> Result<Vec<MaintenanceReport>> {
        if !self.scheduler.record_write() {
            return Ok(Vec::new());
        }
        let reports = self.scheduler.tick(&mut self.store, &mut self.hierarchy)?;
        self.collect_tombstones(&reports);
        Ok(reports)
    }

    fn collect_tombstones(&mut self, reports: &[MaintenanceReport]) {
        for report in reports {
            for node in &report.tombstoned {
                if !self.tombstoned.contains(node) {
                    self.tombstoned.push(*node);
                }
            }
        }
    }

    /// Run a full maintenance pass over every scope now
    pub fn maintain(&mut self) -> Result<Vec<MaintenanceReport>> {
        let reports = self.scheduler.tick(&mut self.store, &mut self.hierarchy)?;
        self.collect_tombstones(&reports);
        Ok(reports)
    }

    // ========== Sessions ==========

    /// Bind a new session to a slot, evicting the least recently used
    /// session when the pool is full
    pub fn start_session(&mut self, now: i64) -> Result<(SessionId, Option<ReleaseResult>)> {
        let (slot, evicted) = self.hierarchy.pick_slot();

        let released = match evicted {
            Some(old) => {
                let promote = self.hierarchy.config().promote_on_evict;
                info!("Evicting session {} from slot {}", old, slot);
                Some(consolidation::release_session(
                    &mut self.store,
                    &mut self.hierarchy,
                    old,
                    promote,
                )?)
            }
            None => None,
        };

        let session = self.store.id_generator().next_session_id();
        self.hierarchy.bind(slot, session, now)?;
        info!("Started session {} in slot {}", session, slot);
        Ok((session, released))
    }

    /// Free a session's slot
    pub fn end_session(&mut self, session: SessionId) -> Result<ReleaseResult> {
        let promote = self.hierarchy.config().promote_on_evict;
        let result =
            consolidation::release_session(&mut self.store, &mut self.hierarchy, session, promote)?;
        info!("Ended session {}", session);
        Ok(result)
    }

    /// Refresh a session's LRU position
    pub fn touch_session(&mut self, session: SessionId, now: i64) -> Result<()> {
        self.hierarchy.touch_session(session, now)
    }

    /// Promote a session's strong edges now, regardless of fill level
    pub fn consolidate(&mut self, session: SessionId) -> Result<ConsolidationResult> {
        consolidation::consolidate_session(&mut self.store, &mut self.hierarchy, session)
    }

    // ========== Restore ==========

    /// Rebuild a graph from canonical records.
    ///
    /// The most recent sessions found in the records are rebound to slots;
    /// edges of sessions that do not fit are dropped and their nodes become
    /// orphans.
    pub fn restore(
        tiers: TierConfig,
        decay: DecayConfig,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        now: i64,
    ) -> Result<Self> {
        let mut graph = Self::new(tiers, decay);

        let mut sessions = BTreeSet::new();
        for node in &nodes {
            sessions.extend(node.scope.session());
        }
        for edge in &edges {
            sessions.extend(edge.scope.session());
        }
        if let Some(last) = sessions.iter().next_back() {
            graph.store.reserve_session_ids(last.as_internal());
        }

        let slots = graph.hierarchy.slots().len();
        let resident: Vec<SessionId> = sessions.iter().rev().take(slots).rev().copied().collect();
        for (slot, session) in resident.iter().enumerate() {
            graph.hierarchy.bind(slot, *session, now)?;
        }

        for node in nodes {
            let (id, scope, active) = (node.id, node.scope, node.active);
            graph.store.restore_node(node)?;
            if !active {
                continue;
            }
            if graph.hierarchy.is_resident(scope) {
                graph.hierarchy.add_node(scope, id)?;
            } else {
                graph.hierarchy.adopt_node(scope, id);
            }
        }

        let mut dropped = 0usize;
        for edge in edges {
            if !graph.hierarchy.is_resident(edge.scope) {
                dropped += 1;
                continue;
            }
            let (id, scope, triple) = (edge.id, edge.scope, edge.triple());
            graph.store.restore_edge(edge)?;
            graph.hierarchy.add_edge(scope, id, triple)?;
        }

        if dropped > 0 {
            warn!(
                "Dropped {} edges of sessions that no longer fit the pool",
                dropped
            );
        }
        info!(
            "Restored graph: {} nodes, {} edges, {} sessions",
            graph.store.node_count(),
            graph.store.edge_count(),
            resident.len()
        );
        Ok(graph)
    }
}
