//! Decay and pruning scheduler
//!
//! Runs before every edge insertion for the target scope and on a periodic
//! write cadence for every scope. Work per call is bounded by the scope
//! capacity. Protected edges (SUPERSEDES, IDENTITY and anything owned by
//! the Identity tier) are never decayed or removed.

use crate::hierarchy::{NodeRole, TierHierarchy};
use crate::store::GraphStore;
use engram_core::{EdgeId, Error, NodeId, Result, Scope, Tier};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Decay factors and prune thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Multiplier applied to unprotected edge weights per decay step
    pub edge_decay_factor: f32,
    /// Base fraction of salience lost per decay step
    pub node_decay_rate: f32,
    /// Soft-cap and cadence prunes remove edges below this weight
    pub prune_threshold: f32,
    /// Emergency prunes first remove edges below this weight
    pub emergency_cutoff: f32,
    /// Upper bound on edges removed by one soft-cap prune
    pub prune_batch: usize,
    /// Run maintenance on every scope after this many writes; 0 disables
    pub cadence_writes: u64,
    /// Orphaned nodes below this salience are tombstoned
    pub node_floor: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            edge_decay_factor: 0.95,
            node_decay_rate: 0.02,
            prune_threshold: 0.05,
            emergency_cutoff: 0.2,
            prune_batch: 64,
            cadence_writes: 256,
            node_floor: 0.05,
        }
    }
}

impl DecayConfig {
    pub fn with_edge_decay_factor(mut self, factor: f32) -> Self {
        self.edge_decay_factor = factor;
        self
    }

    pub fn with_node_decay_rate(mut self, rate: f32) -> Self {
        self.node_decay_rate = rate;
        self
    }

    pub fn with_prune_threshold(mut self, threshold: f32) -> Self {
        self.prune_threshold = threshold;
        self
    }

    pub fn with_emergency_cutoff(mut self, cutoff: f32) -> Self {
        self.emergency_cutoff = cutoff;
        self
    }

    pub fn with_prune_batch(mut self, batch: usize) -> Self {
        self.prune_batch = batch;
        self
    }

    pub fn with_cadence_writes(mut self, writes: u64) -> Self {
        self.cadence_writes = writes;
        self
    }

    pub fn with_node_floor(mut self, floor: f32) -> Self {
        self.node_floor = floor;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.edge_decay_factor > 0.0 && self.edge_decay_factor <= 1.0) {
            return Err(Error::Configuration(format!(
                "edge decay factor {} outside (0, 1]",
                self.edge_decay_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.node_decay_rate) {
            return Err(Error::Configuration(format!(
                "node decay rate {} outside [0, 1]",
                self.node_decay_rate
            )));
        }
        for (name, value) in [
            ("prune threshold", self.prune_threshold),
            ("emergency cutoff", self.emergency_cutoff),
            ("node floor", self.node_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Configuration(format!(
                    "{} {} outside [0, 1]",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Salience multiplier for a node role
pub fn role_multiplier(role: NodeRole) -> f32 {
    match role {
        NodeRole::Head => 0.5,
        NodeRole::Tiered => 1.0,
        NodeRole::Orphan => 1.5,
    }
}

/// Why maintenance ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaintenanceTrigger {
    /// Nothing to do
    #[default]
    Idle,
    /// Periodic write cadence
    Cadence,
    /// Scope at or above its soft cap
    SoftCap,
    /// Scope at or above its hard cap
    HardCap,
}

/// Outcome of one maintenance pass over a scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub scope: Option<Scope>,
    pub trigger: MaintenanceTrigger,
    pub edges_before: usize,
    pub edges_after: usize,
    pub decayed_edges: usize,
    pub decayed_nodes: usize,
    pub pruned_edges: usize,
    /// Orphaned nodes tombstoned by this pass
    pub tombstoned: Vec<NodeId>,
}

impl MaintenanceReport {
    fn for_scope(scope: Scope, trigger: MaintenanceTrigger, edges_before: usize) -> Self {
        Self {
            scope: Some(scope),
            trigger,
            edges_before,
            edges_after: edges_before,
            ..Default::default()
        }
    }
}

/// Decay and pruning policy plus the write cadence counter
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: DecayConfig,
    writes_since_tick: u64,
}

impl Scheduler {
    pub fn new(config: DecayConfig) -> Self {
        Self {
            config,
            writes_since_tick: 0,
        }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Count a write; true when the cadence is due
    pub fn record_write(&mut self) -> bool {
        if self.config.cadence_writes == 0 {
            return false;
        }
        self.writes_since_tick += 1;
        if self.writes_since_tick >= self.config.cadence_writes {
            self.writes_since_tick = 0;
            return true;
        }
        false
    }

    /// Capacity check run before an edge is inserted into `scope`
    pub fn before_write(
        &self,
        store: &mut GraphStore,
        hierarchy: &mut TierHierarchy,
        scope: Scope,
    ) -> Result<MaintenanceReport> {
        let limits = hierarchy.limits(scope);
        let count = hierarchy.edge_count(scope);

        if count >= limits.hard_cap {
            self.emergency(store, hierarchy, scope)
        } else if count >= limits.soft_cap {
            self.decay_and_prune(store, hierarchy, scope, MaintenanceTrigger::SoftCap)
        } else {
            Ok(MaintenanceReport::for_scope(
                scope,
                MaintenanceTrigger::Idle,
                count,
            ))
        }
    }

    /// Cadence pass: decay and bounded prune on every resident scope, plus
    /// orphan decay
    pub fn tick(
        &self,
        store: &mut GraphStore,
        hierarchy: &mut TierHierarchy,
    ) -> Result<Vec<MaintenanceReport>> {
        let mut reports = Vec::new();
        for scope in hierarchy.resident_scopes() {
            let limits = hierarchy.limits(scope);
            let report = if hierarchy.edge_count(scope) >= limits.hard_cap {
                self.emergency(store, hierarchy, scope)?
            } else {
                self.decay_and_prune(store, hierarchy, scope, MaintenanceTrigger::Cadence)?
            };
            reports.push(report);
        }

        let (decayed, tombstoned) = self.decay_orphans(store, hierarchy)?;
        if decayed > 0 {
            debug!(
                "Decayed {} orphan nodes, tombstoned {}",
                decayed,
                tombstoned.len()
            );
        }
        if let Some(last) = reports.last_mut() {
            last.decayed_nodes += decayed;
            last.tombstoned.extend(tombstoned);
        }
        Ok(reports)
    }

    fn decay_and_prune(
        &self,
        store: &mut GraphStore,
        hierarchy: &mut TierHierarchy,
        scope: Scope,
        trigger: MaintenanceTrigger,
    ) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::for_scope(scope, trigger, hierarchy.edge_count(scope));
        report.decayed_edges = self.decay_edges(store, hierarchy, scope)?;
        report.decayed_nodes = self.decay_nodes(store, hierarchy, scope)?;
        report.pruned_edges = self.prune_below(
            store,
            hierarchy,
            scope,
            self.config.prune_threshold,
            Some(self.config.prune_batch),
        )?;
        report.edges_after = hierarchy.edge_count(scope);

        debug!(
            "Maintenance {:?} on {}: decayed {} edges, pruned {}",
            trigger, scope, report.decayed_edges, report.pruned_edges
        );
        Ok(report)
    }

    /// Hard-cap pass: drop weak edges, then the weakest until the scope is
    /// back at its target or only protected edges remain
    pub fn emergency(
        &self,
        store: &mut GraphStore,
        hierarchy: &mut TierHierarchy,
        scope: Scope,
    ) -> Result<MaintenanceReport> {
        let target = hierarchy.limits(scope).target;
        let mut report = MaintenanceReport::for_scope(
            scope,
            MaintenanceTrigger::HardCap,
            hierarchy.edge_count(scope),
        );

        report.pruned_edges = self.prune_below(
            store,
            hierarchy,
            scope,
            self.config.emergency_cutoff,
            None,
        )?;
        report.pruned_edges += self.prune_to_target(store, hierarchy, scope, target)?;
        report.edges_after = hierarchy.edge_count(scope);

        info!(
            "Emergency prune on {}: {} -> {} edges (target {})",
            scope, report.edges_before, report.edges_after, target
        );
        if report.edges_after > target {
            warn!(
                "Scope {} holds {} protected edges above its target {}",
                scope, report.edges_after, target
            );
        }
        Ok(report)
    }

    /// Multiply unprotected edge weights by the decay factor
    pub fn decay_edges(
        &self,
        store: &mut GraphStore,
        hierarchy: &TierHierarchy,
        scope: Scope,
    ) -> Result<usize> {
        let Some(edges) = hierarchy.scope(scope) else {
            return Ok(0);
        };

        let mut decayed = 0;
        for id in edges.edge_ids() {
            let Some(edge) = store.get_edge(*id) else {
                continue;
            };
            if edge.is_protected() {
                continue;
            }
            let weight = edge.weight * self.config.edge_decay_factor;
            store.set_edge_weight(*id, weight)?;
            decayed += 1;
        }
        Ok(decayed)
    }

    /// Decay salience of the scope's nodes according to their role
    pub fn decay_nodes(
        &self,
        store: &mut GraphStore,
        hierarchy: &TierHierarchy,
        scope: Scope,
    ) -> Result<usize> {
        if scope.tier() == Tier::Identity {
            return Ok(0);
        }
        let Some(edges) = hierarchy.scope(scope) else {
            return Ok(0);
        };

        let mut decayed = 0;
        for node in edges.members() {
            let role = hierarchy.node_role(*node, scope);
            if self.decay_node(store, *node, role)? {
                decayed += 1;
            }
        }
        Ok(decayed)
    }

    fn decay_node(&self, store: &mut GraphStore, id: NodeId, role: NodeRole) -> Result<bool> {
        let node = store.node(id)?;
        if !node.active || node.is_decay_exempt() {
            return Ok(false);
        }
        let loss = (self.config.node_decay_rate * role_multiplier(role)).min(1.0);
        let salience = node.salience * (1.0 - loss);
        store.set_salience(id, salience)?;
        Ok(true)
    }

    /// Decay orphans and tombstone the ones that fell below the floor
    pub fn decay_orphans(
        &self,
        store: &mut GraphStore,
        hierarchy: &mut TierHierarchy,
    ) -> Result<(usize, Vec<NodeId>)> {
        let orphans: Vec<NodeId> = hierarchy.orphans().iter().copied().collect();
        let mut decayed = 0;
        let mut tombstoned = Vec::new();

        for id in orphans {
            if self.decay_node(store, id, NodeRole::Orphan)? {
                decayed += 1;
            }
            let node = store.node(id)?;
            if node.active && !node.pinned && node.salience < self.config.node_floor {
                let scope = node.scope;
                store.tombstone(id)?;
                hierarchy.forget_node(id, scope);
                tombstoned.push(id);
            }
        }
        Ok((decayed, tombstoned))
    }

    /// Unprotected edges of a scope, weakest first
    fn unprotected_by_weight(
        &self,
        store: &GraphStore,
        hierarchy: &TierHierarchy,
        scope: Scope,
    ) -> Vec<(f32, EdgeId)> {
        let Some(edges) = hierarchy.scope(scope) else {
            return Vec::new();
        };
        let mut candidates: Vec<(f32, EdgeId)> = edges
            .edge_ids()
            .iter()
            .filter_map(|id| store.get_edge(*id))
            .filter(|edge| !edge.is_protected())
            .map(|edge| (edge.weight, edge.id))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates
    }

    fn remove(&self, store: &mut GraphStore, hierarchy: &mut TierHierarchy, id: EdgeId) {
        if let Some(edge) = store.remove_edge(id) {
            hierarchy.remove_edge(edge.scope, id, &edge.triple());
        }
    }

    /// Remove unprotected edges below `threshold`, weakest first, up to `limit`
    pub fn prune_below(
        &self,
        store: &mut GraphStore,
        hierarchy: &mut TierHierarchy,
        scope: Scope,
        threshold: f32,
        limit: Option<usize>,
    ) -> Result<usize> {
        let victims: Vec<EdgeId> = self
            .unprotected_by_weight(store, hierarchy, scope)
            .into_iter()
            .take_while(|(weight, _)| *weight < threshold)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, id)| id)
            .collect();

        for id in &victims {
            self.remove(store, hierarchy, *id);
        }
        Ok(victims.len())
    }

    /// Remove the weakest unprotected edges until the scope holds at most
    /// `target` edges or nothing unprotected is left
    pub fn prune_to_target(
        &self,
        store: &mut GraphStore,
        hierarchy: &mut TierHierarchy,
        scope: Scope,
        target: usize,
    ) -> Result<usize> {
        let excess = hierarchy.edge_count(scope).saturating_sub(target);
        if excess == 0 {
            return Ok(0);
        }

        let victims: Vec<EdgeId> = self
            .unprotected_by_weight(store, hierarchy, scope)
            .into_iter()
            .take(excess)
            .map(|(_, id)| id)
            .collect();

        for id in &victims {
            self.remove(store, hierarchy, *id);
        }
        Ok(victims.len())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DecayConfig::default())
    }
}
