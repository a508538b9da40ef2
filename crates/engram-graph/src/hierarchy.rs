//! Tiered hierarchy bookkeeping
//!
//! Tracks which edges and nodes each scope owns, the head node of every
//! scope, and the fixed pool of session slots. Canonical records stay in
//! [`GraphStore`](crate::store::GraphStore); this module only holds ids.

use engram_core::{EdgeId, EdgeTriple, Error, NodeId, Result, Scope, SessionId, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Edge-count limits for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Above this, every write runs a decay step and a bounded prune
    pub soft_cap: usize,
    /// At this count the scope is full
    pub hard_cap: usize,
    /// Emergency prune shrinks the scope to this count
    pub target: usize,
}

impl TierLimits {
    pub fn new(soft_cap: usize, hard_cap: usize, target: usize) -> Self {
        Self {
            soft_cap,
            hard_cap,
            target,
        }
    }

    fn validate(&self, tier: &str) -> Result<()> {
        if self.hard_cap == 0 {
            return Err(Error::Configuration(format!(
                "{} hard cap must be positive",
                tier
            )));
        }
        if self.soft_cap > self.hard_cap {
            return Err(Error::Configuration(format!(
                "{} soft cap {} exceeds hard cap {}",
                tier, self.soft_cap, self.hard_cap
            )));
        }
        if self.target > self.hard_cap {
            return Err(Error::Configuration(format!(
                "{} target {} exceeds hard cap {}",
                tier, self.target, self.hard_cap
            )));
        }
        Ok(())
    }
}

/// Tier capacities and session pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Identity tier; only `hard_cap` is used, for nodes and edges alike
    pub identity: TierLimits,
    pub consolidated: TierLimits,
    /// Per session slot
    pub session: TierLimits,
    /// Number of resident sessions
    pub session_slots: usize,
    /// Session edges strictly above this weight are promoted
    pub promotion_threshold: f32,
    /// Consolidate a session slot before evicting or ending it
    pub promote_on_evict: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            identity: TierLimits::new(64, 64, 64),
            consolidated: TierLimits::new(9_000, 12_000, 6_000),
            session: TierLimits::new(500, 500, 250),
            session_slots: 8,
            promotion_threshold: 0.7,
            promote_on_evict: false,
        }
    }
}

impl TierConfig {
    pub fn with_identity_capacity(mut self, capacity: usize) -> Self {
        self.identity = TierLimits::new(capacity, capacity, capacity);
        self
    }

    pub fn with_consolidated_limits(mut self, limits: TierLimits) -> Self {
        self.consolidated = limits;
        self
    }

    pub fn with_session_limits(mut self, limits: TierLimits) -> Self {
        self.session = limits;
        self
    }

    pub fn with_session_slots(mut self, slots: usize) -> Self {
        self.session_slots = slots;
        self
    }

    pub fn with_promotion_threshold(mut self, threshold: f32) -> Self {
        self.promotion_threshold = threshold;
        self
    }

    pub fn with_promote_on_evict(mut self, enabled: bool) -> Self {
        self.promote_on_evict = enabled;
        self
    }

    /// Limits for a tier
    pub fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Identity => self.identity,
            Tier::Consolidated => self.consolidated,
            Tier::Session => self.session,
        }
    }

    /// Reject inconsistent limits
    pub fn validate(&self) -> Result<()> {
        self.identity.validate("identity")?;
        self.consolidated.validate("consolidated")?;
        self.session.validate("session")?;
        if self.session_slots == 0 {
            return Err(Error::Configuration(
                "at least one session slot is required".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.promotion_threshold) {
            return Err(Error::Configuration(format!(
                "promotion threshold {} outside [0, 1]",
                self.promotion_threshold
            )));
        }
        Ok(())
    }
}

/// Edge and node membership of one scope.
///
/// Edge ids sit in a dense list with a position map so removal is a
/// swap-remove; the triple map enforces one edge per (source, target, type).
#[derive(Debug, Clone, Default)]
pub struct ScopeEdges {
    edges: Vec<EdgeId>,
    positions: HashMap<EdgeId, usize>,
    triples: HashMap<EdgeTriple, EdgeId>,
    members: BTreeSet<NodeId>,
    head: Option<NodeId>,
}

impl ScopeEdges {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edge ids, in no meaningful order
    pub fn edge_ids(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn contains(&self, id: EdgeId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Edge already holding this triple
    pub fn find(&self, triple: &EdgeTriple) -> Option<EdgeId> {
        self.triples.get(triple).copied()
    }

    pub fn insert(&mut self, id: EdgeId, triple: EdgeTriple) {
        if self.positions.contains_key(&id) {
            return;
        }
        self.positions.insert(id, self.edges.len());
        self.edges.push(id);
        self.triples.insert(triple, id);
    }

    /// O(1) removal; returns false when the edge was not here
    pub fn remove(&mut self, id: EdgeId, triple: &EdgeTriple) -> bool {
        let Some(pos) = self.positions.remove(&id) else {
            return false;
        };
        self.edges.swap_remove(pos);
        if let Some(moved) = self.edges.get(pos) {
            self.positions.insert(*moved, pos);
        }
        if self.triples.get(triple) == Some(&id) {
            self.triples.remove(triple);
        }
        true
    }

    /// Drop every edge id, keeping node membership
    pub fn take_edges(&mut self) -> Vec<EdgeId> {
        self.positions.clear();
        self.triples.clear();
        std::mem::take(&mut self.edges)
    }

    pub fn members(&self) -> &BTreeSet<NodeId> {
        &self.members
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    fn add_member(&mut self, node: NodeId) {
        self.members.insert(node);
    }

    fn remove_member(&mut self, node: NodeId) {
        self.members.remove(&node);
        if self.head == Some(node) {
            self.head = None;
        }
    }
}

/// One slot of the session pool
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    /// Bound session, if any
    pub session: Option<SessionId>,
    /// Edges and nodes of the bound session
    pub scope: ScopeEdges,
    /// Last write or touch (millis since epoch)
    pub last_used: i64,
}

/// Role of a node for decay purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Most recently written node of its scope
    Head,
    /// Member of a resident scope
    Tiered,
    /// Owning scope is no longer resident
    Orphan,
}

/// Per-scope membership for Identity, Consolidated and the session pool
#[derive(Debug, Clone)]
pub struct TierHierarchy {
    config: TierConfig,
    identity: ScopeEdges,
    consolidated: ScopeEdges,
    slots: Vec<SessionSlot>,
    orphans: BTreeSet<NodeId>,
}

impl TierHierarchy {
    pub fn new(config: TierConfig) -> Self {
        let slots = vec![SessionSlot::default(); config.session_slots.max(1)];
        Self {
            config,
            identity: ScopeEdges::default(),
            consolidated: ScopeEdges::default(),
            slots,
            orphans: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn limits(&self, scope: Scope) -> TierLimits {
        self.config.limits(scope.tier())
    }

    fn slot_index(&self, session: SessionId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.session == Some(session))
    }

    /// Membership of a resident scope
    pub fn scope(&self, scope: Scope) -> Option<&ScopeEdges> {
        match scope {
            Scope::Identity => Some(&self.identity),
            Scope::Consolidated => Some(&self.consolidated),
            Scope::Session(id) => self.slot_index(id).map(|i| &self.slots[i].scope),
        }
    }

    fn scope_mut(&mut self, scope: Scope) -> Result<&mut ScopeEdges> {
        match scope {
            Scope::Identity => Ok(&mut self.identity),
            Scope::Consolidated => Ok(&mut self.consolidated),
            Scope::Session(id) => {
                let index = self.slot_index(id).ok_or(Error::SessionNotFound(id))?;
                Ok(&mut self.slots[index].scope)
            }
        }
    }

    /// Identity and Consolidated always are; sessions only while bound to a slot
    pub fn is_resident(&self, scope: Scope) -> bool {
        self.scope(scope).is_some()
    }

    /// Edge count of a scope; zero when not resident
    pub fn edge_count(&self, scope: Scope) -> usize {
        self.scope(scope).map_or(0, ScopeEdges::len)
    }

    /// Edge counts summed over all resident scopes
    pub fn total_edge_count(&self) -> usize {
        self.identity.len()
            + self.consolidated.len()
            + self.slots.iter().map(|s| s.scope.len()).sum::<usize>()
    }

    /// Every resident scope, in query order
    pub fn resident_scopes(&self) -> Vec<Scope> {
        let mut scopes = vec![Scope::Identity, Scope::Consolidated];
        scopes.extend(self.resident_sessions().into_iter().map(Scope::Session));
        scopes
    }

    pub fn resident_sessions(&self) -> Vec<SessionId> {
        self.slots.iter().filter_map(|slot| slot.session).collect()
    }

    pub fn slots(&self) -> &[SessionSlot] {
        &self.slots
    }

    /// Identity, then Consolidated, then the caller's session
    pub fn ordered_scopes(&self, current: Option<SessionId>) -> Vec<Scope> {
        let mut scopes = vec![Scope::Identity, Scope::Consolidated];
        if let Some(session) = current {
            scopes.push(Scope::Session(session));
        }
        scopes
    }

    // ========== Session Pool ==========

    /// Slot for a new session: a free one, else the least recently used.
    /// Also returns the session that must be released first.
    pub fn pick_slot(&self) -> (usize, Option<SessionId>) {
        if let Some(free) = self.slots.iter().position(|s| s.session.is_none()) {
            return (free, None);
        }
        let (index, slot) = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(i, slot)| (slot.last_used, *i))
            .unwrap_or((0, &self.slots[0]));
        (index, slot.session)
    }

    /// Bind a session to a free slot
    pub fn bind(&mut self, slot: usize, session: SessionId, now: i64) -> Result<()> {
        let target = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| Error::Internal(format!("no session slot {}", slot)))?;
        if target.session.is_some() {
            return Err(Error::InvalidGraphOperation(format!(
                "session slot {} is occupied",
                slot
            )));
        }
        *target = SessionSlot {
            session: Some(session),
            scope: ScopeEdges::default(),
            last_used: now,
        };
        Ok(())
    }

    /// Unbind a session. Its nodes become orphans; the returned edge ids
    /// must be removed from the store by the caller.
    pub fn release(&mut self, session: SessionId) -> Result<Vec<EdgeId>> {
        let index = self
            .slot_index(session)
            .ok_or(Error::SessionNotFound(session))?;
        let slot = std::mem::take(&mut self.slots[index]);
        let mut scope = slot.scope;
        self.orphans.extend(scope.members.iter().copied());
        Ok(scope.take_edges())
    }

    /// Refresh a session's LRU position
    pub fn touch_session(&mut self, session: SessionId, now: i64) -> Result<()> {
        let index = self
            .slot_index(session)
            .ok_or(Error::SessionNotFound(session))?;
        let slot = &mut self.slots[index];
        slot.last_used = slot.last_used.max(now);
        Ok(())
    }

    // ========== Membership ==========

    /// Register an edge under its scope
    pub fn add_edge(&mut self, scope: Scope, id: EdgeId, triple: EdgeTriple) -> Result<()> {
        self.scope_mut(scope)?.insert(id, triple);
        Ok(())
    }

    /// Forget an edge; true if the scope held it
    pub fn remove_edge(&mut self, scope: Scope, id: EdgeId, triple: &EdgeTriple) -> bool {
        self.scope_mut(scope)
            .map(|edges| edges.remove(id, triple))
            .unwrap_or(false)
    }

    /// Edge holding `triple` in `scope`
    pub fn find_edge(&self, scope: Scope, triple: &EdgeTriple) -> Option<EdgeId> {
        self.scope(scope).and_then(|edges| edges.find(triple))
    }

    /// Take every edge id of a scope, keeping its nodes
    pub fn take_edges(&mut self, scope: Scope) -> Result<Vec<EdgeId>> {
        Ok(self.scope_mut(scope)?.take_edges())
    }

    /// Register a freshly written node; it becomes the scope head
    pub fn add_node(&mut self, scope: Scope, node: NodeId) -> Result<()> {
        let edges = self.scope_mut(scope)?;
        edges.add_member(node);
        edges.head = Some(node);
        Ok(())
    }

    /// Register a node without making it the head (snapshot restore)
    pub fn adopt_node(&mut self, scope: Scope, node: NodeId) {
        match self.scope_mut(scope) {
            Ok(edges) => edges.add_member(node),
            Err(_) => {
                self.orphans.insert(node);
            }
        }
    }

    /// Move a node between scopes
    pub fn move_node(&mut self, node: NodeId, from: Scope, to: Scope) -> Result<()> {
        if let Ok(edges) = self.scope_mut(from) {
            edges.remove_member(node);
        }
        self.orphans.remove(&node);
        self.scope_mut(to)?.add_member(node);
        Ok(())
    }

    /// Drop a node from whatever tracks it
    pub fn forget_node(&mut self, node: NodeId, scope: Scope) {
        if let Ok(edges) = self.scope_mut(scope) {
            edges.remove_member(node);
        }
        self.orphans.remove(&node);
    }

    pub fn orphans(&self) -> &BTreeSet<NodeId> {
        &self.orphans
    }

    /// Decay role of a node owned by `scope`
    pub fn node_role(&self, node: NodeId, scope: Scope) -> NodeRole {
        match self.scope(scope) {
            Some(edges) if edges.head == Some(node) => NodeRole::Head,
            Some(edges) if edges.members.contains(&node) => NodeRole::Tiered,
            _ => NodeRole::Orphan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{EdgeType, EntityId};

    fn triple(a: u64, b: u64) -> EdgeTriple {
        EdgeTriple::new(
            NodeId::from_internal(a),
            NodeId::from_internal(b),
            EdgeType::Related,
        )
    }

    fn session(id: u64) -> SessionId {
        SessionId::from_internal(id)
    }

    #[test]
    fn test_scope_edges_swap_remove() {
        let mut edges = ScopeEdges::default();
        for i in 0..4 {
            edges.insert(EdgeId::from_internal(i), triple(i, i + 1));
        }

        assert!(edges.remove(EdgeId::from_internal(1), &triple(1, 2)));
        assert_eq!(edges.len(), 3);
        assert!(!edges.contains(EdgeId::from_internal(1)));
        assert!(edges.find(&triple(1, 2)).is_none());

        // the moved id must still be removable
        assert!(edges.remove(EdgeId::from_internal(3), &triple(3, 4)));
        assert!(edges.remove(EdgeId::from_internal(0), &triple(0, 1)));
        assert!(edges.remove(EdgeId::from_internal(2), &triple(2, 3)));
        assert!(edges.is_empty());
        assert!(!edges.remove(EdgeId::from_internal(2), &triple(2, 3)));
    }

    #[test]
    fn test_ordered_scopes() {
        let hierarchy = TierHierarchy::new(TierConfig::default());
        assert_eq!(
            hierarchy.ordered_scopes(Some(session(4))),
            vec![
                Scope::Identity,
                Scope::Consolidated,
                Scope::Session(session(4))
            ]
        );
        assert_eq!(hierarchy.ordered_scopes(None).len(), 2);
    }

    #[test]
    fn test_pick_slot_prefers_free_then_lru() {
        let config = TierConfig::default().with_session_slots(2);
        let mut hierarchy = TierHierarchy::new(config);

        let (slot, evicted) = hierarchy.pick_slot();
        assert_eq!((slot, evicted), (0, None));
        hierarchy.bind(slot, session(1), 100).unwrap();

        let (slot, evicted) = hierarchy.pick_slot();
        assert_eq!((slot, evicted), (1, None));
        hierarchy.bind(slot, session(2), 200).unwrap();

        // session 1 is the least recently used until touched
        assert_eq!(hierarchy.pick_slot(), (0, Some(session(1))));
        hierarchy.touch_session(session(1), 300).unwrap();
        assert_eq!(hierarchy.pick_slot(), (1, Some(session(2))));
    }

    #[test]
    fn test_release_orphans_members() {
        let mut hierarchy = TierHierarchy::new(TierConfig::default());
        hierarchy.bind(0, session(1), 0).unwrap();
        let scope = Scope::Session(session(1));

        let node = NodeId::from_internal(5);
        hierarchy.add_node(scope, node).unwrap();
        hierarchy
            .add_edge(scope, EdgeId::from_internal(1), triple(5, 6))
            .unwrap();
        assert_eq!(hierarchy.node_role(node, scope), NodeRole::Head);

        let edges = hierarchy.release(session(1)).unwrap();
        assert_eq!(edges, vec![EdgeId::from_internal(1)]);
        assert!(!hierarchy.is_resident(scope));
        assert!(hierarchy.orphans().contains(&node));
        assert_eq!(hierarchy.node_role(node, scope), NodeRole::Orphan);
        assert!(matches!(
            hierarchy.touch_session(session(1), 0),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_move_node_and_roles() {
        let mut hierarchy = TierHierarchy::new(TierConfig::default());
        hierarchy.bind(0, session(1), 0).unwrap();
        let session_scope = Scope::Session(session(1));

        let a = NodeId::from_internal(1);
        let b = NodeId::from_internal(2);
        hierarchy.add_node(session_scope, a).unwrap();
        hierarchy.add_node(session_scope, b).unwrap();
        assert_eq!(hierarchy.node_role(a, session_scope), NodeRole::Tiered);
        assert_eq!(hierarchy.node_role(b, session_scope), NodeRole::Head);

        hierarchy
            .move_node(b, session_scope, Scope::Consolidated)
            .unwrap();
        assert_eq!(hierarchy.node_role(b, Scope::Consolidated), NodeRole::Tiered);
        assert!(hierarchy.scope(session_scope).unwrap().head().is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(TierConfig::default().validate().is_ok());
        assert!(
            TierConfig::default()
                .with_session_slots(0)
                .validate()
                .is_err()
        );
        assert!(
            TierConfig::default()
                .with_consolidated_limits(TierLimits::new(10, 5, 2))
                .validate()
                .is_err()
        );
        assert!(
            TierConfig::default()
                .with_session_limits(TierLimits::new(5, 10, 20))
                .validate()
                .is_err()
        );
    }
}
