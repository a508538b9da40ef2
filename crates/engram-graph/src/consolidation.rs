//! Session consolidation
//!
//! Promotes the strong edges of a session slot into the Consolidated tier
//! and resets the slot. Also handles releasing a session (end or eviction).

use crate::hierarchy::TierHierarchy;
use crate::store::GraphStore;
use engram_core::{Edge, NodeId, Result, Scope, SessionId};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Result of consolidating one session slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationResult {
    /// Session that was consolidated
    pub session: Option<SessionId>,

    /// Edges moved into Consolidated
    pub promoted: usize,

    /// Edges averaged into an existing Consolidated edge
    pub merged: usize,

    /// Edges at or below the promotion threshold, dropped
    pub discarded: usize,

    /// Session nodes re-scoped to Consolidated
    pub nodes_rescoped: usize,
}

/// Result of releasing a session slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseResult {
    pub session: Option<SessionId>,

    /// Set when the slot was consolidated before release
    pub consolidation: Option<ConsolidationResult>,

    /// Edges dropped without promotion
    pub discarded_edges: usize,

    /// Protected edges moved to Consolidated instead of dropped
    pub kept_protected: usize,
}

/// Promote every edge of `session` above the promotion threshold, then
/// clear the slot. Protected edges are always promoted. The session stays
/// bound to its slot.
pub fn consolidate_session(
    store: &mut GraphStore,
    hierarchy: &mut TierHierarchy,
    session: SessionId,
) -> Result<ConsolidationResult> {
    let threshold = hierarchy.config().promotion_threshold;
    let scope = Scope::Session(session);
    let ids = hierarchy.take_edges(scope)?;

    let mut result = ConsolidationResult {
        session: Some(session),
        ..Default::default()
    };
    let mut endpoints = BTreeSet::new();

    for id in ids {
        let Some(edge) = store.get_edge(id).cloned() else {
            continue;
        };

        if edge.weight <= threshold && !edge.is_protected() {
            store.remove_edge(id);
            result.discarded += 1;
            continue;
        }

        if promote_edge(store, hierarchy, &edge)? {
            result.promoted += 1;
        } else {
            result.merged += 1;
        }
        endpoints.insert(edge.source);
        endpoints.insert(edge.target);
    }

    result.nodes_rescoped = rescope_endpoints(store, hierarchy, scope, endpoints)?;

    info!(
        "Consolidated session {}: {} promoted, {} merged, {} discarded, {} nodes re-scoped",
        session, result.promoted, result.merged, result.discarded, result.nodes_rescoped
    );
    Ok(result)
}

/// Move one edge into Consolidated, averaging into an existing edge with
/// the same triple. True when the edge itself was moved.
fn promote_edge(store: &mut GraphStore, hierarchy: &mut TierHierarchy, edge: &Edge) -> Result<bool> {
    let triple = edge.triple();
    match hierarchy.find_edge(Scope::Consolidated, &triple) {
        Some(existing) => {
            let current = store.get_edge(existing).map_or(edge.weight, |e| e.weight);
            store.set_edge_weight(existing, (current + edge.weight) / 2.0)?;
            store.remove_edge(edge.id);
            Ok(false)
        }
        None => {
            store.set_edge_scope(edge.id, Scope::Consolidated)?;
            hierarchy.add_edge(Scope::Consolidated, edge.id, triple)?;
            Ok(true)
        }
    }
}

/// Re-scope the endpoints still owned by `from` to Consolidated
fn rescope_endpoints(
    store: &mut GraphStore,
    hierarchy: &mut TierHierarchy,
    from: Scope,
    endpoints: BTreeSet<NodeId>,
) -> Result<usize> {
    let mut moved = 0;
    for node in endpoints {
        if store.node(node)?.scope == from {
            store.set_scope(node, Scope::Consolidated)?;
            hierarchy.move_node(node, from, Scope::Consolidated)?;
            moved += 1;
        }
    }
    Ok(moved)
}

/// Unbind a session from its slot.
///
/// With `promote` set the slot is consolidated first. Otherwise its
/// unprotected edges are dropped outright and protected edges (version
/// links, identity links) move to Consolidated along with their session
/// endpoints. Other nodes left in the session become orphans.
pub fn release_session(
    store: &mut GraphStore,
    hierarchy: &mut TierHierarchy,
    session: SessionId,
    promote: bool,
) -> Result<ReleaseResult> {
    let consolidation = if promote {
        Some(consolidate_session(store, hierarchy, session)?)
    } else {
        None
    };

    let scope = Scope::Session(session);
    let ids = hierarchy.release(session)?;
    let mut discarded_edges = 0;
    let mut kept_protected = 0;
    let mut endpoints = BTreeSet::new();
    for id in ids {
        let Some(edge) = store.get_edge(id).cloned() else {
            continue;
        };
        if edge.is_protected() {
            promote_edge(store, hierarchy, &edge)?;
            endpoints.insert(edge.source);
            endpoints.insert(edge.target);
            kept_protected += 1;
        } else {
            store.remove_edge(id);
            discarded_edges += 1;
        }
    }
    rescope_endpoints(store, hierarchy, scope, endpoints)?;

    if discarded_edges > 0 {
        warn!(
            "Session {} released without consolidation: {} edges discarded, {} protected kept",
            session, discarded_edges, kept_protected
        );
    } else {
        debug!("Session {} released, {} protected edges kept", session, kept_protected);
    }

    Ok(ReleaseResult {
        session: Some(session),
        consolidation,
        discarded_edges,
        kept_protected,
    })
}
