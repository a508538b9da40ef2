//! Retrieval ranker ("tunneling")
//!
//! Similarity retrieval over every active node, weighted by salience, the
//! caller's scope and per-scope momentum, followed by a bounded walk over
//! incident edges. Superseded versions stay retrievable; on equal score the
//! current head ranks first. Ranking reads a graph snapshot only; momentum is the one piece of
//! state it updates and lives with the caller.

use crate::embeddings::cosine_similarity;
use crate::engine::MemoryGraph;
use crate::types::{QueryBudget, RankConfig};
use engram_core::temporal::elapsed_secs;
use engram_core::{Domain, EdgeId, Node, NodeId, Result, Scope};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

// ========== Momentum ==========

/// Per-scope retrieval preference in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumTable {
    values: HashMap<Scope, f32>,
    last_update: Option<i64>,
    alpha: f32,
    decay_per_sec: f32,
}

impl MomentumTable {
    pub fn new(alpha: f32, decay_per_sec: f32) -> Self {
        Self {
            values: HashMap::new(),
            last_update: None,
            alpha: alpha.clamp(0.0, 1.0),
            decay_per_sec: decay_per_sec.max(0.0),
        }
    }

    pub fn from_config(config: &RankConfig) -> Self {
        Self::new(config.momentum_alpha, config.momentum_decay_per_sec)
    }

    pub fn get(&self, scope: Scope) -> f32 {
        self.values.get(&scope).copied().unwrap_or(0.0)
    }

    /// Apply linear decay for the time elapsed since the last update
    pub fn decay_to(&mut self, now: i64) {
        if let Some(last) = self.last_update {
            let loss = self.decay_per_sec * elapsed_secs(last, now);
            if loss > 0.0 {
                for value in self.values.values_mut() {
                    *value = (*value - loss).max(0.0);
                }
                self.values.retain(|_, value| *value > 0.0);
            }
        }
        self.last_update = Some(now.max(self.last_update.unwrap_or(now)));
    }

    /// `m += alpha * (1 - m)`
    pub fn bump(&mut self, scope: Scope) {
        let value = self.values.entry(scope).or_insert(0.0);
        *value += self.alpha * (1.0 - *value);
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.last_update = None;
    }
}

// ========== Requests & Results ==========

/// A retrieval query. Unset options fall back to the engine's `RankConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct RankRequest {
    pub embedding: Vec<f32>,

    /// Free text used to infer the query domain
    pub text: Option<String>,

    /// Explicit query domain, wins over `text`
    pub domain: Option<Domain>,

    /// Caller's current scope
    pub current: Option<Scope>,

    pub min_similarity: Option<f32>,
    pub top_k: Option<usize>,
    pub current_scope_boost: Option<f32>,
    pub budget: Option<QueryBudget>,
}

impl RankRequest {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            text: None,
            domain: None,
            current: None,
            min_similarity: None,
            top_k: None,
            current_scope_boost: None,
            budget: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_current(mut self, scope: Scope) -> Self {
        self.current = Some(scope);
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.current_scope_boost = Some(boost);
        self
    }

    pub fn with_budget(mut self, budget: QueryBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Explicit domain, else inferred from text, else General
    pub fn query_domain(&self) -> Domain {
        self.domain
            .or_else(|| self.text.as_deref().map(Domain::infer))
            .unwrap_or(Domain::General)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub node: NodeId,
    pub score: f32,

    /// Cosine against the query, 0.0 for nodes without an embedding
    pub similarity: f32,

    pub scope: Scope,

    /// A newer version of this fact exists
    pub superseded: bool,

    /// Edge hops from the nearest primary hit
    pub hops: usize,

    /// Edge followed to reach an expanded hit
    pub via: Option<EdgeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedResults {
    pub primary: Vec<RankedHit>,
    pub expanded: Vec<RankedHit>,

    /// Mean pairwise cosine among primary hits
    pub coherence: f32,

    /// Scope holding most primary hits
    pub dominant_scope: Option<Scope>,

    /// Set when the dominant scope differs from the caller's and the hits
    /// are coherent enough to suggest switching
    pub suggested_scope: Option<Scope>,

    /// A budget cut the search short
    pub truncated: bool,

    pub query_domain: Domain,
}

impl RankedResults {
    /// Primary then expanded hits
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.primary
            .iter()
            .chain(self.expanded.iter())
            .map(|hit| hit.node)
            .collect()
    }
}

// ========== Ranking ==========

/// Nodes of another domain never leak into a query
fn admissible(node: &Node, query_domain: Domain) -> bool {
    node.active && node.domain.is_compatible(query_domain)
}

fn compare_hits(a: &RankedHit, b: &RankedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.superseded.cmp(&b.superseded))
        .then(a.scope.tier().priority().cmp(&b.scope.tier().priority()))
        .then(a.node.cmp(&b.node))
}

impl MemoryGraph {
    /// Rank active nodes against a query and expand over their edges.
    ///
    /// `momentum` is decayed to the current time, read for scoring and then
    /// bumped for every scope present in the primary hits.
    pub fn rank(&self, momentum: &mut MomentumTable, request: &RankRequest) -> Result<RankedResults> {
        let config = &self.config().rank;
        let min_similarity = request.min_similarity.unwrap_or(config.min_similarity);
        let top_k = request.top_k.unwrap_or(config.top_k);
        let boost = request
            .current_scope_boost
            .unwrap_or(config.current_scope_boost);
        let budget = request.budget.unwrap_or(config.budget);
        let query_domain = request.query_domain();

        momentum.decay_to(self.now());

        let query = self.dedup().similar_active(
            &request.embedding,
            min_similarity,
            budget.max_candidates,
            &budget,
        )?;
        let mut truncated = query.truncated;

        let store = self.graph().store();
        let mut primary: Vec<RankedHit> = query
            .hits
            .iter()
            .filter_map(|(id, similarity)| {
                let node = store.get(*id)?;
                if !admissible(node, query_domain) {
                    return None;
                }
                let scope_boost = if request.current == Some(node.scope) {
                    boost
                } else {
                    1.0
                };
                let score = similarity
                    * node.salience
                    * scope_boost
                    * (1.0 + momentum.get(node.scope) * 0.5);
                Some(RankedHit {
                    node: node.id,
                    score,
                    similarity: *similarity,
                    scope: node.scope,
                    superseded: node.superseded_by.is_some(),
                    hops: 0,
                    via: None,
                })
            })
            .collect();
        primary.sort_by(compare_hits);
        primary.truncate(top_k);

        let (expanded, expansion_truncated) =
            self.expand(&request.embedding, &primary, query_domain, request.current, &budget);
        truncated |= expansion_truncated;

        let coherence = self.coherence(&primary);
        let dominant_scope = dominant_scope(&primary);
        let suggested_scope = dominant_scope
            .filter(|scope| request.current != Some(*scope) && coherence >= config.switch_coherence);

        let mut bumped = HashSet::new();
        for hit in &primary {
            if bumped.insert(hit.scope) {
                momentum.bump(hit.scope);
            }
        }

        debug!(
            "Ranked {} primary and {} expanded hits ({:?} query, coherence {:.2})",
            primary.len(),
            expanded.len(),
            query_domain,
            coherence
        );
        Ok(RankedResults {
            primary,
            expanded,
            coherence,
            dominant_scope,
            suggested_scope,
            truncated,
            query_domain,
        })
    }

    /// Breadth-first walk over incident edges of the primary hits
    fn expand(
        &self,
        query: &[f32],
        primary: &[RankedHit],
        query_domain: Domain,
        current: Option<Scope>,
        budget: &QueryBudget,
    ) -> (Vec<RankedHit>, bool) {
        let session = current.and_then(|scope| scope.session());
        let store = self.graph().store();

        let mut seen: HashSet<NodeId> = primary.iter().map(|hit| hit.node).collect();
        let mut queue: VecDeque<(NodeId, f32, usize)> = primary
            .iter()
            .map(|hit| (hit.node, hit.score, 0))
            .collect();
        let mut expanded = Vec::new();

        while let Some((from, score, hops)) = queue.pop_front() {
            if hops >= budget.max_hops {
                continue;
            }
            for edge in self.graph().edges_of(from, session) {
                let to = edge.other_end(from);
                if seen.contains(&to) {
                    continue;
                }
                let Some(node) = store.get(to) else {
                    continue;
                };
                if !admissible(node, query_domain) {
                    continue;
                }
                if expanded.len() >= budget.max_expanded {
                    expanded.sort_by(compare_hits);
                    return (expanded, true);
                }

                seen.insert(to);
                let hit = RankedHit {
                    node: to,
                    score: score * edge.weight,
                    similarity: node
                        .embedding
                        .as_deref()
                        .map_or(0.0, |e| cosine_similarity(query, e)),
                    scope: node.scope,
                    superseded: node.superseded_by.is_some(),
                    hops: hops + 1,
                    via: Some(edge.id),
                };
                queue.push_back((to, hit.score, hops + 1));
                expanded.push(hit);
            }
        }

        expanded.sort_by(compare_hits);
        (expanded, false)
    }

    fn coherence(&self, primary: &[RankedHit]) -> f32 {
        match primary.len() {
            0 => return 0.0,
            1 => return 1.0,
            _ => {}
        }

        let embeddings: Vec<&[f32]> = primary
            .iter()
            .filter_map(|hit| self.dedup().embedding(hit.node))
            .collect();
        let mut total = 0.0;
        let mut pairs = 0usize;
        for (i, a) in embeddings.iter().enumerate() {
            for b in &embeddings[i + 1..] {
                total += cosine_similarity(a, b);
                pairs += 1;
            }
        }
        if pairs == 0 { 0.0 } else { total / pairs as f32 }
    }
}

fn dominant_scope(primary: &[RankedHit]) -> Option<Scope> {
    let mut counts: Vec<(Scope, usize)> = Vec::new();
    for hit in primary {
        match counts.iter_mut().find(|(scope, _)| *scope == hit.scope) {
            Some((_, count)) => *count += 1,
            None => counts.push((hit.scope, 1)),
        }
    }
    // First scope to reach the highest count wins ties
    let mut best: Option<(Scope, usize)> = None;
    for (scope, count) in counts {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((scope, count));
        }
    }
    best.map(|(scope, _)| scope)
}
