//! Dedup index
//!
//! Bloom filter, exact-key map and LSH tables over the current head of every
//! fact. Superseded versions that are still active live in a separate LSH
//! table so retrieval can reach them while dedup only ever matches heads.
//! Derived state only: it is never persisted and can be rebuilt from the
//! node records at any time.

use crate::bloom::BloomFilter;
use crate::key_index::KeyIndex;
use crate::types::{EngineConfig, QueryBudget};
use crate::vector_index::{LshIndex, LshQuery};
use engram_core::{Node, NodeId, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of the cheap key checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProbe {
    /// Empty key, nothing to check
    NoKey,
    /// The Bloom filter has never seen the key
    Absent,
    /// The Bloom filter said maybe but the exact map has no entry
    Unconfirmed,
    /// Exact hit
    Found(NodeId),
}

#[derive(Debug, Clone)]
pub struct DedupIndex {
    bloom: BloomFilter,
    keys: KeyIndex,
    lsh: LshIndex,

    /// Active nodes that are no longer the head of their fact. Only
    /// supersedes and tombstones touch it, so clones share it until then.
    history: Arc<LshIndex>,
}

impl DedupIndex {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            bloom: BloomFilter::new(&config.bloom),
            keys: KeyIndex::new(&config.key_index),
            lsh: LshIndex::new(config.dimension, config.lsh.clone()),
            history: Arc::new(LshIndex::new(config.dimension, config.lsh.clone())),
        }
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    pub fn keys(&self) -> &KeyIndex {
        &self.keys
    }

    pub fn lsh(&self) -> &LshIndex {
        &self.lsh
    }

    pub fn history(&self) -> &LshIndex {
        &self.history
    }

    /// Indexed embedding of any active node
    pub fn embedding(&self, id: NodeId) -> Option<&[f32]> {
        self.lsh.embedding(id).or_else(|| self.history.embedding(id))
    }

    /// Bloom first, exact map second
    pub fn probe_key(&self, key: &str) -> KeyProbe {
        if key.is_empty() {
            return KeyProbe::NoKey;
        }
        if !self.bloom.might_contain(key) {
            return KeyProbe::Absent;
        }
        match self.keys.lookup(key) {
            Some(id) => KeyProbe::Found(id),
            None => KeyProbe::Unconfirmed,
        }
    }

    /// Exact-key lookup without the Bloom pre-check
    pub fn lookup_key(&self, key: &str) -> Option<NodeId> {
        self.keys.lookup(key)
    }

    pub fn similar(
        &self,
        embedding: &[f32],
        min_similarity: f32,
        k: usize,
        budget: &QueryBudget,
    ) -> Result<LshQuery> {
        self.lsh.query(embedding, min_similarity, k, budget)
    }

    /// Like [`similar`](Self::similar) but over every active node, heads
    /// and superseded versions alike. Each table gets the full budget.
    pub fn similar_active(
        &self,
        embedding: &[f32],
        min_similarity: f32,
        k: usize,
        budget: &QueryBudget,
    ) -> Result<LshQuery> {
        let mut result = self.lsh.query(embedding, min_similarity, k, budget)?;
        let older = self.history.query(embedding, min_similarity, k, budget)?;

        result.hits.extend(older.hits);
        result.hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        result.hits.truncate(k);
        result.truncated |= older.truncated;
        result.buckets_probed += older.buckets_probed;
        result.candidates_examined += older.candidates_examined;
        Ok(result)
    }

    /// Index a node by its state: heads get every index, older active
    /// versions only the history table, tombstones nothing
    pub fn index_node(&mut self, node: &Node) -> Result<()> {
        if !node.is_head() {
            if let Some(embedding) = node.embedding.as_ref().filter(|_| node.active) {
                Arc::make_mut(&mut self.history).insert(node.id, embedding.clone())?;
            }
            return Ok(());
        }
        if let Some(embedding) = &node.embedding {
            self.lsh.insert(node.id, embedding.clone())?;
        }
        if !node.key.is_empty() {
            self.bloom.insert(&node.key);
            self.keys.insert(&node.key, node.id);
        }
        Ok(())
    }

    /// Drop a node from every index. The Bloom filter keeps its bits; a
    /// later maybe for the key resolves through the exact map.
    pub fn unindex_node(&mut self, node: &Node) {
        if !node.key.is_empty() {
            self.keys.remove_entry(&node.key, node.id);
        }
        self.lsh.remove(node.id);
        if self.history.contains(node.id) {
            Arc::make_mut(&mut self.history).remove(node.id);
        }
        debug!("Unindexed node {:?}", node.id);
    }

    /// Move a node that was just superseded out of the head indices
    pub fn retire_node(&mut self, node: &Node) -> Result<()> {
        self.unindex_node(node);
        self.index_node(node)
    }

    /// Rebuild every index from node records
    pub fn rebuild<'a>(&mut self, nodes: impl IntoIterator<Item = &'a Node>) -> Result<()> {
        self.bloom.clear();
        self.keys.clear();
        self.lsh.clear();
        Arc::make_mut(&mut self.history).clear();

        for node in nodes {
            self.index_node(node)?;
        }
        info!(
            "Rebuilt dedup index: {} keys, {} head embeddings, {} older",
            self.keys.len(),
            self.lsh.len(),
            self.history.len()
        );
        Ok(())
    }
}
