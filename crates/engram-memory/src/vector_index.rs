//! Locality-sensitive hashing index for approximate similarity search
//!
//! L tables, each keyed by a B-bit signature: bit `i` is the sign of the dot
//! product with one random hyperplane. Queries union the matching bucket of
//! every table (plus, optionally, every bucket one bit away) and verify each
//! candidate by exact cosine similarity.
//!
//! # Tuning
//!
//! More tables raise recall; more bits per table raise per-table precision at
//! the cost of recall. Both are fixed at construction.

use crate::embeddings::cosine_similarity;
use crate::types::QueryBudget;
use engram_core::{Error, NodeId, Result};
use ndarray::{Array2, aview1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Configuration for the LSH index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LshConfig {
    /// Number of independent hash tables (L)
    pub tables: usize,

    /// Signature bits per table (B); buckets per table = 2^B
    pub bits: usize,

    /// Seed for hyperplane generation
    pub seed: u64,

    /// Also probe every bucket at Hamming distance 1
    pub probe_neighbors: bool,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            tables: 10,
            bits: 12,
            seed: 0x5EED_1234,
            probe_neighbors: true,
        }
    }
}

impl LshConfig {
    /// Preset for an embedding dimension
    pub fn for_dimension(dimension: usize) -> Self {
        let (tables, bits) = match dimension {
            0..=64 => (8, 10),
            65..=512 => (10, 12),
            _ => (12, 14),
        };
        Self {
            tables,
            bits,
            ..Self::default()
        }
    }

    pub fn with_tables(mut self, tables: usize) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_bits(mut self, bits: usize) -> Self {
        self.bits = bits;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_probe_neighbors(mut self, probe: bool) -> Self {
        self.probe_neighbors = probe;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tables == 0 {
            return Err(Error::Configuration("lsh.tables must be at least 1".into()));
        }
        if !(1..=24).contains(&self.bits) {
            return Err(Error::Configuration(format!(
                "lsh.bits must be within 1..=24, got {}",
                self.bits
            )));
        }
        Ok(())
    }

    /// Buckets a query probes per table when the budget allows it
    pub fn probes_per_table(&self) -> usize {
        if self.probe_neighbors { 1 + self.bits } else { 1 }
    }
}

/// Verified query answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LshQuery {
    /// `(handle, cosine)` sorted by similarity descending
    pub hits: Vec<(NodeId, f32)>,

    /// Set when the budget stopped the probe early
    pub truncated: bool,

    pub buckets_probed: usize,
    pub candidates_examined: usize,
}

/// Embeddings are shared between clones of the index
#[derive(Debug, Clone)]
struct Entry {
    embedding: Arc<[f32]>,
    signatures: Vec<u32>,
}

/// LSH similarity index
#[derive(Debug, Clone)]
pub struct LshIndex {
    config: LshConfig,
    dimension: usize,

    /// One row per hyperplane, `tables * bits` rows; shared by clones
    planes: Arc<Array2<f32>>,

    tables: Vec<HashMap<u32, Vec<NodeId>>>,
    entries: HashMap<NodeId, Entry>,
}

impl LshIndex {
    pub fn new(dimension: usize, config: LshConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let rows = config.tables * config.bits;
        let planes = Array2::from_shape_fn((rows, dimension), |_| gaussian(&mut rng));
        let tables = vec![HashMap::new(); config.tables];

        debug!(
            "Created LSH index: dimension {}, {} tables x {} bits",
            dimension, config.tables, config.bits
        );
        Self {
            config,
            dimension,
            planes: Arc::new(planes),
            tables,
            entries: HashMap::new(),
        }
    }

    pub fn config(&self) -> &LshConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn embedding(&self, id: NodeId) -> Option<&[f32]> {
        self.entries.get(&id).map(|entry| &*entry.embedding)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: embedding.len(),
            });
        }
        Ok(())
    }

    /// One B-bit bucket index per table
    fn signatures(&self, embedding: &[f32]) -> Vec<u32> {
        let projections = self.planes.dot(&aview1(embedding));
        let bits = self.config.bits;
        (0..self.config.tables)
            .map(|table| {
                (0..bits).fold(0u32, |sig, bit| {
                    if projections[table * bits + bit] >= 0.0 {
                        sig | (1 << bit)
                    } else {
                        sig
                    }
                })
            })
            .collect()
    }

    /// Index `embedding` under `id`, replacing any previous entry
    pub fn insert(&mut self, id: NodeId, embedding: Vec<f32>) -> Result<()> {
        self.check_dimension(&embedding)?;
        self.remove(id);

        let signatures = self.signatures(&embedding);
        for (table, sig) in self.tables.iter_mut().zip(&signatures) {
            table.entry(*sig).or_default().push(id);
        }
        self.entries.insert(
            id,
            Entry {
                embedding: embedding.into(),
                signatures,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        for (table, sig) in self.tables.iter_mut().zip(&entry.signatures) {
            if let Some(bucket) = table.get_mut(sig) {
                if let Some(pos) = bucket.iter().position(|h| *h == id) {
                    bucket.swap_remove(pos);
                }
                if bucket.is_empty() {
                    table.remove(sig);
                }
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.tables.iter_mut().for_each(HashMap::clear);
        self.entries.clear();
    }

    /// Up to `k` indexed handles with cosine ≥ `min_similarity`
    pub fn query(
        &self,
        embedding: &[f32],
        min_similarity: f32,
        k: usize,
        budget: &QueryBudget,
    ) -> Result<LshQuery> {
        self.check_dimension(embedding)?;
        let mut result = LshQuery::default();
        if k == 0 || self.entries.is_empty() {
            return Ok(result);
        }

        let signatures = self.signatures(embedding);
        let mut seen: HashSet<NodeId> = HashSet::new();

        // Exact buckets of every table first, then one flipped bit at a time
        let rounds = self.config.probes_per_table();
        'probe: for round in 0..rounds {
            for (table, sig) in self.tables.iter().zip(&signatures) {
                if result.buckets_probed >= budget.max_buckets {
                    result.truncated = true;
                    break 'probe;
                }
                let key = if round == 0 { *sig } else { sig ^ (1 << (round - 1)) };
                result.buckets_probed += 1;

                let Some(bucket) = table.get(&key) else {
                    continue;
                };
                for id in bucket {
                    // the same handle sits in one bucket per table
                    if seen.contains(id) {
                        continue;
                    }
                    if seen.len() >= budget.max_candidates {
                        result.truncated = true;
                        break 'probe;
                    }
                    seen.insert(*id);
                }
            }
        }

        result.candidates_examined = seen.len();
        let mut hits: Vec<(NodeId, f32)> = seen
            .into_iter()
            .filter_map(|id| {
                let entry = self.entries.get(&id)?;
                let similarity = cosine_similarity(embedding, &entry.embedding);
                (similarity >= min_similarity).then_some((id, similarity))
            })
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);
        result.hits = hits;
        Ok(result)
    }
}

/// Standard normal sample (Box-Muller)
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::normalize_vector;
    use engram_core::EntityId;

    fn id(n: u64) -> NodeId {
        NodeId::from_internal(n)
    }

    fn random_unit(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dimension).map(|_| gaussian(rng)).collect();
        normalize_vector(&mut v);
        v
    }

    /// A unit vector at exactly `cosine` from `base`
    fn partner(rng: &mut StdRng, base: &[f32], cosine: f32) -> Vec<f32> {
        let mut noise = random_unit(rng, base.len());
        let along: f32 = noise.iter().zip(base).map(|(n, b)| n * b).sum();
        for (n, b) in noise.iter_mut().zip(base) {
            *n -= along * b;
        }
        normalize_vector(&mut noise);
        let sine = (1.0 - cosine * cosine).sqrt();
        base.iter()
            .zip(&noise)
            .map(|(b, n)| cosine * b + sine * n)
            .collect()
    }

    #[test]
    fn test_insert_and_query_exact() {
        let mut index = LshIndex::new(3, LshConfig::for_dimension(3));
        index.insert(id(1), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(id(2), vec![0.0, 1.0, 0.0]).unwrap();

        let result = index
            .query(&[1.0, 0.0, 0.0], 0.9, 10, &QueryBudget::default())
            .unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].0, id(1));
        assert!((result.hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = LshIndex::new(4, LshConfig::default());
        let err = index.insert(id(1), vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, got: 2 }));
        assert!(index.query(&[1.0], 0.5, 1, &QueryBudget::default()).is_err());
    }

    #[test]
    fn test_remove_and_reinsert() {
        let mut index = LshIndex::new(3, LshConfig::default());
        index.insert(id(1), vec![1.0, 0.0, 0.0]).unwrap();
        assert!(index.remove(id(1)));
        assert!(!index.remove(id(1)));
        assert!(index.is_empty());

        let result = index
            .query(&[1.0, 0.0, 0.0], 0.0, 10, &QueryBudget::default())
            .unwrap();
        assert!(result.hits.is_empty());

        // re-insert replaces, never duplicates
        index.insert(id(1), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(id(1), vec![1.0, 0.0, 0.0]).unwrap();
        let result = index
            .query(&[1.0, 0.0, 0.0], 0.0, 10, &QueryBudget::default())
            .unwrap();
        assert_eq!(result.hits.len(), 1);
    }

    #[test]
    fn test_results_sorted_and_limited() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = random_unit(&mut rng, 32);
        let mut index = LshIndex::new(32, LshConfig::for_dimension(32));
        index.insert(id(1), base.clone()).unwrap();
        index.insert(id(2), partner(&mut rng, &base, 0.99)).unwrap();
        index.insert(id(3), partner(&mut rng, &base, 0.97)).unwrap();

        let result = index.query(&base, 0.5, 2, &QueryBudget::default()).unwrap();
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].0, id(1));
        assert!(result.hits[0].1 >= result.hits[1].1);
    }

    #[test]
    fn test_high_similarity_pairs_find_each_other() {
        let dimension = 64;
        let mut rng = StdRng::seed_from_u64(2024);
        let mut index = LshIndex::new(dimension, LshConfig::for_dimension(dimension));

        let mut pairs = Vec::new();
        for n in 0..40u64 {
            let a = random_unit(&mut rng, dimension);
            let b = partner(&mut rng, &a, 0.95);
            index.insert(id(2 * n), a.clone()).unwrap();
            index.insert(id(2 * n + 1), b.clone()).unwrap();
            pairs.push((id(2 * n), a, id(2 * n + 1), b));
        }

        let budget = QueryBudget::default();
        for (ida, a, idb, b) in &pairs {
            let from_a = index.query(a, 0.94, 10, &budget).unwrap();
            assert!(from_a.hits.iter().any(|(h, _)| h == idb));
            let from_b = index.query(b, 0.94, 10, &budget).unwrap();
            assert!(from_b.hits.iter().any(|(h, _)| h == ida));
        }
    }

    #[test]
    fn test_budget_truncates() {
        let mut index = LshIndex::new(2, LshConfig::default().with_tables(4).with_bits(2));
        for n in 0..50 {
            index.insert(id(n), vec![1.0, 0.01 * n as f32]).unwrap();
        }

        let budget = QueryBudget {
            max_buckets: 1,
            ..QueryBudget::default()
        };
        let result = index.query(&[1.0, 0.0], 0.0, 100, &budget).unwrap();
        assert!(result.truncated);
        assert_eq!(result.buckets_probed, 1);

        let budget = QueryBudget {
            max_candidates: 5,
            ..QueryBudget::default()
        };
        let result = index.query(&[1.0, 0.0], 0.0, 100, &budget).unwrap();
        assert!(result.truncated);
        assert!(result.hits.len() <= 5);
    }

    #[test]
    fn test_repeat_candidates_do_not_spend_budget() {
        let mut index = LshIndex::new(2, LshConfig::default().with_tables(4).with_bits(2));
        for n in 0..5 {
            index.insert(id(n), vec![1.0, 0.0]).unwrap();
        }

        // every table puts all five handles in one bucket
        let budget = QueryBudget {
            max_candidates: 5,
            ..QueryBudget::default()
        };
        let result = index.query(&[1.0, 0.0], 0.5, 10, &budget).unwrap();
        assert!(!result.truncated);
        assert_eq!(result.candidates_examined, 5);
        assert_eq!(result.hits.len(), 5);
    }

    #[test]
    fn test_clone_shares_embeddings() {
        let mut index = LshIndex::new(3, LshConfig::default());
        index.insert(id(1), vec![1.0, 0.0, 0.0]).unwrap();
        let copy = index.clone();
        let a = index.embedding(id(1)).unwrap();
        let b = copy.embedding(id(1)).unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_same_seed_same_planes() {
        let a = LshIndex::new(16, LshConfig::default());
        let b = LshIndex::new(16, LshConfig::default());
        assert_eq!(a.planes, b.planes);

        let c = LshIndex::new(16, LshConfig::default().with_seed(99));
        assert_ne!(a.planes, c.planes);
    }

    #[test]
    fn test_config_validate() {
        assert!(LshConfig::default().validate().is_ok());
        assert!(LshConfig::default().with_bits(0).validate().is_err());
        assert!(LshConfig::default().with_tables(0).validate().is_err());
        assert_eq!(LshConfig::for_dimension(1536).bits, 14);
    }
}
