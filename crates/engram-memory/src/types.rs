//! Engine configuration and write/read types

use crate::bloom::BloomConfig;
use crate::key_index::KeyIndexConfig;
use crate::vector_index::LshConfig;
use engram_core::{Domain, EdgeId, EdgeType, Error, NodeId, NodeKind, Result, Scope};
use engram_graph::{DecayConfig, TierConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bounds on the work one retrieval may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryBudget {
    /// LSH buckets examined, across all tables
    pub max_buckets: usize,

    /// Distinct candidates collected before exact verification
    pub max_candidates: usize,

    /// Edge hops followed from primary hits
    pub max_hops: usize,

    /// Nodes added by multi-hop expansion
    pub max_expanded: usize,
}

impl Default for QueryBudget {
    fn default() -> Self {
        Self {
            max_buckets: 256,
            max_candidates: 2048,
            max_hops: 2,
            max_expanded: 32,
        }
    }
}

/// Retrieval ranking parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankConfig {
    pub min_similarity: f32,
    pub top_k: usize,

    /// Score multiplier for nodes owned by the caller's scope
    pub current_scope_boost: f32,

    /// Step size of the momentum update `m += alpha * (1 - m)`
    pub momentum_alpha: f32,

    /// Linear momentum decay per elapsed second
    pub momentum_decay_per_sec: f32,

    /// Coherence at which a scope switch is suggested
    pub switch_coherence: f32,

    pub budget: QueryBudget,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.3,
            top_k: 10,
            current_scope_boost: 1.2,
            momentum_alpha: 0.3,
            momentum_decay_per_sec: 0.01,
            switch_coherence: 0.6,
            budget: QueryBudget::default(),
        }
    }
}

/// Write gate parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Classifier confidence above which a write is blocked
    pub attack_confidence_threshold: f32,

    /// Cosine at or above which two facts are the same fact
    pub dedup_similarity: f32,

    /// Near-duplicates considered per write
    pub dedup_candidates: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            attack_confidence_threshold: 0.8,
            dedup_similarity: 0.95,
            dedup_candidates: 8,
        }
    }
}

/// Ingestion pipeline parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Extracted facts below this confidence are dropped
    pub min_confidence: f32,

    /// Scope extracted facts are written to when no session is given
    pub default_scope: Scope,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            default_scope: Scope::Consolidated,
        }
    }
}

/// Configuration for a memory engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Embedding dimension
    pub dimension: usize,

    pub bloom: BloomConfig,
    pub key_index: KeyIndexConfig,
    pub lsh: LshConfig,
    pub tiers: TierConfig,
    pub decay: DecayConfig,
    pub rank: RankConfig,
    pub gate: GateConfig,
    pub ingest: IngestConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let dimension = 384;
        Self {
            dimension,
            bloom: BloomConfig::default(),
            key_index: KeyIndexConfig::default(),
            lsh: LshConfig::for_dimension(dimension),
            tiers: TierConfig::default(),
            decay: DecayConfig::default(),
            rank: RankConfig::default(),
            gate: GateConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create configuration optimized for development/testing
    ///
    /// Small dimension and indices, periodic maintenance off.
    pub fn for_testing() -> Self {
        let dimension = 16;
        Self {
            dimension,
            bloom: BloomConfig::new(1024, 0.01),
            key_index: KeyIndexConfig::new(256, 8),
            lsh: LshConfig::for_dimension(dimension),
            tiers: TierConfig::default().with_session_slots(4),
            decay: DecayConfig::default().with_cadence_writes(0),
            ..Self::default()
        }
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Set the embedding dimension and the matching LSH preset
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        let seed = self.lsh.seed;
        self.dimension = dimension;
        self.lsh = LshConfig::for_dimension(dimension).with_seed(seed);
        self
    }

    pub fn with_bloom(mut self, bloom: BloomConfig) -> Self {
        self.bloom = bloom;
        self
    }

    pub fn with_key_index(mut self, key_index: KeyIndexConfig) -> Self {
        self.key_index = key_index;
        self
    }

    pub fn with_lsh(mut self, lsh: LshConfig) -> Self {
        self.lsh = lsh;
        self
    }

    pub fn with_tiers(mut self, tiers: TierConfig) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_decay(mut self, decay: DecayConfig) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_rank(mut self, rank: RankConfig) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Configuration("dimension must be at least 1".into()));
        }
        self.tiers.validate()?;
        self.decay.validate()?;
        self.lsh.validate()?;

        if !(0.0..=1.0).contains(&self.bloom.false_positive_rate)
            || self.bloom.false_positive_rate == 0.0
        {
            return Err(Error::Configuration(format!(
                "bloom.false_positive_rate must be within (0, 1], got {}",
                self.bloom.false_positive_rate
            )));
        }
        if self.key_index.buckets == 0 {
            return Err(Error::Configuration("key_index.buckets must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.gate.dedup_similarity) {
            return Err(Error::Configuration(format!(
                "gate.dedup_similarity must be within [0, 1], got {}",
                self.gate.dedup_similarity
            )));
        }
        if !(0.0..=1.0).contains(&self.rank.momentum_alpha) {
            return Err(Error::Configuration(format!(
                "rank.momentum_alpha must be within [0, 1], got {}",
                self.rank.momentum_alpha
            )));
        }
        if self.rank.current_scope_boost <= 0.0 {
            return Err(Error::Configuration(
                "rank.current_scope_boost must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ========== Writes ==========

/// A fact submitted to the write gate
#[derive(Debug, Clone, PartialEq)]
pub struct FactWrite {
    pub key: String,
    pub value: String,
    pub kind: NodeKind,

    /// Inferred from the key and value when not given
    pub domain: Option<Domain>,

    /// Absent when the embedding provider failed
    pub embedding: Option<Vec<f32>>,

    pub salience: f32,
    pub scope: Scope,

    /// Authorization token, required for Identity and Consolidated targets
    pub token: Option<String>,
}

impl FactWrite {
    pub fn new(key: impl Into<String>, value: impl Into<String>, scope: Scope) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: NodeKind::Fact,
            domain: None,
            embedding: None,
            salience: 1.0,
            scope,
            token: None,
        }
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_salience(mut self, salience: f32) -> Self {
        self.salience = salience.clamp(0.0, 1.0);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Text submitted to the adversarial classifier
    pub fn classifier_text(&self) -> String {
        format!("{}: {}", self.key, self.value)
    }

    /// Explicit domain, or the one inferred from key and value
    pub fn resolved_domain(&self) -> Domain {
        self.domain
            .unwrap_or_else(|| Domain::infer(&format!("{} {}", self.key, self.value)))
    }
}

/// An edge submitted to the write gate
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeWrite {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    pub weight: f32,
    pub scope: Scope,
    pub token: Option<String>,
}

impl EdgeWrite {
    pub fn new(
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        weight: f32,
        scope: Scope,
    ) -> Self {
        Self {
            source,
            target,
            edge_type,
            weight,
            scope,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Outcome of a fact write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// A new node was created
    Created(NodeId),

    /// A new version was created; `superseded` lists the nodes it replaced
    Updated {
        node: NodeId,
        superseded: Vec<NodeId>,
    },

    /// Same fact already stored; only access metadata changed
    Duplicate(NodeId),

    /// Rejected by the adversarial classifier
    Blocked { attack_kind: String, confidence: f32 },

    /// A valid authorization token is required
    NeedsAuth,
}

impl WriteOutcome {
    /// Node written or matched, if any
    pub fn node(&self) -> Option<NodeId> {
        match self {
            WriteOutcome::Created(id) | WriteOutcome::Duplicate(id) => Some(*id),
            WriteOutcome::Updated { node, .. } => Some(*node),
            WriteOutcome::Blocked { .. } | WriteOutcome::NeedsAuth => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WriteOutcome::Created(_) => "created",
            WriteOutcome::Updated { .. } => "updated",
            WriteOutcome::Duplicate(_) => "duplicate",
            WriteOutcome::Blocked { .. } => "blocked",
            WriteOutcome::NeedsAuth => "needs_auth",
        }
    }
}

/// Outcome of an edge write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    Created(EdgeId),

    /// Same triple already present in the scope; weights were averaged
    Duplicate(EdgeId),

    NeedsAuth,
}

impl EdgeOutcome {
    pub fn edge(&self) -> Option<EdgeId> {
        match self {
            EdgeOutcome::Created(id) | EdgeOutcome::Duplicate(id) => Some(*id),
            EdgeOutcome::NeedsAuth => None,
        }
    }
}

// ========== Statistics ==========

/// Running counters kept by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCounters {
    pub created: u64,
    pub updated: u64,
    pub duplicates: u64,
    pub blocked: u64,
    pub needs_auth: u64,
    pub edges_created: u64,
    pub edges_merged: u64,
    pub index_inconsistencies: u64,
    pub maintenance_runs: u64,
    pub pruned_edges: u64,
    pub tombstoned_nodes: u64,
    pub consolidations: u64,
    pub evictions: u64,
}

/// Point-in-time statistics of a memory engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub active_nodes: usize,
    pub edges: usize,
    pub identity_edges: usize,
    pub consolidated_edges: usize,
    pub session_edges: usize,
    pub resident_sessions: usize,
    pub indexed_keys: usize,
    pub indexed_embeddings: usize,
    pub bloom_fp_estimate: f64,
    pub key_index_depth_warnings: usize,

    /// Snapshots are not reaching durable storage
    pub degraded: bool,

    pub counters: WriteCounters,
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_graph::TierLimits;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_with_dimension_sets_lsh_preset() {
        let config = EngineConfig::default().with_dimension(1536);
        assert_eq!(config.dimension, 1536);
        assert_eq!(config.lsh, LshConfig::for_dimension(1536));
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let config = EngineConfig::default()
            .with_tiers(TierConfig::default().with_consolidated_limits(TierLimits::new(10, 5, 2)));
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = EngineConfig::default().with_tiers(TierConfig::default().with_session_slots(0));
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let content = r#"
dimension = 64

[gate]
dedup_similarity = 0.9

[tiers]
session_slots = 2
"#;
        let config = EngineConfig::from_toml_str(content).unwrap();
        assert_eq!(config.dimension, 64);
        assert_eq!(config.gate.dedup_similarity, 0.9);
        assert_eq!(config.gate.attack_confidence_threshold, 0.8);
        assert_eq!(config.tiers.session_slots, 2);
        assert_eq!(config.rank, RankConfig::default());
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(EngineConfig::from_toml_str("dimension = \"wide\"").is_err());
        assert!(EngineConfig::from_toml_str("[lsh]\nbits = 40").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engram.toml");
        std::fs::write(&path, "[rank]\ntop_k = 3\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.rank.top_k, 3);
        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_fact_write_domain() {
        let fact = FactWrite::new("api_password", "hunter2", Scope::Consolidated);
        assert_eq!(fact.resolved_domain(), Domain::Credentials);

        let fact = fact.with_domain(Domain::Work);
        assert_eq!(fact.resolved_domain(), Domain::Work);
        assert_eq!(fact.classifier_text(), "api_password: hunter2");
    }
}
