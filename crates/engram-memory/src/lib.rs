//! EngramDB memory engine
//!
//! Sits on top of the tiered graph and turns it into a memory for agents:
//!
//! - **Dedup indices**: Bloom filter, exact-key map and LSH over head facts
//! - **Write gate**: classification, authorization and version supersession
//! - **Ranker**: similarity retrieval weighted by salience, scope and momentum,
//!   with domain isolation and multi-hop expansion
//! - **Actor**: a single writer task publishing immutable snapshots to readers
//! - **Persistence**: snapshot save/load with retry and degraded durability
//! - **Ingestion**: extractor and embedder collaborators feeding the gate

pub mod actor;
pub mod bloom;
pub mod collaborators;
pub mod dedup;
pub mod embeddings;
pub mod engine;
pub mod gate;
pub mod ingest;
pub mod key_index;
pub mod persistence;
pub mod ranker;
pub mod types;
pub mod vector_index;

pub use actor::{ActorConfig, MemoryActor, MemoryCommand, MemoryHandle};
pub use bloom::{BloomConfig, BloomFilter};
pub use collaborators::{
    AdversarialClassifier, AllowAllClassifier, Authorizer, Classification, DenyAllAuthorizer,
    ExtractedFact, FactExtractor, KeywordClassifier, PatternFactExtractor, StaticTokenAuthorizer,
};
pub use dedup::{DedupIndex, KeyProbe};
pub use embeddings::{EmbeddingError, EmbeddingProvider, MockEmbeddingProvider};
pub use engine::{KeyLookup, MemoryGraph};
pub use gate::{AdminCommand, AdminResult, WriteGate};
pub use ingest::{IngestedFact, Ingestor};
pub use key_index::{KeyIndex, KeyIndexConfig};
pub use persistence::{Persistence, SaveOutcome};
pub use ranker::{MomentumTable, RankRequest, RankedHit, RankedResults};
pub use types::{
    EdgeOutcome, EdgeWrite, EngineConfig, FactWrite, GateConfig, GraphStats, IngestConfig,
    QueryBudget, RankConfig, WriteCounters, WriteOutcome,
};
pub use vector_index::{LshConfig, LshIndex, LshQuery};
