//! Ingestion pipeline
//!
//! Turns free text into gated fact writes: extract fact tuples, drop the
//! low-confidence ones, embed what remains and submit each through the actor.

use crate::actor::MemoryHandle;
use crate::collaborators::{ExtractedFact, FactExtractor};
use crate::embeddings::EmbeddingProvider;
use crate::types::{FactWrite, IngestConfig, WriteOutcome};
use engram_core::{Domain, Error, Result, Scope};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome for one extracted fact
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedFact {
    pub fact: ExtractedFact,
    pub outcome: WriteOutcome,

    /// False when the embedding provider failed for this fact
    pub embedded: bool,
}

pub struct Ingestor {
    extractor: Arc<dyn FactExtractor>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    handle: MemoryHandle,
    config: IngestConfig,
    token: Option<String>,
}

impl Ingestor {
    pub fn new(
        extractor: Arc<dyn FactExtractor>,
        handle: MemoryHandle,
        config: IngestConfig,
    ) -> Self {
        Self {
            extractor,
            embedder: None,
            handle,
            config,
            token: None,
        }
    }

    /// Embed facts before writing; the provider must match the engine's
    /// dimension
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let expected = self.handle.snapshot().config().dimension;
        if embedder.dimensions() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                got: embedder.dimensions(),
            });
        }
        info!(
            "Ingestor using embedding model {} ({} dimensions)",
            embedder.model_name(),
            expected
        );
        self.embedder = Some(embedder);
        Ok(self)
    }

    /// Token attached to every write
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Extract and write facts from `text` into `scope`, or the configured
    /// default scope
    pub async fn ingest(&self, text: &str, scope: Option<Scope>) -> Result<Vec<IngestedFact>> {
        let scope = scope.unwrap_or(self.config.default_scope);
        let facts = self.extractor.extract(text).await?;
        let extracted = facts.len();

        let mut results = Vec::new();
        for fact in facts {
            if fact.confidence < self.config.min_confidence {
                debug!(
                    "Skipping fact '{}' at confidence {:.2}",
                    fact.label, fact.confidence
                );
                continue;
            }

            let mut write = FactWrite::new(fact.label.clone(), fact.value.clone(), scope)
                .with_domain(Domain::infer(&fact.label))
                .with_salience(fact.importance);
            if let Some(token) = &self.token {
                write = write.with_token(token.clone());
            }

            let embedding = self.embed(&fact).await;
            let embedded = embedding.is_some();
            if let Some(embedding) = embedding {
                write = write.with_embedding(embedding);
            }

            let outcome = self.handle.write_fact(write).await?;
            debug!("Fact '{}' -> {}", fact.label, outcome.name());
            results.push(IngestedFact {
                fact,
                outcome,
                embedded,
            });
        }

        info!(
            "Ingested {} of {} extracted facts via {}",
            results.len(),
            extracted,
            self.extractor.name()
        );
        Ok(results)
    }

    async fn embed(&self, fact: &ExtractedFact) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder
            .embed(&format!("{}: {}", fact.label, fact.value))
            .await
        {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                warn!(
                    "Embedding failed for '{}', falling back to exact-key dedup: {}",
                    fact.label, err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorConfig, MemoryActor};
    use crate::collaborators::{KeywordClassifier, PatternFactExtractor, StaticTokenAuthorizer};
    use crate::embeddings::MockEmbeddingProvider;
    use crate::engine::MemoryGraph;
    use crate::gate::WriteGate;
    use crate::types::{EngineConfig, GateConfig};
    use engram_core::ManualClock;

    const TOKEN: &str = "owner-token";

    fn handle() -> MemoryHandle {
        let graph =
            MemoryGraph::with_clock(EngineConfig::for_testing(), Arc::new(ManualClock::new(0)))
                .unwrap();
        let gate = WriteGate::new(
            Arc::new(KeywordClassifier::default()),
            Arc::new(StaticTokenAuthorizer::new([TOKEN])),
            GateConfig::default(),
        );
        MemoryActor::spawn(graph, gate, ActorConfig::default()).0
    }

    fn ingestor(handle: MemoryHandle) -> Ingestor {
        Ingestor::new(
            Arc::new(PatternFactExtractor::new()),
            handle,
            IngestConfig::default(),
        )
        .with_token(TOKEN)
    }

    #[tokio::test]
    async fn test_ingest_then_update() {
        let handle = handle();
        let ingestor = ingestor(handle.clone())
            .with_embedder(Arc::new(MockEmbeddingProvider::new(16)))
            .unwrap();

        let first = ingestor.ingest("My name is Marcus.", None).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].embedded);
        assert!(matches!(first[0].outcome, WriteOutcome::Created(_)));

        let again = ingestor.ingest("my name is Marcus", None).await.unwrap();
        assert!(matches!(again[0].outcome, WriteOutcome::Duplicate(_)));

        let changed = ingestor.ingest("My name is Alex", None).await.unwrap();
        assert!(matches!(changed[0].outcome, WriteOutcome::Updated { .. }));

        let snapshot = handle.snapshot();
        let head = snapshot.lookup_key("name", None).unwrap().head;
        assert_eq!(snapshot.node(head).unwrap().value, "Alex");
    }

    #[tokio::test]
    async fn test_low_confidence_skipped() {
        let handle = handle();
        let config = IngestConfig {
            min_confidence: 0.8,
            ..IngestConfig::default()
        };
        let ingestor = Ingestor::new(Arc::new(PatternFactExtractor::new()), handle.clone(), config)
            .with_token(TOKEN);

        let results = ingestor
            .ingest("I like tea. My city is Oslo.", None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fact.label, "city");
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back() {
        let handle = handle();
        let ingestor = ingestor(handle.clone())
            .with_embedder(Arc::new(MockEmbeddingProvider::unavailable(16)))
            .unwrap();

        let results = ingestor.ingest("My city is Oslo", None).await.unwrap();
        assert!(!results[0].embedded);
        assert!(matches!(results[0].outcome, WriteOutcome::Created(_)));
        assert_eq!(handle.stats().indexed_embeddings, 0);
        assert_eq!(handle.stats().indexed_keys, 1);
    }

    #[tokio::test]
    async fn test_embedder_dimension_checked() {
        let result = ingestor(handle()).with_embedder(Arc::new(MockEmbeddingProvider::new(8)));
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 16, got: 8 })
        ));
    }

    #[tokio::test]
    async fn test_session_scope_without_token() {
        let handle = handle();
        let session = handle.start_session().await.unwrap();
        let ingestor = Ingestor::new(
            Arc::new(PatternFactExtractor::new()),
            handle.clone(),
            IngestConfig::default(),
        );

        let shared = ingestor.ingest("My city is Oslo", None).await.unwrap();
        assert_eq!(shared[0].outcome, WriteOutcome::NeedsAuth);

        let local = ingestor
            .ingest("My city is Oslo", Some(Scope::Session(session)))
            .await
            .unwrap();
        assert!(matches!(local[0].outcome, WriteOutcome::Created(_)));
    }
}
