//! Knowledge graph service
//!
//! Orchestrates the ingest pipeline (extract, resolve, merge) for single
//! documents and bounded-concurrency batches, and exposes the query side of
//! the graph by entity name.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::detector::{ModelDetector, SequenceLabeler};
use super::document::{Document, SourceDocument};
use super::entity::{CanonicalEntity, EntityKind};
use super::extractor::{ExtractionResult, Extractor};
use super::mention::ResolvedMention;
use super::normalizer::NormalizedKey;
use super::query::{QueryAnswer, QueryIntent};
use super::relationship::{RelationType, Relationship, RelationshipCandidate};
use super::repository::{EntityContext, GraphStats, GraphStore};
use super::resolver::{KeyCandidate, Resolver, ResolverConfig};
use super::upsert::{GraphUpsertEngine, IngestSummary, MergeOutcome, RetryPolicy};

/// Default number of documents ingested concurrently
pub const DEFAULT_WORKERS: usize = 4;

/// Neighbours returned by [`KnowledgeGraphService::context`]
pub const CONTEXT_RELATIONSHIP_LIMIT: usize = 10;

/// Documents returned by [`KnowledgeGraphService::context`]
pub const CONTEXT_DOCUMENT_LIMIT: usize = 5;

/// Knowledge graph service
///
/// Provides high-level operations for:
/// - Ingesting documents into the graph, one at a time or in batches
/// - Looking up entities, relationships and documents by name
pub struct KnowledgeGraphService<S: GraphStore> {
    store: Arc<S>,
    extractor: Extractor,
    resolver: Resolver,
    engine: GraphUpsertEngine<S>,
    workers: usize,
}

impl<S: GraphStore> KnowledgeGraphService<S> {
    /// Create a service with pattern extraction, exact resolution and default retries
    pub fn new(store: Arc<S>) -> Self {
        Self {
            engine: GraphUpsertEngine::new(Arc::clone(&store)),
            store,
            extractor: Extractor::pattern(),
            resolver: Resolver::default(),
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Use a sequence-labeling model for names, keeping pattern rules for dates and legal terms
    pub fn with_labeler(mut self, labeler: Arc<dyn SequenceLabeler>) -> Self {
        self.extractor = Extractor::new(Arc::new(ModelDetector::new(labeler)));
        self
    }

    pub fn with_resolver(mut self, config: ResolverConfig) -> Self {
        self.resolver = Resolver::new(config);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.engine = GraphUpsertEngine::new(Arc::clone(&self.store)).with_retry_policy(policy);
        self
    }

    /// Set the number of documents ingested concurrently by [`Self::ingest_batch`]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    // ========== Ingest ==========

    /// Extract, resolve and merge one document.
    ///
    /// Store failures do not make this return `Err`; they are reported in
    /// the summary's errors and outcome. `Err` means the input was unusable.
    pub async fn ingest_document(&self, source: &SourceDocument) -> Result<IngestSummary> {
        if source.uri.trim().is_empty() {
            return Err(Error::InvalidInput("document URI must not be empty".to_string()));
        }

        let extraction = self.extractor.extract(&source.raw_text);
        let (mentions, relationships) = self.resolve(&extraction).await;

        let document: Document = source.to_document();
        let mut summary = self.engine.merge(&document, &mentions, &relationships).await;
        summary.degraded_sentences = extraction.degraded.len();

        info!(
            uri = %source.uri,
            backend = %extraction.backend,
            sentences = extraction.processed_sentences,
            mentions = mentions.len(),
            relationships = relationships.len(),
            degraded = summary.degraded_sentences,
            outcome = %summary.outcome,
            "Document ingested"
        );

        Ok(summary)
    }

    /// Ingest documents with at most `workers` in flight.
    ///
    /// Results come back in input order. Documents sharing entities may be
    /// merged concurrently; the store's atomic merges (or the engine's
    /// per-key locks) keep counters exact.
    pub async fn ingest_batch(
        self: &Arc<Self>,
        documents: Vec<SourceDocument>,
    ) -> Vec<Result<IngestSummary>>
    where
        S: 'static,
    {
        let run_id = Uuid::new_v4();
        let total = documents.len();
        info!(%run_id, documents = total, workers = self.workers, "Starting batch ingest");

        let mut results: Vec<(usize, Result<IngestSummary>)> =
            stream::iter(documents.into_iter().enumerate())
                .map(|(index, document)| {
                    let service = Arc::clone(self);
                    async move {
                        let handle =
                            tokio::spawn(async move { service.ingest_document(&document).await });
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(Error::Other(format!("Ingest task failed: {}", e))),
                        };
                        (index, result)
                    }
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

        results.sort_by_key(|(index, _)| *index);

        let outcome_count = |outcome: MergeOutcome| {
            results
                .iter()
                .filter(|(_, r)| matches!(r, Ok(s) if s.outcome == outcome))
                .count()
        };
        info!(
            %run_id,
            documents = total,
            fully_merged = outcome_count(MergeOutcome::FullyMerged),
            partially_merged = outcome_count(MergeOutcome::PartiallyMerged),
            not_merged = outcome_count(MergeOutcome::NotMerged),
            rejected = results.iter().filter(|(_, r)| r.is_err()).count(),
            "Batch ingest finished"
        );

        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Map extracted mentions to canonical keys and rewrite relationship endpoints
    async fn resolve(
        &self,
        extraction: &ExtractionResult,
    ) -> (Vec<ResolvedMention>, Vec<RelationshipCandidate>) {
        let snapshot = if self.resolver.fuzzy_enabled() {
            self.candidate_snapshot(extraction).await
        } else {
            HashMap::new()
        };

        let mut key_map: HashMap<NormalizedKey, NormalizedKey> = HashMap::new();
        let mut seen: HashSet<(NormalizedKey, EntityKind)> = HashSet::new();
        let mut mentions = Vec::with_capacity(extraction.mentions.len());

        for mention in &extraction.mentions {
            let Some(exact) = self.resolver.resolve(mention) else {
                continue;
            };
            let candidates = snapshot.get(&mention.kind).map(Vec::as_slice).unwrap_or_default();
            let key = self
                .resolver
                .resolve_fuzzy(&exact, mention.kind, candidates)
                .unwrap_or_else(|| exact.clone());

            if key != exact {
                debug!(mention = %exact, canonical = %key, "Mention resolved to existing entity");
            }
            key_map.insert(exact, key.clone());

            if seen.insert((key.clone(), mention.kind)) {
                mentions.push(ResolvedMention::new(key, mention));
            }
        }

        let canonical =
            |key: &NormalizedKey| key_map.get(key).cloned().unwrap_or_else(|| key.clone());
        let mut seen_pairs = HashSet::new();
        let relationships = extraction
            .relationships
            .iter()
            .filter_map(|candidate| {
                let remapped = RelationshipCandidate {
                    from_key: canonical(&candidate.from_key),
                    to_key: canonical(&candidate.to_key),
                    relation_type: candidate.relation_type.clone(),
                    sentence_index: candidate.sentence_index,
                };
                let distinct = remapped.from_key != remapped.to_key;
                (distinct && seen_pairs.insert(remapped.identity())).then_some(remapped)
            })
            .collect();

        (mentions, relationships)
    }

    /// Existing keys per kind mentioned in this document
    async fn candidate_snapshot(
        &self,
        extraction: &ExtractionResult,
    ) -> HashMap<EntityKind, Vec<KeyCandidate>> {
        let kinds: HashSet<EntityKind> = extraction.mentions.iter().map(|m| m.kind).collect();
        let mut snapshot = HashMap::new();

        for kind in kinds {
            match self.store.keys_by_kind(kind).await {
                Ok(candidates) => {
                    snapshot.insert(kind, candidates);
                }
                Err(e) => {
                    warn!(
                        kind = %kind,
                        error = %e,
                        "Could not load fuzzy candidates, resolving exactly"
                    );
                }
            }
        }

        snapshot
    }

    // ========== Queries ==========

    pub async fn stats(&self) -> Result<GraphStats> {
        self.store.get_stats().await
    }

    /// Entities whose name contains `query`, most mentioned first
    pub async fn search(
        &self,
        query: &str,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<CanonicalEntity>> {
        self.store.search_entities(query, kind, limit).await
    }

    /// Look up one entity by any surface form of its name
    pub async fn entity(&self, name: &str) -> Result<Option<CanonicalEntity>> {
        let key = key_for(name)?;
        self.store.get_entity(&key).await
    }

    /// Relationships of `name`, optionally only those shared with `other`
    pub async fn relationships(
        &self,
        name: &str,
        other: Option<&str>,
        relation_type: Option<&RelationType>,
    ) -> Result<Vec<Relationship>> {
        let key = key_for(name)?;
        let other = other.map(key_for).transpose()?;
        self.store
            .find_relationships(&key, other.as_ref(), relation_type)
            .await
    }

    /// An entity with its strongest neighbours and the documents that mention it
    pub async fn context(&self, name: &str) -> Result<EntityContext> {
        let key = key_for(name)?;
        self.store
            .entity_context(&key, CONTEXT_RELATIONSHIP_LIMIT, CONTEXT_DOCUMENT_LIMIT)
            .await?
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))
    }

    pub async fn documents(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
        self.store.search_documents(query, limit).await
    }

    /// Answer a natural-language question with the lookup its cue words ask for
    pub async fn query(&self, question: &str, limit: usize) -> Result<QueryAnswer> {
        let intent = QueryIntent::parse(question);
        debug!(?intent, "Query routed");

        let answer = match intent {
            QueryIntent::Relationship { from, to } => {
                QueryAnswer::Relationship(self.relationships(&from, Some(&to), None).await?)
            }
            QueryIntent::EntityContext { name } => {
                QueryAnswer::EntityContext(self.context(&name).await?)
            }
            QueryIntent::Document { term } => {
                QueryAnswer::Document(self.documents(&term, limit).await?)
            }
            QueryIntent::Entity { query } => {
                QueryAnswer::Entity(self.search(&query, None, limit).await?)
            }
        };
        Ok(answer)
    }

    /// Delete the whole graph
    pub async fn reset(&self) -> Result<()> {
        warn!("Resetting knowledge graph");
        self.store.reset().await
    }
}

fn key_for(name: &str) -> Result<NormalizedKey> {
    NormalizedKey::new(name)
        .ok_or_else(|| Error::InvalidInput(format!("'{}' has no identifying text", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::knowledge::SqliteGraphStore;
    use crate::storage::Database;

    async fn setup_service() -> KnowledgeGraphService<SqliteGraphStore> {
        let db = Database::in_memory().await.expect("Failed to create database");
        KnowledgeGraphService::new(Arc::new(SqliteGraphStore::new(db.pool().clone())))
    }

    #[tokio::test]
    async fn test_ingest_rejects_empty_uri() {
        let service = setup_service().await;
        let result = service
            .ingest_document(&SourceDocument::new("  ", "", "Bursa Barosu toplandı."))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_ingest_merges_document() {
        let service = setup_service().await;
        let source = SourceDocument::new(
            "doc://bursa",
            "Baro",
            "Bursa Barosu adına Ahmet Yılmaz açıklama yaptı.",
        );

        let summary = service.ingest_document(&source).await.unwrap();
        assert_eq!(summary.outcome, MergeOutcome::FullyMerged);
        assert_eq!(summary.entities_upserted, 2);
        assert_eq!(summary.links_created, 2);
        assert_eq!(summary.relationships_upserted, 1);

        let baro = service.entity("BURSA BAROSU").await.unwrap().unwrap();
        assert_eq!(baro.kind, EntityKind::Organization);
        assert_eq!(baro.mention_count, 1);

        let context = service.context("Bursa Barosu").await.unwrap();
        assert_eq!(context.documents.len(), 1);
        assert_eq!(context.documents[0].document.uri, "doc://bursa");
    }

    #[tokio::test]
    async fn test_context_of_unknown_entity() {
        let service = setup_service().await;
        let result = service.context("Hiç Yok").await;
        assert!(matches!(result, Err(Error::EntityNotFound(_))));
    }

    #[tokio::test]
    async fn test_fuzzy_resolution_reuses_existing_key() {
        let service = setup_service().await.with_resolver(ResolverConfig {
            fuzzy_enabled: true,
            threshold: 85.0,
            ..Default::default()
        });

        service
            .ingest_document(&SourceDocument::new("doc://1", "", "Ahmet Yılmaz bugün konuştu."))
            .await
            .unwrap();
        service
            .ingest_document(&SourceDocument::new("doc://2", "", "Ahmet Yılmazz bugün konuştu."))
            .await
            .unwrap();

        let ahmet = service.entity("Ahmet Yılmaz").await.unwrap().unwrap();
        assert_eq!(ahmet.mention_count, 2);
        assert!(service.entity("Ahmet Yılmazz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_routes_by_cue_words() {
        let service = setup_service().await;
        service
            .ingest_document(&SourceDocument::new(
                "doc://bursa",
                "Baro açıklaması",
                "Bursa Barosu adına Ahmet Yılmaz açıklama yaptı.",
            ))
            .await
            .unwrap();

        let answer = service
            .query("Bursa Barosu ile Ahmet Yılmaz arasındaki ilişki", 10)
            .await
            .unwrap();
        match answer {
            QueryAnswer::Relationship(found) => assert_eq!(found.len(), 1),
            other => panic!("expected relationships, got {:?}", other),
        }

        let answer = service.query("Ahmet Yılmaz kimdir?", 10).await.unwrap();
        match answer {
            QueryAnswer::EntityContext(context) => {
                assert_eq!(context.entity.kind, EntityKind::Person);
                assert_eq!(context.related.len(), 1);
            }
            other => panic!("expected context, got {:?}", other),
        }

        let answer = service.query("Baro belgeleri", 10).await.unwrap();
        assert!(matches!(answer, QueryAnswer::Document(docs) if docs.len() == 1));

        let answer = service.query("yilmaz", 10).await.unwrap();
        assert!(matches!(answer, QueryAnswer::Entity(found) if found.len() == 1));
    }

    #[tokio::test]
    async fn test_batch_results_in_input_order() {
        let service = Arc::new(setup_service().await.with_workers(3));
        let documents = (0..6)
            .map(|i| {
                SourceDocument::new(
                    format!("doc://{}", i),
                    "",
                    "Bursa Barosu ile Ankara Barosu görüştü.",
                )
            })
            .chain(std::iter::once(SourceDocument::new("", "", "Bursa Barosu")))
            .collect();

        let results = service.ingest_batch(documents).await;
        assert_eq!(results.len(), 7);
        for (i, result) in results.iter().take(6).enumerate() {
            assert_eq!(result.as_ref().unwrap().uri, format!("doc://{}", i));
        }
        assert!(results[6].is_err());

        let baro = service.entity("Bursa Barosu").await.unwrap().unwrap();
        assert_eq!(baro.mention_count, 6);
    }
}
