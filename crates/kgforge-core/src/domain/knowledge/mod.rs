//! Knowledge graph construction
//!
//! Documents flow through four stages:
//!
//! ```text
//! SourceDocument → Extractor → Resolver → GraphUpsertEngine → GraphStore
//!                  (mentions,   (canonical  (idempotent merges,
//!                   co-occurrence keys)      retries, per-item errors)
//!                   candidates)
//! ```
//!
//! Identity is the [`NormalizedKey`]: every surface form that folds to the
//! same key is the same entity. Merging is additive: re-ingesting a document
//! increments mention counts and relationship strengths but never creates a
//! second node or edge.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kgforge_core::domain::knowledge::{KnowledgeGraphService, SourceDocument};
//! use kgforge_core::infrastructure::knowledge::SqliteGraphStore;
//!
//! let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));
//! let service = KnowledgeGraphService::new(store);
//!
//! let summary = service
//!     .ingest_document(&SourceDocument::new("doc://1", "Haber", text))
//!     .await?;
//! println!("{} entities, outcome {}", summary.entities_upserted, summary.outcome);
//! ```

mod detector;
mod document;
mod entity;
mod extractor;
mod mention;
mod normalizer;
mod query;
mod relationship;
mod repository;
mod resolver;
mod service;
mod upsert;

pub use detector::{
    DetectedSpan, LabeledSpan, MentionDetector, ModelDetector, PatternDetector, SequenceLabeler,
};
pub use document::{Document, SourceDocument};
pub use entity::{CanonicalEntity, EntityKind};
pub use extractor::{DEFAULT_MIN_SENTENCE_CHARS, Degradation, ExtractionResult, Extractor};
pub use mention::{Mention, ResolvedMention};
pub use normalizer::{NormalizedKey, normalize_display, resolution_key};
pub use query::{QueryAnswer, QueryIntent};
pub use relationship::{RelationType, Relationship, RelationshipCandidate, pair_key};
pub use repository::{DocumentMention, EntityContext, GraphStats, GraphStore, RelatedEntity};
pub use resolver::{
    DEFAULT_AMBIGUITY_MARGIN, DEFAULT_FUZZY_THRESHOLD, FuzzyOutcome, KeyCandidate, Resolver,
    ResolverConfig, SimilarityMetric, TieBreak,
};
pub use service::{
    CONTEXT_DOCUMENT_LIMIT, CONTEXT_RELATIONSHIP_LIMIT, DEFAULT_WORKERS, KnowledgeGraphService,
};
pub use upsert::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, GraphUpsertEngine,
    IngestItem, IngestSummary, ItemError, KeyedLocks, MAX_BACKOFF_BASE_MS, MergeOutcome,
    RetryPolicy,
};
