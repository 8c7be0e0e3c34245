//! Graph store trait
//!
//! This module defines the persistence seam of the knowledge graph. Every
//! write is a merge: creating a missing node or edge, or incrementing the
//! counters of an existing one, in a single store call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::document::Document;
use super::entity::{CanonicalEntity, EntityKind};
use super::normalizer::NormalizedKey;
use super::relationship::{RelationType, Relationship};
use super::resolver::KeyCandidate;

/// Graph store used by the upsert engine and the query side
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ========== Merge Operations ==========

    /// Create or update a document node by URI
    async fn upsert_document(&self, document: &Document) -> Result<Document>;

    /// Create the entity with `mention_count = 1`, or add one mention to it.
    ///
    /// Kind and display name are only written on creation.
    async fn upsert_entity(
        &self,
        key: &NormalizedKey,
        kind: EntityKind,
        display_name: &str,
    ) -> Result<CanonicalEntity>;

    /// Create the edge with `strength = 1`, or add one co-occurrence to it.
    ///
    /// Edges are matched on the unordered endpoint pair and type. Both
    /// endpoints must already exist.
    async fn upsert_relationship(
        &self,
        from: &NormalizedKey,
        to: &NormalizedKey,
        relation_type: &RelationType,
        source_document: &str,
    ) -> Result<Relationship>;

    /// Link an entity to a document, recording the sentence it appeared in
    async fn link_mention(
        &self,
        key: &NormalizedKey,
        document_uri: &str,
        sentence: &str,
    ) -> Result<()>;

    /// Whether the merge operations above are atomic under concurrency.
    ///
    /// Stores returning `false` get their writes serialized per key.
    fn supports_atomic_merge(&self) -> bool {
        true
    }

    // ========== Lookups ==========

    /// Existing keys of one kind, for fuzzy resolution
    async fn keys_by_kind(&self, kind: EntityKind) -> Result<Vec<KeyCandidate>>;

    async fn get_entity(&self, key: &NormalizedKey) -> Result<Option<CanonicalEntity>>;

    async fn get_document(&self, uri: &str) -> Result<Option<Document>>;

    /// The edge between two entities in either direction
    async fn get_relationship_between(
        &self,
        a: &NormalizedKey,
        b: &NormalizedKey,
        relation_type: &RelationType,
    ) -> Result<Option<Relationship>>;

    // ========== Queries ==========

    /// Entities whose name or key contains `query`, most mentioned first
    async fn search_entities(
        &self,
        query: &str,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<CanonicalEntity>>;

    /// Edges touching `a`, optionally restricted to those also touching `b`
    /// and to one type, strongest first
    async fn find_relationships(
        &self,
        a: &NormalizedKey,
        b: Option<&NormalizedKey>,
        relation_type: Option<&RelationType>,
    ) -> Result<Vec<Relationship>>;

    /// An entity with its strongest neighbours and the documents mentioning it
    async fn entity_context(
        &self,
        key: &NormalizedKey,
        relationship_limit: usize,
        document_limit: usize,
    ) -> Result<Option<EntityContext>>;

    /// Documents whose title or URI contains `query`
    async fn search_documents(&self, query: &str, limit: usize) -> Result<Vec<Document>>;

    // ========== Maintenance ==========

    async fn get_stats(&self) -> Result<GraphStats>;

    /// Delete every node and edge
    async fn reset(&self) -> Result<()>;

    /// Cheap liveness check
    async fn health_check(&self) -> Result<()>;
}

/// A neighbour reached through one relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity: CanonicalEntity,
    pub relation_type: RelationType,
    pub strength: u64,
}

/// A document mentioning an entity, with the recorded sentence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMention {
    pub document: Document,
    pub sentence: String,
}

/// Everything known about one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityContext {
    pub entity: CanonicalEntity,
    pub related: Vec<RelatedEntity>,
    pub documents: Vec<DocumentMention>,
}

/// Statistics about the knowledge graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    /// Canonical entities
    pub total_entities: u64,
    /// Document nodes
    pub total_documents: u64,
    /// Entities plus documents
    pub total_nodes: u64,
    /// Entity-to-entity edges
    pub total_relationships: u64,
    /// Entity-to-document mention edges
    pub total_mention_links: u64,
    /// Sum of all entity mention counts
    pub total_mentions: u64,
    pub entities_by_kind: Vec<(EntityKind, u64)>,
    pub relationships_by_type: Vec<(RelationType, u64)>,
}

impl GraphStats {
    pub fn count_of(&self, kind: EntityKind) -> u64 {
        self.entities_by_kind
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_of_missing_kind_is_zero() {
        let stats = GraphStats {
            entities_by_kind: vec![(EntityKind::Person, 3)],
            ..Default::default()
        };
        assert_eq!(stats.count_of(EntityKind::Person), 3);
        assert_eq!(stats.count_of(EntityKind::Date), 0);
    }
}
