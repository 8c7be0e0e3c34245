//! SQLite implementation of the GraphStore
//!
//! Every merge is one `INSERT ... ON CONFLICT DO UPDATE ... RETURNING`
//! statement, so concurrent writers never lose an increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::domain::knowledge::{
    CanonicalEntity, Document, DocumentMention, EntityContext, EntityKind, GraphStats, GraphStore,
    KeyCandidate, NormalizedKey, RelatedEntity, RelationType, Relationship, pair_key,
    resolution_key,
};
use crate::error::{Error, Result};

const ENTITY_COLUMNS: &str = "key, kind, display_name, mention_count, created_at, updated_at";

const RELATIONSHIP_COLUMNS: &str =
    "from_key, to_key, relation_type, strength, source_document, created_at, updated_at";

/// SQLite implementation of the graph store
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Create a new SQLite graph store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    // ========== Merge Operations ==========

    async fn upsert_document(&self, document: &Document) -> Result<Document> {
        let row: DocumentRow = sqlx::query_as(
            r#"
            INSERT INTO documents (uri, title, content_length, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(uri) DO UPDATE SET
                title = excluded.title,
                content_length = excluded.content_length,
                updated_at = excluded.updated_at
            RETURNING uri, title, content_length, created_at, updated_at
            "#,
        )
        .bind(&document.uri)
        .bind(&document.title)
        .bind(document.content_length as i64)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        debug!(uri = %document.uri, "Document saved");
        Ok(row.into_document())
    }

    async fn upsert_entity(
        &self,
        key: &NormalizedKey,
        kind: EntityKind,
        display_name: &str,
    ) -> Result<CanonicalEntity> {
        let now = Utc::now().to_rfc3339();
        let row: EntityRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO canonical_entities ({ENTITY_COLUMNS})
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                mention_count = mention_count + 1,
                updated_at = excluded.updated_at
            RETURNING {ENTITY_COLUMNS}
            "#
        ))
        .bind(key.as_str())
        .bind(kind.as_str())
        .bind(display_name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        row.into_entity()
    }

    async fn upsert_relationship(
        &self,
        from: &NormalizedKey,
        to: &NormalizedKey,
        relation_type: &RelationType,
        source_document: &str,
    ) -> Result<Relationship> {
        if from == to {
            return Err(Error::InvalidInput(format!("self-relationship on '{}'", from)));
        }

        let now = Utc::now().to_rfc3339();
        let row: RelationshipRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO relationships (
                from_key, to_key, pair_key, relation_type, strength,
                source_document, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(pair_key, relation_type) DO UPDATE SET
                strength = strength + 1,
                source_document = excluded.source_document,
                updated_at = excluded.updated_at
            RETURNING {RELATIONSHIP_COLUMNS}
            "#
        ))
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(pair_key(from, to))
        .bind(relation_type.as_str())
        .bind(source_document)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        row.into_relationship()
    }

    async fn link_mention(
        &self,
        key: &NormalizedKey,
        document_uri: &str,
        sentence: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO entity_mentions (entity_key, document_uri, sentence, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entity_key, document_uri) DO UPDATE SET
                sentence = excluded.sentence,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.as_str())
        .bind(document_uri)
        .bind(sentence)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========== Lookups ==========

    async fn keys_by_kind(&self, kind: EntityKind) -> Result<Vec<KeyCandidate>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT key, mention_count FROM canonical_entities WHERE kind = ? ORDER BY key",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, count)| {
                NormalizedKey::from_normalized(key).map(|key| KeyCandidate {
                    key,
                    kind,
                    mention_count: count.max(0) as u64,
                })
            })
            .collect())
    }

    async fn get_entity(&self, key: &NormalizedKey) -> Result<Option<CanonicalEntity>> {
        let row: Option<EntityRow> = sqlx::query_as(&format!(
            "SELECT {ENTITY_COLUMNS} FROM canonical_entities WHERE key = ?"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_entity()).transpose()
    }

    async fn get_document(&self, uri: &str) -> Result<Option<Document>> {
        let row: Option<DocumentRow> = sqlx::query_as(
            r#"
            SELECT uri, title, content_length, created_at, updated_at
            FROM documents WHERE uri = ?
            "#,
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_document()))
    }

    async fn get_relationship_between(
        &self,
        a: &NormalizedKey,
        b: &NormalizedKey,
        relation_type: &RelationType,
    ) -> Result<Option<Relationship>> {
        let row: Option<RelationshipRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RELATIONSHIP_COLUMNS} FROM relationships
            WHERE pair_key = ? AND relation_type = ?
            "#
        ))
        .bind(pair_key(a, b))
        .bind(relation_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_relationship()).transpose()
    }

    // ========== Queries ==========

    async fn search_entities(
        &self,
        query: &str,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<CanonicalEntity>> {
        let display_pattern = format!("%{}%", query.trim());
        let key_pattern = format!("%{}%", resolution_key(query));
        let kind = kind.map(|k| k.as_str());

        let rows: Vec<EntityRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ENTITY_COLUMNS} FROM canonical_entities
            WHERE (display_name LIKE ? OR key LIKE ?)
              AND (? IS NULL OR kind = ?)
            ORDER BY mention_count DESC, key
            LIMIT ?
            "#
        ))
        .bind(&display_pattern)
        .bind(&key_pattern)
        .bind(kind)
        .bind(kind)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    async fn find_relationships(
        &self,
        a: &NormalizedKey,
        b: Option<&NormalizedKey>,
        relation_type: Option<&RelationType>,
    ) -> Result<Vec<Relationship>> {
        let b = b.map(|k| k.as_str());
        let relation_type = relation_type.map(|t| t.as_str().to_string());

        let rows: Vec<RelationshipRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RELATIONSHIP_COLUMNS} FROM relationships
            WHERE (from_key = ? OR to_key = ?)
              AND (? IS NULL OR from_key = ? OR to_key = ?)
              AND (? IS NULL OR relation_type = ?)
            ORDER BY strength DESC, pair_key
            "#
        ))
        .bind(a.as_str())
        .bind(a.as_str())
        .bind(b)
        .bind(b)
        .bind(b)
        .bind(relation_type.as_deref())
        .bind(relation_type.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    async fn entity_context(
        &self,
        key: &NormalizedKey,
        relationship_limit: usize,
        document_limit: usize,
    ) -> Result<Option<EntityContext>> {
        let Some(entity) = self.get_entity(key).await? else {
            return Ok(None);
        };

        let related_rows: Vec<RelatedRow> = sqlx::query_as(
            r#"
            SELECT e.key, e.kind, e.display_name, e.mention_count, e.created_at, e.updated_at,
                   r.relation_type, r.strength
            FROM relationships r
            JOIN canonical_entities e
              ON e.key = CASE WHEN r.from_key = ? THEN r.to_key ELSE r.from_key END
            WHERE r.from_key = ? OR r.to_key = ?
            ORDER BY r.strength DESC, e.key
            LIMIT ?
            "#,
        )
        .bind(key.as_str())
        .bind(key.as_str())
        .bind(key.as_str())
        .bind(relationship_limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let document_rows: Vec<MentionRow> = sqlx::query_as(
            r#"
            SELECT d.uri, d.title, d.content_length, d.created_at, d.updated_at, m.sentence
            FROM entity_mentions m
            JOIN documents d ON d.uri = m.document_uri
            WHERE m.entity_key = ?
            ORDER BY m.updated_at DESC, d.uri
            LIMIT ?
            "#,
        )
        .bind(key.as_str())
        .bind(document_limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let related = related_rows
            .into_iter()
            .map(|r| r.into_related())
            .collect::<Result<Vec<_>>>()?;

        let documents = document_rows
            .into_iter()
            .map(|r| DocumentMention {
                document: r.document.into_document(),
                sentence: r.sentence,
            })
            .collect();

        Ok(Some(EntityContext {
            entity,
            related,
            documents,
        }))
    }

    async fn search_documents(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
        let pattern = format!("%{}%", query.trim());
        let rows: Vec<DocumentRow> = sqlx::query_as(
            r#"
            SELECT uri, title, content_length, created_at, updated_at FROM documents
            WHERE title LIKE ? OR uri LIKE ?
            ORDER BY updated_at DESC, uri
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_document()).collect())
    }

    // ========== Maintenance ==========

    async fn get_stats(&self) -> Result<GraphStats> {
        let (total_entities,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM canonical_entities")
            .fetch_one(&self.pool)
            .await?;

        let (total_documents,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let (total_relationships,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM relationships")
            .fetch_one(&self.pool)
            .await?;

        let (total_mention_links,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entity_mentions")
            .fetch_one(&self.pool)
            .await?;

        let (total_mentions,): (Option<i64>,) =
            sqlx::query_as("SELECT SUM(mention_count) FROM canonical_entities")
                .fetch_one(&self.pool)
                .await?;

        let entities_by_kind: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT kind, COUNT(*) FROM canonical_entities
            GROUP BY kind ORDER BY COUNT(*) DESC, kind
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let relationships_by_type: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT relation_type, COUNT(*) FROM relationships
            GROUP BY relation_type ORDER BY COUNT(*) DESC, relation_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(GraphStats {
            total_entities: total_entities as u64,
            total_documents: total_documents as u64,
            total_nodes: (total_entities + total_documents) as u64,
            total_relationships: total_relationships as u64,
            total_mention_links: total_mention_links as u64,
            total_mentions: total_mentions.unwrap_or(0) as u64,
            entities_by_kind: entities_by_kind
                .into_iter()
                .filter_map(|(k, c)| EntityKind::parse(&k).map(|kind| (kind, c as u64)))
                .collect(),
            relationships_by_type: relationships_by_type
                .into_iter()
                .map(|(t, c)| (RelationType::parse(&t), c as u64))
                .collect(),
        })
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["entity_mentions", "relationships", "canonical_entities", "documents"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("Graph reset");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

// ========== Database Row Types ==========

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn stored_key(key: String) -> Result<NormalizedKey> {
    NormalizedKey::from_normalized(key.clone())
        .ok_or_else(|| Error::Other(format!("Invalid stored key: '{}'", key)))
}

#[derive(Debug, FromRow)]
struct EntityRow {
    key: String,
    kind: String,
    display_name: String,
    mention_count: i64,
    created_at: String,
    updated_at: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<CanonicalEntity> {
        let kind = EntityKind::parse(&self.kind)
            .ok_or_else(|| Error::Other(format!("Invalid entity kind: {}", self.kind)))?;

        Ok(CanonicalEntity {
            key: stored_key(self.key)?,
            kind,
            display_name: self.display_name,
            mention_count: self.mention_count.max(0) as u64,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    from_key: String,
    to_key: String,
    relation_type: String,
    strength: i64,
    source_document: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RelationshipRow {
    fn into_relationship(self) -> Result<Relationship> {
        Ok(Relationship {
            from_key: stored_key(self.from_key)?,
            to_key: stored_key(self.to_key)?,
            relation_type: RelationType::parse(&self.relation_type),
            strength: self.strength.max(0) as u64,
            source_document: self.source_document,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    uri: String,
    title: String,
    content_length: i64,
    created_at: String,
    updated_at: String,
}

impl DocumentRow {
    fn into_document(self) -> Document {
        Document {
            uri: self.uri,
            title: self.title,
            content_length: self.content_length.max(0) as u64,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct RelatedRow {
    #[sqlx(flatten)]
    entity: EntityRow,
    relation_type: String,
    strength: i64,
}

impl RelatedRow {
    fn into_related(self) -> Result<RelatedEntity> {
        Ok(RelatedEntity {
            entity: self.entity.into_entity()?,
            relation_type: RelationType::parse(&self.relation_type),
            strength: self.strength.max(0) as u64,
        })
    }
}

#[derive(Debug, FromRow)]
struct MentionRow {
    #[sqlx(flatten)]
    document: DocumentRow,
    sentence: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteGraphStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        SqliteGraphStore::new(pool)
    }

    fn key(text: &str) -> NormalizedKey {
        NormalizedKey::new(text).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_entity_creates_then_increments() {
        let store = setup_test_db().await;

        let first = store
            .upsert_entity(&key("Bursa"), EntityKind::Location, "Bursa")
            .await
            .unwrap();
        assert_eq!(first.mention_count, 1);
        assert_eq!(first.display_name, "Bursa");

        // Kind and display name stay as first written
        let second = store
            .upsert_entity(&key("BURSA"), EntityKind::Organization, "BURSA")
            .await
            .unwrap();
        assert_eq!(second.mention_count, 2);
        assert_eq!(second.kind, EntityKind::Location);
        assert_eq!(second.display_name, "Bursa");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_upsert_relationship_is_undirected() {
        let store = setup_test_db().await;
        let a = key("Bursa Barosu");
        let b = key("Ahmet Yılmaz");
        store.upsert_entity(&a, EntityKind::Organization, "Bursa Barosu").await.unwrap();
        store.upsert_entity(&b, EntityKind::Person, "Ahmet Yılmaz").await.unwrap();

        let first = store
            .upsert_relationship(&a, &b, &RelationType::MentionedWith, "doc://1")
            .await
            .unwrap();
        assert_eq!(first.strength, 1);

        let second = store
            .upsert_relationship(&b, &a, &RelationType::MentionedWith, "doc://2")
            .await
            .unwrap();
        assert_eq!(second.strength, 2);
        assert_eq!(second.from_key, a);
        assert_eq!(second.source_document.as_deref(), Some("doc://2"));

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_relationships, 1);
    }

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let store = setup_test_db().await;
        let result = store
            .upsert_relationship(&key("a"), &key("b"), &RelationType::MentionedWith, "doc://1")
            .await;
        assert!(matches!(result, Err(Error::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_self_relationship_rejected() {
        let store = setup_test_db().await;
        let a = key("Bursa");
        store.upsert_entity(&a, EntityKind::Location, "Bursa").await.unwrap();

        let result = store
            .upsert_relationship(&a, &a, &RelationType::MentionedWith, "doc://1")
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_document_upsert_and_mention_link() {
        let store = setup_test_db().await;
        let doc = Document::new("doc://1", "Baro haberleri", 120);
        store.upsert_document(&doc).await.unwrap();
        store.upsert_document(&Document::new("doc://1", "Baro haberleri v2", 140)).await.unwrap();

        let stored = store.get_document("doc://1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Baro haberleri v2");
        assert_eq!(stored.content_length, 140);

        let bursa = key("Bursa");
        store.upsert_entity(&bursa, EntityKind::Location, "Bursa").await.unwrap();
        store.link_mention(&bursa, "doc://1", "Bursa'da toplandı.").await.unwrap();
        store.link_mention(&bursa, "doc://1", "Bursa'da yine toplandı.").await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_entities, 1);
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_mention_links, 1);
    }

    #[tokio::test]
    async fn test_keys_by_kind_and_search() {
        let store = setup_test_db().await;
        for _ in 0..2 {
            store
                .upsert_entity(&key("Ahmet Yılmaz"), EntityKind::Person, "Ahmet Yılmaz")
                .await
                .unwrap();
        }
        store.upsert_entity(&key("Ayşe Demir"), EntityKind::Person, "Ayşe Demir").await.unwrap();
        store.upsert_entity(&key("Ankara"), EntityKind::Location, "Ankara").await.unwrap();

        let people = store.keys_by_kind(EntityKind::Person).await.unwrap();
        assert_eq!(people.len(), 2);
        assert!(people.iter().all(|c| c.kind == EntityKind::Person));

        // Folded query matches through the key
        let found = store.search_entities("YILMAZ", None, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mention_count, 2);

        let locations = store.search_entities("a", Some(EntityKind::Location), 10).await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].key, key("Ankara"));
    }

    #[tokio::test]
    async fn test_entity_context_and_find_relationships() {
        let store = setup_test_db().await;
        let baro = key("Bursa Barosu");
        let ahmet = key("Ahmet Yılmaz");
        let bursa = key("Bursa");
        store.upsert_document(&Document::new("doc://1", "", 10)).await.unwrap();
        for (k, kind, name) in [
            (&baro, EntityKind::Organization, "Bursa Barosu"),
            (&ahmet, EntityKind::Person, "Ahmet Yılmaz"),
            (&bursa, EntityKind::Location, "Bursa"),
        ] {
            store.upsert_entity(k, kind, name).await.unwrap();
            store.link_mention(k, "doc://1", "cümle").await.unwrap();
        }
        let mentioned_with = RelationType::MentionedWith;
        for (from, to) in [(&baro, &ahmet), (&baro, &ahmet), (&bursa, &baro)] {
            store
                .upsert_relationship(from, to, &mentioned_with, "doc://1")
                .await
                .unwrap();
        }

        let context = store.entity_context(&baro, 10, 5).await.unwrap().unwrap();
        assert_eq!(context.related.len(), 2);
        assert_eq!(context.related[0].entity.key, ahmet);
        assert_eq!(context.related[0].strength, 2);
        assert_eq!(context.documents.len(), 1);
        assert_eq!(context.documents[0].sentence, "cümle");

        let between = store.find_relationships(&ahmet, Some(&baro), None).await.unwrap();
        assert_eq!(between.len(), 1);

        let typed = store
            .find_relationships(&baro, None, Some(&RelationType::Custom("works_for".into())))
            .await
            .unwrap();
        assert!(typed.is_empty());

        assert!(store.entity_context(&key("yok"), 10, 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = setup_test_db().await;
        store.upsert_document(&Document::new("doc://1", "Belge", 10)).await.unwrap();
        store.upsert_entity(&key("Bursa"), EntityKind::Location, "Bursa").await.unwrap();

        store.reset().await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.total_mentions, 0);
        assert!(store.search_documents("Belge", 10).await.unwrap().is_empty());
    }
}
