//! Database migrations
//!
//! This module manages the SQLite schema of the knowledge graph.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Entities, documents and co-occurrence edges
const MIGRATION_V1: &str = r#"
    -- Source documents
    CREATE TABLE IF NOT EXISTS documents (
        uri TEXT PRIMARY KEY NOT NULL CHECK (length(uri) > 0),
        title TEXT NOT NULL DEFAULT '',
        content_length INTEGER NOT NULL DEFAULT 0 CHECK (content_length >= 0),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_title ON documents(title);

    -- Canonical entities, one per normalized key
    CREATE TABLE IF NOT EXISTS canonical_entities (
        key TEXT PRIMARY KEY NOT NULL CHECK (length(key) > 0),
        kind TEXT NOT NULL CHECK (
            kind IN ('person', 'organization', 'location', 'date', 'legal_term', 'entity')
        ),
        display_name TEXT NOT NULL,
        mention_count INTEGER NOT NULL DEFAULT 1 CHECK (mention_count >= 0),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_canonical_entities_kind ON canonical_entities(kind);
    CREATE INDEX IF NOT EXISTS idx_canonical_entities_mentions
        ON canonical_entities(mention_count DESC);

    -- Undirected co-occurrence edges; pair_key is the sorted endpoint pair
    CREATE TABLE IF NOT EXISTS relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_key TEXT NOT NULL REFERENCES canonical_entities(key) ON DELETE CASCADE,
        to_key TEXT NOT NULL REFERENCES canonical_entities(key) ON DELETE CASCADE,
        pair_key TEXT NOT NULL,
        relation_type TEXT NOT NULL,
        strength INTEGER NOT NULL DEFAULT 1 CHECK (strength >= 1),
        source_document TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (from_key <> to_key),
        UNIQUE (pair_key, relation_type)
    );

    CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_key);
    CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_key);
    CREATE INDEX IF NOT EXISTS idx_relationships_strength ON relationships(strength DESC);
"#;

/// Migration 2: Entity-to-document mention links
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS entity_mentions (
        entity_key TEXT NOT NULL REFERENCES canonical_entities(key) ON DELETE CASCADE,
        document_uri TEXT NOT NULL REFERENCES documents(uri) ON DELETE CASCADE,
        sentence TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (entity_key, document_uri)
    );

    CREATE INDEX IF NOT EXISTS idx_entity_mentions_document ON entity_mentions(document_uri);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Entities, documents and relationships");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Entity mention links");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
        assert!(!needs_migration(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        for table in ["documents", "canonical_entities", "relationships", "entity_mentions"] {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_self_loop_rejected_by_schema() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query(
            r#"
            INSERT INTO canonical_entities (key, kind, display_name, created_at, updated_at)
            VALUES ('bursa', 'location', 'Bursa', 'now', 'now')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query(
            r#"
            INSERT INTO relationships
                (from_key, to_key, pair_key, relation_type, created_at, updated_at)
            VALUES ('bursa', 'bursa', 'bursa|bursa', 'mentioned_with', 'now', 'now')
            "#,
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
