//! kgforge Core Library
//!
//! This crate builds a knowledge graph incrementally from free text:
//! - Normalization of surface forms into canonical keys
//! - Entity and co-occurrence extraction (pattern rules or a sequence labeler)
//! - Exact and fuzzy resolution against existing entities
//! - Idempotent, retrying merges into a SQLite graph store
//! - Queries over entities, relationships and documents

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::knowledge::{
        CanonicalEntity, EntityKind, IngestSummary, KnowledgeGraphService, MergeOutcome,
        NormalizedKey, SourceDocument,
    };
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::knowledge::SqliteGraphStore;
    pub use crate::storage::{Database, DatabaseConfig};
}
