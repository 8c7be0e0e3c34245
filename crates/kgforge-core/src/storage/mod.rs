//! Storage layer - SQLite
//!
//! Provides database management and migrations for the graph store.
//!
//! # Usage
//!
//! ```ignore
//! use kgforge_core::storage::{Database, DatabaseConfig};
//!
//! // In-memory database for tests
//! let db = Database::in_memory().await?;
//!
//! // File database under the user config directory
//! let db = Database::new(DatabaseConfig::default()).await?;
//! ```

pub mod database;
pub mod migrations;

pub use database::{DEFAULT_MAX_CONNECTIONS, Database, DatabaseConfig, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
