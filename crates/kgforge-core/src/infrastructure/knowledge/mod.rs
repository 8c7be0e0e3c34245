//! Knowledge graph infrastructure implementations
//!
//! Concrete implementations of the graph store trait using SQLite.

mod repository;

pub use repository::SqliteGraphStore;
