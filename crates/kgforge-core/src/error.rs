//! Error types for kgforge

use thiserror::Error;

/// Result type alias using kgforge's Error
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result codes that clear up on their own.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

/// kgforge error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Extraction errors (E001-E099)
    #[error("Extraction degraded: detector '{detector}' failed ({reason}), using pattern rules")]
    ExtractionDegraded { detector: String, reason: String },

    #[error("Detector '{0}' failed: {1}")]
    DetectorFailed(String, String),

    // Resolution errors (E100-E199)
    #[error("Ambiguous resolution for '{key}': {candidates} close candidates, new entity created")]
    ResolutionAmbiguous { key: String, candidates: usize },

    // Upsert errors (E200-E299)
    #[error("Transient store failure: {0}")]
    UpsertTransient(String),

    #[error("Graph store unavailable: {0}. Check `kgforge config get store.database_path`")]
    UpsertFatal(String),

    #[error("Store call timed out after {0} ms")]
    Timeout(u64),

    // Lookup errors (E300-E399)
    #[error("Entity '{0}' not found. Run `kgforge search <name>` to find entities.")]
    EntityNotFound(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExtractionDegraded { .. } => "E001",
            Self::DetectorFailed(..) => "E002",
            Self::ResolutionAmbiguous { .. } => "E100",
            Self::UpsertTransient(_) => "E200",
            Self::UpsertFatal(_) => "E201",
            Self::Timeout(_) => "E202",
            Self::EntityNotFound(_) => "E300",
            Self::DatabaseError(_) => "E400",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UpsertFatal(_) => Some("kgforge config get store.database_path".to_string()),
            Self::Timeout(_) => Some("kgforge config set ingest.call_timeout_ms <ms>".to_string()),
            Self::EntityNotFound(name) => Some(format!("kgforge search {}", name)),
            _ => None,
        }
    }

    /// Whether retrying the same store call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UpsertTransient(_) | Self::Timeout(_) => true,
            Self::DatabaseError(e) => is_transient_sqlx(e),
            _ => false,
        }
    }

    /// Whether the store can no longer serve any call
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UpsertFatal(_) => true,
            Self::DatabaseError(sqlx::Error::PoolClosed) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
                || db.message().contains("database is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let degraded = Error::ExtractionDegraded {
            detector: "model".into(),
            reason: "offline".into(),
        };
        assert_eq!(degraded.code(), "E001");
        assert!(degraded.to_string().contains("model"));

        let ambiguous = Error::ResolutionAmbiguous {
            key: "ahmet yilmaz".into(),
            candidates: 2,
        };
        assert_eq!(ambiguous.code(), "E100");
        assert_eq!(Error::UpsertFatal("gone".into()).code(), "E201");
        assert_eq!(Error::Other("x".into()).code(), "E9999");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout(500).is_transient());
        assert!(Error::UpsertTransient("busy".into()).is_transient());
        assert!(Error::DatabaseError(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!Error::DatabaseError(sqlx::Error::RowNotFound).is_transient());
        assert!(!Error::InvalidInput("empty key".into()).is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::DatabaseError(sqlx::Error::PoolClosed).is_fatal());
        assert!(Error::UpsertFatal("down".into()).is_fatal());
        assert!(!Error::Timeout(100).is_fatal());
    }

    #[test]
    fn test_suggestions() {
        assert_eq!(
            Error::EntityNotFound("Bursa".into()).suggestion(),
            Some("kgforge search Bursa".to_string())
        );
        assert_eq!(Error::InvalidInput("x".into()).suggestion(), None);
    }
}
