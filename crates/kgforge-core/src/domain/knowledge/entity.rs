//! Canonical entities and entity kinds
//!
//! A canonical entity is a node in the knowledge graph. Its identity is the
//! [`NormalizedKey`]; every later mention that resolves to the same key only
//! bumps the mention count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::normalizer::NormalizedKey;

/// A node in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Durable identity
    pub key: NormalizedKey,
    /// Kind recorded when the entity was first seen
    pub kind: EntityKind,
    /// Display form of the first mention that created the entity
    pub display_name: String,
    /// Number of mentions merged into this entity
    pub mention_count: u64,
    /// When the entity was created
    pub created_at: DateTime<Utc>,
    /// When the entity was last merged into
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    /// Create a fresh entity with no mentions recorded yet
    pub fn new(key: NormalizedKey, kind: EntityKind, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key,
            kind,
            display_name: display_name.into(),
            mention_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_mention_count(mut self, mention_count: u64) -> Self {
        self.mention_count = mention_count;
        self
    }
}

/// Kinds of entities the extractor can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Organization,
    Location,
    Date,
    LegalTerm,
    /// Anything a backend labels that has no dedicated kind
    #[serde(rename = "entity")]
    GenericEntity,
}

impl EntityKind {
    /// Order in which detectors claim spans; earlier kinds win overlaps
    pub const CLAIM_ORDER: [EntityKind; 6] = [
        Self::Organization,
        Self::Date,
        Self::Location,
        Self::LegalTerm,
        Self::Person,
        Self::GenericEntity,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Date => "date",
            Self::LegalTerm => "legal_term",
            Self::GenericEntity => "entity",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "person" => Some(Self::Person),
            "organization" | "org" => Some(Self::Organization),
            "location" | "loc" => Some(Self::Location),
            "date" => Some(Self::Date),
            "legal_term" | "legal" => Some(Self::LegalTerm),
            "entity" | "generic" => Some(Self::GenericEntity),
            _ => None,
        }
    }

    /// Map a raw backend label (`B-PER`, `ORG`, `GPE`, ...) to a kind.
    ///
    /// Unknown labels fold to [`EntityKind::GenericEntity`].
    pub fn from_label(label: &str) -> Self {
        let upper = label.trim().to_uppercase();
        let bare = upper
            .strip_prefix("B-")
            .or_else(|| upper.strip_prefix("I-"))
            .unwrap_or(upper.as_str());

        match bare {
            "PER" | "PERSON" => Self::Person,
            "ORG" | "ORGANIZATION" => Self::Organization,
            "LOC" | "LOCATION" | "GPE" => Self::Location,
            "DATE" | "TIME" => Self::Date,
            "LEGAL_TERM" => Self::LegalTerm,
            _ => Self::GenericEntity,
        }
    }

    /// Position in [`EntityKind::CLAIM_ORDER`]
    pub fn claim_rank(&self) -> usize {
        Self::CLAIM_ORDER
            .iter()
            .position(|k| k == self)
            .unwrap_or(Self::CLAIM_ORDER.len())
    }

    /// Get all entity kinds
    pub fn all() -> &'static [EntityKind] {
        &[
            Self::Person,
            Self::Organization,
            Self::Location,
            Self::Date,
            Self::LegalTerm,
            Self::GenericEntity,
        ]
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
