//! Co-occurrence relationships between canonical entities
//!
//! Relationships are undirected in meaning: the store keeps one edge per
//! unordered key pair and relation type, stored in the direction in which
//! it was first seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::normalizer::NormalizedKey;

/// An edge between two canonical entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Key of the entity seen first
    pub from_key: NormalizedKey,
    /// Key of the entity seen second
    pub to_key: NormalizedKey,
    /// Type of relationship
    pub relation_type: RelationType,
    /// Number of co-occurrences merged into this edge
    pub strength: u64,
    /// URI of the document that most recently contributed to the edge
    pub source_document: Option<String>,
    /// When the relationship was created
    pub created_at: DateTime<Utc>,
    /// When the relationship was last merged into
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// Whether this edge touches the given entity
    pub fn involves(&self, key: &NormalizedKey) -> bool {
        &self.from_key == key || &self.to_key == key
    }

    /// The endpoint that is not `key`
    pub fn other_end(&self, key: &NormalizedKey) -> &NormalizedKey {
        if &self.from_key == key { &self.to_key } else { &self.from_key }
    }
}

/// Storage form of the unordered endpoint pair.
///
/// Keys never contain `|` because the normalizer strips it.
pub fn pair_key(a: &NormalizedKey, b: &NormalizedKey) -> String {
    if a <= b {
        format!("{}|{}", a, b)
    } else {
        format!("{}|{}", b, a)
    }
}

/// A relationship proposed by the extractor for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    pub from_key: NormalizedKey,
    pub to_key: NormalizedKey,
    pub relation_type: RelationType,
    /// Index of the sentence the pair co-occurred in
    pub sentence_index: usize,
}

impl RelationshipCandidate {
    pub fn mentioned_with(
        from_key: NormalizedKey,
        to_key: NormalizedKey,
        sentence_index: usize,
    ) -> Self {
        Self {
            from_key,
            to_key,
            relation_type: RelationType::MentionedWith,
            sentence_index,
        }
    }

    /// Dedup key: unordered pair plus type
    pub fn identity(&self) -> (String, RelationType) {
        (pair_key(&self.from_key, &self.to_key), self.relation_type.clone())
    }
}

/// Types of relationships between entities
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationType {
    /// Both entities appear in the same sentence
    MentionedWith,
    /// Any other relation type, stored by name
    Custom(String),
}

impl RelationType {
    /// Get the string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::MentionedWith => "mentioned_with",
            Self::Custom(name) => name,
        }
    }

    /// Parse from string; anything unrecognised becomes a custom type
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "mentioned_with" | "mentioned-with" => Self::MentionedWith,
            _ => Self::Custom(normalized),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for RelationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RelationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> NormalizedKey {
        NormalizedKey::new(s).unwrap()
    }

    #[test]
    fn test_pair_key_is_unordered() {
        let a = key("Bursa Barosu");
        let b = key("Ahmet Yılmaz");
        assert_eq!(pair_key(&a, &b), pair_key(&b, &a));
        assert_eq!(pair_key(&a, &b), "ahmet yilmaz|bursa barosu");
    }

    #[test]
    fn test_candidate_identity_ignores_direction() {
        let forward = RelationshipCandidate::mentioned_with(key("a1"), key("b1"), 0);
        let backward = RelationshipCandidate::mentioned_with(key("b1"), key("a1"), 3);
        assert_eq!(forward.identity(), backward.identity());
    }

    #[test]
    fn test_relation_type_parsing() {
        assert_eq!(RelationType::parse("MENTIONED_WITH"), RelationType::MentionedWith);
        assert_eq!(
            RelationType::parse("Works_For"),
            RelationType::Custom("works_for".into())
        );
        assert_eq!(RelationType::MentionedWith.as_str(), "mentioned_with");
    }

    #[test]
    fn test_relation_type_serde() {
        let json = serde_json::to_string(&RelationType::MentionedWith).unwrap();
        assert_eq!(json, "\"mentioned_with\"");
        let custom: RelationType = serde_json::from_str("\"employs\"").unwrap();
        assert_eq!(custom, RelationType::Custom("employs".into()));
    }

    #[test]
    fn test_other_end() {
        let now = Utc::now();
        let rel = Relationship {
            from_key: key("x1"),
            to_key: key("y1"),
            relation_type: RelationType::MentionedWith,
            strength: 1,
            source_document: None,
            created_at: now,
            updated_at: now,
        };
        assert!(rel.involves(&key("y1")));
        assert_eq!(rel.other_end(&key("x1")), &key("y1"));
        assert_eq!(rel.other_end(&key("y1")), &key("x1"));
    }
}
