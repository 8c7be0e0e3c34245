//! Entity mentions produced by extraction
//!
//! Mentions are ephemeral: they live for the duration of one document's
//! ingestion and are never persisted directly.

use serde::{Deserialize, Serialize};

use super::entity::EntityKind;
use super::normalizer::NormalizedKey;

/// One typed mention found in a sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Display-normalized surface text (or canonical vocabulary term)
    pub text: String,
    pub kind: EntityKind,
    pub sentence_index: usize,
    pub sentence_text: String,
    /// Detector confidence in `[0, 1]`
    pub confidence: f32,
}

impl Mention {
    pub fn new(
        text: impl Into<String>,
        kind: EntityKind,
        sentence_index: usize,
        sentence_text: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            kind,
            sentence_index,
            sentence_text: sentence_text.into(),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// A mention after resolution to a canonical key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMention {
    pub key: NormalizedKey,
    pub kind: EntityKind,
    /// Name to store if this mention creates the entity
    pub display_name: String,
    /// Sentence recorded on the mention edge
    pub sentence_text: String,
}

impl ResolvedMention {
    pub fn new(key: NormalizedKey, mention: &Mention) -> Self {
        Self {
            key,
            kind: mention.kind,
            display_name: mention.text.clone(),
            sentence_text: mention.sentence_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let mention = Mention::new("Bursa", EntityKind::Location, 0, "Bursa'da toplantı")
            .with_confidence(1.7);
        assert_eq!(mention.confidence, 1.0);
        let mention = mention.with_confidence(-0.2);
        assert_eq!(mention.confidence, 0.0);
    }

    #[test]
    fn test_resolved_mention_carries_sentence() {
        let mention = Mention::new("Ahmet Yılmaz", EntityKind::Person, 2, "Ahmet Yılmaz konuştu");
        let key = NormalizedKey::new(&mention.text).unwrap();
        let resolved = ResolvedMention::new(key, &mention);
        assert_eq!(resolved.key.as_str(), "ahmet yilmaz");
        assert_eq!(resolved.display_name, "Ahmet Yılmaz");
        assert_eq!(resolved.sentence_text, "Ahmet Yılmaz konuştu");
    }
}
