//! Source documents and their graph nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document handed to the pipeline by an external source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    pub raw_text: String,
}

impl SourceDocument {
    pub fn new(
        uri: impl Into<String>,
        title: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
            raw_text: raw_text.into(),
        }
    }

    /// The graph node recorded for this document
    pub fn to_document(&self) -> Document {
        Document::new(&self.uri, &self.title, self.raw_text.chars().count() as u64)
    }
}

/// A document node; entities link to it through mention edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Identity of the document
    pub uri: String,
    pub title: String,
    /// Length of the raw text in characters
    pub content_length: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(uri: impl Into<String>, title: impl Into<String>, content_length: u64) -> Self {
        let now = Utc::now();
        Self {
            uri: uri.into(),
            title: title.into(),
            content_length,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_counts_chars() {
        let source = SourceDocument::new("doc://1", "Duyuru", "Başkanı");
        let doc = source.to_document();
        assert_eq!(doc.content_length, 7);
        assert_eq!(doc.uri, "doc://1");
        assert_eq!(doc.title, "Duyuru");
    }

    #[test]
    fn test_title_defaults_when_missing() {
        let source: SourceDocument =
            serde_json::from_str(r#"{"uri": "doc://2", "raw_text": "metin"}"#).unwrap();
        assert_eq!(source.title, "");
    }
}
