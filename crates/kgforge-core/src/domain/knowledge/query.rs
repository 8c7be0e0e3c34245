//! Natural-language query routing
//!
//! Picks one graph lookup from cue words in a Turkish question:
//!
//! ```text
//! "Bursa Barosu ile Ahmet Yılmaz arasındaki ilişki"  → relationships between two entities
//! "Ahmet Yılmaz kimdir?"                             → entity context
//! "dava belgeleri"                                   → document search
//! anything else                                      → entity search
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::document::Document;
use super::entity::CanonicalEntity;
use super::relationship::Relationship;
use super::repository::EntityContext;

const RELATIONSHIP_CUES: &[&str] = &["ile ilişkisi", "arasındaki"];
const CONTEXT_CUES: &[&str] = &["kimdir", "nedir", "hakkında"];
const DOCUMENT_CUES: &[&str] = &["doküman", "sayfa", "belge"];

/// Words dropped from a document search term
const DOCUMENT_STOP_WORDS: &[&str] = &[
    "doküman",
    "dokümanlar",
    "sayfa",
    "sayfalar",
    "belge",
    "belgeler",
    "belgeleri",
    "hakkında",
    "ile",
    "ilgili",
];

static SUBJECT_BEFORE_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.+?)\s+(?:kimdir|nedir|hakkında)\b").expect("subject pattern must compile")
});

static SUBJECT_AFTER_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:kimdir|nedir|hakkında)\s+(.+)$").expect("subject pattern must compile")
});

/// The lookup a question asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "search_type", rename_all = "snake_case")]
pub enum QueryIntent {
    Relationship { from: String, to: String },
    EntityContext { name: String },
    Document { term: String },
    Entity { query: String },
}

impl QueryIntent {
    /// Route a question by its first matching cue.
    ///
    /// A relationship cue with fewer than two recognizable names falls
    /// through to the remaining cues.
    pub fn parse(question: &str) -> Self {
        let question = question.trim();
        let lower = question.to_lowercase();
        let has_cue = |cues: &[&str]| cues.iter().any(|cue| lower.contains(cue));

        if has_cue(RELATIONSHIP_CUES) {
            let names = capitalized_names(question);
            if let [from, to, ..] = names.as_slice() {
                return Self::Relationship {
                    from: from.clone(),
                    to: to.clone(),
                };
            }
        }

        if has_cue(CONTEXT_CUES) {
            if let Some(name) = context_subject(question) {
                return Self::EntityContext { name };
            }
        }

        if has_cue(DOCUMENT_CUES) {
            return Self::Document {
                term: document_term(question),
            };
        }

        Self::Entity {
            query: question.to_string(),
        }
    }
}

/// Results of a routed question
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "search_type", content = "results", rename_all = "snake_case")]
pub enum QueryAnswer {
    Relationship(Vec<Relationship>),
    EntityContext(EntityContext),
    Document(Vec<Document>),
    Entity(Vec<CanonicalEntity>),
}

/// A word with punctuation and any apostrophe suffix removed ("Yılmaz'ın" → "Yılmaz").
/// The flag is set when a suffix was cut, which ends a name.
fn clean_word(word: &str) -> (&str, bool) {
    let (stem, suffixed) = match word.find(|c: char| c == '\'' || c == '’') {
        Some(at) => (&word[..at], true),
        None => (word, false),
    };
    (stem.trim_matches(|c: char| !c.is_alphanumeric()), suffixed)
}

fn is_name_word(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase) && word.chars().count() > 2
}

/// Runs of capitalized words, in order
fn capitalized_names(question: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for raw in question.split_whitespace() {
        let (word, suffixed) = clean_word(raw);
        if is_name_word(word) {
            current.push(word);
            if !suffixed {
                continue;
            }
        }
        if !current.is_empty() {
            names.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        names.push(current.join(" "));
    }

    names
}

fn context_subject(question: &str) -> Option<String> {
    let captured = SUBJECT_BEFORE_CUE
        .captures(question)
        .or_else(|| SUBJECT_AFTER_CUE.captures(question))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|subject| !subject.is_empty());

    captured.or_else(|| {
        question
            .split_whitespace()
            .map(|w| clean_word(w).0)
            .find(|w| is_name_word(w))
            .map(str::to_string)
    })
}

fn document_term(question: &str) -> String {
    question
        .split_whitespace()
        .map(|w| clean_word(w).0)
        .filter(|w| !w.is_empty() && !DOCUMENT_STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_between_two_names() {
        let intent = QueryIntent::parse("Bursa Barosu ile Ahmet Yılmaz arasındaki ilişki nedir?");
        assert_eq!(
            intent,
            QueryIntent::Relationship {
                from: "Bursa Barosu".into(),
                to: "Ahmet Yılmaz".into(),
            }
        );
    }

    #[test]
    fn test_apostrophe_suffix_ends_a_name() {
        let intent = QueryIntent::parse("Ankara Barosu'nun Mehmet Demir ile ilişkisi");
        assert_eq!(
            intent,
            QueryIntent::Relationship {
                from: "Ankara Barosu".into(),
                to: "Mehmet Demir".into(),
            }
        );
    }

    #[test]
    fn test_single_name_falls_through_to_context() {
        let intent = QueryIntent::parse("Ahmet Yılmaz ile ilişkisi olanlar hakkında");
        assert!(matches!(intent, QueryIntent::EntityContext { .. }));
    }

    #[test]
    fn test_context_subject_before_and_after_cue() {
        assert_eq!(
            QueryIntent::parse("Ahmet Yılmaz kimdir?"),
            QueryIntent::EntityContext {
                name: "Ahmet Yılmaz".into()
            }
        );
        assert_eq!(
            QueryIntent::parse("hakkında Bursa Barosu"),
            QueryIntent::EntityContext {
                name: "Bursa Barosu".into()
            }
        );
    }

    #[test]
    fn test_document_cue_strips_stop_words() {
        assert_eq!(
            QueryIntent::parse("dava ile ilgili belgeler"),
            QueryIntent::Document { term: "dava".into() }
        );
    }

    #[test]
    fn test_plain_text_is_entity_search() {
        assert_eq!(
            QueryIntent::parse("  barosu "),
            QueryIntent::Entity {
                query: "barosu".into()
            }
        );
    }
}
