//! Text normalization and resolution keys
//!
//! Two forms are derived from raw mention text:
//!
//! - the **display form** keeps case and diacritics but fixes Unicode
//!   compatibility forms and whitespace, and is what gets stored as a name
//! - the **resolution key** is lossy: lower-cased, Turkish letters folded to
//!   ASCII, remaining diacritics removed, punctuation stripped. Two mentions
//!   with the same key are the same entity.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// NFKC-normalize and collapse whitespace runs into single spaces.
pub fn normalize_display(text: &str) -> String {
    collapse_whitespace(&text.nfkc().collect::<String>())
}

/// Derive the resolution key for a piece of mention text.
///
/// Returns an empty string when nothing identifying is left; use
/// [`NormalizedKey::new`] to get a key that is guaranteed non-empty.
pub fn resolution_key(text: &str) -> String {
    let folded: String = normalize_display(text)
        .to_lowercase()
        .chars()
        .map(fold_turkish)
        .collect();

    let stripped: String = folded
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| is_key_char(*c))
        .collect();

    collapse_whitespace(&stripped)
}

fn fold_turkish(c: char) -> char {
    match c {
        'ç' | 'Ç' => 'c',
        'ğ' | 'Ğ' => 'g',
        'ı' | 'I' | 'İ' => 'i',
        'ö' | 'Ö' => 'o',
        'ş' | 'Ş' => 's',
        'ü' | 'Ü' => 'u',
        other => other,
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_lowercase()
        || c.is_ascii_digit()
        || c.is_whitespace()
        || matches!(c, '.' | '_' | '-')
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A non-empty resolution key, the durable identity of a canonical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    /// Build the key for raw mention text, or `None` if the key would be empty
    pub fn new(text: &str) -> Option<Self> {
        Self::from_normalized(resolution_key(text))
    }

    /// Wrap a string that is already a resolution key (e.g. read back from storage)
    pub fn from_normalized(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
