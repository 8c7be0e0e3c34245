//! Mention and relationship extraction
//!
//! Text is split into sentences, every sentence is handed to the configured
//! [`MentionDetector`], and overlapping detections are resolved by claim
//! priority: organizations first, then dates, locations, legal terms,
//! people and finally generic entities. Within one sentence, every pair of
//! mentions of different kinds becomes a `MentionedWith` candidate.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;

use super::detector::{DetectedSpan, MentionDetector, PatternDetector};
use super::entity::EntityKind;
use super::mention::Mention;
use super::normalizer::{NormalizedKey, normalize_display};
use super::relationship::{RelationType, RelationshipCandidate};

/// Sentences shorter than this (in characters, after trimming) are skipped
pub const DEFAULT_MIN_SENTENCE_CHARS: usize = 10;

static SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+").expect("sentence pattern must compile"));

/// Output of one [`Extractor::extract`] call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Deduplicated by `(resolution key, kind)`, first occurrence wins
    pub mentions: Vec<Mention>,
    /// Deduplicated by unordered key pair and type
    pub relationships: Vec<RelationshipCandidate>,
    pub total_sentences: usize,
    pub processed_sentences: usize,
    /// Name of the configured detector backend
    pub backend: String,
    /// Sentences where the configured backend failed and pattern rules were used
    pub degraded: Vec<Degradation>,
}

impl ExtractionResult {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn mentions_of(&self, kind: EntityKind) -> impl Iterator<Item = &Mention> {
        self.mentions.iter().filter(move |m| m.kind == kind)
    }
}

/// A recovered detector failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub detector: String,
    pub sentence_index: usize,
    pub reason: String,
}

/// Sentence splitter plus detector with first-match-claims-the-span semantics
#[derive(Clone)]
pub struct Extractor {
    detector: Arc<dyn MentionDetector>,
    fallback: PatternDetector,
    min_sentence_chars: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::pattern()
    }
}

impl Extractor {
    /// Extractor running the given detector, falling back to pattern rules on failure
    pub fn new(detector: Arc<dyn MentionDetector>) -> Self {
        Self {
            detector,
            fallback: PatternDetector::new(),
            min_sentence_chars: DEFAULT_MIN_SENTENCE_CHARS,
        }
    }

    /// Extractor using only the pattern rules
    pub fn pattern() -> Self {
        Self::new(Arc::new(PatternDetector::new()))
    }

    pub fn with_min_sentence_chars(mut self, min_sentence_chars: usize) -> Self {
        self.min_sentence_chars = min_sentence_chars;
        self
    }

    pub fn backend(&self) -> &str {
        self.detector.name()
    }

    /// Extract mentions and relationship candidates from one document's text.
    ///
    /// Never fails: a detector error degrades the affected sentence to the
    /// pattern rules and is recorded in [`ExtractionResult::degraded`].
    pub fn extract(&self, text: &str) -> ExtractionResult {
        let normalized = normalize_display(text);
        let mut result = ExtractionResult {
            backend: self.detector.name().to_string(),
            ..Default::default()
        };

        let mut seen_mentions: HashSet<(NormalizedKey, EntityKind)> = HashSet::new();
        let mut seen_pairs: HashSet<(String, RelationType)> = HashSet::new();

        for (sentence_index, raw) in SENTENCE_BREAK.split(&normalized).enumerate() {
            result.total_sentences += 1;

            let sentence = raw.trim();
            if sentence.chars().count() < self.min_sentence_chars {
                continue;
            }
            result.processed_sentences += 1;

            let spans = self.detect(sentence, sentence_index, &mut result.degraded);
            let local = sentence_mentions(claim_spans(spans));

            for (key, span) in &local {
                if seen_mentions.insert((key.clone(), span.kind)) {
                    result.mentions.push(
                        Mention::new(span.text.clone(), span.kind, sentence_index, sentence)
                            .with_confidence(span.confidence),
                    );
                }
            }

            for (i, (from_key, from)) in local.iter().enumerate() {
                for (to_key, to) in &local[i + 1..] {
                    if from.kind == to.kind || from_key == to_key {
                        continue;
                    }
                    let candidate = RelationshipCandidate::mentioned_with(
                        from_key.clone(),
                        to_key.clone(),
                        sentence_index,
                    );
                    if seen_pairs.insert(candidate.identity()) {
                        result.relationships.push(candidate);
                    }
                }
            }
        }

        debug!(
            backend = %result.backend,
            sentences = result.total_sentences,
            processed = result.processed_sentences,
            mentions = result.mentions.len(),
            relationships = result.relationships.len(),
            "Text extracted"
        );

        result
    }

    /// Extract several texts independently
    pub fn extract_batch<'a, I>(&self, texts: I) -> Vec<ExtractionResult>
    where
        I: IntoIterator<Item = &'a str>,
    {
        texts.into_iter().map(|t| self.extract(t)).collect()
    }

    fn detect(
        &self,
        sentence: &str,
        sentence_index: usize,
        degraded: &mut Vec<Degradation>,
    ) -> Vec<DetectedSpan> {
        match self.detector.detect_sentence(sentence) {
            Ok(spans) => spans,
            Err(e) => {
                let degradation = Degradation {
                    detector: self.detector.name().to_string(),
                    sentence_index,
                    reason: e.to_string(),
                };
                warn!(
                    error = %Error::ExtractionDegraded {
                        detector: degradation.detector.clone(),
                        reason: degradation.reason.clone(),
                    },
                    sentence_index,
                    "Detector failed, using pattern rules"
                );
                degraded.push(degradation);
                // Pattern rules cannot fail
                self.fallback.detect_sentence(sentence).unwrap_or_default()
            }
        }
    }
}

/// Keep spans in claim order, dropping any that overlap an earlier claim
fn claim_spans(mut spans: Vec<DetectedSpan>) -> Vec<DetectedSpan> {
    spans.sort_by_key(|s| s.kind.claim_rank());

    let mut claimed: Vec<DetectedSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if !claimed.iter().any(|c| c.overlaps(span.start, span.end)) {
            claimed.push(span);
        }
    }
    claimed
}

/// Attach keys, drop empty keys, dedup within the sentence and order by position
fn sentence_mentions(claimed: Vec<DetectedSpan>) -> Vec<(NormalizedKey, DetectedSpan)> {
    let mut ordered: Vec<(NormalizedKey, DetectedSpan)> = claimed
        .into_iter()
        .filter_map(|span| NormalizedKey::new(&span.text).map(|key| (key, span)))
        .collect();
    ordered.sort_by_key(|(_, span)| span.start);

    let mut seen = HashSet::new();
    ordered.retain(|(key, span)| seen.insert((key.clone(), span.kind)));
    ordered
}
