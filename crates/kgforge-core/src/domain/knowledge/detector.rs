//! Mention detectors
//!
//! A detector finds typed spans in a single sentence. Two backends exist:
//!
//! - [`PatternDetector`]: priority-ordered regular expressions tuned for
//!   Turkish orthography. Always available.
//! - [`ModelDetector`]: wraps a pluggable [`SequenceLabeler`] (a statistical
//!   NER model living outside this crate) for people, organizations and
//!   places, and keeps the pattern rules for dates and legal vocabulary.
//!
//! Detectors only report candidates. Resolving overlaps (first match claims
//! the span) is the extractor's job.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::entity::EntityKind;
use super::normalizer::normalize_display;

/// A typed span found in a sentence. Offsets are byte offsets into the sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSpan {
    pub start: usize,
    pub end: usize,
    /// Text to record for the mention
    pub text: String,
    pub kind: EntityKind,
    pub confidence: f32,
}

impl DetectedSpan {
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Extraction backend interface
pub trait MentionDetector: Send + Sync {
    /// Backend name, recorded in extraction results
    fn name(&self) -> &str;

    /// Kinds this detector can emit
    fn supported_kinds(&self) -> Vec<EntityKind>;

    /// Find spans of one kind, in rule priority order
    fn detect(&self, sentence: &str, kind: EntityKind) -> Result<Vec<DetectedSpan>>;

    /// Find spans of every supported kind, ordered by claim priority
    fn detect_sentence(&self, sentence: &str) -> Result<Vec<DetectedSpan>> {
        let mut kinds = self.supported_kinds();
        kinds.sort_by_key(|k| k.claim_rank());

        let mut spans = Vec::new();
        for kind in kinds {
            spans.extend(self.detect(sentence, kind)?);
        }
        Ok(spans)
    }
}

// ========== Pattern backend ==========

struct PatternRule {
    regex: Regex,
    /// Capture group holding the mention (0 = whole match)
    group: usize,
    /// Canonical vocabulary term emitted instead of the surface text
    term: Option<&'static str>,
    confidence: f32,
}

fn rule(pattern: &str, confidence: f32) -> PatternRule {
    PatternRule {
        regex: Regex::new(pattern).expect("built-in pattern must compile"),
        group: 0,
        term: None,
        confidence,
    }
}

fn group_rule(pattern: &str, group: usize, confidence: f32) -> PatternRule {
    PatternRule {
        group,
        ..rule(pattern, confidence)
    }
}

fn term_rule(term: &'static str, pattern: &str) -> PatternRule {
    PatternRule {
        term: Some(term),
        ..rule(pattern, 0.8)
    }
}

// A capitalized Turkish word
const CAP: &str = "[A-ZÇĞİÖŞÜ][a-zçğıöşüâîû]+";

// A capitalized word of at least three letters
const NAME_WORD: &str = "[A-ZÇĞİÖŞÜ][a-zçğıöşü]{2,}";

const PERSON_TITLE: &str = concat!(
    r"(?:Prof\s*Dr|Doç\s*Dr|Dr|Av|Genel\s+Müdürü?",
    r"|Başkanı?|Müdürü?|Dekanı?|Rektörü?)",
);

const PLACE_SUFFIX: &str = concat!(
    "(?:İli|İl|Şehri|Şehir|Mahallesi|Mahalle",
    "|Caddesi|Cadde|Sokağı|Sokak|Bulvarı)",
);

const MONTH: &str = concat!(
    "(?i:ocak|şubat|mart|nisan|mayıs|haziran",
    "|temmuz|ağustos|eylül|ekim|kasım|aralık)",
);

static PERSON_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        // Title followed by a name: only the name is the mention
        group_rule(&format!(r"\b{PERSON_TITLE}\s+({CAP}\s+{CAP}(?:\s+{CAP})*)"), 1, 0.75),
        rule(&format!(r"\b{NAME_WORD}\s+{NAME_WORD}(?:\s+{NAME_WORD})?\b"), 0.6),
    ]
});

static ORGANIZATION_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        rule(r"\bTürkiye\s+Barolar\s+Birliği\b", 0.8),
        rule(&format!(r"\b(?:{CAP}\s+)?Baro(?:su|lar\s+Birliği)?\b"), 0.7),
        rule(r"\b(?:[A-ZÇĞİÖŞÜ]+\s+)?BARO(?:SU)?\b", 0.7),
        rule(r"\b(?:Yargıtay|Danıştay|Anayasa\s+Mahkemesi)\b", 0.8),
        rule(&format!(r"\b(?:{CAP}\s+){{1,3}}Mahkemesi\b"), 0.7),
        rule(
            &format!(r"\b(?:{CAP}\s+){{1,3}}Üniversitesi(?:\s+(?:{CAP}\s+){{1,2}}Fakültesi)?\b"),
            0.7,
        ),
        rule(r"\b(?:Adalet|İçişleri|Dışişleri|Maliye)\s+Bakanlığı\b", 0.8),
        rule(&format!(r"\b(?:{CAP}\s+){{1,3}}(?:Bakanlığı|Müdürlüğü|Başkanlığı)\b"), 0.7),
        rule(&format!(r"\b(?:{CAP}\s+){{1,4}}(?:Derneği|Vakfı|Federasyonu|Birliği)\b"), 0.7),
        rule(r"\b(?:[A-ZÇĞİÖŞÜ][\wçğıöşü]*\s+){1,4}(?:Şirketi|Holding|AŞ)\b", 0.7),
    ]
});

static LOCATION_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        rule(&format!(r"\b{CAP}\s+{PLACE_SUFFIX}\b"), 0.6),
        rule(
            r"\b(?:(?i:bursa|ankara|antalya|adana|konya)|İstanbul|İSTANBUL|İzmir|İZMİR)\b",
            0.6,
        ),
    ]
});

static DATE_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        rule(r"\b\d{1,2}[./]\d{1,2}[./]\d{4}\b", 0.8),
        rule(r"\b\d{4}[./]\d{1,2}[./]\d{1,2}\b", 0.8),
        rule(&format!(r"\b\d{{1,2}}\s+{MONTH}\s+\d{{4}}\b"), 0.8),
    ]
});

// Inflections allowed after a legal stem: plural, possessive, case endings
const LEGAL_SUFFIX: &str = concat!(
    "(?i:(?:lar|ler)?(?:s?[ıiuü])?",
    "(?:n?(?:da|de|ta|te|dan|den|tan|ten)|n?[ae]|y[ae]|n?[ıiuü]n)?)",
);

fn legal_rule(term: &'static str, stem: &str) -> PatternRule {
    term_rule(term, &format!(r"\b(?:{stem}){LEGAL_SUFFIX}\b"))
}

static LEGAL_TERM_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        legal_rule("avukat", "[Aa]vukat|AVUKAT"),
        legal_rule("hukuk", "[Hh]ukuk|HUKUK"),
        legal_rule("dava", "[Dd]ava|DAVA"),
        legal_rule("mahkeme", "[Mm]ahkeme|MAHKEME"),
        legal_rule("savcı", "[Ss]avcı|SAVCI"),
        legal_rule("hakim", "[Hh][aâ]kim|HAKİM"),
        legal_rule("kanun", "[Kk]anun|KANUN"),
        legal_rule("yasa", "[Yy]asa|YASA"),
    ]
});

fn rules_for(kind: EntityKind) -> &'static [PatternRule] {
    match kind {
        EntityKind::Person => PERSON_RULES.as_slice(),
        EntityKind::Organization => ORGANIZATION_RULES.as_slice(),
        EntityKind::Location => LOCATION_RULES.as_slice(),
        EntityKind::Date => DATE_RULES.as_slice(),
        EntityKind::LegalTerm => LEGAL_TERM_RULES.as_slice(),
        EntityKind::GenericEntity => &[],
    }
}

/// Regex-based detector; never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    fn spans(&self, sentence: &str, kind: EntityKind) -> Vec<DetectedSpan> {
        let mut spans = Vec::new();
        for rule in rules_for(kind) {
            for caps in rule.regex.captures_iter(sentence) {
                let Some(m) = caps.get(rule.group) else {
                    continue;
                };
                let text = match rule.term {
                    Some(term) => term.to_string(),
                    None => normalize_display(m.as_str()),
                };
                spans.push(DetectedSpan {
                    start: m.start(),
                    end: m.end(),
                    text,
                    kind,
                    confidence: rule.confidence,
                });
            }
        }
        spans
    }
}

impl MentionDetector for PatternDetector {
    fn name(&self) -> &str {
        "pattern"
    }

    fn supported_kinds(&self) -> Vec<EntityKind> {
        vec![
            EntityKind::Organization,
            EntityKind::Date,
            EntityKind::Location,
            EntityKind::LegalTerm,
            EntityKind::Person,
        ]
    }

    fn detect(&self, sentence: &str, kind: EntityKind) -> Result<Vec<DetectedSpan>> {
        Ok(self.spans(sentence, kind))
    }
}

// ========== Model backend ==========

/// A span labelled by a sequence-labelling model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSpan {
    /// Byte offset of the span start
    pub start: usize,
    /// Byte offset one past the span end
    pub end: usize,
    /// Raw model label, e.g. `B-PER`, `ORG`, `GPE`
    pub label: String,
    pub score: f32,
}

/// A statistical NER model, invoked once per sentence
pub trait SequenceLabeler: Send + Sync {
    fn name(&self) -> &str;

    fn label(&self, sentence: &str) -> Result<Vec<LabeledSpan>>;
}

/// Detector backed by a [`SequenceLabeler`].
///
/// Dates and legal vocabulary are not covered by typical NER models, so
/// those kinds always come from the pattern rules.
pub struct ModelDetector {
    labeler: Arc<dyn SequenceLabeler>,
    rules: PatternDetector,
}

impl ModelDetector {
    pub fn new(labeler: Arc<dyn SequenceLabeler>) -> Self {
        Self {
            labeler,
            rules: PatternDetector::new(),
        }
    }

    fn is_rule_kind(kind: EntityKind) -> bool {
        matches!(kind, EntityKind::Date | EntityKind::LegalTerm)
    }

    fn labeled_spans(&self, sentence: &str) -> Result<Vec<DetectedSpan>> {
        let labeled = self.labeler.label(sentence).map_err(|e| match e {
            Error::DetectorFailed(..) => e,
            other => Error::DetectorFailed(self.labeler.name().to_string(), other.to_string()),
        })?;

        let spans = labeled
            .into_iter()
            .filter_map(|span| {
                let raw = sentence.get(span.start..span.end)?;
                let text = normalize_display(raw);
                if span.start >= span.end || text.is_empty() {
                    return None;
                }
                Some(DetectedSpan {
                    start: span.start,
                    end: span.end,
                    text,
                    kind: EntityKind::from_label(&span.label),
                    confidence: span.score.clamp(0.0, 1.0),
                })
            })
            .collect();
        Ok(spans)
    }
}

impl MentionDetector for ModelDetector {
    fn name(&self) -> &str {
        "model"
    }

    fn supported_kinds(&self) -> Vec<EntityKind> {
        EntityKind::all().to_vec()
    }

    fn detect(&self, sentence: &str, kind: EntityKind) -> Result<Vec<DetectedSpan>> {
        if Self::is_rule_kind(kind) {
            return self.rules.detect(sentence, kind);
        }
        Ok(self
            .labeled_spans(sentence)?
            .into_iter()
            .filter(|s| s.kind == kind)
            .collect())
    }

    fn detect_sentence(&self, sentence: &str) -> Result<Vec<DetectedSpan>> {
        let mut spans = self.labeled_spans(sentence)?;
        spans.extend(self.rules.spans(sentence, EntityKind::Date));
        spans.extend(self.rules.spans(sentence, EntityKind::LegalTerm));
        // Stable: keeps model order within a kind
        spans.sort_by_key(|s| s.kind.claim_rank());
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(spans: &[DetectedSpan]) -> Vec<&str> {
        spans.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_title_rule_captures_name_only() {
        let spans = PatternDetector::new()
            .detect("Bursa Barosu Başkanı Ahmet Yılmaz bir davaya katıldı", EntityKind::Person)
            .unwrap();
        assert_eq!(spans[0].text, "Ahmet Yılmaz");
        assert_eq!(spans[0].confidence, 0.75);
    }

    #[test]
    fn test_bar_association() {
        let spans = PatternDetector::new()
            .detect(
                "Bursa Barosu ve Türkiye Barolar Birliği ortak açıklama yaptı",
                EntityKind::Organization,
            )
            .unwrap();
        let found = texts(&spans);
        assert!(found.contains(&"Bursa Barosu"));
        assert!(found.contains(&"Türkiye Barolar Birliği"));
    }

    #[test]
    fn test_university_with_faculty() {
        let spans = PatternDetector::new()
            .detect(
                "Bursa Uludağ Üniversitesi Hukuk Fakültesi öğrencileri geldi",
                EntityKind::Organization,
            )
            .unwrap();
        assert_eq!(spans[0].text, "Bursa Uludağ Üniversitesi Hukuk Fakültesi");
    }

    #[test]
    fn test_legal_stems_emit_canonical_term() {
        let spans = PatternDetector::new()
            .detect("Avukatlar davaya katıldı ve SAVCI konuştu", EntityKind::LegalTerm)
            .unwrap();
        let mut found = texts(&spans);
        found.sort();
        assert_eq!(found, vec!["avukat", "dava", "savcı"]);
    }

    #[test]
    fn test_legal_stems_accept_inflections() {
        let spans = PatternDetector::new()
            .detect(
                "Davanın kanunu mahkemeye ve savcılara yasası ile davalarında hakime sunuldu",
                EntityKind::LegalTerm,
            )
            .unwrap();
        let mut found = texts(&spans);
        found.sort();
        found.dedup();
        assert_eq!(found, vec!["dava", "hakim", "kanun", "mahkeme", "savcı", "yasa"]);
    }

    #[test]
    fn test_words_sharing_a_legal_stem_are_not_terms() {
        let spans = PatternDetector::new()
            .detect(
                "Yasak bölgede hakimiyet kuruldu ve yasal süreç başladı",
                EntityKind::LegalTerm,
            )
            .unwrap();
        assert!(spans.is_empty(), "unexpected terms: {:?}", texts(&spans));
    }

    #[test]
    fn test_dates() {
        let detector = PatternDetector::new();
        let spans = detector
            .detect("Toplantı 15 Mart 2024 tarihinde ve 01/02/2024 günü yapıldı", EntityKind::Date)
            .unwrap();
        assert_eq!(texts(&spans), vec!["01/02/2024", "15 Mart 2024"]);
    }

    #[test]
    fn test_locations() {
        let spans = PatternDetector::new()
            .detect("Etkinlik İstanbul ve Osmangazi Mahallesi içinde", EntityKind::Location)
            .unwrap();
        let found = texts(&spans);
        assert!(found.contains(&"İstanbul"));
        assert!(found.contains(&"Osmangazi Mahallesi"));
    }

    #[test]
    fn test_generic_has_no_rules() {
        let spans = PatternDetector::new()
            .detect("Herhangi Bir Metin burada", EntityKind::GenericEntity)
            .unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn test_detect_sentence_orders_by_claim_rank() {
        let spans = PatternDetector::new()
            .detect_sentence("Bursa Barosu Başkanı Ahmet Yılmaz bir davaya katıldı")
            .unwrap();
        let ranks: Vec<usize> = spans.iter().map(|s| s.kind.claim_rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
        assert_eq!(spans[0].kind, EntityKind::Organization);
    }

    struct FixedLabeler(Vec<LabeledSpan>);

    impl SequenceLabeler for FixedLabeler {
        fn name(&self) -> &str {
            "fixed"
        }

        fn label(&self, _sentence: &str) -> Result<Vec<LabeledSpan>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_model_detector_maps_labels_and_keeps_rules() {
        let sentence = "Mehmet Demir 12/03/2024 tarihinde dava açtı";
        let labeler = FixedLabeler(vec![
            LabeledSpan { start: 0, end: 12, label: "B-PER".into(), score: 0.97 },
            LabeledSpan { start: 0, end: 400, label: "ORG".into(), score: 0.5 },
        ]);
        let detector = ModelDetector::new(Arc::new(labeler));
        let spans = detector.detect_sentence(sentence).unwrap();

        let kinds: Vec<EntityKind> = spans.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![EntityKind::Date, EntityKind::LegalTerm, EntityKind::Person]);
        assert_eq!(spans[2].text, "Mehmet Demir");
        assert_eq!(spans[2].confidence, 0.97);
    }

    #[test]
    fn test_model_detector_per_kind() {
        let labeler = FixedLabeler(vec![LabeledSpan {
            start: 0,
            end: 5,
            label: "MISC".into(),
            score: 0.9,
        }]);
        let detector = ModelDetector::new(Arc::new(labeler));
        let generic = detector.detect("Nobel ödülü verildi", EntityKind::GenericEntity).unwrap();
        assert_eq!(texts(&generic), vec!["Nobel"]);
        assert!(detector.detect("Nobel ödülü verildi", EntityKind::Person).unwrap().is_empty());
    }
}
