//! Mention resolution
//!
//! Exact resolution maps a mention to its [`NormalizedKey`]. Optional fuzzy
//! resolution compares a fresh key against a snapshot of existing keys of the
//! same kind and reuses the closest one when it scores above the threshold.
//! The resolver never touches the store.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;

use super::entity::EntityKind;
use super::mention::Mention;
use super::normalizer::NormalizedKey;

/// Default minimum similarity (0-100) for a fuzzy match
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 90.0;

/// Default width of the band below the threshold treated as "close"
pub const DEFAULT_AMBIGUITY_MARGIN: f64 = 5.0;

/// How to pick between candidates with the same best score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the candidate with the higher mention count
    #[default]
    MostMentioned,
    /// Never pick; create a new entity instead
    MintNew,
}

impl TieBreak {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MostMentioned => "most_mentioned",
            Self::MintNew => "mint_new",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "most_mentioned" => Some(Self::MostMentioned),
            "mint_new" => Some(Self::MintNew),
            _ => None,
        }
    }
}

/// String similarity used for fuzzy matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Levenshtein,
    JaroWinkler,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Levenshtein => "levenshtein",
            Self::JaroWinkler => "jaro_winkler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "levenshtein" => Some(Self::Levenshtein),
            "jaro_winkler" | "jarowinkler" => Some(Self::JaroWinkler),
            _ => None,
        }
    }

    /// Similarity on a 0-100 scale
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let ratio = match self {
            Self::Levenshtein => strsim::normalized_levenshtein(a, b),
            Self::JaroWinkler => strsim::jaro_winkler(a, b),
        };
        ratio * 100.0
    }
}

/// Resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub fuzzy_enabled: bool,
    pub threshold: f64,
    pub ambiguity_margin: f64,
    pub tie_break: TieBreak,
    pub metric: SimilarityMetric,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fuzzy_enabled: false,
            threshold: DEFAULT_FUZZY_THRESHOLD,
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
            tie_break: TieBreak::default(),
            metric: SimilarityMetric::default(),
        }
    }
}

/// An existing canonical entity offered to fuzzy matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCandidate {
    pub key: NormalizedKey,
    pub kind: EntityKind,
    pub mention_count: u64,
}

/// Detailed result of fuzzy matching
#[derive(Debug, Clone, PartialEq)]
pub enum FuzzyOutcome {
    /// Reuse this existing key
    Matched { key: NormalizedKey, score: f64 },
    /// Several candidates are too close to call; mint a new entity
    Ambiguous { candidates: Vec<NormalizedKey> },
    /// Nothing similar enough
    NoMatch,
}

impl FuzzyOutcome {
    pub fn matched_key(self) -> Option<NormalizedKey> {
        match self {
            Self::Matched { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Maps mentions to canonical keys
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn fuzzy_enabled(&self) -> bool {
        self.config.fuzzy_enabled
    }

    /// Exact resolution; `None` when the mention has no identifying text
    pub fn resolve(&self, mention: &Mention) -> Option<NormalizedKey> {
        NormalizedKey::new(&mention.text)
    }

    /// Fuzzy resolution against a snapshot of existing keys.
    ///
    /// Returns the existing key to reuse, or `None` to mint `key` as a new
    /// entity. Candidates of another kind are never considered.
    pub fn resolve_fuzzy(
        &self,
        key: &NormalizedKey,
        kind: EntityKind,
        candidates: &[KeyCandidate],
    ) -> Option<NormalizedKey> {
        if !self.config.fuzzy_enabled {
            return None;
        }
        self.match_candidates(key, kind, candidates).matched_key()
    }

    /// Resolve a mention: exact key first, then fuzzy against `candidates`
    pub fn resolve_with(
        &self,
        mention: &Mention,
        candidates: &[KeyCandidate],
    ) -> Option<NormalizedKey> {
        let key = self.resolve(mention)?;
        Some(self.resolve_fuzzy(&key, mention.kind, candidates).unwrap_or(key))
    }

    /// Score `key` against same-kind candidates and decide
    pub fn match_candidates(
        &self,
        key: &NormalizedKey,
        kind: EntityKind,
        candidates: &[KeyCandidate],
    ) -> FuzzyOutcome {
        let same_kind = candidates.iter().filter(|c| c.kind == kind);

        // An exact hit needs no scoring
        if let Some(exact) = same_kind.clone().find(|c| &c.key == key) {
            return FuzzyOutcome::Matched {
                key: exact.key.clone(),
                score: 100.0,
            };
        }

        let scored: Vec<(&KeyCandidate, f64)> = same_kind
            .map(|c| (c, self.config.metric.score(key.as_str(), c.key.as_str())))
            .collect();

        let best = scored.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);

        if best >= self.config.threshold {
            let top: Vec<&KeyCandidate> = scored
                .iter()
                .filter(|(_, s)| (*s - best).abs() < f64::EPSILON)
                .map(|(c, _)| *c)
                .collect();
            return self.break_tie(key, top, best);
        }

        let floor = self.config.threshold - self.config.ambiguity_margin;
        let close: Vec<NormalizedKey> = scored
            .iter()
            .filter(|(_, s)| *s >= floor)
            .map(|(c, _)| c.key.clone())
            .collect();

        if close.len() >= 2 {
            self.report_ambiguous(key, close)
        } else {
            FuzzyOutcome::NoMatch
        }
    }

    fn break_tie(&self, key: &NormalizedKey, top: Vec<&KeyCandidate>, score: f64) -> FuzzyOutcome {
        if let [only] = top.as_slice() {
            debug!(key = %key, matched = %only.key, score, "Fuzzy match");
            return FuzzyOutcome::Matched {
                key: only.key.clone(),
                score,
            };
        }

        if self.config.tie_break == TieBreak::MostMentioned {
            let most = top.iter().map(|c| c.mention_count).max().unwrap_or(0);
            let leaders: Vec<&&KeyCandidate> =
                top.iter().filter(|c| c.mention_count == most).collect();
            if let [leader] = leaders.as_slice() {
                debug!(key = %key, matched = %leader.key, score, "Fuzzy match by mention count");
                return FuzzyOutcome::Matched {
                    key: leader.key.clone(),
                    score,
                };
            }
        }

        self.report_ambiguous(key, top.into_iter().map(|c| c.key.clone()).collect())
    }

    fn report_ambiguous(
        &self,
        key: &NormalizedKey,
        candidates: Vec<NormalizedKey>,
    ) -> FuzzyOutcome {
        warn!(
            error = %Error::ResolutionAmbiguous {
                key: key.to_string(),
                candidates: candidates.len(),
            },
            "Minting new entity"
        );
        FuzzyOutcome::Ambiguous { candidates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> NormalizedKey {
        NormalizedKey::new(s).unwrap()
    }

    fn candidate(s: &str, kind: EntityKind, mention_count: u64) -> KeyCandidate {
        KeyCandidate {
            key: key(s),
            kind,
            mention_count,
        }
    }

    fn fuzzy() -> Resolver {
        Resolver::new(ResolverConfig {
            fuzzy_enabled: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_exact_resolution() {
        let mention = Mention::new("BURSA", EntityKind::Location, 0, "BURSA toplantısı");
        assert_eq!(Resolver::default().resolve(&mention), Some(key("bursa")));

        let empty = Mention::new("  ", EntityKind::Location, 0, "");
        assert_eq!(Resolver::default().resolve(&empty), None);
    }

    #[test]
    fn test_fuzzy_disabled_never_matches() {
        let candidates = [candidate("ahmet yilmaz", EntityKind::Person, 4)];
        let result = Resolver::default().resolve_fuzzy(
            &key("ahmet yilmazz"),
            EntityKind::Person,
            &candidates,
        );
        assert_eq!(result, None);
    }

    #[test]
    fn test_fuzzy_matches_close_key() {
        let candidates = [candidate("ahmet yilmaz", EntityKind::Person, 4)];
        let result = fuzzy().resolve_fuzzy(&key("ahmet yilmazz"), EntityKind::Person, &candidates);
        assert_eq!(result, Some(key("ahmet yilmaz")));
    }

    #[test]
    fn test_fuzzy_never_crosses_kinds() {
        let candidates = [candidate("bursa barosu", EntityKind::Organization, 10)];
        let result = fuzzy().resolve_fuzzy(&key("bursa barosu"), EntityKind::Person, &candidates);
        assert_eq!(result, None);

        let result = fuzzy().resolve_fuzzy(&key("bursa barosuu"), EntityKind::Person, &candidates);
        assert_eq!(result, None);
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let candidates = [candidate("mehmet demir", EntityKind::Person, 1)];
        let outcome =
            fuzzy().match_candidates(&key("ahmet yilmaz"), EntityKind::Person, &candidates);
        assert_eq!(outcome, FuzzyOutcome::NoMatch);
    }

    #[test]
    fn test_tie_prefers_most_mentioned() {
        // Both are one edit away from the query
        let candidates = [
            candidate("ahmet yilmaza", EntityKind::Person, 2),
            candidate("ahmet yilmazi", EntityKind::Person, 7),
        ];
        let result = fuzzy().resolve_fuzzy(&key("ahmet yilmaze"), EntityKind::Person, &candidates);
        assert_eq!(result, Some(key("ahmet yilmazi")));
    }

    #[test]
    fn test_full_tie_is_ambiguous() {
        let candidates = [
            candidate("ahmet yilmaza", EntityKind::Person, 3),
            candidate("ahmet yilmazi", EntityKind::Person, 3),
        ];
        let outcome =
            fuzzy().match_candidates(&key("ahmet yilmaze"), EntityKind::Person, &candidates);
        assert!(
            matches!(outcome, FuzzyOutcome::Ambiguous { ref candidates } if candidates.len() == 2)
        );
    }

    #[test]
    fn test_mint_new_tie_break() {
        let resolver = Resolver::new(ResolverConfig {
            fuzzy_enabled: true,
            tie_break: TieBreak::MintNew,
            ..Default::default()
        });
        let candidates = [
            candidate("ahmet yilmaza", EntityKind::Person, 2),
            candidate("ahmet yilmazi", EntityKind::Person, 7),
        ];
        assert_eq!(
            resolver.resolve_fuzzy(&key("ahmet yilmaze"), EntityKind::Person, &candidates),
            None
        );
    }

    #[test]
    fn test_close_candidates_below_threshold_are_ambiguous() {
        let resolver = Resolver::new(ResolverConfig {
            fuzzy_enabled: true,
            threshold: 95.0,
            ambiguity_margin: 10.0,
            ..Default::default()
        });
        // 12 characters, one edit: about 91.7
        let candidates = [
            candidate("ahmet yilmaa", EntityKind::Person, 1),
            candidate("ahmet yilmab", EntityKind::Person, 1),
        ];
        let outcome =
            resolver.match_candidates(&key("ahmet yilmaz"), EntityKind::Person, &candidates);
        assert!(matches!(outcome, FuzzyOutcome::Ambiguous { .. }));
    }

    #[test]
    fn test_resolve_with_falls_back_to_exact_key() {
        let mention = Mention::new("Mehmet Demir", EntityKind::Person, 0, "Mehmet Demir geldi");
        let candidates = [candidate("ahmet yilmaz", EntityKind::Person, 1)];
        assert_eq!(fuzzy().resolve_with(&mention, &candidates), Some(key("mehmet demir")));
    }

    #[test]
    fn test_jaro_winkler_metric() {
        assert!(SimilarityMetric::JaroWinkler.score("bursa barosu", "bursa barosu") > 99.9);
        assert!(SimilarityMetric::Levenshtein.score("abc", "xyz") < 1.0);
        assert_eq!(SimilarityMetric::parse("jaro_winkler"), Some(SimilarityMetric::JaroWinkler));
        assert_eq!(TieBreak::parse("mint_new"), Some(TieBreak::MintNew));
    }
}
