//! Graph upsert engine
//!
//! Turns resolved mentions and relationship candidates into merge calls on a
//! [`GraphStore`]. Each call runs under a timeout and is retried with
//! exponential backoff while the failure is transient. A failed item is
//! reported and skipped; the rest of the document still merges.
//!
//! Stores without an atomic merge primitive get their writes serialized
//! through a per-key lock table.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::document::Document;
use super::entity::CanonicalEntity;
use super::mention::ResolvedMention;
use super::normalizer::NormalizedKey;
use super::relationship::{RelationType, Relationship, RelationshipCandidate, pair_key};
use super::repository::GraphStore;

/// Default number of attempts per store call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 100;

/// Largest accepted backoff base
pub const MAX_BACKOFF_BASE_MS: u64 = 60_000;

/// Default bound on a single store call
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

/// Lock tables larger than this drop entries nobody holds
const LOCK_TABLE_PRUNE_AT: usize = 4_096;

/// Retry and timeout settings for store calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1) plus up to 10% jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let jitter = base / 10;
        let extra = if jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter)
        };
        Duration::from_millis(base.saturating_add(extra))
    }
}

/// How much of a document made it into the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    FullyMerged,
    PartiallyMerged,
    NotMerged,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyMerged => "fully_merged",
            Self::PartiallyMerged => "partially_merged",
            Self::NotMerged => "not_merged",
        }
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work an error refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum IngestItem {
    Document { uri: String },
    Entity { key: NormalizedKey },
    MentionLink { key: NormalizedKey },
    Relationship {
        from: NormalizedKey,
        to: NormalizedKey,
        relation_type: RelationType,
    },
}

impl fmt::Display for IngestItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document { uri } => write!(f, "document {}", uri),
            Self::Entity { key } => write!(f, "entity {}", key),
            Self::MentionLink { key } => write!(f, "mention link {}", key),
            Self::Relationship { from, to, relation_type } => {
                write!(f, "relationship {} -[{}]- {}", from, relation_type, to)
            }
        }
    }
}

/// A failed item within an otherwise processed document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub item: IngestItem,
    pub code: String,
    pub message: String,
    pub attempts: u32,
}

impl ItemError {
    fn new(item: IngestItem, error: &Error, attempts: u32) -> Self {
        Self {
            item,
            code: error.code().to_string(),
            message: error.to_string(),
            attempts,
        }
    }
}

/// Result of ingesting one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub uri: String,
    pub entities_upserted: usize,
    pub relationships_upserted: usize,
    pub links_created: usize,
    /// Sentences where extraction fell back to pattern rules
    pub degraded_sentences: usize,
    pub errors: Vec<ItemError>,
    pub outcome: MergeOutcome,
}

impl IngestSummary {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            entities_upserted: 0,
            relationships_upserted: 0,
            links_created: 0,
            degraded_sentences: 0,
            errors: Vec::new(),
            outcome: MergeOutcome::FullyMerged,
        }
    }

    pub fn is_fully_merged(&self) -> bool {
        self.outcome == MergeOutcome::FullyMerged
    }

    fn abort(&mut self, item: IngestItem, failure: CallFailure) {
        self.errors.push(ItemError::new(item, &failure.error, failure.attempts));
        self.outcome = MergeOutcome::NotMerged;
    }
}

struct CallFailure {
    error: Error,
    attempts: u32,
}

/// Per-key async locks for stores without atomic merges
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `key`
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= LOCK_TABLE_PRUNE_AT {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Translates resolved extraction output into idempotent merges
pub struct GraphUpsertEngine<S: GraphStore> {
    store: Arc<S>,
    policy: RetryPolicy,
    locks: Option<KeyedLocks>,
}

impl<S: GraphStore> GraphUpsertEngine<S> {
    /// Create an engine; enables per-key locking when the store needs it
    pub fn new(store: Arc<S>) -> Self {
        let locks = if store.supports_atomic_merge() {
            None
        } else {
            debug!("Store lacks atomic merge, serializing writes per key");
            Some(KeyedLocks::new())
        };
        Self {
            store,
            policy: RetryPolicy::default(),
            locks,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn serializes_writes(&self) -> bool {
        self.locks.is_some()
    }

    // ========== Single Merges ==========

    pub async fn upsert_document(&self, document: &Document) -> Result<Document> {
        self.merge_document(document).await.map_err(|f| f.error)
    }

    /// Merge one resolved mention into its canonical entity
    pub async fn upsert_entity(&self, mention: &ResolvedMention) -> Result<CanonicalEntity> {
        self.merge_entity(mention).await.map_err(|f| f.error)
    }

    pub async fn upsert_relationship(
        &self,
        from: &NormalizedKey,
        to: &NormalizedKey,
        relation_type: &RelationType,
        source_document: &str,
    ) -> Result<Relationship> {
        self.merge_relationship(from, to, relation_type, source_document)
            .await
            .map_err(|f| f.error)
    }

    pub async fn link_mention(
        &self,
        key: &NormalizedKey,
        document_uri: &str,
        sentence: &str,
    ) -> Result<()> {
        self.merge_link(key, document_uri, sentence).await.map_err(|f| f.error)
    }

    // ========== Document Merge ==========

    /// Merge one document: document node, entities, mention links, then relationships.
    ///
    /// Transient failures are retried and then reported per item. A document
    /// node that cannot be written only skips the mention links. A fatal
    /// failure (store unreachable) stops all further writes for the document.
    pub async fn merge(
        &self,
        document: &Document,
        mentions: &[ResolvedMention],
        relationships: &[RelationshipCandidate],
    ) -> IngestSummary {
        let mut summary = IngestSummary::new(&document.uri);
        let document_item = || IngestItem::Document {
            uri: document.uri.clone(),
        };

        if let Err(failure) = self.call("health_check", move || self.store.health_check()).await {
            let fatal = CallFailure {
                error: Error::UpsertFatal(failure.error.to_string()),
                attempts: failure.attempts,
            };
            warn!(
                uri = %document.uri,
                error = %fatal.error,
                "Store unavailable, document not merged"
            );
            summary.abort(document_item(), fatal);
            return summary;
        }

        let document_merged = match self.merge_document(document).await {
            Ok(_) => true,
            Err(failure) if failure.error.is_fatal() => {
                warn!(
                    uri = %document.uri,
                    error = %failure.error,
                    "Document upsert failed, document not merged"
                );
                summary.abort(document_item(), failure);
                return summary;
            }
            Err(failure) => {
                warn!(
                    uri = %document.uri,
                    error = %failure.error,
                    "Document upsert failed, merging entities without mention links"
                );
                summary
                    .errors
                    .push(ItemError::new(document_item(), &failure.error, failure.attempts));
                false
            }
        };

        let mut merged: HashSet<&NormalizedKey> = HashSet::new();

        for mention in mentions {
            match self.merge_entity(mention).await {
                Ok(_) => {
                    summary.entities_upserted += 1;
                    merged.insert(&mention.key);
                }
                Err(failure) if failure.error.is_fatal() => {
                    summary.abort(IngestItem::Entity { key: mention.key.clone() }, failure);
                    return summary;
                }
                Err(failure) => {
                    warn!(
                        key = %mention.key,
                        error = %failure.error,
                        "Entity upsert failed, skipping"
                    );
                    summary.errors.push(ItemError::new(
                        IngestItem::Entity { key: mention.key.clone() },
                        &failure.error,
                        failure.attempts,
                    ));
                }
            }
        }

        for mention in mentions.iter().filter(|m| merged.contains(&m.key)) {
            let item = || IngestItem::MentionLink {
                key: mention.key.clone(),
            };

            if !document_merged {
                let error = Error::InvalidInput("the document was not merged".to_string());
                summary.errors.push(ItemError::new(item(), &error, 0));
                continue;
            }

            match self
                .merge_link(&mention.key, &document.uri, &mention.sentence_text)
                .await
            {
                Ok(()) => summary.links_created += 1,
                Err(failure) if failure.error.is_fatal() => {
                    summary.abort(item(), failure);
                    return summary;
                }
                Err(failure) => {
                    warn!(
                        key = %mention.key,
                        error = %failure.error,
                        "Mention link failed, skipping"
                    );
                    summary
                        .errors
                        .push(ItemError::new(item(), &failure.error, failure.attempts));
                }
            }
        }

        for candidate in relationships {
            let item = || IngestItem::Relationship {
                from: candidate.from_key.clone(),
                to: candidate.to_key.clone(),
                relation_type: candidate.relation_type.clone(),
            };

            if !merged.contains(&candidate.from_key) || !merged.contains(&candidate.to_key) {
                let error = Error::InvalidInput("an endpoint was not merged".to_string());
                summary.errors.push(ItemError::new(item(), &error, 0));
                continue;
            }

            match self
                .merge_relationship(
                    &candidate.from_key,
                    &candidate.to_key,
                    &candidate.relation_type,
                    &document.uri,
                )
                .await
            {
                Ok(_) => summary.relationships_upserted += 1,
                Err(failure) if failure.error.is_fatal() => {
                    summary.abort(item(), failure);
                    return summary;
                }
                Err(failure) => {
                    warn!(
                        item = %item(),
                        error = %failure.error,
                        "Relationship upsert failed, skipping"
                    );
                    summary.errors.push(ItemError::new(item(), &failure.error, failure.attempts));
                }
            }
        }

        if !summary.errors.is_empty() {
            summary.outcome = MergeOutcome::PartiallyMerged;
        }

        info!(
            uri = %summary.uri,
            entities = summary.entities_upserted,
            links = summary.links_created,
            relationships = summary.relationships_upserted,
            errors = summary.errors.len(),
            outcome = %summary.outcome,
            "Document merged"
        );

        summary
    }

    // ========== Internals ==========

    async fn merge_document(
        &self,
        document: &Document,
    ) -> std::result::Result<Document, CallFailure> {
        let _guard = self.lock(|| format!("document:{}", document.uri)).await;
        self.call("document", move || self.store.upsert_document(document)).await
    }

    async fn merge_entity(
        &self,
        mention: &ResolvedMention,
    ) -> std::result::Result<CanonicalEntity, CallFailure> {
        let _guard = self.lock(|| format!("entity:{}", mention.key)).await;
        let entity = self
            .call("entity", move || {
                self.store
                    .upsert_entity(&mention.key, mention.kind, &mention.display_name)
            })
            .await?;
        debug!(key = %entity.key, mention_count = entity.mention_count, "Entity merged");
        Ok(entity)
    }

    async fn merge_link(
        &self,
        key: &NormalizedKey,
        document_uri: &str,
        sentence: &str,
    ) -> std::result::Result<(), CallFailure> {
        let _guard = self.lock(|| format!("link:{}|{}", key, document_uri)).await;
        self.call("mention_link", move || self.store.link_mention(key, document_uri, sentence))
            .await
    }

    async fn merge_relationship(
        &self,
        from: &NormalizedKey,
        to: &NormalizedKey,
        relation_type: &RelationType,
        source_document: &str,
    ) -> std::result::Result<Relationship, CallFailure> {
        if from == to {
            return Err(CallFailure {
                error: Error::InvalidInput(format!("self-relationship on '{}'", from)),
                attempts: 0,
            });
        }

        let _guard = self
            .lock(|| format!("relationship:{}:{}", pair_key(from, to), relation_type))
            .await;
        let relationship = self
            .call("relationship", move || {
                self.store
                    .upsert_relationship(from, to, relation_type, source_document)
            })
            .await?;
        debug!(
            from = %relationship.from_key,
            to = %relationship.to_key,
            strength = relationship.strength,
            "Relationship merged"
        );
        Ok(relationship)
    }

    async fn lock(&self, key: impl FnOnce() -> String) -> Option<OwnedMutexGuard<()>> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(&key()).await),
            None => None,
        }
    }

    /// Run a store call with a timeout, retrying transient failures
    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> std::result::Result<T, CallFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout_ms = self.policy.call_timeout.as_millis() as u64;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = match tokio::time::timeout(self.policy.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(timeout_ms)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempts < self.policy.max_attempts => {
                    let backoff = self.policy.backoff(attempts);
                    warn!(
                        operation,
                        attempt = attempts,
                        wait_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Transient store failure, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => return Err(CallFailure { error, attempts }),
            }
        }
    }
}
