use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cached score keyed by (customer, subject, model), independent of any
/// stored candidate's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCacheEntry {
    pub customer_id: String,
    pub subject_id: String,
    pub model_id: String,
    pub model_version: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ScoreCacheEntry {
    pub fn new(
        customer_id: impl Into<String>,
        subject_id: impl Into<String>,
        model_id: impl Into<String>,
        model_version: impl Into<String>,
        value: f64,
        confidence: Option<f64>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            customer_id: customer_id.into(),
            subject_id: subject_id.into(),
            model_id: model_id.into(),
            model_version: model_version.into(),
            value,
            confidence,
            timestamp: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    pub fn key(&self) -> String {
        cache_key(&self.customer_id, &self.subject_id, &self.model_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub(crate) fn cache_key(customer_id: &str, subject_id: &str, model_id: &str) -> String {
    format!("{customer_id}#{subject_id}#{model_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("score cache unavailable: {0}")]
    Unavailable(String),
}

/// TTL-bounded cache of computed scores.
///
/// Errors from either operation are a performance loss, never a correctness
/// problem; the scorer logs and proceeds as if the entry were absent.
#[async_trait]
pub trait ScoreCache: Send + Sync {
    /// Non-expired entry for the triple, or `None`. Expired entries are never
    /// returned even if not yet physically removed.
    async fn get(
        &self,
        customer_id: &str,
        subject_id: &str,
        model_id: &str,
    ) -> Result<Option<ScoreCacheEntry>, CacheError>;

    async fn put(&self, entry: ScoreCacheEntry) -> Result<(), CacheError>;

    /// TTL applied to entries for this model: its override, or the default.
    fn ttl_for(&self, model_id: &str) -> Duration;
}

/// Process-local reference implementation.
pub struct InMemoryScoreCache {
    default_ttl: Duration,
    model_ttls: BTreeMap<String, Duration>,
    entries: Mutex<HashMap<String, ScoreCacheEntry>>,
}

impl InMemoryScoreCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            model_ttls: BTreeMap::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_model_ttl(mut self, model_id: impl Into<String>, ttl: Duration) -> Self {
        self.model_ttls.insert(model_id.into(), ttl);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ScoreCache for InMemoryScoreCache {
    async fn get(
        &self,
        customer_id: &str,
        subject_id: &str,
        model_id: &str,
    ) -> Result<Option<ScoreCacheEntry>, CacheError> {
        let key = cache_key(customer_id, subject_id, model_id);
        let mut entries = self.entries.lock().expect("cache mutex poisoned");

        let expired = matches!(entries.get(&key), Some(entry) if entry.is_expired(Utc::now()));
        if expired {
            entries.remove(&key);
            return Ok(None);
        }
        Ok(entries.get(&key).cloned())
    }

    async fn put(&self, entry: ScoreCacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(entry.key(), entry);
        Ok(())
    }

    fn ttl_for(&self, model_id: &str) -> Duration {
        self.model_ttls
            .get(model_id)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}
