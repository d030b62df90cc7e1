use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::store::{
    BatchPutOutcome, IndexQuery, KeyValueStore, PutCondition, StoreError, StoredCandidate,
};
use crate::workflows::engagement::domain::CandidateIdentity;

const MAX_BATCH_SIZE: usize = 25;

/// Process-local reference store implementing the full `KeyValueStore`
/// contract: conditional puts, TTL expiry on read, bounded batch puts, and
/// both secondary indexes.
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<BTreeMap<CandidateIdentity, StoredCandidate>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    async fn put(&self, item: StoredCandidate, condition: PutCondition) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("store mutex poisoned");
        let existing = rows
            .get(&item.identity)
            .filter(|row| row.expires_at > Utc::now());

        match condition {
            PutCondition::None => {}
            PutCondition::NotExists => {
                if existing.is_some() {
                    return Err(StoreError::ConditionFailed);
                }
            }
            PutCondition::VersionEquals(version) => match existing {
                Some(row) if row.candidate.metadata.version == version => {}
                _ => return Err(StoreError::ConditionFailed),
            },
        }

        rows.insert(item.identity.clone(), item);
        Ok(())
    }

    async fn get(&self, key: &CandidateIdentity) -> Result<Option<StoredCandidate>, StoreError> {
        let mut rows = self.rows.lock().expect("store mutex poisoned");
        let expired = matches!(rows.get(key), Some(row) if row.expires_at <= Utc::now());
        if expired {
            rows.remove(key);
            return Ok(None);
        }
        Ok(rows.get(key).cloned())
    }

    async fn delete(&self, key: &CandidateIdentity) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("store mutex poisoned");
        rows.remove(key);
        Ok(())
    }

    async fn batch_put(&self, items: Vec<StoredCandidate>) -> Result<BatchPutOutcome, StoreError> {
        if items.len() > MAX_BATCH_SIZE {
            return Err(StoreError::BatchTooLarge {
                size: items.len(),
                limit: MAX_BATCH_SIZE,
            });
        }

        let mut rows = self.rows.lock().expect("store mutex poisoned");
        for item in items {
            rows.insert(item.identity.clone(), item);
        }
        Ok(BatchPutOutcome::default())
    }

    async fn query(&self, query: IndexQuery) -> Result<Vec<StoredCandidate>, StoreError> {
        let now = Utc::now();
        let rows = self.rows.lock().expect("store mutex poisoned");

        match query {
            IndexQuery::ProgramChannel {
                program_id,
                channel,
                limit,
                ascending,
            } => {
                let mut matches: Vec<StoredCandidate> = rows
                    .values()
                    .filter(|row| row.expires_at > now)
                    .filter(|row| row.identity.program_id == program_id)
                    .filter(|row| row.primary_channel == Some(channel))
                    .cloned()
                    .collect();
                matches.sort_by(|a, b| {
                    let ordering = a
                        .sort_score
                        .partial_cmp(&b.sort_score)
                        .unwrap_or(std::cmp::Ordering::Equal);
                    if ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                });
                matches.truncate(limit);
                Ok(matches)
            }
            IndexQuery::ProgramDate {
                program_id,
                date,
                limit,
            } => {
                let mut matches: Vec<StoredCandidate> = rows
                    .values()
                    .filter(|row| row.expires_at > now)
                    .filter(|row| row.identity.program_id == program_id)
                    .filter(|row| row.created_date == date)
                    .cloned()
                    .collect();
                matches.sort_by_key(|row| row.created_at);
                matches.truncate(limit);
                Ok(matches)
            }
        }
    }
}
