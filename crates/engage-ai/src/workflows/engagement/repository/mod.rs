mod memory;
mod store;

pub use memory::InMemoryStore;
pub use store::{
    BatchPutOutcome, IndexQuery, KeyValueStore, PutCondition, StoreError, StoredCandidate,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use super::domain::{Candidate, CandidateIdentity, Channel, DomainError};
use crate::config::PipelineConfig;

/// Retry policy for unprocessed batch-write items.
#[derive(Debug, Clone, Copy)]
pub struct RepositoryConfig {
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl From<&PipelineConfig> for RepositoryConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            retry_attempts: config.batch_retry_attempts,
            retry_base_delay: config.batch_retry_base_delay,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("candidate already exists")]
    AlreadyExists,
    #[error("stored version does not match version {presented}; re-read and retry")]
    VersionConflict { presented: u64 },
    #[error("invalid candidate: {0}")]
    InvalidCandidate(#[from] DomainError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A batch item that could not be committed, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedWrite {
    pub identity: Option<CandidateIdentity>,
    pub reason: String,
}

/// Every input candidate lands in exactly one of these lists.
#[derive(Debug, Default)]
pub struct BatchWriteOutcome {
    pub successful: Vec<CandidateIdentity>,
    pub failed: Vec<FailedWrite>,
}

/// Conflict-safe CRUD, batch writes, and secondary-index queries over the
/// external store. Cross-writer coordination relies entirely on the store's
/// conditional-write primitive; no in-process locking is involved.
pub struct CandidateRepository<S: KeyValueStore> {
    store: Arc<S>,
    config: RepositoryConfig,
}

impl<S: KeyValueStore> CandidateRepository<S> {
    pub fn new(store: Arc<S>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    /// Conditional insert; fails with [`RepositoryError::AlreadyExists`] when
    /// a row with the same identity is present.
    pub async fn create(&self, candidate: &Candidate) -> Result<(), RepositoryError> {
        candidate.validate()?;
        let item = StoredCandidate::from_candidate(candidate)?;
        match self.store.put(item, PutCondition::NotExists).await {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionFailed) => Err(RepositoryError::AlreadyExists),
            Err(err) => Err(RepositoryError::Unavailable(err.to_string())),
        }
    }

    /// Point read; an absent identity is `None`, not an error.
    pub async fn get(
        &self,
        identity: &CandidateIdentity,
    ) -> Result<Option<Candidate>, RepositoryError> {
        match self.store.get(identity).await {
            Ok(row) => Ok(row.map(|row| row.candidate)),
            Err(err) => Err(RepositoryError::Unavailable(err.to_string())),
        }
    }

    /// Version-checked update. On success the stored row carries
    /// `version + 1` and a refreshed `updated_at`, and the updated candidate
    /// is returned. On a version mismatch nothing is written and the caller
    /// must re-read and retry.
    pub async fn update(&self, candidate: &Candidate) -> Result<Candidate, RepositoryError> {
        candidate.validate()?;
        let presented = candidate.metadata.version;

        let mut next = candidate.clone();
        next.metadata.version = presented + 1;
        next.metadata.updated_at = Utc::now();

        let item = StoredCandidate::from_candidate(&next)?;
        match self
            .store
            .put(item, PutCondition::VersionEquals(presented))
            .await
        {
            Ok(()) => Ok(next),
            Err(StoreError::ConditionFailed) => {
                debug!(
                    customer_id = %candidate.customer_id,
                    presented,
                    "optimistic lock conflict on update"
                );
                Err(RepositoryError::VersionConflict { presented })
            }
            Err(err) => Err(RepositoryError::Unavailable(err.to_string())),
        }
    }

    /// Unconditional delete; deleting an absent identity succeeds.
    pub async fn delete(&self, identity: &CandidateIdentity) -> Result<(), RepositoryError> {
        self.store
            .delete(identity)
            .await
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))
    }

    /// Write a batch in store-sized chunks, retrying unprocessed items with
    /// exponential backoff up to the configured attempt budget. Never raises
    /// per item: every input is reported exactly once as successful or
    /// failed.
    pub async fn batch_write(&self, candidates: Vec<Candidate>) -> BatchWriteOutcome {
        let mut outcome = BatchWriteOutcome::default();
        let mut rows = Vec::new();

        for candidate in candidates {
            match candidate
                .validate()
                .and_then(|()| StoredCandidate::from_candidate(&candidate))
            {
                Ok(row) => rows.push(row),
                Err(err) => outcome.failed.push(FailedWrite {
                    identity: candidate.identity().ok(),
                    reason: err.to_string(),
                }),
            }
        }

        let chunk_size = self.store.max_batch_size().max(1);
        for chunk in rows.chunks(chunk_size) {
            self.write_chunk(chunk.to_vec(), &mut outcome).await;
        }

        outcome
    }

    async fn write_chunk(&self, chunk: Vec<StoredCandidate>, outcome: &mut BatchWriteOutcome) {
        let submitted: Vec<CandidateIdentity> =
            chunk.iter().map(|row| row.identity.clone()).collect();
        let mut pending = chunk;
        let mut attempt: u32 = 0;

        loop {
            match self.store.batch_put(pending.clone()).await {
                Ok(BatchPutOutcome { unprocessed }) => {
                    if unprocessed.is_empty() {
                        pending = Vec::new();
                        break;
                    }
                    pending = unprocessed;
                }
                Err(err) => {
                    warn!(error = %err, "batch put failed for an entire chunk");
                    for row in pending {
                        outcome.failed.push(FailedWrite {
                            identity: Some(row.identity),
                            reason: err.to_string(),
                        });
                    }
                    pending = Vec::new();
                    break;
                }
            }

            if attempt >= self.config.retry_attempts {
                break;
            }
            attempt += 1;
            let backoff = self.config.retry_base_delay * 2_u32.saturating_pow(attempt - 1);
            debug!(attempt, ?backoff, "retrying unprocessed batch items");
            tokio::time::sleep(backoff).await;
        }

        let still_pending: BTreeSet<CandidateIdentity> =
            pending.iter().map(|row| row.identity.clone()).collect();
        for row in pending {
            outcome.failed.push(FailedWrite {
                identity: Some(row.identity),
                reason: format!(
                    "unprocessed after {} retry attempts",
                    self.config.retry_attempts
                ),
            });
        }
        for identity in submitted {
            if !still_pending.contains(&identity)
                && !outcome
                    .failed
                    .iter()
                    .any(|failed| failed.identity.as_ref() == Some(&identity))
            {
                outcome.successful.push(identity);
            }
        }
    }

    /// Candidates for a program reachable through the given channel, ordered
    /// by score. Read-only.
    pub async fn query_by_program_and_channel(
        &self,
        program_id: &str,
        channel: Channel,
        limit: usize,
        ascending: bool,
    ) -> Result<Vec<Candidate>, RepositoryError> {
        let rows = self
            .store
            .query(IndexQuery::ProgramChannel {
                program_id: program_id.to_string(),
                channel,
                limit,
                ascending,
            })
            .await
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        Ok(rows.into_iter().map(|row| row.candidate).collect())
    }

    /// Candidates created for a program on the given date, in creation
    /// order. Read-only.
    pub async fn query_by_program_and_date(
        &self,
        program_id: &str,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<Candidate>, RepositoryError> {
        let rows = self
            .store
            .query(IndexQuery::ProgramDate {
                program_id: program_id.to_string(),
                date,
                limit,
            })
            .await
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        Ok(rows.into_iter().map(|row| row.candidate).collect())
    }
}
