use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::engagement::domain::{
    Candidate, CandidateIdentity, Channel, DomainError,
};

/// Row shape the store persists: the candidate plus the denormalized
/// attributes backing the secondary indexes and the store-enforced expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCandidate {
    pub identity: CandidateIdentity,
    pub candidate: Candidate,
    /// Range attribute of the program+channel index.
    pub sort_score: f64,
    /// Partition refinement of the program+channel index; absent when no
    /// channel is eligible (such rows are reachable only by date).
    pub primary_channel: Option<Channel>,
    /// Partition refinement of the program+date index.
    pub created_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// Expiry attribute honored by the store itself.
    pub expires_at: DateTime<Utc>,
}

impl StoredCandidate {
    /// Build the row for a candidate, extracting identity and index
    /// attributes at write time.
    pub fn from_candidate(candidate: &Candidate) -> Result<Self, DomainError> {
        let identity = candidate.identity()?;
        Ok(Self {
            identity,
            sort_score: candidate.top_score(),
            primary_channel: candidate.primary_eligible_channel(),
            created_date: candidate.metadata.created_at.date_naive(),
            created_at: candidate.metadata.created_at,
            expires_at: candidate.metadata.expires_at,
            candidate: candidate.clone(),
        })
    }
}

/// Predicate attached to a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional write.
    None,
    /// Succeed only when no row exists under the key.
    NotExists,
    /// Succeed only when the stored row's version matches.
    VersionEquals(u64),
}

/// Secondary-index reads the store must answer.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexQuery {
    /// (program, primary eligible channel) ordered by score.
    ProgramChannel {
        program_id: String,
        channel: Channel,
        limit: usize,
        ascending: bool,
    },
    /// (program, creation date) ordered by creation time.
    ProgramDate {
        program_id: String,
        date: NaiveDate,
        limit: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conditional check failed")]
    ConditionFailed,
    #[error("batch of {size} exceeds the store limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Items the store could not process in a batch call; callers retry these.
#[derive(Debug, Default)]
pub struct BatchPutOutcome {
    pub unprocessed: Vec<StoredCandidate>,
}

/// Contract of the external partitioned key-value store. Only the
/// consistency and indexing semantics are fixed here; the wire protocol is
/// whatever the implementation speaks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Largest batch one `batch_put` call accepts.
    fn max_batch_size(&self) -> usize;

    /// Conditional or unconditional put of one row. Condition failures are
    /// reported as [`StoreError::ConditionFailed`] and leave the row
    /// untouched.
    async fn put(&self, item: StoredCandidate, condition: PutCondition) -> Result<(), StoreError>;

    /// Point read; expired rows are absent.
    async fn get(&self, key: &CandidateIdentity) -> Result<Option<StoredCandidate>, StoreError>;

    /// Unconditional delete; deleting an absent row is not an error.
    async fn delete(&self, key: &CandidateIdentity) -> Result<(), StoreError>;

    /// Unconditional puts of up to [`max_batch_size`](Self::max_batch_size)
    /// rows, reporting any the store left unprocessed.
    async fn batch_put(&self, items: Vec<StoredCandidate>) -> Result<BatchPutOutcome, StoreError>;

    /// Read-only secondary-index query.
    async fn query(&self, query: IndexQuery) -> Result<Vec<StoredCandidate>, StoreError>;
}
