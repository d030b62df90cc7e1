use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{Candidate, CandidateIdentity, Channel, DomainError, RejectionRecord};
use super::filters::FilterChain;
use super::repository::{
    CandidateRepository, FailedWrite, KeyValueStore, RepositoryError,
};
use super::scoring::{ModelHealth, MultiModelScorer};

/// Bounded optimistic-retry budget for upserts racing concurrent writers.
const UPDATE_RETRY_LIMIT: u32 = 3;

/// Result of pushing one candidate through the full pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The chain rejected the candidate; it carries the rejection record and
    /// was not newly stored.
    Rejected { candidate: Candidate },
    /// The candidate was scored and persisted.
    Stored { candidate: Candidate },
}

impl PipelineOutcome {
    pub fn status_view(&self) -> CandidateStatusView {
        match self {
            PipelineOutcome::Rejected { candidate } => CandidateStatusView {
                status: "rejected",
                identity: candidate.identity().ok(),
                top_score: None,
                rejection: candidate.rejection_history.last().cloned(),
            },
            PipelineOutcome::Stored { candidate } => CandidateStatusView {
                status: "stored",
                identity: candidate.identity().ok(),
                top_score: Some(candidate.top_score()),
                rejection: None,
            },
        }
    }
}

/// Sanitized representation of a pipeline outcome for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateStatusView {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<CandidateIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionRecord>,
}

/// Per-batch accounting; every input candidate appears exactly once.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub stored: Vec<CandidateIdentity>,
    pub rejected: Vec<Candidate>,
    pub failed: Vec<FailedWrite>,
}

/// Error raised by the pipeline service.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidCandidate(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("upsert still conflicted after {attempts} optimistic retries")]
    RetriesExhausted { attempts: u32 },
}

/// Facade composing the filter chain, multi-model scorer, and repository.
pub struct EngagementPipelineService<S: KeyValueStore> {
    chain: FilterChain,
    scorer: Arc<MultiModelScorer>,
    repository: Arc<CandidateRepository<S>>,
}

impl<S: KeyValueStore + 'static> EngagementPipelineService<S> {
    pub fn new(
        chain: FilterChain,
        scorer: Arc<MultiModelScorer>,
        repository: Arc<CandidateRepository<S>>,
    ) -> Self {
        Self {
            chain,
            scorer,
            repository,
        }
    }

    /// Run one candidate through filter -> score -> persist.
    ///
    /// Rejected candidates are returned with their rejection record; when the
    /// candidate already exists in the store the rejection is also annotated
    /// onto the stored row through the update path.
    pub async fn process(&self, mut candidate: Candidate) -> Result<PipelineOutcome, PipelineError> {
        candidate.validate()?;

        let chain_outcome = self.chain.evaluate(&mut candidate);
        if !chain_outcome.passed {
            if let Some(record) = &chain_outcome.rejection {
                info!(
                    customer_id = %candidate.customer_id,
                    workflow_execution_id = %candidate.metadata.workflow_execution_id,
                    filter_id = %record.filter_id,
                    reason_code = %record.reason_code,
                    "candidate rejected by filter chain"
                );
                self.annotate_stored_rejection(&candidate, record).await;
            }
            return Ok(PipelineOutcome::Rejected { candidate });
        }

        let scores = self.scorer.score_candidate(&candidate).await;
        candidate
            .scores
            .get_or_insert_with(BTreeMap::new)
            .extend(scores);

        let stored = self.persist(&candidate).await?;
        info!(
            customer_id = %stored.customer_id,
            workflow_execution_id = %stored.metadata.workflow_execution_id,
            version = stored.metadata.version,
            top_score = stored.top_score(),
            "candidate scored and stored"
        );
        Ok(PipelineOutcome::Stored { candidate: stored })
    }

    /// Filter, score, and persist a batch. Survivors are scored in chunks and
    /// committed through the repository's batch write.
    pub async fn process_batch(&self, candidates: Vec<Candidate>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut survivors = Vec::new();

        for mut candidate in candidates {
            if let Err(err) = candidate.validate() {
                report.failed.push(FailedWrite {
                    identity: candidate.identity().ok(),
                    reason: err.to_string(),
                });
                continue;
            }
            let outcome = self.chain.evaluate(&mut candidate);
            if outcome.passed {
                survivors.push(candidate);
            } else {
                report.rejected.push(candidate);
            }
        }

        let score_maps = self.scorer.score_batch(&survivors).await;
        for (candidate, scores) in survivors.iter_mut().zip(score_maps) {
            candidate
                .scores
                .get_or_insert_with(BTreeMap::new)
                .extend(scores);
        }

        let write = self.repository.batch_write(survivors).await;
        report.stored = write.successful;
        report.failed.extend(write.failed);
        report
    }

    pub async fn get(
        &self,
        identity: &CandidateIdentity,
    ) -> Result<Option<Candidate>, PipelineError> {
        Ok(self.repository.get(identity).await?)
    }

    /// Consumer-marked consumption removes the candidate from the store.
    pub async fn consume(&self, identity: &CandidateIdentity) -> Result<(), PipelineError> {
        self.repository.delete(identity).await?;
        info!(identity = %identity, "candidate consumed");
        Ok(())
    }

    pub async fn query_by_channel(
        &self,
        program_id: &str,
        channel: Channel,
        limit: usize,
        ascending: bool,
    ) -> Result<Vec<Candidate>, PipelineError> {
        Ok(self
            .repository
            .query_by_program_and_channel(program_id, channel, limit, ascending)
            .await?)
    }

    pub async fn query_by_date(
        &self,
        program_id: &str,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<Candidate>, PipelineError> {
        Ok(self
            .repository
            .query_by_program_and_date(program_id, date, limit)
            .await?)
    }

    pub async fn models_health(&self) -> BTreeMap<String, ModelHealth> {
        self.scorer.health_report().await
    }

    /// Create, or merge scores into the existing row under optimistic
    /// locking. Conflicts re-read and retry up to the bounded budget.
    async fn persist(&self, candidate: &Candidate) -> Result<Candidate, PipelineError> {
        match self.repository.create(candidate).await {
            Ok(()) => return Ok(candidate.clone()),
            Err(RepositoryError::AlreadyExists) => {}
            Err(err) => return Err(err.into()),
        }

        let identity = candidate.identity()?;
        for _attempt in 0..UPDATE_RETRY_LIMIT {
            let Some(mut existing) = self.repository.get(&identity).await? else {
                // The row expired or was consumed between create and read.
                match self.repository.create(candidate).await {
                    Ok(()) => return Ok(candidate.clone()),
                    Err(RepositoryError::AlreadyExists) => continue,
                    Err(err) => return Err(err.into()),
                }
            };

            if let Some(scores) = &candidate.scores {
                existing
                    .scores
                    .get_or_insert_with(BTreeMap::new)
                    .extend(scores.clone());
            }

            match self.repository.update(&existing).await {
                Ok(updated) => return Ok(updated),
                Err(RepositoryError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(PipelineError::RetriesExhausted {
            attempts: UPDATE_RETRY_LIMIT,
        })
    }

    /// Best-effort annotation of a rejection onto an already-stored row; a
    /// lost race here only costs an audit entry, never correctness.
    async fn annotate_stored_rejection(&self, candidate: &Candidate, record: &RejectionRecord) {
        let Ok(identity) = candidate.identity() else {
            return;
        };
        let Ok(Some(mut existing)) = self.repository.get(&identity).await else {
            return;
        };

        existing.record_rejection(record.clone());
        if let Err(err) = self.repository.update(&existing).await {
            debug!(
                identity = %identity,
                error = %err,
                "could not annotate stored candidate with rejection"
            );
        }
    }
}
