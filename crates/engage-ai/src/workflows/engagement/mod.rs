//! Engagement candidate processing pipeline.
//!
//! A candidate flows filter chain -> multi-model scorer -> repository; each
//! stage degrades independently (rejection records, fallback scores, partial
//! batch failures) so the pipeline as a whole never aborts.

pub mod domain;
pub mod filters;
pub mod ingest;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    Candidate, CandidateAttributes, CandidateIdentity, CandidateMetadata, Channel, ContextEntry,
    ContextKind, RejectionRecord, Score, Subject, SubjectKind, TimingWindow,
};
pub use filters::{
    apply_overrides, CandidateFilter, ChainOutcome, FilterCategory, FilterChain, FilterDecision,
    FilterError, FilterOverrides, FilterSettings,
};
pub use ingest::{BatchRecordImporter, IngestDefaults, IngestError, IngestReport};
pub use repository::{
    BatchWriteOutcome, CandidateRepository, FailedWrite, InMemoryStore, KeyValueStore,
    RepositoryConfig, RepositoryError,
};
pub use router::engagement_router;
pub use scoring::{
    FeatureProvider, FeatureSpec, InMemoryScoreCache, ModelHealth, ModelScore, MultiModelScorer,
    ScoreCache, ScoringConfig, ScoringModel,
};
pub use service::{
    BatchReport, CandidateStatusView, EngagementPipelineService, PipelineError, PipelineOutcome,
};
