mod config;
pub mod rules;

pub use config::{apply_overrides, FilterOverrides, FilterSettings};

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use super::domain::{Candidate, RejectionRecord};

/// Closed set of rule families; new rules implement [`CandidateFilter`]
/// within one of these categories rather than extending the chain itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCategory {
    Trust,
    Eligibility,
    BusinessRule,
    Quality,
    Capacity,
}

impl FilterCategory {
    pub const fn label(self) -> &'static str {
        match self {
            FilterCategory::Trust => "trust",
            FilterCategory::Eligibility => "eligibility",
            FilterCategory::BusinessRule => "business_rule",
            FilterCategory::Quality => "quality",
            FilterCategory::Capacity => "capacity",
        }
    }
}

/// Verdict of a single filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Pass,
    Reject { reason: String, reason_code: String },
}

/// Raised when a filter cannot reach a verdict; the chain treats this as a
/// rejection rather than letting an undecided candidate through.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter evaluation failed: {0}")]
    Evaluation(String),
    #[error("filter dependency unavailable: {0}")]
    Unavailable(String),
}

/// Reason code recorded when a filter errors instead of deciding.
pub const FILTER_ERROR_CODE: &str = "FILTER_ERROR";

/// Capability implemented by every eligibility rule.
pub trait CandidateFilter: Send + Sync {
    fn id(&self) -> &str;
    fn category(&self) -> FilterCategory;
    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError>;
}

/// Result of running a candidate through the chain. The candidate itself is
/// only mutated by appending to its rejection history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub passed: bool,
    pub rejection: Option<RejectionRecord>,
}

impl ChainOutcome {
    fn passed() -> Self {
        Self {
            passed: true,
            rejection: None,
        }
    }

    fn rejected(record: RejectionRecord) -> Self {
        Self {
            passed: false,
            rejection: Some(record),
        }
    }
}

/// Ordered, enabled-only eligibility rules evaluated ahead of scoring.
///
/// Evaluation is sequential in configured order so the first configured
/// filter to reject always wins; a filter error fails closed and halts the
/// chain at that filter.
pub struct FilterChain {
    filters: Vec<Arc<dyn CandidateFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn CandidateFilter>>) -> Self {
        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn evaluate(&self, candidate: &mut Candidate) -> ChainOutcome {
        for filter in &self.filters {
            match filter.evaluate(candidate) {
                Ok(FilterDecision::Pass) => continue,
                Ok(FilterDecision::Reject {
                    reason,
                    reason_code,
                }) => {
                    let record = RejectionRecord {
                        filter_id: filter.id().to_string(),
                        reason,
                        reason_code,
                        timestamp: Utc::now(),
                    };
                    candidate.record_rejection(record.clone());
                    return ChainOutcome::rejected(record);
                }
                Err(err) => {
                    warn!(
                        filter_id = filter.id(),
                        category = filter.category().label(),
                        customer_id = %candidate.customer_id,
                        workflow_execution_id = %candidate.metadata.workflow_execution_id,
                        error = %err,
                        "filter errored; failing closed"
                    );
                    let record = RejectionRecord {
                        filter_id: filter.id().to_string(),
                        reason: err.to_string(),
                        reason_code: FILTER_ERROR_CODE.to_string(),
                        timestamp: Utc::now(),
                    };
                    candidate.record_rejection(record.clone());
                    return ChainOutcome::rejected(record);
                }
            }
        }

        ChainOutcome::passed()
    }
}
