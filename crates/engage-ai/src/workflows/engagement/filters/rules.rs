use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;

use super::config::FilterSettings;
use super::{CandidateFilter, FilterCategory, FilterChain, FilterDecision, FilterError};
use crate::workflows::engagement::domain::Candidate;

/// Rejects candidates whose customer is on the program blocklist.
pub struct BlocklistFilter {
    blocked: BTreeSet<String>,
}

impl BlocklistFilter {
    pub fn new(blocked: BTreeSet<String>) -> Self {
        Self { blocked }
    }
}

impl CandidateFilter for BlocklistFilter {
    fn id(&self) -> &str {
        "customer-blocklist"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::Trust
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        if self.blocked.contains(&candidate.customer_id) {
            return Ok(FilterDecision::Reject {
                reason: "customer is excluded from solicitation".to_string(),
                reason_code: "CUSTOMER_BLOCKED".to_string(),
            });
        }
        Ok(FilterDecision::Pass)
    }
}

/// Rejects candidates outside the program's supported marketplaces.
pub struct MarketplaceFilter {
    supported: BTreeSet<String>,
}

impl MarketplaceFilter {
    pub fn new(supported: BTreeSet<String>) -> Self {
        Self { supported }
    }
}

impl CandidateFilter for MarketplaceFilter {
    fn id(&self) -> &str {
        "marketplace-eligibility"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::Eligibility
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        let marketplace = candidate.marketplace_id().ok_or_else(|| {
            FilterError::Evaluation("candidate carries no marketplace context".to_string())
        })?;

        if !self.supported.is_empty() && !self.supported.contains(marketplace) {
            return Ok(FilterDecision::Reject {
                reason: format!("marketplace '{marketplace}' is not enabled for this program"),
                reason_code: "MARKETPLACE_UNSUPPORTED".to_string(),
            });
        }
        Ok(FilterDecision::Pass)
    }
}

/// Rejects candidates with no eligible delivery channel.
pub struct ChannelEligibilityFilter;

impl CandidateFilter for ChannelEligibilityFilter {
    fn id(&self) -> &str {
        "channel-eligibility"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::Eligibility
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        if candidate.primary_eligible_channel().is_none() {
            return Ok(FilterDecision::Reject {
                reason: "no delivery channel is eligible for this customer".to_string(),
                reason_code: "NO_ELIGIBLE_CHANNEL".to_string(),
            });
        }
        Ok(FilterDecision::Pass)
    }
}

/// Rejects candidates whose solicitation window has not opened or has closed.
pub struct TimingWindowFilter;

impl CandidateFilter for TimingWindowFilter {
    fn id(&self) -> &str {
        "timing-window"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::BusinessRule
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        let Some(window) = candidate.attributes.timing_window else {
            return Ok(FilterDecision::Pass);
        };

        let now = Utc::now();
        if now < window.opens_at {
            return Ok(FilterDecision::Reject {
                reason: format!("solicitation window opens at {}", window.opens_at),
                reason_code: "WINDOW_NOT_OPEN".to_string(),
            });
        }
        if now > window.closes_at {
            return Ok(FilterDecision::Reject {
                reason: format!("solicitation window closed at {}", window.closes_at),
                reason_code: "WINDOW_CLOSED".to_string(),
            });
        }
        Ok(FilterDecision::Pass)
    }
}

/// Rejects candidates whose triggering event is older than the program allows.
pub struct EventRecencyFilter {
    max_age_days: i64,
}

impl EventRecencyFilter {
    pub fn new(max_age_days: i64) -> Self {
        Self { max_age_days }
    }
}

impl CandidateFilter for EventRecencyFilter {
    fn id(&self) -> &str {
        "event-recency"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::BusinessRule
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        let age = Utc::now() - candidate.attributes.event_date;
        if age > chrono::Duration::days(self.max_age_days) {
            return Ok(FilterDecision::Reject {
                reason: format!(
                    "event is {} days old, beyond the {}-day limit",
                    age.num_days(),
                    self.max_age_days
                ),
                reason_code: "STALE_EVENT".to_string(),
            });
        }
        Ok(FilterDecision::Pass)
    }
}

/// Rejects order-based candidates below the configured minimum order value.
pub struct OrderValueFilter {
    minimum: f64,
}

impl OrderValueFilter {
    pub fn new(minimum: f64) -> Self {
        Self { minimum }
    }
}

impl CandidateFilter for OrderValueFilter {
    fn id(&self) -> &str {
        "minimum-order-value"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::BusinessRule
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        match candidate.attributes.order_value {
            Some(value) if value < self.minimum => Ok(FilterDecision::Reject {
                reason: format!(
                    "order value {value:.2} is below the program minimum {:.2}",
                    self.minimum
                ),
                reason_code: "ORDER_VALUE_TOO_LOW".to_string(),
            }),
            // Candidates without an order attribute are not order-based.
            _ => Ok(FilterDecision::Pass),
        }
    }
}

/// Rejects candidates lacking media capability when the program demands it.
pub struct MediaEligibilityFilter;

impl CandidateFilter for MediaEligibilityFilter {
    fn id(&self) -> &str {
        "media-eligibility"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::Quality
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        if candidate.attributes.media_eligible != Some(true) {
            return Ok(FilterDecision::Reject {
                reason: "program requires media-capable candidates".to_string(),
                reason_code: "MEDIA_REQUIRED".to_string(),
            });
        }
        Ok(FilterDecision::Pass)
    }
}

/// Admits at most `limit` candidates per process run.
///
/// The counter is shared across concurrent evaluations; admission order under
/// contention is whichever evaluation increments first.
pub struct CapacityFilter {
    limit: u64,
    admitted: AtomicU64,
}

impl CapacityFilter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            admitted: AtomicU64::new(0),
        }
    }

    /// Administrative reset, e.g. at the start of a new solicitation day.
    pub fn reset(&self) {
        self.admitted.store(0, Ordering::Relaxed);
    }
}

impl CandidateFilter for CapacityFilter {
    fn id(&self) -> &str {
        "daily-capacity"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::Capacity
    }

    fn evaluate(&self, _candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        let admitted = self.admitted.fetch_add(1, Ordering::Relaxed);
        if admitted >= self.limit {
            return Ok(FilterDecision::Reject {
                reason: format!("daily solicitation capacity of {} reached", self.limit),
                reason_code: "CAPACITY_EXHAUSTED".to_string(),
            });
        }
        Ok(FilterDecision::Pass)
    }
}

/// Assemble the standard chain from program settings, enabled rules only,
/// in the order trust -> eligibility -> business rules -> quality -> capacity.
pub fn standard_chain(settings: &FilterSettings) -> FilterChain {
    let mut filters: Vec<Arc<dyn CandidateFilter>> = Vec::new();

    if !settings.blocked_customers.is_empty() {
        filters.push(Arc::new(BlocklistFilter::new(
            settings.blocked_customers.clone(),
        )));
    }
    if !settings.supported_marketplaces.is_empty() {
        filters.push(Arc::new(MarketplaceFilter::new(
            settings.supported_marketplaces.clone(),
        )));
    }
    filters.push(Arc::new(ChannelEligibilityFilter));
    filters.push(Arc::new(TimingWindowFilter));
    filters.push(Arc::new(EventRecencyFilter::new(
        settings.max_event_age_days,
    )));
    if let Some(minimum) = settings.min_order_value {
        filters.push(Arc::new(OrderValueFilter::new(minimum)));
    }
    if settings.require_media_eligible {
        filters.push(Arc::new(MediaEligibilityFilter));
    }
    if let Some(limit) = settings.daily_capacity {
        filters.push(Arc::new(CapacityFilter::new(limit)));
    }

    FilterChain::new(filters)
}
