use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of context tags attachable to a candidate.
///
/// `Program` and `Marketplace` are mandatory for every candidate; the rest
/// are optional annotations carried through from the source connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Program,
    Marketplace,
    Campaign,
    Segment,
}

/// Typed tag scoping a candidate (e.g., program "reviews", marketplace "US").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub kind: ContextKind,
    pub id: String,
}

impl ContextEntry {
    pub fn new(kind: ContextKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// What the engagement is solicited about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Product,
    Seller,
    Order,
    Brand,
}

impl SubjectKind {
    pub const fn label(self) -> &'static str {
        match self {
            SubjectKind::Product => "product",
            SubjectKind::Seller => "seller",
            SubjectKind::Order => "order",
            SubjectKind::Brand => "brand",
        }
    }
}

impl std::str::FromStr for SubjectKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "product" => Ok(SubjectKind::Product),
            "seller" => Ok(SubjectKind::Seller),
            "order" => Ok(SubjectKind::Order),
            "brand" => Ok(SubjectKind::Brand),
            other => Err(format!("unknown subject kind '{other}'")),
        }
    }
}

/// The thing being solicited about, with optional connector-supplied metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Delivery channels a candidate may be solicited through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Push,
    Sms,
    InApp,
}

impl Channel {
    pub const fn label(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Sms => "sms",
            Channel::InApp => "in_app",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "push" => Ok(Channel::Push),
            "sms" => Ok(Channel::Sms),
            "in_app" | "inapp" => Ok(Channel::InApp),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Solicitation window outside of which the candidate should not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingWindow {
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

/// Business attributes carried by the triggering event or batch record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAttributes {
    pub event_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_window: Option<TimingWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_eligible: Option<bool>,
    pub channel_eligibility: BTreeMap<Channel, bool>,
}

/// Storage and audit metadata; `version` drives optimistic locking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
    pub source_connector_id: String,
    pub workflow_execution_id: String,
}

impl CandidateMetadata {
    /// Metadata for a freshly ingested candidate at version 1.
    pub fn for_new_candidate(
        ttl_days: i64,
        source_connector_id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::days(ttl_days.max(1)),
            version: 1,
            source_connector_id: source_connector_id.into(),
            workflow_execution_id: workflow_execution_id.into(),
        }
    }
}

/// Per-model evaluation of a candidate. Scores from different models are
/// independent and never merged; fallback provenance is recorded under the
/// `fallback_strategy` / `fallback_reason` metadata keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub model_id: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Score {
    pub fn is_fallback(&self) -> bool {
        self.metadata
            .as_ref()
            .is_some_and(|metadata| metadata.contains_key(FALLBACK_STRATEGY_KEY))
    }
}

/// Metadata key naming the fallback strategy that produced a score.
pub const FALLBACK_STRATEGY_KEY: &str = "fallback_strategy";
/// Metadata key carrying the error that triggered a fallback.
pub const FALLBACK_REASON_KEY: &str = "fallback_reason";

/// Append-only record of why a filter rejected the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub filter_id: String,
    pub reason: String,
    pub reason_code: String,
    pub timestamp: DateTime<Utc>,
}

/// The unit of work flowing through every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub customer_id: String,
    pub context: Vec<ContextEntry>,
    pub subject: Subject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, Score>>,
    pub attributes: CandidateAttributes,
    pub metadata: CandidateMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejection_history: Vec<RejectionRecord>,
}

impl Candidate {
    /// Enforce the structural invariants every stage relies on.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.customer_id.trim().is_empty() {
            return Err(DomainError::MissingCustomerId);
        }
        if self.context.is_empty() {
            return Err(DomainError::EmptyContext);
        }
        for (position, entry) in self.context.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(DomainError::BlankContextEntry { position });
            }
        }
        if self.context_id(ContextKind::Program).is_none() {
            return Err(DomainError::MissingContext {
                kind: ContextKind::Program,
            });
        }
        if self.context_id(ContextKind::Marketplace).is_none() {
            return Err(DomainError::MissingContext {
                kind: ContextKind::Marketplace,
            });
        }
        if self.subject.id.trim().is_empty() {
            return Err(DomainError::BlankSubjectId);
        }
        if self.attributes.channel_eligibility.is_empty() {
            return Err(DomainError::EmptyChannelEligibility);
        }
        if self.metadata.version == 0 {
            return Err(DomainError::VersionBelowOne);
        }
        if self.metadata.updated_at < self.metadata.created_at {
            return Err(DomainError::UpdatedBeforeCreated);
        }
        if self.metadata.expires_at <= self.metadata.created_at {
            return Err(DomainError::ExpiryNotAfterCreation);
        }
        Ok(())
    }

    /// First context entry of the given kind, honoring insertion order.
    pub fn context_id(&self, kind: ContextKind) -> Option<&str> {
        self.context
            .iter()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.id.as_str())
    }

    pub fn program_id(&self) -> Option<&str> {
        self.context_id(ContextKind::Program)
    }

    pub fn marketplace_id(&self) -> Option<&str> {
        self.context_id(ContextKind::Marketplace)
    }

    /// Storage identity, extracted from context and subject at write time.
    pub fn identity(&self) -> Result<CandidateIdentity, DomainError> {
        let program_id = self
            .program_id()
            .ok_or(DomainError::MissingContext {
                kind: ContextKind::Program,
            })?
            .to_string();
        let marketplace_id = self
            .marketplace_id()
            .ok_or(DomainError::MissingContext {
                kind: ContextKind::Marketplace,
            })?
            .to_string();

        Ok(CandidateIdentity {
            customer_id: self.customer_id.clone(),
            program_id,
            marketplace_id,
            subject_kind: self.subject.kind,
            subject_id: self.subject.id.clone(),
        })
    }

    /// First channel whose eligibility flag is set, in `Channel` order.
    pub fn primary_eligible_channel(&self) -> Option<Channel> {
        self.attributes
            .channel_eligibility
            .iter()
            .find(|(_, eligible)| **eligible)
            .map(|(channel, _)| *channel)
    }

    /// Highest model score value, 0.0 until scored. Used as the range key of
    /// the program+channel index.
    pub fn top_score(&self) -> f64 {
        self.scores
            .as_ref()
            .map(|scores| {
                scores
                    .values()
                    .map(|score| score.value)
                    .fold(0.0_f64, f64::max)
            })
            .unwrap_or(0.0)
    }

    pub fn record_rejection(&mut self, record: RejectionRecord) {
        self.rejection_history.push(record);
    }
}

/// Key tuple under which a candidate is stored and retrieved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateIdentity {
    pub customer_id: String,
    pub program_id: String,
    pub marketplace_id: String,
    pub subject_kind: SubjectKind,
    pub subject_id: String,
}

impl fmt::Display for CandidateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}#{}#{}",
            self.customer_id,
            self.program_id,
            self.marketplace_id,
            self.subject_kind.label(),
            self.subject_id
        )
    }
}

/// Structural invariant violations detected before a candidate enters a stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("customer id must be non-empty")]
    MissingCustomerId,
    #[error("context must contain at least one entry")]
    EmptyContext,
    #[error("context entry {position} has a blank id")]
    BlankContextEntry { position: usize },
    #[error("context is missing a {kind:?} entry")]
    MissingContext { kind: ContextKind },
    #[error("subject id must be non-empty")]
    BlankSubjectId,
    #[error("channel eligibility map must be non-empty")]
    EmptyChannelEligibility,
    #[error("metadata version must be at least 1")]
    VersionBelowOne,
    #[error("updated_at precedes created_at")]
    UpdatedBeforeCreated,
    #[error("expires_at must be after created_at")]
    ExpiryNotAfterCreation,
}
