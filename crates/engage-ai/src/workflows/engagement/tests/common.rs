use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::workflows::engagement::domain::{
    Candidate, CandidateAttributes, CandidateMetadata, Channel, ContextEntry, ContextKind,
    Subject, SubjectKind,
};
use crate::workflows::engagement::filters::rules::standard_chain;
use crate::workflows::engagement::filters::{
    CandidateFilter, FilterCategory, FilterDecision, FilterError, FilterSettings,
};
use crate::workflows::engagement::repository::{
    BatchPutOutcome, CandidateRepository, IndexQuery, InMemoryStore, KeyValueStore, PutCondition,
    RepositoryConfig, StoreError, StoredCandidate,
};
use crate::workflows::engagement::scoring::{
    BreakerConfig, CacheError, FeatureError, FeatureKind, FeatureProvider, FeatureSpec,
    FeatureValue, InMemoryScoreCache, ModelError, ModelScore, MultiModelScorer, ScoreCache,
    ScoreCacheEntry, ScoringConfig, ScoringModel, StaticFallback,
};
use crate::workflows::engagement::service::EngagementPipelineService;

pub(super) fn candidate() -> Candidate {
    candidate_for("C1", "P1")
}

pub(super) fn candidate_for(customer_id: &str, subject_id: &str) -> Candidate {
    let mut channel_eligibility = BTreeMap::new();
    channel_eligibility.insert(Channel::Email, true);
    channel_eligibility.insert(Channel::Push, false);

    Candidate {
        customer_id: customer_id.to_string(),
        context: vec![
            ContextEntry::new(ContextKind::Program, "reviews"),
            ContextEntry::new(ContextKind::Marketplace, "US"),
        ],
        subject: Subject {
            kind: SubjectKind::Product,
            id: subject_id.to_string(),
            metadata: None,
        },
        scores: None,
        attributes: CandidateAttributes {
            event_date: Utc::now() - chrono::Duration::days(2),
            delivery_date: None,
            timing_window: None,
            order_value: Some(49.99),
            media_eligible: Some(true),
            channel_eligibility,
        },
        metadata: CandidateMetadata::for_new_candidate(30, "orders-connector", "exec-001"),
        rejection_history: Vec::new(),
    }
}

pub(super) fn filter_settings() -> FilterSettings {
    FilterSettings {
        blocked_customers: BTreeSet::from(["C-blocked".to_string()]),
        supported_marketplaces: BTreeSet::from(["US".to_string(), "CA".to_string()]),
        min_order_value: Some(10.0),
        max_event_age_days: 30,
        require_media_eligible: false,
        daily_capacity: None,
    }
}

pub(super) fn scoring_config() -> ScoringConfig {
    ScoringConfig {
        max_concurrency: 4,
        model_timeout: Duration::from_millis(200),
        batch_chunk_size: 10,
        breaker: BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(50),
        },
        static_fallback: StaticFallback {
            value: 0.1,
            confidence: 0.0,
        },
    }
}

pub(super) fn feature_map() -> BTreeMap<String, FeatureValue> {
    let mut features = BTreeMap::new();
    features.insert("order_count".to_string(), FeatureValue::Number(7.0));
    features.insert("review_rate".to_string(), FeatureValue::Number(0.4));
    features.insert("opted_in".to_string(), FeatureValue::Flag(true));
    features
}

pub(super) struct StaticFeatureProvider {
    features: BTreeMap<String, FeatureValue>,
}

impl StaticFeatureProvider {
    pub(super) fn new(features: BTreeMap<String, FeatureValue>) -> Self {
        Self { features }
    }
}

#[async_trait]
impl FeatureProvider for StaticFeatureProvider {
    async fn features(
        &self,
        _customer_id: &str,
        _subject_id: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, FeatureValue>, FeatureError> {
        let mut result = BTreeMap::new();
        let mut missing = Vec::new();
        for name in names {
            match self.features.get(name) {
                Some(value) => {
                    result.insert(name.clone(), value.clone());
                }
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(FeatureError::Incomplete(missing));
        }
        Ok(result)
    }
}

pub(super) struct UnavailableFeatureProvider;

#[async_trait]
impl FeatureProvider for UnavailableFeatureProvider {
    async fn features(
        &self,
        _customer_id: &str,
        _subject_id: &str,
        _names: &[String],
    ) -> Result<BTreeMap<String, FeatureValue>, FeatureError> {
        Err(FeatureError::Unavailable("feature store offline".to_string()))
    }
}

pub(super) struct StubModel {
    id: String,
    value: f64,
    required: Vec<FeatureSpec>,
    invocations: AtomicU32,
}

impl StubModel {
    pub(super) fn new(id: &str, value: f64) -> Self {
        Self {
            id: id.to_string(),
            value,
            required: vec![FeatureSpec::new("order_count", FeatureKind::Number)],
            invocations: AtomicU32::new(0),
        }
    }

    pub(super) fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ScoringModel for StubModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn model_version(&self) -> &str {
        "1.0"
    }

    fn required_features(&self) -> &[FeatureSpec] {
        &self.required
    }

    async fn score(
        &self,
        _candidate: &Candidate,
        _features: &BTreeMap<String, FeatureValue>,
    ) -> Result<ModelScore, ModelError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        Ok(ModelScore {
            value: self.value,
            confidence: Some(0.9),
        })
    }
}

pub(super) struct FailingModel {
    id: String,
    declared_fallback: Option<ModelScore>,
    required: Vec<FeatureSpec>,
}

impl FailingModel {
    pub(super) fn new(id: &str, declared_fallback: Option<ModelScore>) -> Self {
        Self {
            id: id.to_string(),
            declared_fallback,
            required: vec![FeatureSpec::new("order_count", FeatureKind::Number)],
        }
    }
}

#[async_trait]
impl ScoringModel for FailingModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn model_version(&self) -> &str {
        "1.0"
    }

    fn required_features(&self) -> &[FeatureSpec] {
        &self.required
    }

    async fn score(
        &self,
        _candidate: &Candidate,
        _features: &BTreeMap<String, FeatureValue>,
    ) -> Result<ModelScore, ModelError> {
        Err(ModelError::Invocation("model exploded".to_string()))
    }

    fn fallback_score(&self) -> Option<ModelScore> {
        self.declared_fallback
    }

    async fn health(&self) -> Result<(), ModelError> {
        Err(ModelError::Unavailable("endpoint down".to_string()))
    }
}

pub(super) struct SlowModel {
    id: String,
    delay: Duration,
    required: Vec<FeatureSpec>,
}

impl SlowModel {
    pub(super) fn new(id: &str, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            delay,
            required: vec![FeatureSpec::new("order_count", FeatureKind::Number)],
        }
    }
}

#[async_trait]
impl ScoringModel for SlowModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn model_version(&self) -> &str {
        "1.0"
    }

    fn required_features(&self) -> &[FeatureSpec] {
        &self.required
    }

    async fn score(
        &self,
        _candidate: &Candidate,
        _features: &BTreeMap<String, FeatureValue>,
    ) -> Result<ModelScore, ModelError> {
        tokio::time::sleep(self.delay).await;
        Ok(ModelScore {
            value: 0.99,
            confidence: Some(1.0),
        })
    }
}

pub(super) struct BrokenCache;

#[async_trait]
impl ScoreCache for BrokenCache {
    async fn get(
        &self,
        _customer_id: &str,
        _subject_id: &str,
        _model_id: &str,
    ) -> Result<Option<ScoreCacheEntry>, CacheError> {
        Err(CacheError::Unavailable("cache offline".to_string()))
    }

    async fn put(&self, _entry: ScoreCacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("cache offline".to_string()))
    }

    fn ttl_for(&self, _model_id: &str) -> Duration {
        Duration::from_secs(60)
    }
}

/// Store that reports every item unprocessed for the first N batch calls.
pub(super) struct ThrottlingStore {
    inner: InMemoryStore,
    failures_remaining: AtomicU32,
}

impl ThrottlingStore {
    pub(super) fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl KeyValueStore for ThrottlingStore {
    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }

    async fn put(&self, item: StoredCandidate, condition: PutCondition) -> Result<(), StoreError> {
        self.inner.put(item, condition).await
    }

    async fn get(
        &self,
        key: &crate::workflows::engagement::domain::CandidateIdentity,
    ) -> Result<Option<StoredCandidate>, StoreError> {
        self.inner.get(key).await
    }

    async fn delete(
        &self,
        key: &crate::workflows::engagement::domain::CandidateIdentity,
    ) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    async fn batch_put(&self, items: Vec<StoredCandidate>) -> Result<BatchPutOutcome, StoreError> {
        let remaining = self.failures_remaining.load(Ordering::Relaxed);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
            return Ok(BatchPutOutcome { unprocessed: items });
        }
        self.inner.batch_put(items).await
    }

    async fn query(&self, query: IndexQuery) -> Result<Vec<StoredCandidate>, StoreError> {
        self.inner.query(query).await
    }
}

pub(super) struct ThrowingFilter;

impl CandidateFilter for ThrowingFilter {
    fn id(&self) -> &str {
        "throwing-filter"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::Quality
    }

    fn evaluate(&self, _candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        Err(FilterError::Unavailable("rule source offline".to_string()))
    }
}

/// Filter that records whether it ran; used to prove chain short-circuiting.
pub(super) struct ProbeFilter {
    pub(super) evaluated: Arc<AtomicBool>,
}

impl ProbeFilter {
    pub(super) fn new() -> (Self, Arc<AtomicBool>) {
        let evaluated = Arc::new(AtomicBool::new(false));
        (
            Self {
                evaluated: evaluated.clone(),
            },
            evaluated,
        )
    }
}

impl CandidateFilter for ProbeFilter {
    fn id(&self) -> &str {
        "probe-filter"
    }

    fn category(&self) -> FilterCategory {
        FilterCategory::BusinessRule
    }

    fn evaluate(&self, _candidate: &Candidate) -> Result<FilterDecision, FilterError> {
        self.evaluated.store(true, Ordering::Relaxed);
        Ok(FilterDecision::Pass)
    }
}

pub(super) fn build_scorer(models: Vec<Arc<dyn ScoringModel>>) -> Arc<MultiModelScorer> {
    build_scorer_with_cache(
        models,
        Arc::new(InMemoryScoreCache::new(Duration::from_secs(60))),
    )
}

pub(super) fn build_scorer_with_cache(
    models: Vec<Arc<dyn ScoringModel>>,
    cache: Arc<dyn ScoreCache>,
) -> Arc<MultiModelScorer> {
    Arc::new(MultiModelScorer::new(
        models,
        Arc::new(StaticFeatureProvider::new(feature_map())),
        cache,
        scoring_config(),
    ))
}

pub(super) fn repository_config() -> RepositoryConfig {
    RepositoryConfig {
        retry_attempts: 2,
        retry_base_delay: Duration::from_millis(1),
    }
}

pub(super) fn build_repository() -> (Arc<CandidateRepository<InMemoryStore>>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let repository = Arc::new(CandidateRepository::new(store.clone(), repository_config()));
    (repository, store)
}

pub(super) fn build_service() -> (
    EngagementPipelineService<InMemoryStore>,
    Arc<CandidateRepository<InMemoryStore>>,
) {
    let (repository, _store) = build_repository();
    let scorer = build_scorer(vec![Arc::new(StubModel::new("m1", 0.75))]);
    let chain = standard_chain(&filter_settings());
    let service = EngagementPipelineService::new(chain, scorer, repository.clone());
    (service, repository)
}
