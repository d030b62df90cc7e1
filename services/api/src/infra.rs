use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use engage_ai::config::PipelineConfig;
use engage_ai::workflows::engagement::domain::Candidate;
use engage_ai::workflows::engagement::filters::rules::standard_chain;
use engage_ai::workflows::engagement::scoring::{
    FeatureError, FeatureKind, FeatureProvider, FeatureSpec, FeatureValue, InMemoryScoreCache,
    ModelError, ModelScore, MultiModelScorer, ScoringConfig, ScoringModel,
};
use engage_ai::workflows::engagement::{
    CandidateRepository, EngagementPipelineService, FilterSettings, InMemoryStore,
    RepositoryConfig,
};
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Deterministic feature source standing in for the external feature store.
/// Values are derived from the identifiers so demo runs are reproducible.
pub(crate) struct SyntheticFeatureProvider;

#[async_trait]
impl FeatureProvider for SyntheticFeatureProvider {
    async fn features(
        &self,
        customer_id: &str,
        subject_id: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, FeatureValue>, FeatureError> {
        let seed = (customer_id.len() + subject_id.len()) as f64;
        let mut features = BTreeMap::new();
        for name in names {
            let value = match name.as_str() {
                "order_count" => FeatureValue::Number(1.0 + (seed % 9.0)),
                "review_rate" => FeatureValue::Number((seed % 10.0) / 10.0),
                "opted_in" => FeatureValue::Flag(true),
                other => {
                    return Err(FeatureError::Incomplete(vec![other.to_string()]));
                }
            };
            features.insert(name.clone(), value);
        }
        Ok(features)
    }
}

/// Demo model estimating how likely a customer is to respond at all.
pub(crate) struct ResponsePropensityModel {
    required: Vec<FeatureSpec>,
}

impl ResponsePropensityModel {
    pub(crate) fn new() -> Self {
        Self {
            required: vec![
                FeatureSpec::new("order_count", FeatureKind::Number),
                FeatureSpec::new("review_rate", FeatureKind::Number),
            ],
        }
    }
}

#[async_trait]
impl ScoringModel for ResponsePropensityModel {
    fn model_id(&self) -> &str {
        "response-propensity"
    }

    fn model_version(&self) -> &str {
        "2024.06"
    }

    fn required_features(&self) -> &[FeatureSpec] {
        &self.required
    }

    async fn score(
        &self,
        _candidate: &Candidate,
        features: &BTreeMap<String, FeatureValue>,
    ) -> Result<ModelScore, ModelError> {
        let order_count = match features.get("order_count") {
            Some(FeatureValue::Number(value)) => *value,
            _ => return Err(ModelError::Invocation("order_count missing".to_string())),
        };
        let review_rate = match features.get("review_rate") {
            Some(FeatureValue::Number(value)) => *value,
            _ => return Err(ModelError::Invocation("review_rate missing".to_string())),
        };

        let value = (0.15 + 0.05 * order_count + 0.4 * review_rate).clamp(0.0, 1.0);
        Ok(ModelScore {
            value,
            confidence: Some(0.85),
        })
    }

    fn fallback_score(&self) -> Option<ModelScore> {
        Some(ModelScore {
            value: 0.2,
            confidence: Some(0.2),
        })
    }
}

/// Demo model estimating the chance of a media-rich response.
pub(crate) struct MediaPropensityModel {
    required: Vec<FeatureSpec>,
}

impl MediaPropensityModel {
    pub(crate) fn new() -> Self {
        Self {
            required: vec![FeatureSpec::new("order_count", FeatureKind::Number)],
        }
    }
}

#[async_trait]
impl ScoringModel for MediaPropensityModel {
    fn model_id(&self) -> &str {
        "media-propensity"
    }

    fn model_version(&self) -> &str {
        "2024.02"
    }

    fn required_features(&self) -> &[FeatureSpec] {
        &self.required
    }

    async fn score(
        &self,
        candidate: &Candidate,
        features: &BTreeMap<String, FeatureValue>,
    ) -> Result<ModelScore, ModelError> {
        let order_count = match features.get("order_count") {
            Some(FeatureValue::Number(value)) => *value,
            _ => return Err(ModelError::Invocation("order_count missing".to_string())),
        };

        let media_bonus = if candidate.attributes.media_eligible == Some(true) {
            0.25
        } else {
            0.0
        };
        Ok(ModelScore {
            value: (0.1 + 0.03 * order_count + media_bonus).clamp(0.0, 1.0),
            confidence: Some(0.7),
        })
    }
}

pub(crate) fn default_filter_settings() -> FilterSettings {
    FilterSettings::default()
}

/// Wire the full pipeline against in-process collaborators.
pub(crate) fn build_pipeline_service(
    pipeline: &PipelineConfig,
) -> EngagementPipelineService<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let repository = Arc::new(CandidateRepository::new(
        store,
        RepositoryConfig::from(pipeline),
    ));

    let cache = Arc::new(InMemoryScoreCache::new(pipeline.score_cache_ttl));
    let models: Vec<Arc<dyn ScoringModel>> = vec![
        Arc::new(ResponsePropensityModel::new()),
        Arc::new(MediaPropensityModel::new()),
    ];
    let scorer = Arc::new(MultiModelScorer::new(
        models,
        Arc::new(SyntheticFeatureProvider),
        cache,
        ScoringConfig::from(pipeline),
    ));

    let chain = standard_chain(&default_filter_settings());
    EngagementPipelineService::new(chain, scorer, repository)
}
