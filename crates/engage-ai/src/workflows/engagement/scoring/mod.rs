mod breaker;
mod cache;
mod fallback;
mod features;
mod model;

pub use breaker::{BreakerConfig, BreakerOpenError, BreakerState, CircuitBreaker};
pub use cache::{CacheError, InMemoryScoreCache, ScoreCache, ScoreCacheEntry};
pub use fallback::{FallbackStrategy, StaticFallback};
pub use features::{
    validate_features, FeatureError, FeatureKind, FeatureProvider, FeatureSpec, FeatureValidation,
    FeatureValue,
};
pub use model::{ModelError, ModelHealth, ModelScore, ScoringModel};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::domain::{Candidate, Score, FALLBACK_REASON_KEY, FALLBACK_STRATEGY_KEY};
use crate::config::PipelineConfig;

/// Bounds and defaults for scoring runs.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub max_concurrency: usize,
    pub model_timeout: Duration,
    pub batch_chunk_size: usize,
    pub breaker: BreakerConfig,
    pub static_fallback: StaticFallback,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for ScoringConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_concurrency: config.scoring_concurrency,
            model_timeout: config.model_timeout,
            batch_chunk_size: config.batch_chunk_size,
            breaker: BreakerConfig {
                failure_threshold: config.breaker_failure_threshold,
                success_threshold: config.breaker_success_threshold,
                reset_timeout: config.breaker_reset_timeout,
            },
            static_fallback: StaticFallback {
                value: config.default_score,
                confidence: config.default_confidence,
            },
        }
    }
}

struct ModelSlot {
    model: Arc<dyn ScoringModel>,
    breaker: Arc<CircuitBreaker>,
}

/// Fans one scoring task out per configured model and joins the results into
/// a per-model score map. A model's failure degrades only its own entry; the
/// cascade guarantees every configured model contributes an entry.
pub struct MultiModelScorer {
    slots: Vec<ModelSlot>,
    features: Arc<dyn FeatureProvider>,
    cache: Arc<dyn ScoreCache>,
    limiter: Arc<Semaphore>,
    config: ScoringConfig,
}

impl MultiModelScorer {
    pub fn new(
        models: Vec<Arc<dyn ScoringModel>>,
        features: Arc<dyn FeatureProvider>,
        cache: Arc<dyn ScoreCache>,
        config: ScoringConfig,
    ) -> Self {
        let slots = models
            .into_iter()
            .map(|model| {
                let breaker = Arc::new(CircuitBreaker::new(model.model_id(), config.breaker));
                ModelSlot { model, breaker }
            })
            .collect();

        Self {
            slots,
            features,
            cache,
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.model.model_id().to_string())
            .collect()
    }

    pub fn breaker_state(&self, model_id: &str) -> Option<BreakerState> {
        self.slots
            .iter()
            .find(|slot| slot.model.model_id() == model_id)
            .map(|slot| slot.breaker.state())
    }

    /// Score one candidate across every configured model concurrently,
    /// bounded by the configured concurrency.
    pub async fn score_candidate(&self, candidate: &Candidate) -> BTreeMap<String, Score> {
        let mut tasks = JoinSet::new();

        for slot in &self.slots {
            let model = slot.model.clone();
            let breaker = slot.breaker.clone();
            let features = self.features.clone();
            let cache = self.cache.clone();
            let limiter = self.limiter.clone();
            let candidate = candidate.clone();
            let model_timeout = self.config.model_timeout;
            let static_fallback = self.config.static_fallback;

            tasks.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let score = score_one(
                    model.as_ref(),
                    &breaker,
                    features.as_ref(),
                    cache.as_ref(),
                    &candidate,
                    model_timeout,
                    static_fallback,
                )
                .await;
                (model.model_id().to_string(), score)
            });
        }

        let mut scores = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((model_id, score)) => {
                    scores.insert(model_id, score);
                }
                Err(err) => {
                    warn!(error = %err, "scoring task aborted before returning");
                }
            }
        }

        // A task that died before returning still owes its model an entry.
        for slot in &self.slots {
            let model_id = slot.model.model_id();
            if !scores.contains_key(model_id) {
                scores.insert(
                    model_id.to_string(),
                    static_fallback_score(
                        model_id,
                        self.config.static_fallback,
                        "scoring task aborted",
                    ),
                );
            }
        }

        scores
    }

    /// Score a batch of candidates in fixed-size chunks; each candidate still
    /// runs the independent per-model task algorithm. Results align with the
    /// input by index.
    pub async fn score_batch(&self, candidates: &[Candidate]) -> Vec<BTreeMap<String, Score>> {
        let mut results = Vec::with_capacity(candidates.len());

        for chunk in candidates.chunks(self.config.batch_chunk_size) {
            let chunk_results = future::join_all(
                chunk
                    .iter()
                    .map(|candidate| self.score_candidate(candidate)),
            )
            .await;
            results.extend(chunk_results);
        }

        results
    }

    /// Per-model health, queried independently so one model's failing probe
    /// never colors another model's report.
    pub async fn health_report(&self) -> BTreeMap<String, ModelHealth> {
        let mut report = BTreeMap::new();

        for slot in &self.slots {
            let model_id = slot.model.model_id().to_string();
            let health = match timeout(self.config.model_timeout, slot.model.health()).await {
                Ok(Ok(())) => ModelHealth {
                    model_id: model_id.clone(),
                    healthy: true,
                    detail: None,
                },
                Ok(Err(err)) => ModelHealth {
                    model_id: model_id.clone(),
                    healthy: false,
                    detail: Some(err.to_string()),
                },
                Err(_) => ModelHealth {
                    model_id: model_id.clone(),
                    healthy: false,
                    detail: Some(format!(
                        "health probe timed out after {:?}",
                        self.config.model_timeout
                    )),
                },
            };
            report.insert(model_id, health);
        }

        report
    }
}

#[derive(Debug, thiserror::Error)]
enum ComputeError {
    #[error(transparent)]
    BreakerOpen(#[from] BreakerOpenError),
    #[error(transparent)]
    Features(#[from] FeatureError),
    #[error("features failed validation: missing {missing:?}, invalid {invalid:?}")]
    InvalidFeatures {
        missing: Vec<String>,
        invalid: Vec<String>,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model invocation timed out after {0:?}")]
    Timeout(Duration),
}

async fn score_one(
    model: &dyn ScoringModel,
    breaker: &CircuitBreaker,
    features: &dyn FeatureProvider,
    cache: &dyn ScoreCache,
    candidate: &Candidate,
    model_timeout: Duration,
    static_fallback: StaticFallback,
) -> Score {
    let model_id = model.model_id();

    match cache
        .get(&candidate.customer_id, &candidate.subject.id, model_id)
        .await
    {
        Ok(Some(entry)) => {
            debug!(
                model_id,
                customer_id = %candidate.customer_id,
                "score cache hit"
            );
            return Score {
                model_id: model_id.to_string(),
                value: entry.value,
                confidence: entry.confidence,
                timestamp: entry.timestamp,
                metadata: None,
            };
        }
        Ok(None) => {}
        Err(err) => {
            debug!(model_id, error = %err, "score cache read failed; treating as miss");
        }
    }

    match compute_score(model, breaker, features, candidate, model_timeout).await {
        Ok(score) => {
            let entry = ScoreCacheEntry::new(
                candidate.customer_id.clone(),
                candidate.subject.id.clone(),
                model_id,
                model.model_version(),
                score.value,
                score.confidence,
                cache.ttl_for(model_id),
            );
            if let Err(err) = cache.put(entry).await {
                debug!(model_id, error = %err, "score cache write failed; continuing");
            }
            score
        }
        Err(err) => {
            debug!(
                model_id,
                customer_id = %candidate.customer_id,
                workflow_execution_id = %candidate.metadata.workflow_execution_id,
                error = %err,
                "model scoring failed; entering fallback cascade"
            );
            fallback::resolve_fallback(model, cache, candidate, static_fallback, &err.to_string())
                .await
        }
    }
}

async fn compute_score(
    model: &dyn ScoringModel,
    breaker: &CircuitBreaker,
    features: &dyn FeatureProvider,
    candidate: &Candidate,
    model_timeout: Duration,
) -> Result<Score, ComputeError> {
    breaker.try_acquire()?;

    let names: Vec<String> = model
        .required_features()
        .iter()
        .map(|spec| spec.name.clone())
        .collect();
    let feature_map = features
        .features(&candidate.customer_id, &candidate.subject.id, &names)
        .await?;

    let validation = validate_features(model.required_features(), &feature_map);
    if !validation.is_valid() {
        return Err(ComputeError::InvalidFeatures {
            missing: validation.missing,
            invalid: validation.invalid,
        });
    }

    match timeout(model_timeout, model.score(candidate, &feature_map)).await {
        Ok(Ok(result)) => {
            breaker.record_success();
            Ok(Score {
                model_id: model.model_id().to_string(),
                value: result.value,
                confidence: result.confidence.map(|c| c.clamp(0.0, 1.0)),
                timestamp: Utc::now(),
                metadata: None,
            })
        }
        Ok(Err(err)) => {
            breaker.record_failure();
            Err(ComputeError::Model(err))
        }
        Err(_) => {
            breaker.record_failure();
            Err(ComputeError::Timeout(model_timeout))
        }
    }
}

fn static_fallback_score(model_id: &str, fallback: StaticFallback, trigger: &str) -> Score {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        FALLBACK_STRATEGY_KEY.to_string(),
        FallbackStrategy::StaticDefault.label().to_string(),
    );
    metadata.insert(FALLBACK_REASON_KEY.to_string(), trigger.to_string());

    Score {
        model_id: model_id.to_string(),
        value: fallback.value,
        confidence: Some(fallback.confidence.clamp(0.0, 1.0)),
        timestamp: Utc::now(),
        metadata: Some(metadata),
    }
}
