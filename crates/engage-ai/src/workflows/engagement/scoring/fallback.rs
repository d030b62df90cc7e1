use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use super::cache::ScoreCache;
use super::model::ScoringModel;
use crate::workflows::engagement::domain::{
    Candidate, Score, FALLBACK_REASON_KEY, FALLBACK_STRATEGY_KEY,
};

/// Source a degraded score came from, recorded on the score itself so
/// analytics can separate real scores from fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    CachedScore,
    ModelDefault,
    StaticDefault,
}

impl FallbackStrategy {
    pub const fn label(self) -> &'static str {
        match self {
            FallbackStrategy::CachedScore => "cached_score",
            FallbackStrategy::ModelDefault => "model_default",
            FallbackStrategy::StaticDefault => "static_default",
        }
    }
}

/// Statically configured last-resort score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticFallback {
    pub value: f64,
    pub confidence: f64,
}

/// Resolve a degraded score after a model failed: a still-valid cached score
/// wins, then the model's own declared fallback, then the static default.
/// Always yields a score; the cascade cannot fail.
pub(crate) async fn resolve_fallback(
    model: &dyn ScoringModel,
    cache: &dyn ScoreCache,
    candidate: &Candidate,
    static_default: StaticFallback,
    trigger: &str,
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
                "serving cached score as fallback"
            );
            return tagged_score(
                model_id,
                entry.value,
                entry.confidence,
                FallbackStrategy::CachedScore,
                trigger,
            );
        }
        Ok(None) => {}
        Err(err) => {
            debug!(model_id, error = %err, "fallback cache read failed; continuing cascade");
        }
    }

    if let Some(declared) = model.fallback_score() {
        return tagged_score(
            model_id,
            declared.value,
            declared.confidence,
            FallbackStrategy::ModelDefault,
            trigger,
        );
    }

    tagged_score(
        model_id,
        static_default.value,
        Some(static_default.confidence),
        FallbackStrategy::StaticDefault,
        trigger,
    )
}

fn tagged_score(
    model_id: &str,
    value: f64,
    confidence: Option<f64>,
    strategy: FallbackStrategy,
    trigger: &str,
) -> Score {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        FALLBACK_STRATEGY_KEY.to_string(),
        strategy.label().to_string(),
    );
    metadata.insert(FALLBACK_REASON_KEY.to_string(), trigger.to_string());

    Score {
        model_id: model_id.to_string(),
        value,
        confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
        timestamp: Utc::now(),
        metadata: Some(metadata),
    }
}
