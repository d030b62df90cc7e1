use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::features::{FeatureSpec, FeatureValue};
use crate::workflows::engagement::domain::Candidate;

/// Raw output of a model invocation before it becomes a [`Score`].
///
/// [`Score`]: crate::workflows::engagement::domain::Score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelScore {
    pub value: f64,
    pub confidence: Option<f64>,
}

/// Failures surfaced by a scoring model. Each failure is confined to its own
/// model's task; siblings never observe it.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model invocation failed: {0}")]
    Invocation(String),
    #[error("model endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Opaque scoring function consumed through this interface; the pipeline
/// never looks inside a model.
#[async_trait]
pub trait ScoringModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Version string recorded alongside cached scores.
    fn model_version(&self) -> &str;

    /// Features that must be present and valid before invocation.
    fn required_features(&self) -> &[FeatureSpec];

    async fn score(
        &self,
        candidate: &Candidate,
        features: &BTreeMap<String, FeatureValue>,
    ) -> Result<ModelScore, ModelError>;

    /// Conservative score the model declares for use when it is unavailable.
    fn fallback_score(&self) -> Option<ModelScore> {
        None
    }

    /// Liveness probe; the default assumes a healthy in-process model.
    async fn health(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Health snapshot reported per model, never aggregated across models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model_id: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
