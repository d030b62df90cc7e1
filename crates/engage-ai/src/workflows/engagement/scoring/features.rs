use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Declared shape of a model input feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Number,
    Text,
    Flag,
    Series,
}

/// Typed feature value retrieved from the feature source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Flag(bool),
    Text(String),
    Series(Vec<f64>),
}

impl FeatureValue {
    pub const fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Number(_) => FeatureKind::Number,
            FeatureValue::Flag(_) => FeatureKind::Flag,
            FeatureValue::Text(_) => FeatureKind::Text,
            FeatureValue::Series(_) => FeatureKind::Series,
        }
    }

    /// Whether the value is usable as its own kind (finite numbers,
    /// non-blank text, finite series members).
    pub fn is_well_formed(&self) -> bool {
        match self {
            FeatureValue::Number(value) => value.is_finite(),
            FeatureValue::Flag(_) => true,
            FeatureValue::Text(value) => !value.trim().is_empty(),
            FeatureValue::Series(values) => values.iter().all(|value| value.is_finite()),
        }
    }
}

/// A feature a model requires, by name and declared kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Failures retrieving features for a candidate.
#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("feature source unavailable: {0}")]
    Unavailable(String),
    #[error("feature source omitted requested features: {0:?}")]
    Incomplete(Vec<String>),
}

/// Source of model input features.
///
/// Implementations must return every requested name or fail with
/// [`FeatureError::Incomplete`]; silently omitting a feature is not allowed.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn features(
        &self,
        customer_id: &str,
        subject_id: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, FeatureValue>, FeatureError>;
}

/// Outcome of validating a retrieved feature map against a model's specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureValidation {
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
}

impl FeatureValidation {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

/// Pure validation: a feature is missing when absent from the map, invalid
/// when present but malformed or of the wrong declared kind.
pub fn validate_features(
    required: &[FeatureSpec],
    features: &BTreeMap<String, FeatureValue>,
) -> FeatureValidation {
    let mut validation = FeatureValidation::default();

    for spec in required {
        match features.get(&spec.name) {
            None => validation.missing.push(spec.name.clone()),
            Some(value) => {
                if value.kind() != spec.kind || !value.is_well_formed() {
                    validation.invalid.push(spec.name.clone());
                }
            }
        }
    }

    validation
}
