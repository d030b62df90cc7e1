use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Program-level rule configuration driving the standard filter chain.
///
/// Optional fields switch their rule off entirely; the chain is assembled
/// from enabled rules only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Customers excluded from solicitation.
    #[serde(default)]
    pub blocked_customers: BTreeSet<String>,
    /// Marketplaces the program runs in; empty means all marketplaces.
    #[serde(default)]
    pub supported_marketplaces: BTreeSet<String>,
    /// Minimum order value required for order-based programs.
    #[serde(default)]
    pub min_order_value: Option<f64>,
    /// Events older than this are considered stale.
    pub max_event_age_days: i64,
    /// Whether the program only solicits media-capable candidates.
    #[serde(default)]
    pub require_media_eligible: bool,
    /// Per-process cap on candidates admitted per run, if any.
    #[serde(default)]
    pub daily_capacity: Option<u64>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            blocked_customers: BTreeSet::new(),
            supported_marketplaces: BTreeSet::new(),
            min_order_value: None,
            max_event_age_days: 30,
            require_media_eligible: false,
            daily_capacity: None,
        }
    }
}

/// Marketplace-level overrides layered on top of a program's settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOverrides {
    #[serde(default)]
    pub blocked_customers: Option<BTreeSet<String>>,
    #[serde(default)]
    pub supported_marketplaces: Option<BTreeSet<String>>,
    #[serde(default)]
    pub min_order_value: Option<f64>,
    #[serde(default)]
    pub max_event_age_days: Option<i64>,
    #[serde(default)]
    pub require_media_eligible: Option<bool>,
    #[serde(default)]
    pub daily_capacity: Option<u64>,
}

/// Merge marketplace overrides onto program settings. Pure and total: the
/// base is never mutated and every override field either replaces its base
/// counterpart or leaves it untouched.
pub fn apply_overrides(base: &FilterSettings, overrides: &FilterOverrides) -> FilterSettings {
    FilterSettings {
        blocked_customers: overrides
            .blocked_customers
            .clone()
            .unwrap_or_else(|| base.blocked_customers.clone()),
        supported_marketplaces: overrides
            .supported_marketplaces
            .clone()
            .unwrap_or_else(|| base.supported_marketplaces.clone()),
        min_order_value: overrides.min_order_value.or(base.min_order_value),
        max_event_age_days: overrides
            .max_event_age_days
            .unwrap_or(base.max_event_age_days),
        require_media_eligible: overrides
            .require_media_eligible
            .unwrap_or(base.require_media_eligible),
        daily_capacity: overrides.daily_capacity.or(base.daily_capacity),
    }
}
