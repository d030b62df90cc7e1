use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::common::{
    build_scorer, build_scorer_with_cache, candidate, candidate_for, feature_map, scoring_config,
    BrokenCache, FailingModel, SlowModel, StaticFeatureProvider, StubModel,
    UnavailableFeatureProvider,
};
use crate::workflows::engagement::domain::{FALLBACK_REASON_KEY, FALLBACK_STRATEGY_KEY};
use crate::workflows::engagement::scoring::{
    validate_features, BreakerState, FeatureKind, FeatureSpec, FeatureValue, InMemoryScoreCache,
    ModelScore, MultiModelScorer, ScoreCache, ScoreCacheEntry,
};

fn fallback_strategy(score: &crate::workflows::engagement::domain::Score) -> Option<&str> {
    score
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(FALLBACK_STRATEGY_KEY))
        .map(String::as_str)
}

#[tokio::test]
async fn healthy_model_produces_a_real_score() {
    let scorer = build_scorer(vec![Arc::new(StubModel::new("m1", 0.75))]);
    let scores = scorer.score_candidate(&candidate()).await;

    let score = scores.get("m1").expect("score present");
    assert_eq!(score.value, 0.75);
    assert_eq!(score.confidence, Some(0.9));
    assert!(!score.is_fallback());
}

#[tokio::test]
async fn one_failing_model_never_disturbs_its_siblings() {
    let scorer = build_scorer(vec![
        Arc::new(FailingModel::new("m1", None)),
        Arc::new(StubModel::new("m2", 0.6)),
        Arc::new(StubModel::new("m3", 0.8)),
    ]);

    let scores = scorer.score_candidate(&candidate()).await;

    assert_eq!(scores.len(), 3, "every configured model contributes an entry");
    assert_eq!(fallback_strategy(&scores["m1"]), Some("static_default"));
    assert_eq!(scores["m2"].value, 0.6);
    assert!(!scores["m2"].is_fallback());
    assert_eq!(scores["m3"].value, 0.8);
    assert!(!scores["m3"].is_fallback());
}

#[tokio::test]
async fn cache_hit_short_circuits_model_invocation() {
    let cache = Arc::new(InMemoryScoreCache::new(Duration::from_secs(60)));
    let entry = ScoreCacheEntry::new("C1", "P1", "m1", "1.0", 0.33, Some(0.5), cache.ttl_for("m1"));
    cache.put(entry).await.expect("seed cache");

    let model = Arc::new(StubModel::new("m1", 0.75));
    let scorer = build_scorer_with_cache(vec![model.clone()], cache);

    let scores = scorer.score_candidate(&candidate()).await;

    assert_eq!(scores["m1"].value, 0.33);
    assert_eq!(model.invocations(), 0, "model must not be invoked on a hit");
}

#[tokio::test]
async fn computed_scores_are_written_back_to_the_cache() {
    let cache = Arc::new(InMemoryScoreCache::new(Duration::from_secs(60)));
    let scorer = build_scorer_with_cache(vec![Arc::new(StubModel::new("m1", 0.75))], cache.clone());

    scorer.score_candidate(&candidate()).await;

    let entry = cache
        .get("C1", "P1", "m1")
        .await
        .expect("cache read")
        .expect("entry written back");
    assert_eq!(entry.value, 0.75);
    assert_eq!(entry.model_version, "1.0");
}

/// Fails its first read, then behaves like the wrapped cache. Models the
/// transient cache outage that forces a compute which then fails.
struct FlakyOnceCache {
    inner: InMemoryScoreCache,
    failed_once: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl ScoreCache for FlakyOnceCache {
    async fn get(
        &self,
        customer_id: &str,
        subject_id: &str,
        model_id: &str,
    ) -> Result<
        Option<ScoreCacheEntry>,
        crate::workflows::engagement::scoring::CacheError,
    > {
        if !self
            .failed_once
            .swap(true, std::sync::atomic::Ordering::Relaxed)
        {
            return Err(crate::workflows::engagement::scoring::CacheError::Unavailable(
                "transient cache outage".to_string(),
            ));
        }
        self.inner.get(customer_id, subject_id, model_id).await
    }

    async fn put(
        &self,
        entry: ScoreCacheEntry,
    ) -> Result<(), crate::workflows::engagement::scoring::CacheError> {
        self.inner.put(entry).await
    }

    fn ttl_for(&self, model_id: &str) -> Duration {
        self.inner.ttl_for(model_id)
    }
}

#[tokio::test]
async fn failed_model_falls_back_to_a_cached_score_first() {
    let inner = InMemoryScoreCache::new(Duration::from_secs(60));
    let entry = ScoreCacheEntry::new("C1", "P1", "m1", "1.0", 0.41, Some(0.7), Duration::from_secs(60));
    inner.put(entry).await.expect("seed cache");

    // The first read fails (treated as a miss), the model then fails, and
    // the cascade serves the still-cached score as a tagged fallback.
    let cache = Arc::new(FlakyOnceCache {
        inner,
        failed_once: std::sync::atomic::AtomicBool::new(false),
    });
    let scorer = build_scorer_with_cache(
        vec![Arc::new(FailingModel::new(
            "m1",
            Some(ModelScore {
                value: 0.2,
                confidence: Some(0.1),
            }),
        ))],
        cache,
    );

    let scores = scorer.score_candidate(&candidate()).await;

    let score = &scores["m1"];
    assert_eq!(score.value, 0.41);
    assert_eq!(score.confidence, Some(0.7));
    assert_eq!(fallback_strategy(score), Some("cached_score"));
}

#[tokio::test]
async fn failed_model_uses_its_declared_fallback_when_cache_is_cold() {
    let scorer = build_scorer(vec![Arc::new(FailingModel::new(
        "m1",
        Some(ModelScore {
            value: 0.2,
            confidence: Some(0.1),
        }),
    ))]);

    let scores = scorer.score_candidate(&candidate()).await;

    let score = &scores["m1"];
    assert_eq!(score.value, 0.2);
    assert_eq!(fallback_strategy(score), Some("model_default"));
    let reason = score
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(FALLBACK_REASON_KEY))
        .expect("trigger recorded");
    assert!(reason.contains("model exploded"));
}

#[tokio::test]
async fn cascade_bottoms_out_at_the_static_default() {
    let scorer = build_scorer(vec![Arc::new(FailingModel::new("m1", None))]);

    let scores = scorer.score_candidate(&candidate()).await;

    let score = &scores["m1"];
    assert_eq!(score.value, 0.1);
    assert_eq!(score.confidence, Some(0.0));
    assert_eq!(fallback_strategy(score), Some("static_default"));
}

#[tokio::test]
async fn timed_out_model_is_treated_as_failed() {
    let scorer = build_scorer(vec![Arc::new(SlowModel::new(
        "m-slow",
        Duration::from_millis(500),
    ))]);

    let scores = scorer.score_candidate(&candidate()).await;

    let score = &scores["m-slow"];
    assert_eq!(fallback_strategy(score), Some("static_default"));
    let reason = score
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(FALLBACK_REASON_KEY))
        .expect("trigger recorded");
    assert!(reason.contains("timed out"));
}

#[tokio::test]
async fn feature_retrieval_failure_routes_to_fallback() {
    let scorer = Arc::new(MultiModelScorer::new(
        vec![Arc::new(StubModel::new("m1", 0.75))],
        Arc::new(UnavailableFeatureProvider),
        Arc::new(InMemoryScoreCache::new(Duration::from_secs(60))),
        scoring_config(),
    ));

    let scores = scorer.score_candidate(&candidate()).await;
    assert_eq!(fallback_strategy(&scores["m1"]), Some("static_default"));
}

#[tokio::test]
async fn invalid_features_stop_scoring_before_invocation() {
    let mut features = feature_map();
    features.insert("order_count".to_string(), FeatureValue::Number(f64::NAN));

    let model = Arc::new(StubModel::new("m1", 0.75));
    let scorer = Arc::new(MultiModelScorer::new(
        vec![model.clone()],
        Arc::new(StaticFeatureProvider::new(features)),
        Arc::new(InMemoryScoreCache::new(Duration::from_secs(60))),
        scoring_config(),
    ));

    let scores = scorer.score_candidate(&candidate()).await;

    assert_eq!(model.invocations(), 0, "invalid features must not reach the model");
    assert_eq!(fallback_strategy(&scores["m1"]), Some("static_default"));
}

#[tokio::test]
async fn broken_cache_is_tolerated_as_a_miss() {
    let scorer = build_scorer_with_cache(
        vec![Arc::new(StubModel::new("m1", 0.75))],
        Arc::new(BrokenCache),
    );

    let scores = scorer.score_candidate(&candidate()).await;

    assert_eq!(scores["m1"].value, 0.75);
    assert!(!scores["m1"].is_fallback());
}

#[tokio::test]
async fn repeated_failures_trip_the_model_breaker_open() {
    let scorer = build_scorer(vec![Arc::new(FailingModel::new("m1", None))]);
    let candidate = candidate();

    // failure_threshold is 3 in the test config.
    for _ in 0..3 {
        scorer.score_candidate(&candidate).await;
    }

    assert_eq!(scorer.breaker_state("m1"), Some(BreakerState::Open));

    // With the breaker open the model is skipped entirely and the fallback
    // reason names the breaker.
    let scores = scorer.score_candidate(&candidate).await;
    let reason = scores["m1"]
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(FALLBACK_REASON_KEY))
        .expect("trigger recorded");
    assert!(reason.contains("circuit breaker"));
}

#[tokio::test]
async fn health_report_isolates_failing_probes() {
    let scorer = build_scorer(vec![
        Arc::new(FailingModel::new("m-down", None)),
        Arc::new(StubModel::new("m-up", 0.5)),
    ]);

    let report = scorer.health_report().await;

    assert_eq!(report.len(), 2);
    assert!(!report["m-down"].healthy);
    assert!(report["m-down"]
        .detail
        .as_deref()
        .expect("detail recorded")
        .contains("endpoint down"));
    assert!(report["m-up"].healthy);
    assert!(report["m-up"].detail.is_none());
}

#[tokio::test]
async fn batch_scoring_aligns_results_with_input_order() {
    let scorer = build_scorer(vec![Arc::new(StubModel::new("m1", 0.75))]);
    let candidates = vec![
        candidate_for("C1", "P1"),
        candidate_for("C2", "P2"),
        candidate_for("C3", "P3"),
    ];

    let results = scorer.score_batch(&candidates).await;

    assert_eq!(results.len(), 3);
    for scores in &results {
        assert_eq!(scores["m1"].value, 0.75);
    }
}

#[test]
fn feature_validation_separates_missing_from_invalid() {
    let required = vec![
        FeatureSpec::new("order_count", FeatureKind::Number),
        FeatureSpec::new("opted_in", FeatureKind::Flag),
        FeatureSpec::new("segment", FeatureKind::Text),
    ];
    let mut features = BTreeMap::new();
    features.insert("order_count".to_string(), FeatureValue::Number(f64::NAN));
    features.insert("opted_in".to_string(), FeatureValue::Flag(true));

    let validation = validate_features(&required, &features);

    assert!(!validation.is_valid());
    assert_eq!(validation.missing, vec!["segment".to_string()]);
    assert_eq!(validation.invalid, vec!["order_count".to_string()]);
}

#[test]
fn feature_validation_checks_declared_kinds() {
    let required = vec![FeatureSpec::new("order_count", FeatureKind::Number)];
    let mut features = BTreeMap::new();
    features.insert("order_count".to_string(), FeatureValue::Text("7".to_string()));

    let validation = validate_features(&required, &features);
    assert_eq!(validation.invalid, vec!["order_count".to_string()]);
}
