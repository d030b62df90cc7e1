use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::domain::{Candidate, CandidateIdentity, Channel, SubjectKind};
use super::repository::KeyValueStore;
use super::service::{EngagementPipelineService, PipelineError};

const DEFAULT_QUERY_LIMIT: usize = 50;

fn default_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

/// Identity tuple as HTTP query parameters.
#[derive(Debug, Deserialize)]
pub(crate) struct IdentityParams {
    customer_id: String,
    program_id: String,
    marketplace_id: String,
    subject_kind: SubjectKind,
    subject_id: String,
}

impl From<IdentityParams> for CandidateIdentity {
    fn from(params: IdentityParams) -> Self {
        Self {
            customer_id: params.customer_id,
            program_id: params.program_id,
            marketplace_id: params.marketplace_id,
            subject_kind: params.subject_kind,
            subject_id: params.subject_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelQueryParams {
    program_id: String,
    channel: Channel,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    ascending: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DateQueryParams {
    program_id: String,
    date: NaiveDate,
    #[serde(default = "default_limit")]
    limit: usize,
}

/// Router builder exposing the pipeline over HTTP.
pub fn engagement_router<S>(service: Arc<EngagementPipelineService<S>>) -> Router
where
    S: KeyValueStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/engagement/candidates",
            post(process_handler::<S>)
                .get(lookup_handler::<S>)
                .delete(consume_handler::<S>),
        )
        .route(
            "/api/v1/engagement/candidates/by-channel",
            get(by_channel_handler::<S>),
        )
        .route(
            "/api/v1/engagement/candidates/by-date",
            get(by_date_handler::<S>),
        )
        .route(
            "/api/v1/engagement/models/health",
            get(models_health_handler::<S>),
        )
        .with_state(service)
}

pub(crate) async fn process_handler<S>(
    State(service): State<Arc<EngagementPipelineService<S>>>,
    axum::Json(candidate): axum::Json<Candidate>,
) -> Response
where
    S: KeyValueStore + 'static,
{
    match service.process(candidate).await {
        Ok(outcome) => (StatusCode::ACCEPTED, axum::Json(outcome.status_view())).into_response(),
        Err(PipelineError::InvalidCandidate(error)) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn lookup_handler<S>(
    State(service): State<Arc<EngagementPipelineService<S>>>,
    Query(params): Query<IdentityParams>,
) -> Response
where
    S: KeyValueStore + 'static,
{
    let identity = CandidateIdentity::from(params);
    match service.get(&identity).await {
        Ok(Some(candidate)) => (StatusCode::OK, axum::Json(candidate)).into_response(),
        Ok(None) => {
            let payload = json!({
                "error": "candidate not found",
                "identity": identity.to_string(),
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn consume_handler<S>(
    State(service): State<Arc<EngagementPipelineService<S>>>,
    Query(params): Query<IdentityParams>,
) -> Response
where
    S: KeyValueStore + 'static,
{
    let identity = CandidateIdentity::from(params);
    match service.consume(&identity).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn by_channel_handler<S>(
    State(service): State<Arc<EngagementPipelineService<S>>>,
    Query(params): Query<ChannelQueryParams>,
) -> Response
where
    S: KeyValueStore + 'static,
{
    match service
        .query_by_channel(
            &params.program_id,
            params.channel,
            params.limit,
            params.ascending,
        )
        .await
    {
        Ok(candidates) => (StatusCode::OK, axum::Json(candidates)).into_response(),
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn by_date_handler<S>(
    State(service): State<Arc<EngagementPipelineService<S>>>,
    Query(params): Query<DateQueryParams>,
) -> Response
where
    S: KeyValueStore + 'static,
{
    match service
        .query_by_date(&params.program_id, params.date, params.limit)
        .await
    {
        Ok(candidates) => (StatusCode::OK, axum::Json(candidates)).into_response(),
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn models_health_handler<S>(
    State(service): State<Arc<EngagementPipelineService<S>>>,
) -> Response
where
    S: KeyValueStore + 'static,
{
    let report = service.models_health().await;
    let all_healthy = report.values().all(|health| health.healthy);
    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(report)).into_response()
}
