use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::error::{IngestError, StoreError};
use crate::ingest::{Dispatcher, PushAck, PushContext};
use crate::models::{
    FeedbackKey, FeedbackRecord, JsonMap, Source, Subscription, SubscriptionMode, Tenant,
};
use crate::store::{FeedbackEdit, FeedbackStore, SubscriptionRegistry, TenantStore};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub subscriptions: Arc<dyn SubscriptionRegistry>,
    pub tenants: Arc<dyn TenantStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/webhook/{source}", post(webhook))
        .route("/tenants", post(create_tenant))
        .route(
            "/tenants/{id}",
            get(get_tenant).put(update_tenant).delete(delete_tenant),
        )
        .route("/tenants/{id}/subscriptions", get(list_subscriptions))
        .route("/tenants/{id}/feedback", get(list_feedback))
        .route(
            "/tenants/{id}/feedback/{source}/{record_id}",
            get(get_feedback).put(update_feedback).delete(delete_feedback),
        )
        .route("/subscriptions", post(create_subscription))
        .route(
            "/subscriptions/{id}",
            get(get_subscription).delete(delete_subscription),
        )
        .route("/subscriptions/{id}/active", post(set_subscription_active))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StoreError::Conflict(_) => ApiError::Conflict(e.to_string()),
            StoreError::UnknownTenant(_) => ApiError::BadRequest(e.to_string()),
            StoreError::Unavailable(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_source(s: &str) -> ApiResult<Source> {
    s.parse().map_err(|e: crate::models::UnknownSourceName| ApiError::NotFound(e.to_string()))
}

// ---- webhook intake ----

/// Acknowledges once dispatch returns. Normalization and per-record storage
/// failures are still a 200 so the source does not redeliver.
async fn webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(ctx): Query<PushContext>,
    body: Bytes,
) -> ApiResult<Json<PushAck>> {
    let source = parse_source(&source)?;
    if ctx.tenant_id.trim().is_empty() {
        return Err(ApiError::BadRequest("tenant_id is required".into()));
    }
    if body.is_empty() || serde_json::from_slice::<serde::de::IgnoredAny>(&body).is_err() {
        return Err(ApiError::BadRequest("request body is not readable JSON".into()));
    }

    match state.dispatcher.dispatch_push(source, &body, &ctx).await {
        Ok(ack) => {
            tracing::info!(
                target: "ingest",
                source = %source,
                tenant_id = %ctx.tenant_id,
                stored = ack.stored,
                rejected = ack.rejected,
                persist_failures = ack.persist_failures,
                "webhook handled"
            );
            Ok(Json(ack))
        }
        Err(e @ IngestError::UnknownSource(_)) => Err(ApiError::Internal(e.to_string())),
        Err(e) => {
            tracing::warn!(target: "ingest", source = %source, error = %e, "webhook dispatch failed");
            Ok(Json(PushAck::default()))
        }
    }
}

// ---- tenants ----

#[derive(Deserialize)]
struct TenantIn {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    configurations: JsonMap,
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(body): Json<TenantIn>,
) -> ApiResult<(StatusCode, Json<Tenant>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    let tenant = Tenant {
        id: body
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: body.name,
        configurations: body.configurations,
    };
    state.tenants.save(tenant.clone()).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

async fn get_tenant(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Tenant>> {
    Ok(Json(state.tenants.get(&id).await?))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TenantIn>,
) -> ApiResult<Json<Tenant>> {
    let tenant = Tenant {
        id,
        name: body.name,
        configurations: body.configurations,
    };
    state.tenants.update(tenant.clone()).await?;
    Ok(Json(tenant))
}

async fn delete_tenant(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.tenants.delete(&id).await?;
    tracing::info!(tenant_id = %id, "tenant offboarded");
    Ok(StatusCode::NO_CONTENT)
}

// ---- subscriptions ----

#[derive(Deserialize)]
struct SubscriptionIn {
    tenant_id: String,
    sub_source_id: String,
    source: String,
    mode: String,
    #[serde(default)]
    configuration: JsonMap,
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(body): Json<SubscriptionIn>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    if body.tenant_id.trim().is_empty() || body.sub_source_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "tenant_id and sub_source_id are required".into(),
        ));
    }
    let source: Source = body
        .source
        .parse()
        .map_err(|e: crate::models::UnknownSourceName| ApiError::BadRequest(e.to_string()))?;
    let mode: SubscriptionMode = body.mode.parse().map_err(ApiError::BadRequest)?;

    let sub = Subscription::new(
        body.tenant_id,
        body.sub_source_id,
        source,
        mode,
        body.configuration,
        Utc::now(),
    );
    state.subscriptions.create(sub.clone()).await?;
    tracing::info!(
        subscription_id = %sub.id,
        tenant_id = %sub.tenant_id,
        source = %sub.source,
        mode = ?sub.mode,
        "subscription created"
    );
    Ok((StatusCode::CREATED, Json(sub)))
}

async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.subscriptions.get(id).await?))
}

async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.subscriptions.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ActiveIn {
    active: bool,
}

async fn set_subscription_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActiveIn>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.subscriptions.set_active(id, body.active).await?))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Subscription>>> {
    Ok(Json(state.subscriptions.list_by_tenant(&id).await?))
}

// ---- feedback ----

async fn list_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<FeedbackRecord>>> {
    Ok(Json(state.feedback.list_by_tenant(&id).await?))
}

fn feedback_key(tenant_id: String, source: &str, id: String) -> ApiResult<FeedbackKey> {
    Ok(FeedbackKey {
        tenant_id,
        source: parse_source(source)?,
        id,
    })
}

async fn get_feedback(
    State(state): State<AppState>,
    Path((tenant_id, source, record_id)): Path<(String, String, String)>,
) -> ApiResult<Json<FeedbackRecord>> {
    let key = feedback_key(tenant_id, &source, record_id)?;
    Ok(Json(state.feedback.get(&key).await?))
}

async fn update_feedback(
    State(state): State<AppState>,
    Path((tenant_id, source, record_id)): Path<(String, String, String)>,
    Json(edit): Json<FeedbackEdit>,
) -> ApiResult<Json<FeedbackRecord>> {
    let key = feedback_key(tenant_id, &source, record_id)?;
    Ok(Json(state.feedback.update(&key, edit, Utc::now()).await?))
}

async fn delete_feedback(
    State(state): State<AppState>,
    Path((tenant_id, source, record_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let key = feedback_key(tenant_id, &source, record_id)?;
    state.feedback.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
