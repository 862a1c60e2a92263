use std::collections::BTreeMap;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use carbon_core::{
    AdviceResult, DispatchTarget, LocationSpec, OrchestrationRequest, RegionResolver, RequestContext,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub advice: AdviceResult,
    pub scheduled_id: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/advise", post(advise))
        .route("/schedule", post(schedule))
        .route("/regions", get(list_regions))
        .route(
            "/favorites",
            get(list_favorites).post(save_favorites).delete(clear_favorites),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "carbon-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn advise(
    State(state): State<AppState>,
    Json(req): Json<OrchestrationRequest>,
) -> Result<Json<AdviceResult>, ApiError> {
    let ctx = RequestContext::new(Uuid::new_v4());
    let advice = state.engine.advise(&req.job, &req.policy, &ctx).await?;
    Ok(Json(advice))
}

/// Advice followed by dispatch under one correlation id
pub async fn schedule(
    State(state): State<AppState>,
    Json(req): Json<OrchestrationRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let ctx = RequestContext::new(Uuid::new_v4());
    let advice = state.engine.advise(&req.job, &req.policy, &ctx).await?;
    let scheduled_id = state.dispatch.schedule(&advice, &req.job, &ctx).await?;
    tracing::info!(
        request_id = ?ctx.correlation_id,
        cloud = %advice.cloud,
        region = %advice.region,
        scheduled_id = %scheduled_id,
        "job scheduled"
    );
    Ok(Json(ScheduleResponse {
        advice,
        scheduled_id,
    }))
}

pub async fn list_regions(State(state): State<AppState>) -> Json<BTreeMap<String, Vec<String>>> {
    Json(state.regions.list_all())
}

pub async fn list_favorites(State(state): State<AppState>) -> Json<Vec<LocationSpec>> {
    Json(state.favorites.load().await)
}

pub async fn save_favorites(
    State(state): State<AppState>,
    Json(favorites): Json<Vec<LocationSpec>>,
) -> Result<Json<Value>, ApiError> {
    let saved = state.favorites.save(favorites).await?;
    Ok(Json(json!({ "saved": saved })))
}

pub async fn clear_favorites(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.favorites.clear().await?;
    Ok(Json(json!({ "cleared": true })))
}
