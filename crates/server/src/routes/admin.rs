//! Monitoring and recovery endpoints, mounted under `/admin`.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use delivery_dates_core::ShopDomain;
use serde::Deserialize;
use tracing::instrument;

use crate::error::AppError;
use crate::services::error_handling::ErrorLogEntry;
use crate::services::{
    CircuitRecord, DeadLetterEntry, PipelineStats, ProcessOutcome, RetrySweep, StatusRecord,
};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/orders/{shop}/{order_id}", get(order_status))
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/{id}", axum::routing::delete(discard_dead_letter))
        .route("/dead-letters/{id}/replay", post(replay_dead_letter))
        .route("/circuit/{shop}", get(circuit_state))
        .route("/circuit/{shop}/reset", post(reset_circuit))
        .route("/errors", get(recent_errors))
        .route("/retries/run", post(run_retries))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

impl LimitParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

fn parse_shop(raw: &str) -> Result<ShopDomain, AppError> {
    ShopDomain::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// GET /admin/stats
async fn stats(State(state): State<AppState>) -> Result<Json<PipelineStats>, AppError> {
    Ok(Json(state.pipeline().stats().await?))
}

/// GET /admin/orders/{shop}/{order_id}
async fn order_status(
    State(state): State<AppState>,
    Path((shop, order_id)): Path<(String, String)>,
) -> Result<Json<StatusRecord>, AppError> {
    let shop = parse_shop(&shop)?;
    let order_id = super::parse_order_id(&order_id)
        .ok_or_else(|| AppError::BadRequest("invalid order id".to_string()))?;

    state
        .pipeline()
        .order_status(&shop, order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} for {shop}")))
}

/// GET /admin/dead-letters
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<DeadLetterEntry>>, AppError> {
    Ok(Json(state.pipeline().list_dead_letters(params.limit()).await?))
}

/// POST /admin/dead-letters/{id}/replay
#[instrument(skip(state))]
async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProcessOutcome>, AppError> {
    state
        .pipeline()
        .replay_dead_letter(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("dead letter {id}")))
}

/// DELETE /admin/dead-letters/{id}
#[instrument(skip(state))]
async fn discard_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.pipeline().discard_dead_letter(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("dead letter {id}")))
    }
}

/// GET /admin/circuit/{shop}
async fn circuit_state(
    State(state): State<AppState>,
    Path(shop): Path<String>,
) -> Result<Json<CircuitRecord>, AppError> {
    let shop = parse_shop(&shop)?;
    Ok(Json(state.errors().state(&shop).await?))
}

/// POST /admin/circuit/{shop}/reset
#[instrument(skip(state))]
async fn reset_circuit(
    State(state): State<AppState>,
    Path(shop): Path<String>,
) -> Result<Json<CircuitRecord>, AppError> {
    let shop = parse_shop(&shop)?;
    state.errors().reset(&shop).await?;
    Ok(Json(state.errors().state(&shop).await?))
}

/// GET /admin/errors
async fn recent_errors(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<ErrorLogEntry>>, AppError> {
    Ok(Json(state.errors().recent_errors(params.limit()).await?))
}

/// POST /admin/retries/run
#[instrument(skip(state))]
async fn run_retries(State(state): State<AppState>) -> Result<Json<RetrySweep>, AppError> {
    Ok(Json(state.pipeline().process_due_retries(Utc::now()).await?))
}
