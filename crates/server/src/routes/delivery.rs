//! Delivery date availability for the storefront.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Serialize;
use tracing::instrument;

use crate::dutchned::{DeliveryDateParams, DeliveryOption, DeliveryQuery};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/delivery-dates", get(delivery_dates))
}

#[derive(Debug, Serialize)]
struct DeliveryDatesResponse {
    postal_code: String,
    country: String,
    delivery_dates: Vec<DeliveryOption>,
}

/// GET /api/delivery-dates - Available delivery dates for a postal code.
#[instrument(skip(state))]
async fn delivery_dates(
    State(state): State<AppState>,
    Query(params): Query<DeliveryDateParams>,
) -> Result<Json<DeliveryDatesResponse>, AppError> {
    let query = DeliveryQuery::from_params(&params)?;
    let delivery_dates = state.dutchned().delivery_dates(&query).await?;

    Ok(Json(DeliveryDatesResponse {
        postal_code: query.postal_code,
        country: query.country,
        delivery_dates,
    }))
}
