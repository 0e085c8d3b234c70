//! Direct delivery choice submission.
//!
//! The checkout extension posts the customer's choice here when the order
//! already exists, instead of waiting for the order webhook.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use delivery_dates_core::ShopDomain;
use serde::Deserialize;
use tracing::instrument;

use crate::error::AppError;
use crate::services::attributes::{DELIVERY_DATE_KEY, SHIPPING_METHOD_KEY};
use crate::services::{OrderJob, ProcessOutcome};
use crate::shopify::webhook::{NoteAttribute, SHOP_DOMAIN_HEADER};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/orders/{order_id}/delivery", post(save_delivery))
}

/// Body of `POST /api/orders/{order_id}/delivery`.
#[derive(Debug, Deserialize)]
struct DeliverySelection {
    #[serde(alias = "deliveryDate")]
    delivery_date: Option<String>,
    #[serde(default, alias = "shippingMethod")]
    shipping_method: Option<String>,
}

impl DeliverySelection {
    fn into_attributes(self) -> Vec<NoteAttribute> {
        [
            (DELIVERY_DATE_KEY, self.delivery_date),
            (SHIPPING_METHOD_KEY, self.shipping_method),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| NoteAttribute::new(name, v)))
        .collect()
    }
}

/// POST /api/orders/{order_id}/delivery
#[instrument(skip(state, headers, selection))]
async fn save_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
    Json(selection): Json<DeliverySelection>,
) -> Result<Response, AppError> {
    let shop = headers
        .get(SHOP_DOMAIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(format!("missing {SHOP_DOMAIN_HEADER} header")))?;
    let shop = ShopDomain::parse(shop).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let order_id = super::parse_order_id(&order_id)
        .ok_or_else(|| AppError::BadRequest("invalid order id".to_string()))?;

    let attributes = selection.into_attributes();
    if attributes.is_empty() {
        return Err(AppError::BadRequest(
            "delivery_date or shipping_method is required".to_string(),
        ));
    }

    let outcome = state
        .pipeline()
        .process_order(OrderJob::direct(shop, order_id, attributes))
        .await?;

    let status = match outcome {
        ProcessOutcome::Invalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ProcessOutcome::RetryScheduled { .. } => StatusCode::ACCEPTED,
        ProcessOutcome::DeadLettered { .. } => StatusCode::BAD_GATEWAY,
        ProcessOutcome::Skipped
        | ProcessOutcome::AlreadyProcessed
        | ProcessOutcome::Completed { .. } => StatusCode::OK,
    };

    Ok((status, Json(outcome)).into_response())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_into_attributes() {
        let selection: DeliverySelection = serde_json::from_str(
            r#"{"deliveryDate": "2026-01-05", "shippingMethod": "EVE"}"#,
        )
        .unwrap();
        let attributes = selection.into_attributes();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].name, DELIVERY_DATE_KEY);
        assert_eq!(attributes[0].value.as_deref(), Some("2026-01-05"));
        assert_eq!(attributes[1].name, SHIPPING_METHOD_KEY);
    }

    #[test]
    fn test_selection_without_method() {
        let selection: DeliverySelection =
            serde_json::from_str(r#"{"delivery_date": "2026-01-05"}"#).unwrap();
        assert_eq!(selection.into_attributes().len(), 1);
    }
}
