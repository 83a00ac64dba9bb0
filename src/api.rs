//! HTTP front door.
//!
//! A single wrap endpoint plus a health probe. Transport mapping only;
//! all protocol logic lives in `core`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::error::WrapError;
use crate::core::gateway::LightningGateway;
use crate::core::wrap::{WrapEngine, WrapRequest};

#[derive(Debug, Deserialize)]
pub struct WrapInvoiceRequest {
    pub invoice: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_hash: Option<String>,
    #[serde(default)]
    pub routing_msat: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WrapInvoiceResponse {
    pub proxy_invoice: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub reason: String,
}

pub fn build_router<G>(engine: Arc<WrapEngine<G>>) -> Router
where
    G: LightningGateway + 'static,
{
    Router::new()
        .route("/spec", post(wrap_invoice::<G>))
        .route("/health", get(health))
        .with_state(engine)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn wrap_invoice<G>(
    State(engine): State<Arc<WrapEngine<G>>>,
    Json(request): Json<WrapInvoiceRequest>,
) -> Response
where
    G: LightningGateway + 'static,
{
    let wrap = WrapRequest {
        payment_request: request.invoice,
        description: request.description,
        description_hash: request.description_hash,
        routing_msat: request.routing_msat,
    };
    match engine.create_wrapped_invoice(&wrap).await {
        Ok(proxy_invoice) => (StatusCode::OK, Json(WrapInvoiceResponse { proxy_invoice }))
            .into_response(),
        Err(err) => {
            error!("wrap failed: {err}");
            (
                status_for(&err),
                Json(ErrorResponse {
                    status: "ERROR".to_string(),
                    reason: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn status_for(err: &WrapError) -> StatusCode {
    match err {
        WrapError::DecodeFailed(_)
        | WrapError::AmpNotSupported
        | WrapError::ConflictingDescription
        | WrapError::MissingAmount
        | WrapError::RoutingBudgetTooLow(_)
        | WrapError::ExpirationTooClose => StatusCode::BAD_REQUEST,
        WrapError::RouteEstimateFailed(_)
        | WrapError::CltvTooHigh(_)
        | WrapError::ValueOverflow
        | WrapError::InvoiceCreationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
