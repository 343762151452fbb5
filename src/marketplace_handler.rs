// splitpay/src/marketplace_handler.rs
// Marketplace gateway endpoints: OAuth callback exchange and webhook listener

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::checkout_handler::rejection;
use crate::oauth::OAuthExchange;
use crate::reconciler::{MarketplaceDelivery, Reconciler};

#[derive(Clone)]
pub struct MarketplaceState {
    pub oauth: Arc<OAuthExchange>,
    pub reconciler: Arc<Reconciler>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub code: String,
    pub producer_id: Uuid,
    pub redirect_uri: String,
}

pub async fn oauth_exchange_handler(
    State(state): State<MarketplaceState>,
    payload: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(e) => return rejection(e).into_response(),
    };

    match state
        .oauth
        .exchange(&request.code, request.producer_id, &request.redirect_uri)
        .await
    {
        Ok(_) => Json(json!({ "success": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub async fn marketplace_webhook_handler(
    State(state): State<MarketplaceState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let delivery = MarketplaceDelivery {
        signature: header(&headers, "x-signature"),
        request_id: header(&headers, "x-request-id"),
        query: &query,
        body: &body,
    };

    match state.reconciler.handle_marketplace(delivery).await {
        Ok(outcome) => {
            tracing::info!(outcome = ?outcome, "Marketplace webhook handled");
            outcome.into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub fn router(state: MarketplaceState) -> Router {
    Router::new()
        .route("/oauth/exchange", post(oauth_exchange_handler))
        .route("/webhook", post(marketplace_webhook_handler))
        .with_state(state)
}
