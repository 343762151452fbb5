// splitpay/src/checkout_handler.rs
// Checkout submission endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, SplitError};
use crate::gateway::{CheckoutMode, PaymentHandle, PaymentIntent};
use crate::models::Payer;
use crate::orchestrator::PaymentOrchestrator;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub producer_id: Uuid,
    pub payment_data: PaymentData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeName {
    Redirect,
    #[serde(alias = "brick")]
    Transparent,
    Pix,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentData {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub mode: Option<ModeName>,
    #[serde(default)]
    pub form_data: Option<Map<String, Value>>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub failure_url: Option<String>,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub payer: Option<Payer>,
}

impl PaymentData {
    /// Without an explicit mode, widget form data means a direct charge
    pub fn into_intent(self) -> Result<PaymentIntent> {
        let mode_name = match self.mode {
            Some(mode) => mode,
            None if self.form_data.is_some() => ModeName::Transparent,
            None => ModeName::Redirect,
        };

        let mode = match mode_name {
            ModeName::Redirect => CheckoutMode::Redirect {
                success_url: self.success_url,
                failure_url: self.failure_url,
            },
            ModeName::Transparent => CheckoutMode::Transparent {
                form_data: self.form_data.ok_or_else(|| {
                    SplitError::InvalidRequest("formData is required for transparent checkout".to_string())
                })?,
            },
            ModeName::Pix => CheckoutMode::Pix,
        };

        Ok(PaymentIntent {
            title: self.title,
            price: self.price,
            product_id: self.product_id,
            payer: self.payer,
            mode,
        })
    }
}

pub(crate) fn rejection(rejection: JsonRejection) -> SplitError {
    SplitError::InvalidRequest(rejection.body_text())
}

pub async fn checkout_handler(
    State(orchestrator): State<Arc<PaymentOrchestrator>>,
    payload: std::result::Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<PaymentHandle>> {
    let Json(request) = payload.map_err(rejection)?;
    let intent = request.payment_data.into_intent()?;

    tracing::info!(
        producer_id = %request.producer_id,
        gateway = %intent.mode.gateway(),
        "Checkout requested"
    );

    let handle = orchestrator.create_payment(request.producer_id, intent).await?;
    Ok(Json(handle))
}

pub fn router(orchestrator: Arc<PaymentOrchestrator>) -> Router {
    Router::new()
        .route("/", post(checkout_handler))
        .with_state(orchestrator)
}
