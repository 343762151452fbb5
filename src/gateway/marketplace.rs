// splitpay/src/gateway/marketplace.rs
// Marketplace gateway: hosted-checkout preferences, direct charges, payment lookup, OAuth code exchange

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::{
    error_message, read_json, string_or_number, value_as_id, ChargeRecord, CheckoutGateway,
    CheckoutMode, CheckoutOrder, GatewayCharge, PaymentHandle, ProducerCredential,
};
use crate::config::{CheckoutUrls, MarketplaceConfig};
use crate::error::{Result, SplitError};
use crate::models::{only_digits, DocumentType, GatewayKind};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem<'a>>,
    #[serde(with = "rust_decimal::serde::float")]
    application_fee: Decimal,
    notification_url: &'a str,
    external_reference: &'a str,
    back_urls: BackUrls<'a>,
    auto_return: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer: Option<Value>,
}

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    id: String,
    title: &'a str,
    quantity: u32,
    currency_id: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
}

#[derive(Debug, Serialize)]
struct BackUrls<'a> {
    success: &'a str,
    failure: &'a str,
    pending: &'a str,
}

/// Payment as re-fetched from the gateway after a webhook
#[derive(Debug, Clone, Deserialize)]
pub struct MarketplacePayment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    pub transaction_amount: Decimal,
    #[serde(default)]
    pub date_approved: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub payment_type_id: Option<String>,
}

impl MarketplacePayment {
    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.date_approved.map(|at| at.with_timezone(&Utc))
    }
}

/// Result of an authorization-code exchange
#[derive(Debug, Deserialize)]
pub struct OAuthToken {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
}

impl OAuthToken {
    /// Seller account id at the gateway; numeric on the wire
    pub fn user_id(&self) -> Option<String> {
        self.user_id.as_ref().and_then(value_as_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADAPTER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct MarketplaceGateway {
    config: MarketplaceConfig,
    notification_url: String,
    checkout_urls: CheckoutUrls,
    http_client: Client,
}

impl MarketplaceGateway {
    pub fn new(
        config: MarketplaceConfig,
        public_base_url: &str,
        checkout_urls: CheckoutUrls,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SplitError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            notification_url: format!("{}/marketplace/webhook", public_base_url),
            checkout_urls,
            http_client,
        })
    }

    pub fn webhook_secret(&self) -> Option<&SecretString> {
        self.config.webhook_secret.as_ref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    /// Hosted checkout. Nothing is recorded locally until the webhook arrives.
    async fn create_preference(
        &self,
        order: &CheckoutOrder<'_>,
        access_token: &SecretString,
        success_url: Option<&str>,
        failure_url: Option<&str>,
    ) -> Result<GatewayCharge> {
        let request = PreferenceRequest {
            items: vec![PreferenceItem {
                id: order
                    .product_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "item-1".to_string()),
                title: order.title,
                quantity: 1,
                currency_id: "BRL",
                unit_price: order.split.amount,
            }],
            application_fee: order.split.platform_fee,
            notification_url: &self.notification_url,
            external_reference: order.external_reference,
            back_urls: BackUrls {
                success: success_url.unwrap_or(&self.checkout_urls.success),
                failure: failure_url.unwrap_or(&self.checkout_urls.failure),
                pending: &self.checkout_urls.pending,
            },
            auto_return: "approved",
            payer: order.payer.and_then(payer_payload),
        };

        let response = self
            .http_client
            .post(self.url("/checkout/preferences"))
            .bearer_auth(access_token.expose_secret())
            .json(&request)
            .send()
            .await?;
        let body = read_producer_response(response).await?;

        let preference_id = body
            .get("id")
            .and_then(value_as_id)
            .ok_or_else(|| gateway_shape_error("preference response has no id"))?;
        let init_point = body
            .get("init_point")
            .and_then(Value::as_str)
            .ok_or_else(|| gateway_shape_error("preference response has no init_point"))?
            .to_string();

        tracing::info!(
            external_reference = order.external_reference,
            preference_id = %preference_id,
            "Checkout preference created"
        );

        Ok(GatewayCharge {
            handle: PaymentHandle::Redirect {
                init_point,
                preference_id,
                external_reference: order.external_reference.to_string(),
            },
            record: None,
        })
    }

    /// Direct charge from the embedded widget's form data, merged with the split fields
    async fn create_charge(
        &self,
        order: &CheckoutOrder<'_>,
        access_token: &SecretString,
        form_data: &Map<String, Value>,
    ) -> Result<GatewayCharge> {
        let mut payload = form_data.clone();
        payload.insert("transaction_amount".into(), money(order.split.amount));
        payload.insert("application_fee".into(), money(order.split.platform_fee));
        payload.insert("description".into(), json!(order.title));
        payload.insert("external_reference".into(), json!(order.external_reference));
        payload.insert("notification_url".into(), json!(self.notification_url));
        if !payload.contains_key("payer") {
            if let Some(payer) = order.payer.and_then(payer_payload) {
                payload.insert("payer".into(), payer);
            }
        }

        let response = self
            .http_client
            .post(self.url("/v1/payments"))
            .bearer_auth(access_token.expose_secret())
            .header("X-Idempotency-Key", order.external_reference)
            .json(&payload)
            .send()
            .await?;
        let body = read_producer_response(response).await?;

        let payment_id = body
            .get("id")
            .and_then(value_as_id)
            .ok_or_else(|| gateway_shape_error("payment response has no id"))?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("pending")
            .to_string();
        let status_detail = body
            .get("status_detail")
            .and_then(Value::as_str)
            .map(str::to_string);
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

        tracing::info!(
            external_reference = order.external_reference,
            mp_payment_id = %payment_id,
            status = %status,
            "Direct charge submitted"
        );

        let mut gateway_fields = Map::new();
        for key in [
            "id",
            "payment_method_id",
            "payment_type_id",
            "transaction_amount",
            "point_of_interaction",
        ] {
            if let Some(value) = body.get(key) {
                gateway_fields.insert(key.to_string(), value.clone());
            }
        }

        Ok(GatewayCharge {
            record: Some(ChargeRecord {
                mp_payment_id: Some(payment_id),
                efi_txid: None,
                payment_type: text("payment_type_id"),
                payment_method: text("payment_method_id"),
                status_detail: status_detail.clone(),
            }),
            handle: PaymentHandle::Charge {
                status,
                status_detail,
                external_reference: order.external_reference.to_string(),
                gateway_fields,
            },
        })
    }

    /// Authoritative payment state, read with the platform token
    pub async fn fetch_payment(&self, payment_id: &str) -> Result<MarketplacePayment> {
        let response = self
            .http_client
            .get(self.url(&format!("/v1/payments/{}", payment_id)))
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SplitError::Auth(
                "platform access token rejected by the marketplace gateway".to_string(),
            ));
        }

        let body = read_json(response).await?;
        serde_json::from_value(body)
            .map_err(|e| gateway_shape_error(&format!("unexpected payment shape: {}", e)))
    }

    /// Single-use authorization code for a long-lived producer token
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OAuthToken> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http_client
            .post(self.url("/oauth/token"))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(SplitError::Auth(error_message(&body, &raw)));
        }

        serde_json::from_value(body)
            .map_err(|e| SplitError::Auth(format!("token response not understood: {}", e)))
    }
}

#[async_trait]
impl CheckoutGateway for MarketplaceGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Marketplace
    }

    async fn checkout(&self, order: &CheckoutOrder<'_>) -> Result<GatewayCharge> {
        let access_token = match order.credential {
            ProducerCredential::Marketplace { access_token } => access_token,
            ProducerCredential::DirectPix(_) => {
                return Err(SplitError::gateway_not_connected(order.producer.id, self.kind()))
            }
        };

        match order.mode {
            CheckoutMode::Redirect {
                success_url,
                failure_url,
            } => {
                self.create_preference(
                    order,
                    access_token,
                    success_url.as_deref(),
                    failure_url.as_deref(),
                )
                .await
            }
            CheckoutMode::Transparent { form_data } => {
                self.create_charge(order, access_token, form_data).await
            }
            CheckoutMode::Pix => Err(SplitError::InvalidRequest(
                "PIX mode is served by the direct PIX gateway".to_string(),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// A 401 on a producer-token call means the delegated credential is dead
async fn read_producer_response(response: reqwest::Response) -> Result<Value> {
    if response.status() == StatusCode::UNAUTHORIZED {
        let raw = response.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
        return Err(SplitError::CredentialInvalid(error_message(&body, &raw)));
    }
    read_json(response).await
}

fn gateway_shape_error(message: &str) -> SplitError {
    SplitError::Gateway {
        status: 200,
        message: message.to_string(),
    }
}

fn money(amount: Decimal) -> Value {
    amount.to_f64().map(Value::from).unwrap_or(Value::Null)
}

fn payer_payload(payer: &crate::models::Payer) -> Option<Value> {
    let mut out = Map::new();
    if let Some(email) = &payer.email {
        out.insert("email".into(), json!(email));
    }
    if let Some(name) = &payer.name {
        out.insert("first_name".into(), json!(name));
    }
    if let Some(document) = &payer.document {
        let digits = only_digits(document);
        if let Some(kind) = DocumentType::from_digits(&digits) {
            out.insert(
                "identification".into(),
                json!({ "type": kind.as_str(), "number": digits }),
            );
        }
    }
    (!out.is_empty()).then(|| Value::Object(out))
}
