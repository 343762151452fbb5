// splitpay/src/gateway/mod.rs
// One "create payment" verb over two structurally different gateways

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SplitError};
use crate::fees::FeeSplit;
use crate::models::{DirectPixAccount, GatewayKind, Payer, Producer};

pub mod direct_pix;
pub mod marketplace;

pub use direct_pix::DirectPixGateway;
pub use marketplace::MarketplaceGateway;

/// How the buyer completes checkout; also decides which gateway is used
#[derive(Debug, Clone)]
pub enum CheckoutMode {
    /// Marketplace-hosted checkout page
    Redirect {
        success_url: Option<String>,
        failure_url: Option<String>,
    },
    /// Marketplace direct charge from an embedded payment widget's form data
    Transparent { form_data: Map<String, Value> },
    /// Immediate PIX charge with settlement split at the direct PIX bank
    Pix,
}

impl CheckoutMode {
    pub fn gateway(&self) -> GatewayKind {
        match self {
            CheckoutMode::Redirect { .. } | CheckoutMode::Transparent { .. } => {
                GatewayKind::Marketplace
            }
            CheckoutMode::Pix => GatewayKind::DirectPix,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub product_id: Option<uuid::Uuid>,
    pub payer: Option<Payer>,
    pub mode: CheckoutMode,
}

/// Producer-side credential resolved (and already validated) by the orchestrator
pub enum ProducerCredential {
    /// Decrypted delegated OAuth token
    Marketplace { access_token: SecretString },
    DirectPix(DirectPixAccount),
}

/// Everything an adapter needs for a single charge attempt
pub struct CheckoutOrder<'a> {
    pub producer: &'a Producer,
    pub credential: &'a ProducerCredential,
    pub mode: &'a CheckoutMode,
    pub title: &'a str,
    pub product_id: Option<uuid::Uuid>,
    pub payer: Option<&'a Payer>,
    pub split: FeeSplit,
    pub external_reference: &'a str,
}

/// Gateway identifiers of a charge that must be recorded right away
#[derive(Debug, Clone, Default)]
pub struct ChargeRecord {
    pub mp_payment_id: Option<String>,
    pub efi_txid: Option<String>,
    pub payment_type: Option<String>,
    pub payment_method: Option<String>,
    pub status_detail: Option<String>,
}

pub struct GatewayCharge {
    pub handle: PaymentHandle,
    /// `None` when the payment is recorded later, on webhook
    pub record: Option<ChargeRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PixCharge {
    pub success: bool,
    pub txid: String,
    pub status: String,
    pub pix_copia_e_cola: String,
    pub qr_code_base64: String,
    pub location: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub platform_fee: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub producer_amount: Decimal,
    pub external_reference: String,
}

/// What the caller needs to finish checkout
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PaymentHandle {
    Redirect {
        init_point: String,
        preference_id: String,
        external_reference: String,
    },
    Charge {
        status: String,
        status_detail: Option<String>,
        external_reference: String,
        #[serde(flatten)]
        gateway_fields: Map<String, Value>,
    },
    PixQr(PixCharge),
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Submits the charge. Must not touch the store: recording is the
    /// orchestrator's job, driven by `GatewayCharge::record`.
    async fn checkout(&self, order: &CheckoutOrder<'_>) -> Result<GatewayCharge>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED RESPONSE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Best human-readable message from a gateway error body
pub(crate) fn error_message(body: &Value, raw: &str) -> String {
    ["message", "mensagem", "error_description", "detail", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if raw.is_empty() {
                "empty response body".to_string()
            } else {
                raw.chars().take(500).collect()
            }
        })
}

/// Reads a response body as JSON, turning non-2xx into `SplitError::Gateway`
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let raw = response.text().await?;
    let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(SplitError::Gateway {
            status: status.as_u16(),
            message: error_message(&body, &raw),
        });
    }
    if body.is_null() {
        return Err(SplitError::Gateway {
            status: status.as_u16(),
            message: "response body is not JSON".to_string(),
        });
    }
    Ok(body)
}

/// Gateway ids arrive as numbers from one API and strings from another
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

pub(crate) fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
