// splitpay/src/models.rs
// Producers, credentials, payments and the audit records hung off them

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// GATEWAYS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Card + PIX marketplace API driven by the seller's delegated OAuth token
    Marketplace,
    /// Direct PIX banking API over mutual TLS
    DirectPix,
}

impl GatewayKind {
    /// Prefix used in generated external references
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            GatewayKind::Marketplace => "mp",
            GatewayKind::DirectPix => "efi",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Marketplace => "marketplace",
            GatewayKind::DirectPix => "direct_pix",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const REFERENCE_SUFFIX_LEN: usize = 8;

/// `{gateway}_{producerId}_{millis}_{suffix}`, unique per checkout attempt even
/// within one millisecond
pub fn external_reference(gateway: GatewayKind, producer_id: Uuid, at: DateTime<Utc>) -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!(
        "{}_{}_{}_{}",
        gateway.reference_prefix(),
        producer_id,
        at.timestamp_millis(),
        suffix
    )
}

/// Recovers gateway and producer from a reference produced by [`external_reference`]
pub fn parse_external_reference(reference: &str) -> Option<(GatewayKind, Uuid)> {
    let mut parts = reference.splitn(3, '_');
    let gateway = match parts.next()? {
        "mp" => GatewayKind::Marketplace,
        "efi" => GatewayKind::DirectPix,
        _ => return None,
    };
    let producer_id = parts.next()?.parse().ok()?;
    // older references end at the timestamp
    parts.next()?.split('_').next()?.parse::<i64>().ok()?;
    Some((gateway, producer_id))
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRODUCERS & CREDENTIALS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerStatus {
    #[default]
    Pending,
    Active,
    Suspended,
    Inactive,
}

impl ProducerStatus {
    pub fn can_receive_payments(&self) -> bool {
        matches!(self, ProducerStatus::Pending | ProducerStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Cpf,
    Cnpj,
}

impl DocumentType {
    /// Brazilian tax ids are told apart by length alone
    pub fn from_digits(digits: &str) -> Option<Self> {
        match digits.len() {
            11 => Some(DocumentType::Cpf),
            14 => Some(DocumentType::Cnpj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Cpf => "CPF",
            DocumentType::Cnpj => "CNPJ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "type")]
    pub kind: DocumentType,
    pub number: String,
}

impl Document {
    pub fn digits(&self) -> String {
        only_digits(&self.number)
    }
}

pub fn only_digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Producer {
    pub id: Uuid,
    pub business_name: String,
    pub email: String,
    #[serde(default)]
    pub document: Option<Document>,
    /// Percentage kept by the platform; the fee calculator substitutes 10 when unset
    #[serde(default)]
    pub platform_fee_percentage: Option<Decimal>,
    #[serde(default)]
    pub status: ProducerStatus,
    #[serde(default)]
    pub marketplace_connected: bool,
    #[serde(default)]
    pub marketplace_user_id: Option<String>,
    #[serde(default)]
    pub direct_connected: bool,
    #[serde(default)]
    pub direct_account_id: Option<String>,
    #[serde(default)]
    pub direct_pix_key: Option<String>,
}

/// Delegated OAuth token for the marketplace gateway, one per producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCredential {
    pub producer_id: Uuid,
    /// Sealed with the store's token cipher
    pub access_token_encrypted: String,
    pub refresh_token_encrypted: Option<String>,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub gateway_user_id: Option<String>,
    pub is_valid: bool,
    pub updated_at: DateTime<Utc>,
}

impl GatewayCredential {
    /// Usable for a charge right now
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_valid && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Receiving account at the direct PIX bank, one per producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectPixAccount {
    pub producer_id: Uuid,
    pub account_identifier: String,
    pub pix_key: Option<String>,
    pub pix_key_type: Option<String>,
    pub is_valid: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub producer_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_currency() -> String {
    "BRL".to_string()
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYMENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Authorized,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
}

impl PaymentStatus {
    /// Maps the marketplace gateway's status vocabulary
    pub fn from_gateway(status: &str) -> Option<Self> {
        Some(match status {
            "pending" => PaymentStatus::Pending,
            "approved" => PaymentStatus::Approved,
            "authorized" => PaymentStatus::Authorized,
            "in_process" => PaymentStatus::InProcess,
            "in_mediation" => PaymentStatus::InMediation,
            "rejected" => PaymentStatus::Rejected,
            "cancelled" => PaymentStatus::Cancelled,
            "refunded" => PaymentStatus::Refunded,
            "charged_back" => PaymentStatus::ChargedBack,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::InProcess => "in_process",
            PaymentStatus::InMediation => "in_mediation",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::ChargedBack => "charged_back",
        }
    }

    /// No further transition is accepted from these
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Rejected
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
                | PaymentStatus::ChargedBack
        )
    }

    /// Guard applied to every webhook and polling update; replays of the same status are no-ops
    /// and nothing moves back to `pending`
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        if *self == next || self.is_final() || next == PaymentStatus::Pending {
            return false;
        }
        match self {
            PaymentStatus::Approved => {
                matches!(next, PaymentStatus::Refunded | PaymentStatus::ChargedBack)
            }
            _ => true,
        }
    }
}

impl Payment {
    /// A failed attempt gives way to a newer gateway payment under the same
    /// reference, e.g. a card retried after a rejection on one preference.
    pub fn is_superseded_by(&self, update: &StatusUpdate) -> bool {
        matches!(self.status, PaymentStatus::Rejected | PaymentStatus::Cancelled)
            && update.mp_payment_id.is_some()
            && update.mp_payment_id != self.mp_payment_id
    }

    pub fn accepts(&self, update: &StatusUpdate) -> bool {
        self.status.can_transition_to(update.status) || self.is_superseded_by(update)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// CPF or CNPJ, punctuation allowed
    #[serde(default, alias = "cpf")]
    pub document: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub external_reference: String,
    pub producer_id: Uuid,
    pub product_id: Option<Uuid>,
    pub gateway: GatewayKind,
    pub mp_payment_id: Option<String>,
    pub mp_preference_id: Option<String>,
    pub efi_txid: Option<String>,
    pub efi_e2eid: Option<String>,
    pub total_amount: Decimal,
    pub platform_fee: Decimal,
    pub producer_amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
    pub payment_type: Option<String>,
    pub payment_method: Option<String>,
    pub payer_name: Option<String>,
    pub payer_email: Option<String>,
    pub payer_document: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    Platform,
    Producer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub recipient_type: RecipientType,
    pub recipient_id: String,
    pub amount: Decimal,
    pub percentage: Decimal,
    pub status: SplitStatus,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Applied to a payment by the reconciler or an explicit polling check
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub mp_payment_id: Option<String>,
    pub efi_e2eid: Option<String>,
    pub payment_method: Option<String>,
    /// Amount reported by the gateway, recorded in the financial log
    pub settled_amount: Option<Decimal>,
    pub source: GatewayKind,
}

impl StatusUpdate {
    pub fn new(status: PaymentStatus, source: GatewayKind) -> Self {
        Self {
            status,
            status_detail: None,
            approved_at: None,
            mp_payment_id: None,
            efi_e2eid: None,
            payment_method: None,
            settled_amount: None,
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        previous: PaymentStatus,
        current: PaymentStatus,
    },
    /// Guard refused the update; the stored status is reported back
    Skipped { current: PaymentStatus },
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIT RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub action: String,
    pub data_id: Option<String>,
    pub raw_payload: serde_json::Value,
    pub signature_valid: bool,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn received(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        action: impl Into<String>,
        data_id: Option<String>,
        raw_payload: serde_json::Value,
        signature_valid: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event_id.into(),
            event_type: event_type.into(),
            action: action.into(),
            data_id,
            raw_payload,
            signature_valid,
            processed: false,
            processed_at: None,
            error_message: None,
            retry_count: 0,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialLog {
    pub id: Uuid,
    pub action: String,
    pub payment_id: Uuid,
    pub producer_id: Uuid,
    pub amount: Decimal,
    pub previous_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
