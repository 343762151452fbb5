// splitpay/src/reconciler.rs
// Webhook reconciliation and explicit PIX polling checks. Every payment status
// change after checkout goes through `Reconciler::apply`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, SplitError};
use crate::fees::compute_split;
use crate::gateway::direct_pix::{ChargeStatus, PixEntry, PixNotification};
use crate::gateway::{value_as_id, ChargeRecord, DirectPixGateway, MarketplaceGateway};
use crate::idempotency::DeliveryCache;
use crate::models::{
    parse_external_reference, FinancialLog, GatewayKind, Payment, PaymentStatus, StatusUpdate,
    Transition, WebhookEvent,
};
use crate::orchestrator::PaymentDraft;
use crate::signature::{verify_marketplace_signature, verify_shared_secret};
use crate::store::{Store, StoreError};

/// Where the reconciler takes a payment's new status from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    /// The notification only names a resource; its state is read back from the gateway
    RefetchFromGateway,
    /// The notification body is authoritative once matched to a local payment
    TrustPayload,
}

impl TrustPolicy {
    pub fn for_gateway(gateway: GatewayKind) -> Self {
        match gateway {
            GatewayKind::Marketplace => TrustPolicy::RefetchFromGateway,
            GatewayKind::DirectPix => TrustPolicy::TrustPayload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed { applied: usize },
    /// Every notification in the delivery was already handled
    Duplicate,
    Ignored(String),
    /// Recorded for operator follow-up; still acknowledged to the gateway
    Failed(String),
    /// Signature check failed; nothing was processed
    Rejected,
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed { .. } => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored(_) => "ignored",
            WebhookOutcome::Failed(_) => "failed",
            WebhookOutcome::Rejected => "rejected",
        }
    }
}

/// Anything but a bad signature is acknowledged with 200 so the gateway does
/// not keep redelivering; failures stay in the webhook event log.
impl IntoResponse for WebhookOutcome {
    fn into_response(self) -> Response {
        match self {
            WebhookOutcome::Rejected => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid signature", "success": false })),
            )
                .into_response(),
            outcome => (
                StatusCode::OK,
                Json(json!({ "received": true, "status": outcome.label() })),
            )
                .into_response(),
        }
    }
}

/// Marketplace delivery as received by the listener
pub struct MarketplaceDelivery<'a> {
    pub signature: Option<&'a str>,
    pub request_id: Option<&'a str>,
    pub query: &'a HashMap<String, String>,
    pub body: &'a str,
}

// ═══════════════════════════════════════════════════════════════════════════════
// NOTICES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Lookup {
    Marketplace {
        external_reference: Option<String>,
        payment_id: String,
    },
    Txid(String),
}

impl Lookup {
    fn describe(&self) -> String {
        match self {
            Lookup::Marketplace {
                external_reference,
                payment_id,
            } => format!(
                "marketplace payment {} (reference {})",
                payment_id,
                external_reference.as_deref().unwrap_or("none")
            ),
            Lookup::Txid(txid) => format!("txid {}", txid),
        }
    }
}

/// A status change, with the keys needed to find its payment
#[derive(Debug, Clone)]
struct Resolved {
    lookup: Lookup,
    update: StatusUpdate,
    payment_type: Option<String>,
}

/// One thing a delivery announces
#[derive(Debug, Clone)]
struct Notice {
    delivery_key: String,
    /// Gateway resource to read back under `RefetchFromGateway`
    resource_id: String,
    /// What the payload itself claims, used under `TrustPayload`
    claimed: Option<Resolved>,
}

enum Settled {
    Applied(Transition),
    Unmatched(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub txid: String,
    pub external_reference: String,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

impl PaymentStatusView {
    fn from_payment(txid: &str, payment: &Payment) -> Self {
        Self {
            txid: txid.to_string(),
            external_reference: payment.external_reference.clone(),
            status: payment.status,
            status_detail: payment.status_detail.clone(),
            approved_at: payment.approved_at,
            amount: payment.total_amount,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECONCILER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Reconciler {
    store: Arc<dyn Store>,
    deliveries: DeliveryCache,
    marketplace: Option<Arc<MarketplaceGateway>>,
    direct_pix: Option<Arc<DirectPixGateway>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        deliveries: DeliveryCache,
        marketplace: Option<Arc<MarketplaceGateway>>,
        direct_pix: Option<Arc<DirectPixGateway>>,
    ) -> Self {
        Self {
            store,
            deliveries,
            marketplace,
            direct_pix,
        }
    }

    /// Marketplace listener. Malformed JSON is logged, then reported as an
    /// invalid request; every other failure is recorded and acknowledged.
    pub async fn handle_marketplace(&self, delivery: MarketplaceDelivery<'_>) -> Result<WebhookOutcome> {
        let payload: Option<Value> = serde_json::from_str(delivery.body).ok();
        let field = |key: &str| -> Option<String> {
            payload
                .as_ref()
                .and_then(|body| body.get(key))
                .and_then(value_as_id)
        };

        let data_id = delivery
            .query
            .get("data.id")
            .cloned()
            .or_else(|| {
                payload
                    .as_ref()
                    .and_then(|body| body.pointer("/data/id"))
                    .and_then(value_as_id)
            })
            .or_else(|| delivery.query.get("id").cloned());
        let event_type = field("type")
            .or_else(|| field("topic"))
            .or_else(|| delivery.query.get("type").cloned())
            .or_else(|| delivery.query.get("topic").cloned())
            .unwrap_or_else(|| "unknown".to_string());
        let action = field("action").unwrap_or_else(|| "unknown".to_string());
        let event_id = field("id")
            .or_else(|| delivery.request_id.map(str::to_string))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let secret = self.marketplace.as_ref().and_then(|gateway| gateway.webhook_secret());
        let signature_valid = match secret {
            Some(secret) => match verify_marketplace_signature(
                delivery.signature,
                delivery.request_id,
                data_id.as_deref(),
                secret.expose_secret(),
            ) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(event_id = %event_id, "Marketplace webhook signature rejected: {}", e);
                    false
                }
            },
            None => {
                tracing::warn!(
                    event_id = %event_id,
                    "MP_WEBHOOK_SECRET not set, marketplace webhook accepted without signature validation"
                );
                false
            }
        };

        let event_row = self
            .record_event(WebhookEvent::received(
                event_id.clone(),
                event_type.clone(),
                action,
                data_id.clone(),
                payload
                    .clone()
                    .unwrap_or_else(|| Value::String(delivery.body.to_string())),
                signature_valid,
            ))
            .await;

        if secret.is_some() && !signature_valid {
            self.finish_event(event_row, Some("invalid signature".to_string())).await;
            return Ok(WebhookOutcome::Rejected);
        }
        if payload.is_none() {
            self.finish_event(event_row, Some("malformed JSON payload".to_string())).await;
            return Err(SplitError::InvalidRequest("malformed JSON payload".to_string()));
        }
        if event_type != "payment" {
            self.finish_event(event_row, None).await;
            return Ok(WebhookOutcome::Ignored(format!("event type {}", event_type)));
        }
        let data_id = match data_id {
            Some(data_id) => data_id,
            None => {
                let message = "payment notification without data.id".to_string();
                self.finish_event(event_row, Some(message.clone())).await;
                return Ok(WebhookOutcome::Ignored(message));
            }
        };

        let notices = vec![Notice {
            delivery_key: format!("{}:{}", event_id, data_id),
            resource_id: data_id,
            claimed: None,
        }];

        let outcome = self.process(GatewayKind::Marketplace, notices).await;
        self.finish_with(event_row, &outcome).await;
        Ok(outcome)
    }

    /// Direct PIX listener. The `hmac` query parameter is compared with the
    /// configured secret when one is set.
    pub async fn handle_direct_pix(
        &self,
        hmac: Option<&str>,
        body: &str,
    ) -> Result<WebhookOutcome> {
        let raw: Option<Value> = serde_json::from_str(body).ok();
        let notification: Option<PixNotification> = raw
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok());

        let first = notification.as_ref().and_then(|n| n.pix.first());
        let refund = notification.as_ref().and_then(|n| n.devolucao.as_ref());
        let event_id = first
            .map(|entry| entry.end_to_end_id.clone())
            .or_else(|| refund.and_then(|r| r.id.clone().or_else(|| r.rtr_id.clone())))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let action = if refund.is_some() || first.map_or(false, |entry| !entry.devolucoes.is_empty()) {
            "devolucao"
        } else if first.is_some() {
            "pix_received"
        } else {
            "unknown"
        };
        let data_id = first
            .and_then(|entry| entry.txid.clone())
            .or_else(|| refund.and_then(|r| r.txid.clone()));

        let secret = self.direct_pix.as_ref().and_then(|gateway| gateway.webhook_secret());
        let signature_valid = match secret {
            Some(secret) => match verify_shared_secret(hmac, secret.expose_secret()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(event_id = %event_id, "Direct PIX webhook secret rejected: {}", e);
                    false
                }
            },
            None => {
                tracing::warn!(
                    event_id = %event_id,
                    "EFI_WEBHOOK_SECRET not set, direct PIX webhook accepted without validation"
                );
                false
            }
        };

        let event_row = self
            .record_event(WebhookEvent::received(
                event_id,
                "pix",
                action,
                data_id,
                raw.clone().unwrap_or_else(|| Value::String(body.to_string())),
                signature_valid,
            ))
            .await;

        if secret.is_some() && !signature_valid {
            self.finish_event(event_row, Some("invalid signature".to_string())).await;
            return Ok(WebhookOutcome::Rejected);
        }
        let notification = match notification {
            Some(notification) => notification,
            None => {
                self.finish_event(event_row, Some("malformed PIX notification".to_string())).await;
                return Err(SplitError::InvalidRequest("malformed PIX notification".to_string()));
            }
        };

        let notices = pix_notices(&notification);
        if notices.is_empty() {
            self.finish_event(event_row, None).await;
            return Ok(WebhookOutcome::Ignored("no PIX entries".to_string()));
        }

        let outcome = self.process(GatewayKind::DirectPix, notices).await;
        self.finish_with(event_row, &outcome).await;
        Ok(outcome)
    }

    /// Explicit polling check behind the buyer's status poll. Only pending
    /// payments are checked against the gateway; a gateway failure leaves the
    /// local status as the answer.
    pub async fn check_pix_status(&self, txid: &str) -> Result<PaymentStatusView> {
        let payment = self
            .store
            .find_payment_by_txid(txid)
            .await?
            .ok_or_else(|| SplitError::PaymentNotFound(txid.to_string()))?;

        if payment.status != PaymentStatus::Pending {
            return Ok(PaymentStatusView::from_payment(txid, &payment));
        }
        let gateway = match &self.direct_pix {
            Some(gateway) => gateway,
            None => return Ok(PaymentStatusView::from_payment(txid, &payment)),
        };

        match gateway.fetch_charge(txid).await {
            Ok(charge) => {
                if let Some(resolved) = resolved_from_charge(&charge) {
                    self.apply(&payment, resolved.update).await?;
                }
            }
            Err(e) => {
                tracing::warn!(txid, "Polling check against the gateway failed: {}", e);
            }
        }

        let payment = self
            .store
            .find_payment_by_txid(txid)
            .await?
            .ok_or_else(|| SplitError::PaymentNotFound(txid.to_string()))?;
        Ok(PaymentStatusView::from_payment(txid, &payment))
    }

    /// The single transition path: guard, split legs and financial log in one store call
    pub async fn apply(&self, payment: &Payment, update: StatusUpdate) -> Result<Transition> {
        if let Some(settled) = update.settled_amount {
            if settled != payment.total_amount {
                tracing::warn!(
                    external_reference = %payment.external_reference,
                    expected = %payment.total_amount,
                    settled = %settled,
                    "Gateway settled amount differs from the payment total"
                );
            }
        }

        let log = FinancialLog {
            id: Uuid::new_v4(),
            action: log_action(update.status).to_string(),
            payment_id: payment.id,
            producer_id: payment.producer_id,
            amount: update.settled_amount.unwrap_or(payment.total_amount),
            previous_status: payment.status,
            new_status: update.status,
            details: json!({
                "gateway": update.source,
                "external_reference": payment.external_reference,
                "txid": payment.efi_txid,
                "e2eid": update.efi_e2eid,
                "mp_payment_id": update.mp_payment_id.as_ref().or(payment.mp_payment_id.as_ref()),
                "status_detail": update.status_detail,
                "platform_fee": payment.platform_fee.to_string(),
                "producer_amount": payment.producer_amount.to_string(),
            }),
            created_at: Utc::now(),
        };

        let transition = self.store.transition_payment(payment.id, update, log).await?;
        match transition {
            Transition::Applied { previous, current } => tracing::info!(
                external_reference = %payment.external_reference,
                %previous,
                %current,
                "Payment status updated"
            ),
            Transition::Skipped { current } => tracing::debug!(
                external_reference = %payment.external_reference,
                %current,
                "Status update skipped by transition guard"
            ),
        }
        Ok(transition)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // shared listener steps
    // ───────────────────────────────────────────────────────────────────────────

    async fn process(&self, gateway: GatewayKind, notices: Vec<Notice>) -> WebhookOutcome {
        let total = notices.len();
        let mut applied = 0;
        let mut duplicates = 0;
        let mut notes = Vec::new();
        let mut failures = Vec::new();

        for notice in notices {
            if self.deliveries.is_processed(gateway, &notice.delivery_key).await {
                tracing::info!(delivery = %notice.delivery_key, %gateway, "Duplicate webhook delivery");
                duplicates += 1;
                continue;
            }

            let delivery_key = notice.delivery_key.clone();
            match self.settle(gateway, notice).await {
                Ok(Settled::Applied(transition)) => {
                    if matches!(transition, Transition::Applied { .. }) {
                        applied += 1;
                    }
                    self.deliveries.mark_processed(gateway, &delivery_key).await;
                }
                Ok(Settled::Unmatched(note)) => {
                    tracing::warn!(%gateway, "{}", note);
                    notes.push(note);
                }
                Err(e) => {
                    tracing::error!(
                        delivery = %delivery_key,
                        %gateway,
                        retryable = e.is_retryable(),
                        "Webhook processing failed: {}",
                        e
                    );
                    failures.push(e.to_string());
                }
            }
        }

        if !failures.is_empty() {
            WebhookOutcome::Failed(failures.join("; "))
        } else if duplicates == total {
            WebhookOutcome::Duplicate
        } else if applied == 0 && !notes.is_empty() {
            WebhookOutcome::Ignored(notes.join("; "))
        } else {
            WebhookOutcome::Processed { applied }
        }
    }

    async fn settle(&self, gateway: GatewayKind, notice: Notice) -> Result<Settled> {
        let resolved = match TrustPolicy::for_gateway(gateway) {
            TrustPolicy::TrustPayload => match notice.claimed {
                Some(claimed) => claimed,
                None => return Ok(Settled::Unmatched(format!(
                    "notification {} carries no status",
                    notice.delivery_key
                ))),
            },
            TrustPolicy::RefetchFromGateway => {
                match self.refetch(gateway, &notice.resource_id).await? {
                    Some(resolved) => resolved,
                    None => return Ok(Settled::Unmatched(format!(
                        "resource {} has no settled state yet",
                        notice.resource_id
                    ))),
                }
            }
        };

        let payment = match self.find_payment(&resolved.lookup).await? {
            Some(payment) => payment,
            None => match self.adopt_redirect_payment(&resolved).await? {
                Some(payment) => payment,
                None => {
                    return Ok(Settled::Unmatched(format!(
                        "no payment matches {}",
                        resolved.lookup.describe()
                    )))
                }
            },
        };

        Ok(Settled::Applied(self.apply(&payment, resolved.update).await?))
    }

    async fn refetch(&self, gateway: GatewayKind, resource_id: &str) -> Result<Option<Resolved>> {
        match gateway {
            GatewayKind::Marketplace => {
                let client = self.marketplace.as_ref().ok_or_else(|| {
                    SplitError::Configuration("the marketplace gateway is not configured".to_string())
                })?;
                let remote = client.fetch_payment(resource_id).await?;
                let status = PaymentStatus::from_gateway(&remote.status).ok_or_else(|| {
                    SplitError::Gateway {
                        status: 200,
                        message: format!("unknown payment status {}", remote.status),
                    }
                })?;

                let mut update = StatusUpdate::new(status, GatewayKind::Marketplace);
                update.status_detail = remote.status_detail.clone();
                update.approved_at = remote.approved_at();
                update.mp_payment_id = Some(remote.id.clone());
                update.payment_method = remote.payment_method_id.clone();
                update.settled_amount = Some(remote.transaction_amount);

                Ok(Some(Resolved {
                    lookup: Lookup::Marketplace {
                        external_reference: remote.external_reference.clone(),
                        payment_id: remote.id,
                    },
                    update,
                    payment_type: remote.payment_type_id,
                }))
            }
            GatewayKind::DirectPix => {
                let client = self.direct_pix.as_ref().ok_or_else(|| {
                    SplitError::Configuration("the direct PIX gateway is not configured".to_string())
                })?;
                Ok(resolved_from_charge(&client.fetch_charge(resource_id).await?))
            }
        }
    }

    async fn find_payment(&self, lookup: &Lookup) -> Result<Option<Payment>> {
        match lookup {
            Lookup::Marketplace {
                external_reference,
                payment_id,
            } => {
                if let Some(reference) = external_reference {
                    if let Some(payment) = self.store.find_payment_by_reference(reference).await? {
                        return Ok(Some(payment));
                    }
                }
                Ok(self.store.find_payment_by_mp_id(payment_id).await?)
            }
            Lookup::Txid(txid) => Ok(self.store.find_payment_by_txid(txid).await?),
        }
    }

    /// Redirect checkouts are first recorded here, once the gateway reports a
    /// payment under one of our references for a known producer
    async fn adopt_redirect_payment(&self, resolved: &Resolved) -> Result<Option<Payment>> {
        let (reference, payment_id) = match &resolved.lookup {
            Lookup::Marketplace {
                external_reference: Some(reference),
                payment_id,
            } => (reference, payment_id),
            _ => return Ok(None),
        };
        let producer_id = match parse_external_reference(reference) {
            Some((GatewayKind::Marketplace, producer_id)) => producer_id,
            _ => return Ok(None),
        };
        let producer = match self.store.get_producer(producer_id).await? {
            Some(producer) => producer,
            None => return Ok(None),
        };
        let amount = match resolved.update.settled_amount {
            Some(amount) => amount,
            None => return Ok(None),
        };

        let split = compute_split(amount, producer.platform_fee_percentage)?;
        let draft = PaymentDraft {
            producer_id,
            product_id: None,
            gateway: GatewayKind::Marketplace,
            external_reference: reference,
            split,
            payer: None,
            record: ChargeRecord {
                mp_payment_id: Some(payment_id.clone()),
                efi_txid: None,
                payment_type: resolved.payment_type.clone(),
                payment_method: resolved.update.payment_method.clone(),
                status_detail: None,
            },
        };
        let (payment, splits) = draft.into_rows(Utc::now());

        match self.store.insert_payment(payment.clone(), splits).await {
            Ok(()) => {
                tracing::info!(
                    external_reference = %reference,
                    producer_id = %producer_id,
                    "Redirect checkout payment recorded from webhook"
                );
                Ok(Some(payment))
            }
            // a concurrent delivery got there first
            Err(StoreError::Duplicate { .. }) => {
                Ok(self.store.find_payment_by_reference(reference).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_event(&self, event: WebhookEvent) -> Option<Uuid> {
        match self.store.append_webhook_event(event).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("Failed to record webhook event: {}", e);
                None
            }
        }
    }

    async fn finish_event(&self, event_row: Option<Uuid>, error: Option<String>) {
        if let Some(id) = event_row {
            if let Err(e) = self.store.mark_webhook_event(id, error).await {
                tracing::error!(event = %id, "Failed to mark webhook event: {}", e);
            }
        }
    }

    async fn finish_with(&self, event_row: Option<Uuid>, outcome: &WebhookOutcome) {
        let error = match outcome {
            WebhookOutcome::Failed(message) | WebhookOutcome::Ignored(message) => Some(message.clone()),
            _ => None,
        };
        self.finish_event(event_row, error).await;
    }
}

fn log_action(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Approved => "payment_received",
        PaymentStatus::Refunded => "payment_refunded",
        PaymentStatus::ChargedBack => "payment_charged_back",
        PaymentStatus::Rejected | PaymentStatus::Cancelled => "payment_failed",
        _ => "payment_status_changed",
    }
}

fn pix_received(txid: &str, entry: &PixEntry) -> Resolved {
    let mut update = StatusUpdate::new(PaymentStatus::Approved, GatewayKind::DirectPix);
    update.status_detail = Some("pix_received".to_string());
    update.approved_at = entry.received_at();
    update.efi_e2eid = Some(entry.end_to_end_id.clone());
    update.payment_method = Some("pix".to_string());
    update.settled_amount = entry.amount();

    Resolved {
        lookup: Lookup::Txid(txid.to_string()),
        update,
        payment_type: Some("pix".to_string()),
    }
}

fn pix_refunded(txid: &str, status: Option<&str>) -> Resolved {
    let mut update = StatusUpdate::new(PaymentStatus::Refunded, GatewayKind::DirectPix);
    update.status_detail = Some(format!("devolucao_{}", status.unwrap_or("devolvido")));

    Resolved {
        lookup: Lookup::Txid(txid.to_string()),
        update,
        payment_type: Some("pix".to_string()),
    }
}

/// Payload-trusted notices; entries without a txid were not charges of ours
fn pix_notices(notification: &PixNotification) -> Vec<Notice> {
    let mut notices = Vec::new();

    for entry in &notification.pix {
        let txid = match &entry.txid {
            Some(txid) if !txid.is_empty() => txid,
            _ => {
                tracing::warn!(e2eid = %entry.end_to_end_id, "PIX entry without txid skipped");
                continue;
            }
        };

        let refunds: Vec<_> = entry.devolucoes.iter().filter(|r| r.is_settled()).collect();
        if refunds.is_empty() {
            notices.push(Notice {
                delivery_key: entry.end_to_end_id.clone(),
                resource_id: txid.clone(),
                claimed: Some(pix_received(txid, entry)),
            });
        } else {
            for refund in refunds {
                let refund_id = refund
                    .id
                    .as_deref()
                    .or(refund.rtr_id.as_deref())
                    .unwrap_or("refund");
                notices.push(Notice {
                    delivery_key: format!("{}:devolucao:{}", entry.end_to_end_id, refund_id),
                    resource_id: txid.clone(),
                    claimed: Some(pix_refunded(txid, refund.status.as_deref())),
                });
            }
        }
    }

    if let Some(refund) = &notification.devolucao {
        match &refund.txid {
            Some(txid) if !txid.is_empty() => notices.push(Notice {
                delivery_key: format!(
                    "devolucao:{}:{}",
                    txid,
                    refund.status.as_deref().unwrap_or("unknown")
                ),
                resource_id: txid.clone(),
                claimed: Some(pix_refunded(txid, refund.status.as_deref())),
            }),
            _ => tracing::warn!("Refund notification without txid skipped"),
        }
    }

    notices
}

/// Polling answer: a concluded charge is approved, a removed one cancelled
fn resolved_from_charge(charge: &ChargeStatus) -> Option<Resolved> {
    if charge.is_concluded() {
        return Some(match charge.pix.first() {
            Some(entry) => pix_received(&charge.txid, entry),
            None => {
                let mut update = StatusUpdate::new(PaymentStatus::Approved, GatewayKind::DirectPix);
                update.status_detail = Some("pix_received".to_string());
                update.payment_method = Some("pix".to_string());
                Resolved {
                    lookup: Lookup::Txid(charge.txid.clone()),
                    update,
                    payment_type: Some("pix".to_string()),
                }
            }
        });
    }
    if charge.is_removed() {
        let mut update = StatusUpdate::new(PaymentStatus::Cancelled, GatewayKind::DirectPix);
        update.status_detail = Some(charge.status.to_ascii_lowercase());
        return Some(Resolved {
            lookup: Lookup::Txid(charge.txid.clone()),
            update,
            payment_type: Some("pix".to_string()),
        });
    }
    None
}
