// splitpay/src/store.rs
// Persistence seam: producers, credentials, payments and audit logs

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    DirectPixAccount, FinancialLog, GatewayCredential, Payment, PaymentSplit, PaymentStatus,
    Producer, Product, SplitStatus, StatusUpdate, Transition, WebhookEvent,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// Rejected before writing because the rows would break a money invariant
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Transactional persistence service the payment core reads and writes through.
///
/// Multi-row operations (`insert_payment`, `transition_payment`) are
/// all-or-nothing.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_producer(&self, id: Uuid) -> StoreResult<Option<Producer>>;
    async fn save_producer(&self, producer: Producer) -> StoreResult<()>;
    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn save_product(&self, product: Product) -> StoreResult<()>;

    async fn get_marketplace_credential(&self, producer_id: Uuid) -> StoreResult<Option<GatewayCredential>>;
    /// Replaces any previous credential for the same producer
    async fn upsert_marketplace_credential(&self, credential: GatewayCredential) -> StoreResult<()>;
    async fn invalidate_marketplace_credential(&self, producer_id: Uuid) -> StoreResult<()>;
    async fn mark_marketplace_connected(&self, producer_id: Uuid, gateway_user_id: Option<String>) -> StoreResult<()>;

    async fn get_direct_account(&self, producer_id: Uuid) -> StoreResult<Option<DirectPixAccount>>;
    async fn upsert_direct_account(&self, account: DirectPixAccount) -> StoreResult<()>;
    async fn mark_direct_connected(
        &self,
        producer_id: Uuid,
        account_id: String,
        pix_key: Option<String>,
    ) -> StoreResult<()>;

    /// Writes the payment and both split legs in one step
    async fn insert_payment(&self, payment: Payment, splits: [PaymentSplit; 2]) -> StoreResult<()>;
    async fn find_payment_by_reference(&self, external_reference: &str) -> StoreResult<Option<Payment>>;
    async fn find_payment_by_txid(&self, txid: &str) -> StoreResult<Option<Payment>>;
    async fn find_payment_by_mp_id(&self, mp_payment_id: &str) -> StoreResult<Option<Payment>>;
    async fn payment_splits(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentSplit>>;

    /// Check-and-set on the payment's current status. When the guard accepts
    /// the update, the split legs and the financial log entry are written in
    /// the same step; otherwise nothing changes.
    async fn transition_payment(
        &self,
        payment_id: Uuid,
        update: StatusUpdate,
        log: FinancialLog,
    ) -> StoreResult<Transition>;
    async fn financial_logs(&self, payment_id: Uuid) -> StoreResult<Vec<FinancialLog>>;

    async fn append_webhook_event(&self, event: WebhookEvent) -> StoreResult<Uuid>;
    async fn mark_webhook_event(&self, id: Uuid, error: Option<String>) -> StoreResult<()>;
    async fn webhook_events(&self) -> StoreResult<Vec<WebhookEvent>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Tables {
    producers: HashMap<Uuid, Producer>,
    products: HashMap<Uuid, Product>,
    marketplace_credentials: HashMap<Uuid, GatewayCredential>,
    direct_accounts: HashMap<Uuid, DirectPixAccount>,
    payments: HashMap<Uuid, Payment>,
    splits: HashMap<Uuid, Vec<PaymentSplit>>,
    financial_logs: Vec<FinancialLog>,
    webhook_events: Vec<WebhookEvent>,
}

/// Single-lock store; every trait call is one critical section, which makes
/// the multi-row operations atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Debug, Deserialize)]
struct Seed {
    #[serde(default)]
    producers: Vec<Producer>,
    #[serde(default)]
    products: Vec<Product>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads producers and products from a JSON file of shape `{producers: [...], products: [...]}`
    pub async fn load_seed(&self, path: &Path) -> anyhow::Result<(usize, usize)> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: Seed = serde_json::from_str(&raw)?;
        let counts = (seed.producers.len(), seed.products.len());

        let mut tables = self.tables.write().await;
        for producer in seed.producers {
            tables.producers.insert(producer.id, producer);
        }
        for product in seed.products {
            tables.products.insert(product.id, product);
        }
        Ok(counts)
    }

    #[cfg(test)]
    pub(crate) async fn payment_count(&self) -> usize {
        self.tables.read().await.payments.len()
    }
}

fn producer_mut<'a>(tables: &'a mut Tables, id: Uuid) -> StoreResult<&'a mut Producer> {
    tables.producers.get_mut(&id).ok_or(StoreError::NotFound {
        entity: "producer",
        id: id.to_string(),
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_producer(&self, id: Uuid) -> StoreResult<Option<Producer>> {
        Ok(self.tables.read().await.producers.get(&id).cloned())
    }

    async fn save_producer(&self, producer: Producer) -> StoreResult<()> {
        self.tables.write().await.producers.insert(producer.id, producer);
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn save_product(&self, product: Product) -> StoreResult<()> {
        self.tables.write().await.products.insert(product.id, product);
        Ok(())
    }

    async fn get_marketplace_credential(&self, producer_id: Uuid) -> StoreResult<Option<GatewayCredential>> {
        Ok(self
            .tables
            .read()
            .await
            .marketplace_credentials
            .get(&producer_id)
            .cloned())
    }

    async fn upsert_marketplace_credential(&self, credential: GatewayCredential) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        producer_mut(&mut tables, credential.producer_id)?;
        tables
            .marketplace_credentials
            .insert(credential.producer_id, credential);
        Ok(())
    }

    async fn invalidate_marketplace_credential(&self, producer_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(credential) = tables.marketplace_credentials.get_mut(&producer_id) {
            credential.is_valid = false;
            credential.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_marketplace_connected(&self, producer_id: Uuid, gateway_user_id: Option<String>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let producer = producer_mut(&mut tables, producer_id)?;
        producer.marketplace_connected = true;
        producer.marketplace_user_id = gateway_user_id;
        Ok(())
    }

    async fn get_direct_account(&self, producer_id: Uuid) -> StoreResult<Option<DirectPixAccount>> {
        Ok(self.tables.read().await.direct_accounts.get(&producer_id).cloned())
    }

    async fn upsert_direct_account(&self, account: DirectPixAccount) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        producer_mut(&mut tables, account.producer_id)?;
        tables.direct_accounts.insert(account.producer_id, account);
        Ok(())
    }

    async fn mark_direct_connected(
        &self,
        producer_id: Uuid,
        account_id: String,
        pix_key: Option<String>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let producer = producer_mut(&mut tables, producer_id)?;
        producer.direct_connected = true;
        producer.direct_account_id = Some(account_id);
        producer.direct_pix_key = pix_key;
        Ok(())
    }

    async fn insert_payment(&self, payment: Payment, splits: [PaymentSplit; 2]) -> StoreResult<()> {
        let leg_total = splits[0].amount + splits[1].amount;
        if leg_total != payment.total_amount
            || payment.platform_fee + payment.producer_amount != payment.total_amount
        {
            return Err(StoreError::Invariant(format!(
                "payment {} legs sum to {} but total is {}",
                payment.external_reference, leg_total, payment.total_amount
            )));
        }
        if splits.iter().any(|split| split.payment_id != payment.id)
            || splits[0].recipient_type == splits[1].recipient_type
        {
            return Err(StoreError::Invariant(format!(
                "payment {} needs one platform and one producer leg",
                payment.external_reference
            )));
        }

        let mut tables = self.tables.write().await;
        if tables
            .payments
            .values()
            .any(|existing| existing.external_reference == payment.external_reference)
        {
            return Err(StoreError::Duplicate {
                entity: "payment",
                key: payment.external_reference,
            });
        }

        tables.splits.insert(payment.id, splits.to_vec());
        tables.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn find_payment_by_reference(&self, external_reference: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .values()
            .find(|payment| payment.external_reference == external_reference)
            .cloned())
    }

    async fn find_payment_by_txid(&self, txid: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .values()
            .find(|payment| payment.efi_txid.as_deref() == Some(txid))
            .cloned())
    }

    async fn find_payment_by_mp_id(&self, mp_payment_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .values()
            .find(|payment| payment.mp_payment_id.as_deref() == Some(mp_payment_id))
            .cloned())
    }

    async fn payment_splits(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentSplit>> {
        Ok(self
            .tables
            .read()
            .await
            .splits
            .get(&payment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        update: StatusUpdate,
        log: FinancialLog,
    ) -> StoreResult<Transition> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let payment = tables.payments.get_mut(&payment_id).ok_or(StoreError::NotFound {
            entity: "payment",
            id: payment_id.to_string(),
        })?;

        let previous = payment.status;
        if !payment.accepts(&update) {
            return Ok(Transition::Skipped { current: previous });
        }

        payment.status = update.status;
        payment.updated_at = now;
        if update.status_detail.is_some() {
            payment.status_detail = update.status_detail;
        }
        if update.status == PaymentStatus::Approved {
            payment.approved_at = Some(update.approved_at.unwrap_or(now));
        }
        if update.mp_payment_id.is_some() {
            payment.mp_payment_id = update.mp_payment_id;
        }
        if update.efi_e2eid.is_some() {
            payment.efi_e2eid = update.efi_e2eid;
        }
        if update.payment_method.is_some() {
            payment.payment_method = update.payment_method;
        }

        let split_status = match update.status {
            PaymentStatus::Approved => Some(SplitStatus::Completed),
            PaymentStatus::Rejected | PaymentStatus::Cancelled => Some(SplitStatus::Failed),
            _ => None,
        };
        if let Some(split_status) = split_status {
            for split in tables.splits.entry(payment_id).or_default() {
                split.status = split_status;
                split.processed_at = Some(now);
            }
        }

        tables.financial_logs.push(FinancialLog {
            previous_status: previous,
            new_status: update.status,
            ..log
        });

        Ok(Transition::Applied {
            previous,
            current: update.status,
        })
    }

    async fn financial_logs(&self, payment_id: Uuid) -> StoreResult<Vec<FinancialLog>> {
        Ok(self
            .tables
            .read()
            .await
            .financial_logs
            .iter()
            .filter(|log| log.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn append_webhook_event(&self, event: WebhookEvent) -> StoreResult<Uuid> {
        let id = event.id;
        self.tables.write().await.webhook_events.push(event);
        Ok(id)
    }

    async fn mark_webhook_event(&self, id: Uuid, error: Option<String>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let event = tables
            .webhook_events
            .iter_mut()
            .find(|event| event.id == id)
            .ok_or(StoreError::NotFound {
                entity: "webhook event",
                id: id.to_string(),
            })?;

        match error {
            Some(message) => {
                event.error_message = Some(message);
                event.retry_count += 1;
            }
            None => {
                event.processed = true;
                event.processed_at = Some(Utc::now());
                event.error_message = None;
            }
        }
        Ok(())
    }

    async fn webhook_events(&self) -> StoreResult<Vec<WebhookEvent>> {
        Ok(self.tables.read().await.webhook_events.clone())
    }
}
