// splitpay/src/orchestrator.rs
// Payment orchestration: producer + credential resolution, fee split, gateway dispatch, persistence

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::TokenCipher;
use crate::error::{Result, SplitError};
use crate::fees::{compute_split, FeeSplit};
use crate::gateway::{
    ChargeRecord, CheckoutGateway, CheckoutOrder, DirectPixGateway, MarketplaceGateway,
    PaymentHandle, PaymentIntent, ProducerCredential,
};
use crate::models::{
    external_reference, DirectPixAccount, GatewayKind, Payer, Payment, PaymentSplit,
    PaymentStatus, Producer, RecipientType, SplitStatus,
};
use crate::store::Store;

pub const PLATFORM_RECIPIENT: &str = "platform";

// ═══════════════════════════════════════════════════════════════════════════════
// PAYMENT ROWS
// ═══════════════════════════════════════════════════════════════════════════════

/// Inputs for a new pending Payment and its two split legs
pub(crate) struct PaymentDraft<'a> {
    pub producer_id: Uuid,
    pub product_id: Option<Uuid>,
    pub gateway: GatewayKind,
    pub external_reference: &'a str,
    pub split: FeeSplit,
    pub payer: Option<&'a Payer>,
    pub record: ChargeRecord,
}

impl PaymentDraft<'_> {
    pub fn into_rows(self, now: DateTime<Utc>) -> (Payment, [PaymentSplit; 2]) {
        let payment = Payment {
            id: Uuid::new_v4(),
            external_reference: self.external_reference.to_string(),
            producer_id: self.producer_id,
            product_id: self.product_id,
            gateway: self.gateway,
            mp_payment_id: self.record.mp_payment_id,
            mp_preference_id: None,
            efi_txid: self.record.efi_txid,
            efi_e2eid: None,
            total_amount: self.split.amount,
            platform_fee: self.split.platform_fee,
            producer_amount: self.split.producer_amount,
            currency: "BRL".to_string(),
            status: PaymentStatus::Pending,
            status_detail: self.record.status_detail,
            payment_type: self.record.payment_type,
            payment_method: self.record.payment_method,
            payer_name: self.payer.and_then(|payer| payer.name.clone()),
            payer_email: self.payer.and_then(|payer| payer.email.clone()),
            payer_document: self.payer.and_then(|payer| payer.document.clone()),
            created_at: now,
            approved_at: None,
            updated_at: now,
        };

        let leg = |recipient_type, recipient_id: String, amount, percentage| PaymentSplit {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            recipient_type,
            recipient_id,
            amount,
            percentage,
            status: SplitStatus::Pending,
            processed_at: None,
        };
        let splits = [
            leg(
                RecipientType::Platform,
                PLATFORM_RECIPIENT.to_string(),
                self.split.platform_fee,
                self.split.fee_percentage,
            ),
            leg(
                RecipientType::Producer,
                self.producer_id.to_string(),
                self.split.producer_amount,
                self.split.producer_percentage(),
            ),
        ];

        (payment, splits)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Direct PIX receiving account submitted by a producer
#[derive(Debug, Clone)]
pub struct DirectAccountLink {
    pub producer_id: Uuid,
    pub account_identifier: String,
    pub pix_key: Option<String>,
    pub pix_key_type: Option<String>,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn Store>,
    cipher: TokenCipher,
    marketplace: Option<Arc<MarketplaceGateway>>,
    direct_pix: Option<Arc<DirectPixGateway>>,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        cipher: TokenCipher,
        marketplace: Option<Arc<MarketplaceGateway>>,
        direct_pix: Option<Arc<DirectPixGateway>>,
    ) -> Self {
        Self {
            store,
            cipher,
            marketplace,
            direct_pix,
        }
    }

    fn gateway(&self, kind: GatewayKind) -> Result<&dyn CheckoutGateway> {
        let gateway = match kind {
            GatewayKind::Marketplace => self
                .marketplace
                .as_deref()
                .map(|gateway| gateway as &dyn CheckoutGateway),
            GatewayKind::DirectPix => self
                .direct_pix
                .as_deref()
                .map(|gateway| gateway as &dyn CheckoutGateway),
        };
        gateway.ok_or_else(|| {
            SplitError::Configuration(format!("the {} gateway is not configured", kind))
        })
    }

    /// Runs one checkout end to end and returns what the buyer needs to pay.
    ///
    /// Nothing leaves the process until the producer, its credential and the
    /// price have all been validated. Once the gateway has accepted the
    /// charge, a failed local write is logged and the handle is still
    /// returned, since the charge is already live.
    pub async fn create_payment(
        &self,
        producer_id: Uuid,
        intent: PaymentIntent,
    ) -> Result<PaymentHandle> {
        let producer = self
            .store
            .get_producer(producer_id)
            .await?
            .ok_or_else(|| SplitError::ProducerNotFound(producer_id.to_string()))?;

        if !producer.status.can_receive_payments() {
            return Err(SplitError::ProducerUnavailable(producer_id.to_string()));
        }

        let kind = intent.mode.gateway();
        let gateway = self.gateway(kind)?;
        let credential = self.resolve_credential(&producer, kind).await?;
        let (title, price) = self.resolve_pricing(&producer, &intent).await?;
        let split = compute_split(price, producer.platform_fee_percentage)?;
        let reference = external_reference(kind, producer.id, Utc::now());

        tracing::info!(
            producer_id = %producer.id,
            gateway = %kind,
            external_reference = %reference,
            amount = %split.amount,
            platform_fee = %split.platform_fee,
            "Submitting charge"
        );

        let order = CheckoutOrder {
            producer: &producer,
            credential: &credential,
            mode: &intent.mode,
            title: &title,
            product_id: intent.product_id,
            payer: intent.payer.as_ref(),
            split,
            external_reference: &reference,
        };

        let charge = match gateway.checkout(&order).await {
            Ok(charge) => charge,
            Err(err @ SplitError::CredentialInvalid(_)) if kind == GatewayKind::Marketplace => {
                tracing::warn!(producer_id = %producer.id, "Marketplace rejected producer token: {}", err);
                if let Err(e) = self.store.invalidate_marketplace_credential(producer.id).await {
                    tracing::error!(producer_id = %producer.id, "Failed to invalidate credential: {}", e);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if let Some(record) = charge.record {
            let draft = PaymentDraft {
                producer_id: producer.id,
                product_id: intent.product_id,
                gateway: kind,
                external_reference: &reference,
                split,
                payer: intent.payer.as_ref(),
                record,
            };
            let (payment, splits) = draft.into_rows(Utc::now());

            if let Err(e) = self.store.insert_payment(payment, splits).await {
                // the charge is live at the gateway; the handle must still reach the buyer
                tracing::error!(
                    producer_id = %producer.id,
                    external_reference = %reference,
                    amount = %split.amount,
                    platform_fee = %split.platform_fee,
                    producer_amount = %split.producer_amount,
                    "Payment persisted at gateway but local record failed: {}",
                    e
                );
            }
        }

        Ok(charge.handle)
    }

    async fn resolve_credential(
        &self,
        producer: &Producer,
        kind: GatewayKind,
    ) -> Result<ProducerCredential> {
        match kind {
            GatewayKind::Marketplace => {
                let credential = match self.store.get_marketplace_credential(producer.id).await? {
                    Some(credential) if producer.marketplace_connected => credential,
                    _ => return Err(SplitError::gateway_not_connected(producer.id, kind)),
                };
                if !credential.is_usable(Utc::now()) {
                    return Err(SplitError::CredentialInvalid(format!(
                        "marketplace token for producer {} is expired or revoked, reconnect the account",
                        producer.id
                    )));
                }
                let access_token = self.cipher.open(&credential.access_token_encrypted)?;
                Ok(ProducerCredential::Marketplace {
                    access_token: SecretString::from(access_token),
                })
            }
            GatewayKind::DirectPix => {
                let account = match self.store.get_direct_account(producer.id).await? {
                    Some(account) if producer.direct_connected => account,
                    _ => return Err(SplitError::gateway_not_connected(producer.id, kind)),
                };
                if !account.is_valid {
                    return Err(SplitError::CredentialInvalid(format!(
                        "direct PIX account for producer {} is marked invalid",
                        producer.id
                    )));
                }
                Ok(ProducerCredential::DirectPix(account))
            }
        }
    }

    /// A referenced product overrides the client-supplied title and price
    async fn resolve_pricing(
        &self,
        producer: &Producer,
        intent: &PaymentIntent,
    ) -> Result<(String, Decimal)> {
        if let Some(product_id) = intent.product_id {
            let product = self
                .store
                .get_product(product_id)
                .await?
                .filter(|product| product.producer_id == producer.id && product.is_active)
                .ok_or_else(|| SplitError::ProductNotFound(product_id.to_string()))?;
            return Ok((product.name, product.price));
        }

        let title = intent
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .ok_or_else(|| SplitError::InvalidRequest("title is required".to_string()))?;
        let price = intent
            .price
            .ok_or_else(|| SplitError::InvalidAmount("price is required".to_string()))?;

        Ok((title.to_string(), price))
    }

    /// Links a producer to its receiving account at the direct PIX bank
    pub async fn connect_direct_account(&self, link: DirectAccountLink) -> Result<DirectPixAccount> {
        let account_identifier = link.account_identifier.trim().to_string();
        if account_identifier.is_empty() {
            return Err(SplitError::InvalidRequest(
                "efiAccountId is required".to_string(),
            ));
        }

        self.store
            .get_producer(link.producer_id)
            .await?
            .ok_or_else(|| SplitError::ProducerNotFound(link.producer_id.to_string()))?;

        let pix_key = link
            .pix_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        let account = DirectPixAccount {
            producer_id: link.producer_id,
            account_identifier: account_identifier.clone(),
            pix_key: pix_key.clone(),
            pix_key_type: link.pix_key_type,
            is_valid: true,
            updated_at: Utc::now(),
        };

        self.store.upsert_direct_account(account.clone()).await?;
        self.store
            .mark_direct_connected(link.producer_id, account_identifier, pix_key)
            .await?;

        tracing::info!(producer_id = %link.producer_id, "Direct PIX account connected");
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::direct_pix::tests as pix_fixtures;
    use crate::gateway::marketplace::tests as marketplace_fixtures;
    use crate::gateway::CheckoutMode;
    use crate::models::{FinancialLog, GatewayCredential, Product, StatusUpdate, Transition, WebhookEvent};
    use crate::store::tests::{dec, producer};
    use crate::store::{MemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn intent(mode: CheckoutMode) -> PaymentIntent {
        PaymentIntent {
            title: Some("Ebook".to_string()),
            price: Some(dec("25.00")),
            product_id: None,
            payer: None,
            mode,
        }
    }

    fn orchestrator(
        store: &MemoryStore,
        marketplace: Option<MarketplaceGateway>,
        direct_pix: Option<DirectPixGateway>,
    ) -> PaymentOrchestrator {
        PaymentOrchestrator::new(
            Arc::new(store.clone()),
            TokenCipher::Plaintext,
            marketplace.map(Arc::new),
            direct_pix.map(Arc::new),
        )
    }

    async fn connected_marketplace_producer(store: &MemoryStore, expires_in_hours: i64) -> Producer {
        let mut producer = producer();
        producer.marketplace_connected = true;
        store.save_producer(producer.clone()).await.unwrap();
        store
            .upsert_marketplace_credential(GatewayCredential {
                producer_id: producer.id,
                access_token_encrypted: "APP_USR-producer".into(),
                refresh_token_encrypted: None,
                token_type: Some("bearer".into()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(expires_in_hours)),
                scope: None,
                gateway_user_id: Some("998877".into()),
                is_valid: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        producer
    }

    async fn connected_pix_producer(store: &MemoryStore) -> Producer {
        let mut producer = producer();
        producer.direct_connected = true;
        store.save_producer(producer.clone()).await.unwrap();
        store
            .upsert_direct_account(DirectPixAccount {
                producer_id: producer.id,
                account_identifier: "445566".into(),
                pix_key: None,
                pix_key_type: None,
                is_valid: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        producer
    }

    #[tokio::test]
    async fn test_unknown_producer() {
        let store = MemoryStore::new();
        let result = orchestrator(&store, None, None)
            .create_payment(Uuid::new_v4(), intent(CheckoutMode::Pix))
            .await;
        assert!(matches!(result, Err(SplitError::ProducerNotFound(_))));
    }

    #[tokio::test]
    async fn test_suspended_producer_cannot_charge() {
        let store = MemoryStore::new();
        let mut suspended = producer();
        suspended.status = crate::models::ProducerStatus::Suspended;
        store.save_producer(suspended.clone()).await.unwrap();

        let result = orchestrator(&store, None, None)
            .create_payment(suspended.id, intent(CheckoutMode::Pix))
            .await;
        assert!(matches!(result, Err(SplitError::ProducerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_configuration_error() {
        let store = MemoryStore::new();
        let producer = connected_pix_producer(&store).await;

        let result = orchestrator(&store, None, None)
            .create_payment(producer.id, intent(CheckoutMode::Pix))
            .await;
        assert!(matches!(result, Err(SplitError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_not_connected_makes_no_outbound_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = producer();
        store.save_producer(producer.clone()).await.unwrap();
        let orchestrator = orchestrator(
            &store,
            Some(marketplace_fixtures::gateway(&server)),
            Some(pix_fixtures::gateway(&server)),
        );

        let pix = orchestrator
            .create_payment(producer.id, intent(CheckoutMode::Pix))
            .await;
        assert!(matches!(pix, Err(SplitError::GatewayNotConnected { .. })));

        let redirect = orchestrator
            .create_payment(
                producer.id,
                intent(CheckoutMode::Redirect { success_url: None, failure_url: None }),
            )
            .await;
        assert!(matches!(redirect, Err(SplitError::GatewayNotConnected { .. })));
    }

    #[tokio::test]
    async fn test_expired_token_is_credential_invalid_without_call() {
        let server = MockServer::start().await;
        Mock::given(path("/checkout/preferences"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = connected_marketplace_producer(&store, -1).await;

        let result = orchestrator(&store, Some(marketplace_fixtures::gateway(&server)), None)
            .create_payment(
                producer.id,
                intent(CheckoutMode::Redirect { success_url: None, failure_url: None }),
            )
            .await;
        assert!(matches!(result, Err(SplitError::CredentialInvalid(_))));
    }

    #[tokio::test]
    async fn test_pix_checkout_persists_pending_payment_with_splits() {
        let server = MockServer::start().await;
        pix_fixtures::mount_token(&server, 1).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v2/cob/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(pix_fixtures::cob_body("TX1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/loc/789/qrcode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "qrcode": "000201",
                "imagemQrcode": "data:image/png;base64,AAA"
            })))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = connected_pix_producer(&store).await;

        let handle = orchestrator(&store, None, Some(pix_fixtures::gateway(&server)))
            .create_payment(producer.id, intent(CheckoutMode::Pix))
            .await
            .unwrap();

        let reference = match handle {
            PaymentHandle::PixQr(pix) => {
                assert_eq!(pix.producer_amount, dec("22.50"));
                pix.external_reference
            }
            other => panic!("expected PIX handle, got {:?}", other),
        };

        let payment = store.find_payment_by_txid("TX1").await.unwrap().unwrap();
        assert_eq!(payment.external_reference, reference);
        assert!(reference.starts_with("efi_"));
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.gateway, GatewayKind::DirectPix);
        assert_eq!(payment.platform_fee + payment.producer_amount, payment.total_amount);

        let splits = store.payment_splits(payment.id).await.unwrap();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].amount + splits[1].amount, dec("25.00"));
        assert_eq!(splits[1].percentage, dec("90"));
    }

    /// Reads through to memory; every payment insert fails
    struct FailingStore(MemoryStore);

    #[async_trait]
    impl Store for FailingStore {
        async fn get_producer(&self, id: Uuid) -> StoreResult<Option<Producer>> {
            self.0.get_producer(id).await
        }
        async fn save_producer(&self, producer: Producer) -> StoreResult<()> {
            self.0.save_producer(producer).await
        }
        async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
            self.0.get_product(id).await
        }
        async fn save_product(&self, product: Product) -> StoreResult<()> {
            self.0.save_product(product).await
        }
        async fn get_marketplace_credential(&self, producer_id: Uuid) -> StoreResult<Option<GatewayCredential>> {
            self.0.get_marketplace_credential(producer_id).await
        }
        async fn upsert_marketplace_credential(&self, credential: GatewayCredential) -> StoreResult<()> {
            self.0.upsert_marketplace_credential(credential).await
        }
        async fn invalidate_marketplace_credential(&self, producer_id: Uuid) -> StoreResult<()> {
            self.0.invalidate_marketplace_credential(producer_id).await
        }
        async fn mark_marketplace_connected(&self, producer_id: Uuid, gateway_user_id: Option<String>) -> StoreResult<()> {
            self.0.mark_marketplace_connected(producer_id, gateway_user_id).await
        }
        async fn get_direct_account(&self, producer_id: Uuid) -> StoreResult<Option<DirectPixAccount>> {
            self.0.get_direct_account(producer_id).await
        }
        async fn upsert_direct_account(&self, account: DirectPixAccount) -> StoreResult<()> {
            self.0.upsert_direct_account(account).await
        }
        async fn mark_direct_connected(
            &self,
            producer_id: Uuid,
            account_id: String,
            pix_key: Option<String>,
        ) -> StoreResult<()> {
            self.0.mark_direct_connected(producer_id, account_id, pix_key).await
        }
        async fn insert_payment(&self, _payment: Payment, _splits: [PaymentSplit; 2]) -> StoreResult<()> {
            Err(StoreError::Backend("connection reset".to_string()))
        }
        async fn find_payment_by_reference(&self, external_reference: &str) -> StoreResult<Option<Payment>> {
            self.0.find_payment_by_reference(external_reference).await
        }
        async fn find_payment_by_txid(&self, txid: &str) -> StoreResult<Option<Payment>> {
            self.0.find_payment_by_txid(txid).await
        }
        async fn find_payment_by_mp_id(&self, mp_payment_id: &str) -> StoreResult<Option<Payment>> {
            self.0.find_payment_by_mp_id(mp_payment_id).await
        }
        async fn payment_splits(&self, payment_id: Uuid) -> StoreResult<Vec<PaymentSplit>> {
            self.0.payment_splits(payment_id).await
        }
        async fn transition_payment(
            &self,
            payment_id: Uuid,
            update: StatusUpdate,
            log: FinancialLog,
        ) -> StoreResult<Transition> {
            self.0.transition_payment(payment_id, update, log).await
        }
        async fn financial_logs(&self, payment_id: Uuid) -> StoreResult<Vec<FinancialLog>> {
            self.0.financial_logs(payment_id).await
        }
        async fn append_webhook_event(&self, event: WebhookEvent) -> StoreResult<Uuid> {
            self.0.append_webhook_event(event).await
        }
        async fn mark_webhook_event(&self, id: Uuid, error: Option<String>) -> StoreResult<()> {
            self.0.mark_webhook_event(id, error).await
        }
        async fn webhook_events(&self) -> StoreResult<Vec<WebhookEvent>> {
            self.0.webhook_events().await
        }
    }

    #[tokio::test]
    async fn test_live_charge_survives_failed_local_write() {
        let server = MockServer::start().await;
        pix_fixtures::mount_token(&server, 1).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v2/cob/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(pix_fixtures::cob_body("TX1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/loc/789/qrcode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "qrcode": "000201",
                "imagemQrcode": "data:image/png;base64,AAA"
            })))
            .mount(&server)
            .await;

        let memory = MemoryStore::new();
        let producer = connected_pix_producer(&memory).await;
        let orchestrator = PaymentOrchestrator::new(
            Arc::new(FailingStore(memory.clone())),
            TokenCipher::Plaintext,
            None,
            Some(Arc::new(pix_fixtures::gateway(&server))),
        );

        let handle = orchestrator
            .create_payment(producer.id, intent(CheckoutMode::Pix))
            .await
            .unwrap();

        match handle {
            PaymentHandle::PixQr(pix) => {
                assert_eq!(pix.txid, "TX1");
                assert_eq!(pix.pix_copia_e_cola, "000201");
            }
            other => panic!("expected PIX handle, got {:?}", other),
        }
        assert_eq!(memory.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_redirect_checkout_does_not_persist() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pref-1",
                "init_point": "https://gateway.test/pref-1"
            })))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = connected_marketplace_producer(&store, 24).await;

        let handle = orchestrator(&store, Some(marketplace_fixtures::gateway(&server)), None)
            .create_payment(
                producer.id,
                intent(CheckoutMode::Redirect { success_url: None, failure_url: None }),
            )
            .await
            .unwrap();

        match handle {
            PaymentHandle::Redirect { external_reference, .. } => {
                assert!(external_reference.starts_with(&format!("mp_{}_", producer.id)));
                assert!(store
                    .find_payment_by_reference(&external_reference)
                    .await
                    .unwrap()
                    .is_none());
            }
            other => panic!("expected redirect handle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_token_invalidates_credential_and_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "message": "invalid access token" })),
            )
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = connected_marketplace_producer(&store, 24).await;

        let result = orchestrator(&store, Some(marketplace_fixtures::gateway(&server)), None)
            .create_payment(
                producer.id,
                intent(CheckoutMode::Transparent { form_data: Map::new() }),
            )
            .await;

        assert!(matches!(result, Err(SplitError::CredentialInvalid(_))));
        assert_eq!(store.payment_count().await, 0);
        let credential = store
            .get_marketplace_credential(producer.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!credential.is_valid);
    }

    #[tokio::test]
    async fn test_transparent_checkout_records_marketplace_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 42,
                "status": "pending",
                "status_detail": "pending_waiting_transfer",
                "payment_method_id": "pix",
                "payment_type_id": "bank_transfer"
            })))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = connected_marketplace_producer(&store, 24).await;

        orchestrator(&store, Some(marketplace_fixtures::gateway(&server)), None)
            .create_payment(
                producer.id,
                intent(CheckoutMode::Transparent { form_data: Map::new() }),
            )
            .await
            .unwrap();

        let payment = store.find_payment_by_mp_id("42").await.unwrap().unwrap();
        assert_eq!(payment.gateway, GatewayKind::Marketplace);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.payment_type.as_deref(), Some("bank_transfer"));
    }

    #[tokio::test]
    async fn test_product_price_overrides_client_price() {
        let server = MockServer::start().await;
        pix_fixtures::mount_token(&server, 1).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v2/cob/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "txid": "TX2" })))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = connected_pix_producer(&store).await;
        let product = Product {
            id: Uuid::new_v4(),
            producer_id: producer.id,
            name: "Curso completo".into(),
            description: None,
            price: dec("199.90"),
            currency: "BRL".into(),
            is_active: true,
        };
        store.save_product(product.clone()).await.unwrap();

        let mut request = intent(CheckoutMode::Pix);
        request.product_id = Some(product.id);
        request.price = Some(dec("1.00"));

        orchestrator(&store, None, Some(pix_fixtures::gateway(&server)))
            .create_payment(producer.id, request)
            .await
            .unwrap();

        let payment = store.find_payment_by_txid("TX2").await.unwrap().unwrap();
        assert_eq!(payment.total_amount, dec("199.90"));
        assert_eq!(payment.platform_fee, dec("19.99"));
        assert_eq!(payment.product_id, Some(product.id));
    }

    #[tokio::test]
    async fn test_foreign_or_inactive_product_is_not_found() {
        let store = MemoryStore::new();
        let producer = connected_pix_producer(&store).await;
        let product = Product {
            id: Uuid::new_v4(),
            producer_id: Uuid::new_v4(),
            name: "Outro".into(),
            description: None,
            price: dec("10.00"),
            currency: "BRL".into(),
            is_active: true,
        };
        store.save_product(product.clone()).await.unwrap();

        let server = MockServer::start().await;
        let mut request = intent(CheckoutMode::Pix);
        request.product_id = Some(product.id);

        let result = orchestrator(&store, None, Some(pix_fixtures::gateway(&server)))
            .create_payment(producer.id, request)
            .await;
        assert!(matches!(result, Err(SplitError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_non_positive_price_rejected() {
        let store = MemoryStore::new();
        let producer = connected_pix_producer(&store).await;
        let server = MockServer::start().await;

        let mut request = intent(CheckoutMode::Pix);
        request.price = Some(Decimal::ZERO);

        let result = orchestrator(&store, None, Some(pix_fixtures::gateway(&server)))
            .create_payment(producer.id, request)
            .await;
        assert!(matches!(result, Err(SplitError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_connect_direct_account() {
        let store = MemoryStore::new();
        let producer = producer();
        store.save_producer(producer.clone()).await.unwrap();
        let orchestrator = orchestrator(&store, None, None);

        let empty = orchestrator
            .connect_direct_account(DirectAccountLink {
                producer_id: producer.id,
                account_identifier: "  ".into(),
                pix_key: None,
                pix_key_type: None,
            })
            .await;
        assert!(matches!(empty, Err(SplitError::InvalidRequest(_))));

        orchestrator
            .connect_direct_account(DirectAccountLink {
                producer_id: producer.id,
                account_identifier: "445566".into(),
                pix_key: Some("loja@example.com".into()),
                pix_key_type: Some("email".into()),
            })
            .await
            .unwrap();

        let stored = store.get_producer(producer.id).await.unwrap().unwrap();
        assert!(stored.direct_connected);
        assert_eq!(stored.direct_account_id.as_deref(), Some("445566"));
        assert_eq!(stored.direct_pix_key.as_deref(), Some("loja@example.com"));
        assert!(store.get_direct_account(producer.id).await.unwrap().unwrap().is_valid);

        let unknown = orchestrator
            .connect_direct_account(DirectAccountLink {
                producer_id: Uuid::new_v4(),
                account_identifier: "1".into(),
                pix_key: None,
                pix_key_type: None,
            })
            .await;
        assert!(matches!(unknown, Err(SplitError::ProducerNotFound(_))));
    }
}
