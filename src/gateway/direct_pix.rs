// splitpay/src/gateway/direct_pix.rs
// Direct PIX banking API over mutual TLS: immediate charges with an embedded settlement split

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    error_message, read_json, string_or_number, ChargeRecord, CheckoutGateway, CheckoutOrder,
    GatewayCharge, PaymentHandle, PixCharge, ProducerCredential,
};
use crate::certificate::ClientCertificate;
use crate::config::DirectPixConfig;
use crate::error::{Result, SplitError};
use crate::models::{only_digits, Document, DocumentType, GatewayKind, Payer};

const TXID_LEN: usize = 35;
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// 26-35 alphanumerics are accepted; always use the maximum
pub fn generate_txid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TXID_LEN)
        .map(char::from)
        .collect()
}

/// Two decimal places, as the charge API expects amounts
fn amount_text(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHARGE WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobRequest<'a> {
    calendario: CobExpiry,
    #[serde(skip_serializing_if = "Option::is_none")]
    devedor: Option<Debtor>,
    valor: CobAmount,
    chave: &'a str,
    solicitacao_pagador: String,
    info_adicionais: Vec<ExtraInfo>,
    split: CobSplit<'a>,
}

#[derive(Debug, Serialize)]
struct CobExpiry {
    expiracao: u32,
}

#[derive(Debug, Serialize)]
struct Debtor {
    #[serde(skip_serializing_if = "Option::is_none")]
    cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cnpj: Option<String>,
    nome: String,
}

#[derive(Debug, Serialize)]
struct CobAmount {
    original: String,
}

#[derive(Debug, Serialize)]
struct ExtraInfo {
    nome: String,
    valor: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobSplit<'a> {
    divisor_principal: AccountRef<'a>,
    minha_parte: Share,
    repasses: Vec<Transfer<'a>>,
}

#[derive(Debug, Serialize)]
struct AccountRef<'a> {
    conta: &'a str,
}

#[derive(Debug, Serialize)]
struct Share {
    tipo: &'static str,
    valor: String,
}

#[derive(Debug, Serialize)]
struct Transfer<'a> {
    tipo: &'static str,
    valor: String,
    favorecido: Beneficiary<'a>,
}

#[derive(Debug, Serialize)]
struct Beneficiary<'a> {
    conta: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cnpj: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CobResponse {
    txid: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    calendario: Option<CobCalendar>,
    #[serde(default)]
    loc: Option<CobLocation>,
    #[serde(default)]
    pix_copia_e_cola: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CobCalendar {
    #[serde(default)]
    criacao: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    expiracao: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CobLocation {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrCode {
    qrcode: String,
    imagem_qrcode: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// NOTIFICATION & STATUS TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Webhook body. A registration ping arrives with neither field set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PixNotification {
    #[serde(default)]
    pub pix: Vec<PixEntry>,
    #[serde(default)]
    pub devolucao: Option<PixRefund>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixEntry {
    #[serde(default)]
    pub txid: Option<String>,
    pub end_to_end_id: String,
    pub valor: String,
    #[serde(default)]
    pub horario: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub devolucoes: Vec<PixRefund>,
}

impl PixEntry {
    pub fn amount(&self) -> Option<Decimal> {
        Decimal::from_str(self.valor.trim()).ok()
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.horario.map(|at| at.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixRefund {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rtr_id: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub valor: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl PixRefund {
    /// Refunds still in flight are not final
    pub fn is_settled(&self) -> bool {
        self.status
            .as_deref()
            .map_or(true, |status| status.eq_ignore_ascii_case("DEVOLVIDO"))
    }
}

/// Charge as read back for an explicit polling check
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeStatus {
    pub txid: String,
    pub status: String,
    #[serde(default)]
    pub pix: Vec<PixEntry>,
}

impl ChargeStatus {
    pub fn is_concluded(&self) -> bool {
        self.status == "CONCLUIDA"
    }

    /// Removed by the receiver or by the PSP
    pub fn is_removed(&self) -> bool {
        self.status.starts_with("REMOVIDA")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADAPTER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct DirectPixGateway {
    config: DirectPixConfig,
    http_client: Client,
    auth_token: Arc<RwLock<Option<(String, DateTime<Utc>)>>>,
}

impl DirectPixGateway {
    /// Extracts the client certificate up front, so a bad bundle stops startup
    /// instead of failing the first checkout.
    pub fn new(config: DirectPixConfig) -> Result<Self> {
        let certificate = ClientCertificate::from_base64_pkcs12(
            config.certificate_base64.expose_secret(),
            config.certificate_password.expose_secret(),
        )?;

        let http_client = Client::builder()
            .use_rustls_tls()
            .identity(certificate.to_identity()?)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SplitError::Certificate(format!("mTLS client rejected certificate: {}", e)))?;

        tracing::info!(
            environment = config.environment(),
            chain_len = certificate.chain.len(),
            "Direct PIX client certificate loaded"
        );

        Ok(Self::with_client(config, http_client))
    }

    pub fn with_client(config: DirectPixConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
            auth_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn webhook_secret(&self) -> Option<&secrecy::SecretString> {
        self.config.webhook_secret.as_ref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    /// Client-credentials token, cached until a minute before it expires
    pub async fn access_token(&self) -> Result<String> {
        {
            let token_lock = self.auth_token.read().await;
            if let Some((token, expiry)) = &*token_lock {
                if *expiry > Utc::now() {
                    return Ok(token.clone());
                }
            }
        }

        let auth_str = format!(
            "{}:{}",
            self.config.client_id,
            self.config.client_secret.expose_secret()
        );
        let auth_basic = general_purpose::STANDARD.encode(auth_str);
        let url = self.url("/oauth/token");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Basic {}", auth_basic))
            .json(&json!({ "grant_type": "client_credentials" }))
            .send()
            .await
            .map_err(|e| {
                SplitError::Auth(format!(
                    "could not reach the {} token endpoint {} ({}); a TLS handshake failure \
                     here usually means the certificate was issued for the other environment",
                    self.config.environment(),
                    url,
                    e
                ))
            })?;

        let status = response.status();
        let raw = response.text().await?;
        let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(SplitError::Auth(format!(
                "token request rejected ({}): {}",
                status.as_u16(),
                error_message(&body, &raw)
            )));
        }

        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| SplitError::Auth("token response has no access_token".to_string()))?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(3600);

        let mut token_lock = self.auth_token.write().await;
        *token_lock = Some((
            access_token.clone(),
            Utc::now() + Duration::seconds(expires_in - 60),
        ));

        Ok(access_token)
    }

    async fn forget_token(&self) {
        *self.auth_token.write().await = None;
    }

    /// Bearer call; a 401 drops the cached token so the next attempt re-authenticates
    async fn authorized_json(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.forget_token().await;
        }
        read_json(response).await
    }

    fn charge_request<'a>(
        &'a self,
        order: &CheckoutOrder<'_>,
        receiving_account: &'a str,
    ) -> CobRequest<'a> {
        let (producer_cpf, producer_cnpj) = split_document(order.producer.document.as_ref());

        CobRequest {
            calendario: CobExpiry {
                expiracao: self.config.charge_expiration_secs,
            },
            devedor: order.payer.and_then(debtor),
            valor: CobAmount {
                original: amount_text(order.split.amount),
            },
            chave: &self.config.pix_key,
            solicitacao_pagador: truncate(&format!("Compra: {}", order.title), 140),
            info_adicionais: vec![
                ExtraInfo {
                    nome: "Produto".to_string(),
                    valor: truncate(order.title, 200),
                },
                ExtraInfo {
                    nome: "Referencia".to_string(),
                    valor: order.external_reference.to_string(),
                },
            ],
            split: CobSplit {
                divisor_principal: AccountRef {
                    conta: &self.config.account_id,
                },
                minha_parte: Share {
                    tipo: "fixo",
                    valor: amount_text(order.split.platform_fee),
                },
                repasses: vec![Transfer {
                    tipo: "fixo",
                    valor: amount_text(order.split.producer_amount),
                    favorecido: Beneficiary {
                        conta: receiving_account,
                        cpf: producer_cpf,
                        cnpj: producer_cnpj,
                    },
                }],
            },
        }
    }

    /// QR retrieval is best effort: the charge already exists and its
    /// copy-and-paste payload is enough to pay
    async fn fetch_qr_code(&self, location_id: &str) -> Option<QrCode> {
        let request = self
            .http_client
            .get(self.url(&format!("/v2/loc/{}/qrcode", location_id)));

        match self.authorized_json(request).await {
            Ok(body) => match serde_json::from_value(body) {
                Ok(qr) => Some(qr),
                Err(e) => {
                    tracing::warn!(location_id, "QR code response not understood: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!(location_id, "QR code retrieval failed: {}", e);
                None
            }
        }
    }

    pub async fn create_charge(&self, order: &CheckoutOrder<'_>) -> Result<GatewayCharge> {
        let account = match order.credential {
            ProducerCredential::DirectPix(account) => account,
            ProducerCredential::Marketplace { .. } => {
                return Err(SplitError::gateway_not_connected(order.producer.id, GatewayKind::DirectPix))
            }
        };

        let txid = generate_txid();
        let payload = self.charge_request(order, &account.account_identifier);

        let request = self
            .http_client
            .put(self.url(&format!("/v2/cob/{}", txid)))
            .json(&payload);
        let body = self.authorized_json(request).await?;
        let cob: CobResponse = serde_json::from_value(body).map_err(|e| SplitError::Gateway {
            status: 200,
            message: format!("unexpected charge shape: {}", e),
        })?;

        tracing::info!(
            txid = %cob.txid,
            external_reference = order.external_reference,
            producer_id = %order.producer.id,
            "PIX charge created"
        );

        let qr = match &cob.loc {
            Some(loc) => self.fetch_qr_code(&loc.id).await,
            None => None,
        };
        let (pix_copia_e_cola, qr_code_base64) = match qr {
            Some(qr) => (qr.qrcode, qr.imagem_qrcode),
            None => (cob.pix_copia_e_cola.clone().unwrap_or_default(), String::new()),
        };

        let expires_at = cob.calendario.as_ref().map(|calendar| {
            let created = calendar
                .criacao
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let expiry = calendar
                .expiracao
                .unwrap_or(i64::from(self.config.charge_expiration_secs));
            created + Duration::seconds(expiry)
        });

        Ok(GatewayCharge {
            record: Some(ChargeRecord {
                mp_payment_id: None,
                efi_txid: Some(cob.txid.clone()),
                payment_type: Some("pix".to_string()),
                payment_method: Some("pix".to_string()),
                status_detail: cob.status.clone(),
            }),
            handle: PaymentHandle::PixQr(PixCharge {
                success: true,
                txid: cob.txid,
                status: cob.status.unwrap_or_else(|| "ATIVA".to_string()),
                pix_copia_e_cola,
                qr_code_base64,
                location: cob.loc.and_then(|loc| loc.location),
                expires_at,
                amount: order.split.amount,
                platform_fee: order.split.platform_fee,
                producer_amount: order.split.producer_amount,
                external_reference: order.external_reference.to_string(),
            }),
        })
    }

    pub async fn fetch_charge(&self, txid: &str) -> Result<ChargeStatus> {
        let request = self.http_client.get(self.url(&format!("/v2/cob/{}", txid)));
        let body = self.authorized_json(request).await?;
        serde_json::from_value(body).map_err(|e| SplitError::Gateway {
            status: 200,
            message: format!("unexpected charge shape: {}", e),
        })
    }
}

#[async_trait]
impl CheckoutGateway for DirectPixGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::DirectPix
    }

    async fn checkout(&self, order: &CheckoutOrder<'_>) -> Result<GatewayCharge> {
        self.create_charge(order).await
    }
}

fn split_document(document: Option<&Document>) -> (Option<String>, Option<String>) {
    match document {
        Some(document) => match document.kind {
            DocumentType::Cpf => (Some(document.digits()), None),
            DocumentType::Cnpj => (None, Some(document.digits())),
        },
        None => (None, None),
    }
}

/// The charge API wants a debtor with both a valid tax id and a name, or none at all
fn debtor(payer: &Payer) -> Option<Debtor> {
    let digits = only_digits(payer.document.as_deref()?);
    let kind = DocumentType::from_digits(&digits)?;
    let nome = payer
        .name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Cliente".to_string());

    Some(match kind {
        DocumentType::Cpf => Debtor { cpf: Some(digits), cnpj: None, nome },
        DocumentType::Cnpj => Debtor { cpf: None, cnpj: Some(digits), nome },
    })
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
