// splitpay/src/oauth.rs
// Authorization-code exchange for the marketplace gateway

use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::TokenCipher;
use crate::error::{Result, SplitError};
use crate::gateway::MarketplaceGateway;
use crate::models::GatewayCredential;
use crate::store::Store;

pub struct OAuthExchange {
    store: Arc<dyn Store>,
    cipher: TokenCipher,
    marketplace: Option<Arc<MarketplaceGateway>>,
}

impl OAuthExchange {
    pub fn new(
        store: Arc<dyn Store>,
        cipher: TokenCipher,
        marketplace: Option<Arc<MarketplaceGateway>>,
    ) -> Self {
        Self {
            store,
            cipher,
            marketplace,
        }
    }

    /// Trades a single-use code for the producer's delegated token and stores
    /// it sealed. No retry: a failed exchange restarts the browser flow.
    pub async fn exchange(
        &self,
        code: &str,
        producer_id: Uuid,
        redirect_uri: &str,
    ) -> Result<GatewayCredential> {
        if code.trim().is_empty() {
            return Err(SplitError::InvalidRequest("code is required".to_string()));
        }
        let gateway = self.marketplace.as_ref().ok_or_else(|| {
            SplitError::Configuration("the marketplace gateway is not configured".to_string())
        })?;

        self.store
            .get_producer(producer_id)
            .await?
            .ok_or_else(|| SplitError::ProducerNotFound(producer_id.to_string()))?;

        let token = gateway.exchange_code(code, redirect_uri).await.map_err(|e| {
            tracing::warn!(producer_id = %producer_id, "Authorization code exchange failed: {}", e);
            match e {
                SplitError::Network(message) => SplitError::Auth(message),
                other => other,
            }
        })?;

        let now = Utc::now();
        let refresh_token_encrypted = token
            .refresh_token
            .as_ref()
            .map(|refresh| self.cipher.seal(refresh.expose_secret()))
            .transpose()?;
        let credential = GatewayCredential {
            producer_id,
            access_token_encrypted: self.cipher.seal(token.access_token.expose_secret())?,
            refresh_token_encrypted,
            token_type: token.token_type.clone(),
            expires_at: token
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| now + Duration::seconds(secs)),
            scope: token.scope.clone(),
            gateway_user_id: token.user_id(),
            is_valid: true,
            updated_at: now,
        };

        // the code is spent now; a failure here means the producer must re-authorize
        self.store
            .upsert_marketplace_credential(credential.clone())
            .await
            .map_err(|e| {
                tracing::error!(producer_id = %producer_id, "Failed to store marketplace credential: {}", e);
                SplitError::Persistence(e.to_string())
            })?;
        self.store
            .mark_marketplace_connected(producer_id, credential.gateway_user_id.clone())
            .await?;

        tracing::info!(
            producer_id = %producer_id,
            gateway_user_id = credential.gateway_user_id.as_deref().unwrap_or("unknown"),
            sealed = self.cipher.is_encrypting(),
            "Marketplace account connected"
        );
        Ok(credential)
    }
}
