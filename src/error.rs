// splitpay/src/error.rs
// Error taxonomy shared by the gateways, orchestrator and webhook reconciler

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SplitError {
    /// Missing or incomplete secrets for an adapter
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The PKCS#12 bundle could not be decoded or holds no usable key
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Producer holds a credential, but it is expired, revoked or rejected
    #[error("Credential invalid: {0}")]
    CredentialInvalid(String),

    #[error("Producer {producer_id} is not connected to the {gateway} gateway")]
    GatewayNotConnected { producer_id: String, gateway: String },

    /// Gateway rejected client credentials or an authorization code
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Non-2xx response from a charge, preference or lookup call
    #[error("Gateway error ({status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("Transport error: {0}")]
    Network(String),

    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Producer {0} cannot receive payments in its current status")]
    ProducerUnavailable(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A local write failed; when this follows a live charge, money has moved
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl SplitError {
    pub fn gateway_not_connected(producer_id: impl ToString, gateway: impl ToString) -> Self {
        SplitError::GatewayNotConnected {
            producer_id: producer_id.to_string(),
            gateway: gateway.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SplitError::Configuration(_) | SplitError::Certificate(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SplitError::CredentialInvalid(_) => StatusCode::UNAUTHORIZED,
            SplitError::GatewayNotConnected { .. } | SplitError::ProducerUnavailable(_) => {
                StatusCode::PRECONDITION_FAILED
            }
            SplitError::Auth(_) => StatusCode::UNAUTHORIZED,
            SplitError::Gateway { .. } | SplitError::Network(_) => StatusCode::BAD_GATEWAY,
            SplitError::ProducerNotFound(_)
            | SplitError::ProductNotFound(_)
            | SplitError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            SplitError::InvalidAmount(_) | SplitError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            SplitError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show at checkout; configuration and storage details stay in the logs
    pub fn user_message(&self) -> String {
        match self {
            SplitError::Configuration(_) | SplitError::Certificate(_) => {
                "Payment gateway is not available".to_string()
            }
            SplitError::Persistence(_) => "Internal server error".to_string(),
            SplitError::Network(_) => "Payment gateway could not be reached".to_string(),
            other => other.to_string(),
        }
    }

    /// Configuration-class errors are never worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, SplitError::Network(_) | SplitError::Gateway { status: 500.., .. })
    }
}

impl From<reqwest::Error> for SplitError {
    fn from(err: reqwest::Error) -> Self {
        SplitError::Network(err.to_string())
    }
}

impl From<StoreError> for SplitError {
    fn from(err: StoreError) -> Self {
        SplitError::Persistence(err.to_string())
    }
}

impl IntoResponse for SplitError {
    fn into_response(self) -> Response {
        match &self {
            SplitError::Persistence(_) | SplitError::Configuration(_) | SplitError::Certificate(_) => {
                tracing::error!("Service error: {}", self);
            }
            SplitError::Gateway { .. } | SplitError::Network(_) | SplitError::Auth(_) => {
                tracing::warn!("Gateway failure: {}", self);
            }
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = serde_json::json!({
            "error": self.user_message(),
            "success": false,
        });
        (self.status_code(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SplitError>;
