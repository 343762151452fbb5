// splitpay/src/pix_handler.rs
// Direct PIX endpoints: account connect, webhook listener and charge status polling

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::checkout_handler::rejection;
use crate::error::Result;
use crate::orchestrator::{DirectAccountLink, PaymentOrchestrator};
use crate::reconciler::{PaymentStatusView, Reconciler};

#[derive(Clone)]
pub struct PixState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub reconciler: Arc<Reconciler>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub producer_id: Uuid,
    pub efi_account_id: String,
    #[serde(default)]
    pub pix_key: Option<String>,
    #[serde(default)]
    pub pix_key_type: Option<String>,
}

pub async fn connect_account_handler(
    State(state): State<PixState>,
    payload: std::result::Result<Json<ConnectRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(e) => return rejection(e).into_response(),
    };

    let link = DirectAccountLink {
        producer_id: request.producer_id,
        account_identifier: request.efi_account_id,
        pix_key: request.pix_key,
        pix_key_type: request.pix_key_type,
    };
    match state.orchestrator.connect_direct_account(link).await {
        Ok(_) => Json(json!({
            "success": true,
            "message": "Direct PIX account connected"
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn pix_webhook_handler(
    State(state): State<PixState>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let hmac = query.get("hmac").map(String::as_str);

    match state.reconciler.handle_direct_pix(hmac, &body).await {
        Ok(outcome) => {
            tracing::info!(outcome = ?outcome, "Direct PIX webhook handled");
            outcome.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Polled by the buyer's page until the charge reads `approved`
pub async fn charge_status_handler(
    State(state): State<PixState>,
    Path(txid): Path<String>,
) -> Result<Json<PaymentStatusView>> {
    Ok(Json(state.reconciler.check_pix_status(&txid).await?))
}

pub fn router(state: PixState) -> Router {
    Router::new()
        .route("/connect", post(connect_account_handler))
        .route("/webhook", post(pix_webhook_handler))
        .route("/charges/:txid/status", get(charge_status_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout_handler;
    use crate::crypto::TokenCipher;
    use crate::gateway::direct_pix::tests as pix_fixtures;
    use crate::gateway::DirectPixGateway;
    use crate::idempotency::DeliveryCache;
    use crate::store::tests::producer;
    use crate::store::{MemoryStore, Store};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(store: &MemoryStore, gateway: Option<DirectPixGateway>) -> Router {
        let store: Arc<dyn Store> = Arc::new(store.clone());
        let gateway = gateway.map(Arc::new);
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store.clone(),
            TokenCipher::Plaintext,
            None,
            gateway.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(store, DeliveryCache::in_memory(), None, gateway));

        Router::new()
            .nest("/checkout", checkout_handler::router(orchestrator.clone()))
            .nest("/pix", router(PixState { orchestrator, reconciler }))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_then_charge_then_webhook() {
        let server = MockServer::start().await;
        pix_fixtures::mount_token(&server, 1).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/v2/cob/[A-Za-z0-9]{35}$"))
            .respond_with(ResponseTemplate::new(201).set_body_json(pix_fixtures::cob_body("TX1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/loc/789/qrcode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "qrcode": "000201-qr",
                "imagemQrcode": "data:image/png;base64,AAA"
            })))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let producer = producer();
        store.save_producer(producer.clone()).await.unwrap();
        let app = app(&store, Some(pix_fixtures::gateway(&server)));

        let (status, body) = send(
            &app,
            post_json(
                "/pix/connect",
                json!({ "producerId": producer.id, "efiAccountId": "445566", "pixKey": "loja@example.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, charge) = send(
            &app,
            post_json(
                "/checkout",
                json!({
                    "producerId": producer.id,
                    "paymentData": { "title": "Ebook", "price": 25.0, "mode": "pix" }
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(charge["txid"], "TX1");
        assert_eq!(charge["pixCopiaECola"], "000201-qr");
        assert_eq!(charge["amount"], 25.0);
        assert_eq!(charge["platformFee"], 2.5);
        assert_eq!(charge["producerAmount"], 22.5);

        let (_, pending) = send(&app, Request::get("/pix/charges/TX1/status").body(Body::empty()).unwrap()).await;
        assert_eq!(pending["status"], "pending");

        let (status, ack) = send(
            &app,
            post_json(
                "/pix/webhook",
                json!({ "pix": [{ "txid": "TX1", "valor": "25.00", "endToEndId": "E1" }] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["status"], "processed");

        let (_, approved) = send(&app, Request::get("/pix/charges/TX1/status").body(Body::empty()).unwrap()).await;
        assert_eq!(approved["status"], "approved");
        assert_eq!(approved["externalReference"], charge["externalReference"]);
    }

    #[tokio::test]
    async fn test_connect_requires_account_id() {
        let store = MemoryStore::new();
        let producer = producer();
        store.save_producer(producer.clone()).await.unwrap();

        let (status, body) = send(
            &app(&store, None),
            post_json("/pix/connect", json!({ "producerId": producer.id, "efiAccountId": "  " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_status_of_unknown_charge() {
        let (status, body) = send(
            &app(&MemoryStore::new(), None),
            Request::get("/pix/charges/NOPE/status").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_webhook_with_wrong_secret_is_unauthorized() {
        let server = MockServer::start().await;
        let mut config = pix_fixtures::config(server.uri());
        config.webhook_secret = Some("s3cret".to_string().into());
        let gateway = DirectPixGateway::with_client(config, reqwest::Client::new());

        let store = MemoryStore::new();
        let (status, _) = send(
            &app(&store, Some(gateway)),
            post_json(
                "/pix/webhook?hmac=wrong",
                json!({ "pix": [{ "txid": "TX1", "valor": "25.00", "endToEndId": "E1" }] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let events = store.webhook_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].signature_valid);
    }
}
