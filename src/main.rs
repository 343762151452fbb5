use axum::{routing::get, Router};
use dotenv::dotenv;
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod certificate;
mod checkout_handler;
mod config;
mod crypto;
mod error;
mod fees;
mod gateway;
mod idempotency;
mod marketplace_handler;
mod models;
mod oauth;
mod orchestrator;
mod pix_handler;
mod reconciler;
mod signature;
mod store;

use config::AppConfig;
use crypto::TokenCipher;
use gateway::{DirectPixGateway, MarketplaceGateway};
use idempotency::DeliveryCache;
use marketplace_handler::MarketplaceState;
use oauth::OAuthExchange;
use orchestrator::PaymentOrchestrator;
use pix_handler::PixState;
use reconciler::Reconciler;
use store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    let cipher = match &config.token_encryption_key {
        Some(key) => TokenCipher::from_base64_key(key.expose_secret())?,
        None => {
            tracing::warn!("TOKEN_ENCRYPTION_KEY not set, OAuth tokens will be stored in plaintext");
            TokenCipher::Plaintext
        }
    };

    let memory = MemoryStore::new();
    if let Some(seed_file) = &config.seed_file {
        let (producers, products) = memory.load_seed(Path::new(seed_file)).await?;
        tracing::info!(producers, products, "Loaded seed data from {}", seed_file);
    }
    let store: Arc<dyn Store> = Arc::new(memory);

    // Gateways fail fast: a bad certificate or partial config aborts startup
    let marketplace = match config.marketplace.clone() {
        Some(section) => Some(Arc::new(MarketplaceGateway::new(
            section,
            &config.public_base_url,
            config.checkout_urls.clone(),
        )?)),
        None => {
            tracing::warn!("Marketplace gateway not configured, redirect and transparent checkout disabled");
            None
        }
    };
    let direct_pix = match config.direct_pix.clone() {
        Some(section) => {
            let environment = section.environment();
            let gateway = DirectPixGateway::new(section)?;
            tracing::info!(environment, "Direct PIX gateway ready");
            Some(Arc::new(gateway))
        }
        None => {
            tracing::warn!("Direct PIX gateway not configured, PIX checkout disabled");
            None
        }
    };

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store.clone(),
        cipher.clone(),
        marketplace.clone(),
        direct_pix.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        DeliveryCache::new(config.redis_url.as_deref()),
        marketplace.clone(),
        direct_pix,
    ));
    let oauth = Arc::new(OAuthExchange::new(store, cipher, marketplace));

    let marketplace_router = marketplace_handler::router(MarketplaceState {
        oauth,
        reconciler: reconciler.clone(),
    });
    let pix_router = pix_handler::router(PixState {
        orchestrator: orchestrator.clone(),
        reconciler,
    });

    let app = Router::new()
        .nest("/checkout", checkout_handler::router(orchestrator))
        .nest("/marketplace", marketplace_router)
        .nest("/pix", pix_router)
        .route("/health", get(|| async { "OK" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("   - Checkout:            http://{}/checkout", addr);
    tracing::info!("   - Marketplace webhook: http://{}/marketplace/webhook", addr);
    tracing::info!("   - PIX webhook:         http://{}/pix/webhook", addr);
    tracing::info!("   - Health Check:        http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, shutting down gracefully");
}
