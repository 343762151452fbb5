// splitpay/src/idempotency.rs
// Webhook delivery cache (Redis or in-memory). A fast path only: the payment
// status guard in the store is what actually keeps replays from double-applying.

use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::GatewayKind;

const DELIVERY_TTL_SECS: u64 = 86_400;

#[derive(Clone)]
pub struct DeliveryCache {
    redis_client: Option<redis::Client>,
    fallback: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl DeliveryCache {
    pub fn new(redis_url: Option<&str>) -> Self {
        let redis_client = redis_url.and_then(|url| {
            redis::Client::open(url)
                .map_err(|e| tracing::warn!("Redis unavailable, using in-memory delivery cache: {}", e))
                .ok()
        });

        Self {
            redis_client,
            fallback: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    fn key(gateway: GatewayKind, delivery_id: &str) -> String {
        format!("webhook:{}:{}", gateway, delivery_id)
    }

    pub async fn is_processed(&self, gateway: GatewayKind, delivery_id: &str) -> bool {
        let key = Self::key(gateway, delivery_id);

        if let Some(client) = &self.redis_client {
            match client.get_multiplexed_async_connection().await {
                Ok(mut con) => match con.exists::<_, bool>(&key).await {
                    Ok(exists) => return exists,
                    Err(e) => tracing::warn!("Redis EXISTS failed for {}: {}", key, e),
                },
                Err(e) => tracing::warn!("Redis connection failed: {}", e),
            }
        }

        let store = self.fallback.read().await;
        store
            .get(&key)
            .map_or(false, |expires_at| *expires_at > Utc::now())
    }

    pub async fn mark_processed(&self, gateway: GatewayKind, delivery_id: &str) {
        let key = Self::key(gateway, delivery_id);

        if let Some(client) = &self.redis_client {
            if let Ok(mut con) = client.get_multiplexed_async_connection().await {
                let stored: redis::RedisResult<()> =
                    con.set_ex(&key, Utc::now().to_rfc3339(), DELIVERY_TTL_SECS as _).await;
                match stored {
                    Ok(()) => return,
                    Err(e) => tracing::warn!("Redis SETEX failed for {}: {}", key, e),
                }
            }
        }

        let mut store = self.fallback.write().await;
        let now = Utc::now();
        store.retain(|_, expires_at| *expires_at > now);
        store.insert(key, now + Duration::seconds(DELIVERY_TTL_SECS as i64));
    }
}
