use arbitrage_engine::rates::TtlCache;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// Replays stored responses for repeated `Idempotency-Key`s. Redis when
/// configured, process memory otherwise; both expire after `ttl_secs`.
/// Keys are scoped per org.
#[derive(Clone)]
pub struct IdempotencyStore {
    redis: Option<redis::Client>,
    local: Arc<TtlCache<String, String>>,
    ttl_secs: u64,
}

impl IdempotencyStore {
    pub fn new(redis: Option<redis::Client>, ttl_secs: u64) -> Self {
        Self {
            redis,
            local: Arc::new(TtlCache::new(Duration::from_secs(ttl_secs))),
            ttl_secs,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, org_id: &str, key: &str) -> Option<T> {
        let scoped = scoped_key(org_id, key);
        let raw = match &self.redis {
            Some(client) => redis_get(client, &scoped).await,
            None => self.local.get(&scoped).await,
        }?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn put<T: Serialize>(&self, org_id: &str, key: &str, value: &T) {
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        let scoped = scoped_key(org_id, key);
        match &self.redis {
            Some(client) => redis_set(client, &scoped, raw, self.ttl_secs).await,
            None => self.local.insert(scoped, raw).await,
        }
    }
}

fn scoped_key(org_id: &str, key: &str) -> String {
    format!("idem:{org_id}:{key}")
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<String> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            warn!(target = "arbitrage.api", error = %err, "redis unavailable for idempotency lookup");
            return None;
        }
    };
    let value: redis::RedisResult<Option<String>> = conn.get(key).await;
    value.ok().flatten()
}

async fn redis_set(client: &redis::Client, key: &str, value: String, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
        let _: Result<(), _> = conn.set_ex(key, value, ttl_secs).await;
    }
}
