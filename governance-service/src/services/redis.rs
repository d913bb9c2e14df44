use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;

/// Expiring failure counters, shared by every replica of the service.
#[async_trait]
pub trait AttemptCounter: Send + Sync {
    /// Increment `key`, (re)arming its expiry, and return the new count.
    async fn record_failure(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error>;
    async fn reset(&self, key: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

pub fn login_failure_key(email: &str) -> String {
    format!("login_failures:{}", email.to_lowercase())
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl AttemptCounter for RedisService {
    async fn record_failure(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to record attempt: {}", e))?;
        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reset attempts: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process counter for tests and runs without Redis. Expiry is ignored.
#[derive(Default)]
pub struct MockAttemptCounter {
    pub counts: std::sync::Mutex<HashMap<String, u64>>,
}

impl MockAttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptCounter for MockAttemptCounter {
    async fn record_failure(&self, key: &str, _window_seconds: u64) -> Result<u64, anyhow::Error> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock counter mutex poisoned: {}", e))?;
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn reset(&self, key: &str) -> Result<(), anyhow::Error> {
        self.counts
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock counter mutex poisoned: {}", e))?
            .remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
