//! Redis-backed key/value and lock port

use crate::error::{AppError, Result};
use crate::ports::KeyValueStore;
use async_trait::async_trait;
use redis_utils::RedisPool;

/// `KeyValueStore` over the shared Redis pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: RedisPool,
}

impl RedisStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.pool
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| AppError::Cache(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.pool
            .get(key)
            .await
            .map_err(|e| AppError::Cache(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.pool
            .del(key)
            .await
            .map_err(|e| AppError::Cache(e.to_string()))
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        self.pool
            .incr_ex(key, ttl_secs)
            .await
            .map_err(|e| AppError::Cache(e.to_string()))
    }

    async fn acquire_lock(&self, resource: &str, owner: &str, ttl_secs: u64) -> Result<bool> {
        self.pool
            .acquire_lock(resource, owner, ttl_secs)
            .await
            .map_err(|e| AppError::Cache(e.to_string()))
    }

    async fn release_lock(&self, resource: &str) -> Result<()> {
        self.pool
            .release_lock(resource)
            .await
            .map_err(|e| AppError::Cache(e.to_string()))
    }
}
