//! Redis connection management and primitives for the transcode platform.
//!
//! Wraps a [`ConnectionManager`] with command timeouts and exposes the
//! key/value, counter and distributed-lock operations the services rely on.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tokio::time::{timeout, Duration};
use tracing::{error, info};

// Redis command timeout configuration
const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 3_000;
const MIN_REDIS_COMMAND_TIMEOUT_MS: u64 = 500;

/// Get Redis command timeout from environment or default
fn redis_command_timeout() -> Duration {
    static TIMEOUT: OnceCell<Duration> = OnceCell::new();
    *TIMEOUT.get_or_init(|| {
        let ms = std::env::var("REDIS_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REDIS_COMMAND_TIMEOUT_MS)
            .max(MIN_REDIS_COMMAND_TIMEOUT_MS);

        info!("Redis command timeout set to {}ms", ms);
        Duration::from_millis(ms)
    })
}

/// Wrap a Redis command with timeout protection.
pub async fn with_timeout<F, T>(future: F) -> Result<T, RedisError>
where
    F: std::future::Future<Output = Result<T, RedisError>>,
{
    match timeout(redis_command_timeout(), future).await {
        Ok(res) => res,
        Err(_) => {
            error!(
                "Redis command timed out after {:?}",
                redis_command_timeout()
            );
            Err(RedisError::from((
                redis::ErrorKind::IoError,
                "redis command timed out",
            )))
        }
    }
}

/// Shared Redis handle with auto-reconnecting connection manager.
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    /// Connect to Redis and initialize the connection manager.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection manager initialized");
        Ok(Self { manager })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// SET with TTL.
    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager();
        let _: () = with_timeout(conn.set_ex(key, value, ttl_secs)).await?;
        Ok(())
    }

    /// GET, `None` when the key is absent.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager();
        let value: Option<String> = with_timeout(conn.get(key)).await?;
        Ok(value)
    }

    /// Unconditional DEL.
    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager();
        let _: () = with_timeout(conn.del(key)).await?;
        Ok(())
    }

    /// INCR, refreshing the key TTL on every call.
    pub async fn incr_ex(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.manager();
        let count: i64 = with_timeout(conn.incr(key, 1)).await?;
        let _: bool = with_timeout(conn.expire(key, ttl_secs as i64)).await?;
        Ok(count)
    }

    /// Acquire a distributed lock: SET NX EX.
    ///
    /// Returns `true` when this caller now owns `resource`. The lock expires
    /// after `ttl_secs` unless renewed by another `acquire_lock` from the
    /// same owner token.
    pub async fn acquire_lock(&self, resource: &str, token: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.manager();
        let reply: Option<String> = with_timeout(
            redis::cmd("SET")
                .arg(resource)
                .arg(token)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn),
        )
        .await?;

        if reply.is_some() {
            return Ok(true);
        }

        // Renewal path: the holder may extend its own lease.
        let holder: Option<String> = with_timeout(conn.get(resource)).await?;
        if holder.as_deref() == Some(token) {
            let _: bool = with_timeout(conn.expire(resource, ttl_secs as i64)).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Release a lock: unconditional DEL.
    pub async fn release_lock(&self, resource: &str) -> Result<()> {
        self.del(resource).await
    }
}
