use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

/// Idle entries are swept once the registry grows past this size.
const PRUNE_THRESHOLD: usize = 1024;
const REDIS_KEY_PREFIX: &str = "scheduling_lock:";
const REDIS_POLL_INTERVAL: Duration = Duration::from_millis(15);

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Redis lock backend error: {0}")]
    Backend(String),

    #[error("Timed out waiting for lock {0}")]
    Timeout(String),
}

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        LockError::Backend(err.to_string())
    }
}

/// In-process registry of one async mutex per key.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            if slots.len() >= PRUNE_THRESHOLD {
                // Only the registry holds a reference to an idle slot.
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            Arc::clone(
                slots
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        slot.lock_owned().await
    }

    pub async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}

/// A held Redis lease; `token` proves ownership on release.
#[derive(Debug)]
pub struct RedisLease {
    key: String,
    token: String,
}

/// Cross-process mutual exclusion via `SET NX PX` leases.
pub struct RedisKeyedLock {
    pool: Pool,
    ttl: Duration,
}

impl RedisKeyedLock {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, LockError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| LockError::Backend(format!("Pool creation error: {}", e)))?;

        Ok(Self { pool, ttl })
    }

    pub async fn acquire(&self, key: &str, deadline: Instant) -> Result<RedisLease, LockError> {
        let full_key = format!("{}{}", REDIS_KEY_PREFIX, key);
        let token = Uuid::new_v4().to_string();
        let ttl_ms = self.ttl.as_millis() as u64;

        loop {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| LockError::Backend(format!("Connection error: {}", e)))?;

            let acquired: Option<String> = redis::cmd("SET")
                .arg(&full_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;

            if acquired.is_some() {
                debug!("Acquired distributed lock {}", full_key);
                return Ok(RedisLease { key: full_key, token });
            }

            if Instant::now() >= deadline {
                return Err(LockError::Timeout(key.to_string()));
            }
            drop(conn);
            tokio::time::sleep(REDIS_POLL_INTERVAL).await;
        }
    }

    pub async fn release(&self, lease: RedisLease) -> Result<(), LockError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| LockError::Backend(format!("Connection error: {}", e)))?;

        let removed: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            warn!("Distributed lock {} expired before release", lease.key);
        }
        Ok(())
    }
}

/// Serialises a read-decide-write unit per key: always in-process, and across
/// processes too when Redis is configured.
pub struct SchedulingLock {
    local: KeyedLocks,
    distributed: Option<RedisKeyedLock>,
}

pub struct SchedulingGuard<'a> {
    _local: OwnedMutexGuard<()>,
    lease: Option<RedisLease>,
    owner: &'a SchedulingLock,
}

impl SchedulingLock {
    pub fn local() -> Self {
        Self { local: KeyedLocks::new(), distributed: None }
    }

    pub fn with_redis(redis: RedisKeyedLock) -> Self {
        Self { local: KeyedLocks::new(), distributed: Some(redis) }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, LockError> {
        match &config.redis_url {
            Some(url) => {
                info!("Scheduling locks backed by Redis");
                Ok(Self::with_redis(RedisKeyedLock::new(url, config.lock_ttl())?))
            }
            None => Ok(Self::local()),
        }
    }

    pub async fn acquire(&self, key: &str, max_wait: Duration) -> Result<SchedulingGuard<'_>, LockError> {
        let deadline = Instant::now() + max_wait;
        let local = tokio::time::timeout_at(deadline, self.local.lock(key))
            .await
            .map_err(|_| LockError::Timeout(key.to_string()))?;

        let lease = match &self.distributed {
            Some(redis) => Some(redis.acquire(key, deadline).await?),
            None => None,
        };

        Ok(SchedulingGuard { _local: local, lease, owner: self })
    }
}

impl SchedulingGuard<'_> {
    /// Dropping without `release` leaves a Redis lease to expire on its TTL.
    pub async fn release(mut self) {
        if let (Some(lease), Some(redis)) = (self.lease.take(), &self.owner.distributed) {
            if let Err(e) = redis.release(lease).await {
                warn!("Failed to release distributed lock: {}", e);
            }
        }
    }
}
