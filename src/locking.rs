//! Named, time-bounded leases serializing check-in reconciliation.
//!
//! Acquisition is fail-fast: a held lease is an immediate error, never a
//! queue. Release happens explicitly at the end of the critical section or,
//! for early exits, best-effort on drop; the TTL bounds the damage of a
//! crashed holder either way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock '{0}' is currently held")]
    Unavailable(String),
    #[error("lock backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Attempts to take the lease; `false` means it is held by someone else.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Releases the lease if `token` still owns it. Releasing an expired or
    /// reassigned lease is a no-op.
    async fn release(&self, key: &str, token: &str) -> Result<(), LockError>;
}

pub struct LockManager {
    backend: Arc<dyn LeaseBackend>,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LeaseBackend>) -> Self {
        Self { backend }
    }

    pub async fn acquire(
        &self,
        name: &str,
        duration: Duration,
        operation: &'static str,
    ) -> Result<ScopedLease, LockError> {
        let token = Uuid::new_v4().to_string();
        if self.backend.try_acquire(name, &token, duration).await? {
            Ok(ScopedLease {
                backend: Arc::clone(&self.backend),
                key: name.to_string(),
                token,
                operation,
                released: false,
            })
        } else {
            Err(LockError::Unavailable(name.to_string()))
        }
    }
}

pub struct ScopedLease {
    backend: Arc<dyn LeaseBackend>,
    key: String,
    token: String,
    operation: &'static str,
    released: bool,
}

impl ScopedLease {
    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.backend.release(&self.key, &self.token).await {
            warn!(
                lock = %self.key,
                operation = self.operation,
                error = %err,
                "failed to release lease; TTL will reclaim it"
            );
        }
    }
}

impl Drop for ScopedLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = backend.release(&key, &token).await;
            });
        }
        // Outside a runtime the TTL is the release path.
    }
}

pub struct RedisLeaseBackend {
    redis: ConnectionManager,
}

impl RedisLeaseBackend {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl LeaseBackend for RedisLeaseBackend {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        // Delete only while we still own the lease.
        let script = redis::Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            "#,
        );
        let mut conn = self.redis.clone();
        script
            .key(key)
            .arg(token)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Process-local backend for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryLeaseBackend {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl LeaseBackend for InMemoryLeaseBackend {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LockError::Backend("lease table poisoned".to_string()))?;
        let now = Instant::now();
        if let Some((_, expires)) = leases.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        leases.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LockError::Backend("lease table poisoned".to_string()))?;
        if let Some((owner, _)) = leases.get(key) {
            if owner == token {
                leases.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_contend() {
        let locks = LockManager::new(Arc::new(InMemoryLeaseBackend::default()));

        let lease = locks
            .acquire("checkin-creation:abc", Duration::from_secs(2), "checkin_creation")
            .await
            .unwrap();

        let second = locks
            .acquire("checkin-creation:abc", Duration::from_secs(2), "checkin_creation")
            .await;
        assert!(matches!(second, Err(LockError::Unavailable(_))));

        // A different name is independent.
        let other = locks
            .acquire("checkin-creation:xyz", Duration::from_secs(2), "checkin_creation")
            .await;
        assert!(other.is_ok());

        lease.release().await;
        let reacquired = locks
            .acquire("checkin-creation:abc", Duration::from_secs(2), "checkin_creation")
            .await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let locks = LockManager::new(Arc::new(InMemoryLeaseBackend::default()));

        let lease = locks
            .acquire("stuck", Duration::from_millis(10), "checkin_creation")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;

        let reacquired = locks
            .acquire("stuck", Duration::from_secs(2), "checkin_creation")
            .await;
        assert!(reacquired.is_ok());

        // Stale release from the first holder must not free the new lease.
        lease.release().await;
        let third = locks
            .acquire("stuck", Duration::from_secs(2), "checkin_creation")
            .await;
        assert!(matches!(third, Err(LockError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_drop_releases_best_effort() {
        let backend = Arc::new(InMemoryLeaseBackend::default());
        let locks = LockManager::new(backend.clone());

        let lease = locks
            .acquire("dropped", Duration::from_secs(30), "checkin_creation")
            .await
            .unwrap();
        drop(lease);

        // The drop path spawns the release; give it a beat.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reacquired = locks
            .acquire("dropped", Duration::from_secs(2), "checkin_creation")
            .await;
        assert!(reacquired.is_ok());
    }
}
