//! Redis-backed named locks for deduplicating background work
//!
//! At-most-one execution per key within the TTL when the store is
//! reachable. The lock is best-effort dedup, not a correctness mechanism:
//! correctness comes from idempotent metadata writes, so an unreachable
//! store fails open and the work runs anyway.
//!
//! Scoped holding goes through [`LockGuard`]: dropping the guard releases
//! the key even when the holding future is cancelled or panics, so a
//! timed-out or aborted task never pins the key for the full TTL.

use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use crate::hashing::short_hash;

const LOCK_KEY_PREFIX: &str = "depictio:callback_lock";

/// Compare-and-delete: only the holder may release.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Derive a bounded-length lock key from a callback name and component index
pub fn lock_key(callback_name: &str, component_index: &str) -> String {
    let digest = short_hash(&format!("{callback_name}:{component_index}"));
    format!("{LOCK_KEY_PREFIX}:{callback_name}:{digest}")
}

async fn open_connection(client: &redis::Client, timeout: Duration) -> Option<ConnectionManager> {
    match tokio::time::timeout(timeout, ConnectionManager::new(client.clone())).await {
        Ok(Ok(connection)) => Some(connection),
        Ok(Err(e)) => {
            warn!(error = %e, "Redis connection failed");
            None
        }
        Err(_) => {
            warn!("Redis connection timed out");
            None
        }
    }
}

async fn release_key(
    client: &redis::Client,
    timeout: Duration,
    key: &str,
    worker_id: &str,
) -> bool {
    let Some(mut connection) = open_connection(client, timeout).await else {
        return false;
    };

    let result: redis::RedisResult<i64> = redis::Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(worker_id)
        .invoke_async(&mut connection)
        .await;

    match result {
        Ok(1) => {
            debug!(key, worker_id, "Lock released");
            true
        }
        Ok(_) => {
            debug!(key, "Lock expired or not owned");
            false
        }
        Err(e) => {
            warn!(key, error = %e, "Redis error on release");
            false
        }
    }
}

/// A held lock, released when the guard goes away.
///
/// [`release`](Self::release) releases promptly and reports the outcome;
/// `Drop` is the backstop for cancellation and panics, handing the release
/// to the runtime as a detached task. The TTL still bounds the hold when no
/// runtime survives to run it.
pub struct LockGuard {
    client: Option<redis::Client>,
    key: String,
    worker_id: String,
    connect_timeout: Duration,
}

impl LockGuard {
    /// Release now; `false` when the lock expired or is owned elsewhere.
    pub async fn release(mut self) -> bool {
        let Some(client) = self.client.take() else {
            return false;
        };
        release_key(&client, self.connect_timeout, &self.key, &self.worker_id).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let key = std::mem::take(&mut self.key);
        let worker_id = std::mem::take(&mut self.worker_id);
        let timeout = self.connect_timeout;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            debug!(key = %key, "Lock guard dropped, releasing in background");
            handle.spawn(async move {
                release_key(&client, timeout, &key, &worker_id).await;
            });
        }
    }
}

/// Distributed lock manager.
///
/// The TTL bounds how long a crashed worker can hold a key.
pub struct LockManager {
    client: Option<redis::Client>,
    ttl: Duration,
    connect_timeout: Duration,
}

impl LockManager {
    /// Create a manager for the given Redis URL. An invalid URL degrades to
    /// fail-open mode rather than erroring.
    pub fn new(redis_url: &str, ttl_seconds: u64, connect_timeout: Duration) -> Self {
        let client = match redis::Client::open(redis_url) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Redis client unavailable, locks fail open");
                None
            }
        };
        Self {
            client,
            ttl: Duration::from_secs(ttl_seconds),
            connect_timeout,
        }
    }

    async fn connection(&self) -> Option<ConnectionManager> {
        let client = self.client.as_ref()?;
        open_connection(client, self.connect_timeout).await
    }

    /// Atomic "set if not exists, expire after TTL".
    ///
    /// Returns `true` when the lock was acquired — or when the store is
    /// unreachable (fail open).
    pub async fn acquire(&self, key: &str, worker_id: &str) -> bool {
        let Some(mut connection) = self.connection().await else {
            warn!(key, "Redis unavailable, allowing execution");
            return true;
        };

        let result: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(key)
            .arg(worker_id)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut connection)
            .await;

        match result {
            Ok(Some(_)) => {
                debug!(key, worker_id, "Lock acquired");
                true
            }
            Ok(None) => {
                info!(key, "Lock already held, skipping duplicate execution");
                false
            }
            Err(e) => {
                warn!(key, error = %e, "Redis error on acquire, allowing execution");
                true
            }
        }
    }

    /// Release the lock if still owned by `worker_id`.
    ///
    /// Returns `false` when the lock expired or is owned by someone else.
    pub async fn release(&self, key: &str, worker_id: &str) -> bool {
        let Some(client) = self.client.as_ref() else {
            return false;
        };
        release_key(client, self.connect_timeout, key, worker_id).await
    }

    /// Acquire the lock as a scoped guard; `None` when another holder has
    /// it. Fail-open acquisitions yield a guard whose release is a no-op
    /// against the unreachable store.
    pub async fn acquire_scoped(&self, key: &str, worker_id: &str) -> Option<LockGuard> {
        if !self.acquire(key, worker_id).await {
            return None;
        }
        Some(LockGuard {
            client: self.client.clone(),
            key: key.to_string(),
            worker_id: worker_id.to_string(),
            connect_timeout: self.connect_timeout,
        })
    }

    /// Run `work` under the named lock; duplicates within the TTL are
    /// skipped and yield `None`. The success path releases promptly; the
    /// guard's `Drop` covers cancellation and panics.
    pub async fn run_exclusive<F, T>(
        &self,
        callback_name: &str,
        component_index: &str,
        work: F,
    ) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        let key = lock_key(callback_name, component_index);
        let worker_id = format!("{callback_name}:{}", uuid::Uuid::new_v4());

        let guard = self.acquire_scoped(&key, &worker_id).await?;
        let result = work.await;
        guard.release().await;
        Some(result)
    }
}
