use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tokio::sync::RwLock;

/// Optional Redis connection. Every call degrades to a permissive answer while disconnected.
#[derive(Clone)]
pub struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

impl RedisHandle {
    pub fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    /// A handle that never connects; used by callers that run without Redis.
    pub fn disconnected() -> Self {
        Self::new(String::new())
    }

    pub async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    /// Returns `true` when the caller may perform the throttled action for `key` now.
    pub async fn throttle(&self, key: &str, window_seconds: u64) -> Result<bool, RedisError> {
        if window_seconds == 0 {
            return Ok(true);
        }

        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(true);
        };

        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(window_seconds)
            .query_async(&mut manager)
            .await?;

        Ok(acquired.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::RedisHandle;

    #[tokio::test]
    async fn disconnected_handle_never_throttles() {
        let redis = RedisHandle::disconnected();
        assert!(redis.throttle("heartbeat:exam:student", 30).await.expect("throttle"));
        assert!(redis.throttle("heartbeat:exam:student", 30).await.expect("throttle"));
    }

    #[tokio::test]
    async fn zero_window_is_never_throttled() {
        let redis = RedisHandle::disconnected();
        assert!(redis.throttle("heartbeat:any", 0).await.expect("throttle"));
    }
}
