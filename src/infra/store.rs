//! Store selection from validated settings.

use std::sync::Arc;

use tracing::info;

use crate::application::store::KeyValueStore;
use crate::config::StoreSettings;

use super::error::InfraError;
use super::memory::MemoryStore;
use super::redis::RedisStore;

/// Build the configured store. Redis connects lazily, so this never blocks
/// on the network.
pub fn build_store(settings: &StoreSettings) -> Result<Arc<dyn KeyValueStore>, InfraError> {
    match settings {
        StoreSettings::Memory => {
            info!(
                target: "pageviews::store",
                backend = "memory",
                "Using in-process counters; counts are lost on restart"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreSettings::Redis(redis) => {
            let store = RedisStore::new(redis)?;
            info!(
                target: "pageviews::store",
                backend = "redis",
                store = ?store,
                "Using redis counters"
            );
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RedisSettings;

    #[tokio::test]
    async fn memory_backend_is_usable_immediately() {
        let store = build_store(&StoreSettings::Memory).expect("store");
        assert_eq!(store.increment("k").await.expect("incr"), 1);
        store.ping().await.expect("ping");
    }

    #[test]
    fn redis_backend_builds_without_connecting() {
        let settings = StoreSettings::Redis(RedisSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: None,
            password: None,
            tls: false,
            database: 0,
            connect_timeout: Duration::from_millis(50),
            response_timeout: Duration::from_millis(50),
        });
        assert!(build_store(&settings).is_ok());
    }
}
