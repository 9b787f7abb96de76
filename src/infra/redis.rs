//! Redis-backed [`KeyValueStore`].
//!
//! The store is constructed once at startup from validated settings and
//! shared by reference. The connection itself is established on first use
//! and memoized; `close()` drops it and the next call connects again. The
//! memoized `ConnectionManager` is multiplexed, so every clone handed out
//! can be used concurrently, and it reconnects on its own after a dropped
//! socket. An unreachable server costs a caller at most `connect_timeout`
//! before it gets a `StoreError`.

use std::{fmt, sync::Mutex, time::Duration};

use async_trait::async_trait;
use redis::{
    Client, ErrorKind, RedisError,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};
use url::Url;

use crate::application::store::{KeyValueStore, StoreError};
use crate::config::RedisSettings;
use crate::util::lock::mutex_lock;

use super::error::InfraError;

const SOURCE: &str = "pageviews::store";
/// Retries inside one establishment attempt. Callers degrade and try again
/// on their next request instead of waiting out a long backoff.
const INITIAL_CONNECT_RETRIES: usize = 1;

pub struct RedisStore {
    client: Client,
    endpoint: String,
    connect_timeout: Duration,
    response_timeout: Duration,
    connection: Mutex<Option<ConnectionManager>>,
    /// Serializes establishment so concurrent first calls share one attempt.
    connecting: tokio::sync::Mutex<()>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Build a store from settings. No network I/O happens here.
    pub fn new(settings: &RedisSettings) -> Result<Self, InfraError> {
        let url = connection_url(settings)?;
        Self::from_url(
            url.as_str(),
            settings.connect_timeout,
            settings.response_timeout,
        )
    }

    /// Build a store from a `redis://` or `rediss://` URL.
    pub fn from_url(
        url: &str,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self, InfraError> {
        let client = Client::open(url).map_err(|err| {
            InfraError::configuration(format!("invalid redis connection settings: {err}"))
        })?;
        let endpoint = redacted_endpoint(url);

        Ok(Self {
            client,
            endpoint,
            connect_timeout,
            response_timeout,
            connection: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        })
    }

    /// Shared connection, established on first call.
    ///
    /// Establishment is bounded by `connect_timeout`, including the wait
    /// behind a concurrent attempt. A failed attempt is not memoized; the
    /// next call tries again.
    async fn client(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(connection) = self.cached() {
            return Ok(connection);
        }

        let deadline = Instant::now() + self.connect_timeout;
        let _attempt = timeout_at(deadline, self.connecting.lock())
            .await
            .map_err(|_| StoreError::Timeout)?;
        if let Some(connection) = self.cached() {
            return Ok(connection);
        }

        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(INITIAL_CONNECT_RETRIES)
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.response_timeout);
        let manager = timeout_at(
            deadline,
            ConnectionManager::new_with_config(self.client.clone(), config),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(map_redis_error)?;

        info!(
            target: SOURCE,
            endpoint = %self.endpoint,
            "Established store connection"
        );
        *mutex_lock(&self.connection, SOURCE, "client") = Some(manager.clone());
        Ok(manager)
    }

    fn cached(&self) -> Option<ConnectionManager> {
        mutex_lock(&self.connection, SOURCE, "cached").clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.client().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        // MGET with no arguments is a protocol error.
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.client().await?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        if values.len() != keys.len() {
            return Err(StoreError::command(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.client().await?;
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| match map_redis_error(err) {
                StoreError::Command(message) if message.contains("not an integer") => {
                    StoreError::NotAnInteger {
                        key: key.to_string(),
                    }
                }
                other => other,
            })?;

        u64::try_from(value).map_err(|_| StoreError::NotAnInteger {
            key: key.to_string(),
        })
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.client().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(reply.is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.client().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn close(&self) {
        let closed = mutex_lock(&self.connection, SOURCE, "close").take();
        if closed.is_some() {
            debug!(target: SOURCE, endpoint = %self.endpoint, "Closed store connection");
        }
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || matches!(err.kind(), ErrorKind::AuthenticationFailed)
    {
        StoreError::connection(err)
    } else {
        StoreError::command(err)
    }
}

/// Assemble a connection URL from discrete settings, percent-encoding the
/// credentials.
pub(crate) fn connection_url(settings: &RedisSettings) -> Result<Url, InfraError> {
    let scheme = if settings.tls { "rediss" } else { "redis" };
    let host = if settings.host.contains(':') && !settings.host.starts_with('[') {
        format!("[{}]", settings.host)
    } else {
        settings.host.clone()
    };

    let mut url = Url::parse(&format!(
        "{scheme}://{host}:{}/{}",
        settings.port, settings.database
    ))
    .map_err(|err| InfraError::configuration(format!("invalid store address: {err}")))?;

    if let Some(username) = settings.username.as_deref() {
        url.set_username(username)
            .map_err(|()| InfraError::configuration("store username cannot be encoded"))?;
    }
    if let Some(password) = settings.password.as_deref() {
        url.set_password(Some(password))
            .map_err(|()| InfraError::configuration("store password cannot be encoded"))?;
    }

    Ok(url)
}

fn redacted_endpoint(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}:{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("unknown"),
            parsed.port().map_or_else(|| "-".to_string(), |p| p.to_string())
        ),
        Err(_) => "unparseable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RedisSettings {
        RedisSettings {
            host: "cache.internal".to_string(),
            port: 6380,
            username: None,
            password: None,
            tls: false,
            database: 0,
            connect_timeout: Duration::from_millis(500),
            response_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn plain_url_without_credentials() {
        let url = connection_url(&settings()).expect("url");
        assert_eq!(url.as_str(), "redis://cache.internal:6380/0");
    }

    #[test]
    fn tls_flag_selects_rediss_scheme() {
        let url = connection_url(&RedisSettings {
            tls: true,
            database: 2,
            ..settings()
        })
        .expect("url");
        assert_eq!(url.scheme(), "rediss");
        assert_eq!(url.path(), "/2");
    }

    #[test]
    fn credentials_are_percent_encoded() {
        let url = connection_url(&RedisSettings {
            username: Some("default".to_string()),
            password: Some("p@ss:word/1".to_string()),
            ..settings()
        })
        .expect("url");
        assert_eq!(url.username(), "default");
        assert_eq!(url.password(), Some("p%40ss%3Aword%2F1"));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let url = connection_url(&RedisSettings {
            host: "::1".to_string(),
            ..settings()
        })
        .expect("url");
        assert_eq!(url.host_str(), Some("[::1]"));
    }

    #[test]
    fn construction_performs_no_io_and_hides_secrets() {
        let store = RedisStore::new(&RedisSettings {
            password: Some("hunter2".to_string()),
            ..settings()
        })
        .expect("store");
        let debug = format!("{store:?}");
        assert!(debug.contains("redis://cache.internal:6380"));
        assert!(!debug.contains("hunter2"));
    }

    /// Nothing listens on port 1, so connects are refused immediately.
    fn unreachable_store() -> RedisStore {
        RedisStore::from_url(
            "redis://127.0.0.1:1/0",
            Duration::from_millis(300),
            Duration::from_millis(300),
        )
        .expect("store")
    }

    const FAIL_FAST: Duration = Duration::from_secs(5);

    fn is_connectivity_fault(err: &StoreError) -> bool {
        matches!(err, StoreError::Connection(_) | StoreError::Timeout)
    }

    #[tokio::test]
    async fn unreachable_server_fails_fast() {
        let store = unreachable_store();
        let started = Instant::now();

        let get = tokio::time::timeout(FAIL_FAST, store.get("pageviews:projects:a"))
            .await
            .expect("get returns")
            .expect_err("no server");
        assert!(is_connectivity_fault(&get), "{get:?}");

        let keys = ["pageviews:projects:a".to_string()];
        let batch = tokio::time::timeout(FAIL_FAST, store.batch_get(&keys))
            .await
            .expect("batch_get returns")
            .expect_err("no server");
        assert!(is_connectivity_fault(&batch), "{batch:?}");

        let incr = tokio::time::timeout(FAIL_FAST, store.increment("pageviews:projects:a"))
            .await
            .expect("increment returns")
            .expect_err("no server");
        assert!(is_connectivity_fault(&incr), "{incr:?}");

        assert!(started.elapsed() < FAIL_FAST);
        assert!(store.cached().is_none());
    }

    #[tokio::test]
    async fn dead_server_degrades_concurrent_reads_to_zero() {
        use std::sync::Arc;

        use crate::application::aggregator::ViewAggregator;
        use crate::domain::keys::KeySpace;

        let aggregator = ViewAggregator::new(Arc::new(unreachable_store()), KeySpace::default());
        let reads = futures::future::join_all((0..3).map(|_| aggregator.get_count("a")));

        let counts = tokio::time::timeout(FAIL_FAST, reads)
            .await
            .expect("reads degrade instead of hanging");
        assert_eq!(counts, [0, 0, 0]);
    }
}
