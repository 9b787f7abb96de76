//! Runs against a live Redis when `PAGEVIEWS_TEST_REDIS_URL` is set, e.g.
//! `redis://127.0.0.1:6379/15`. Each test works under its own key prefix.

use std::time::Duration;

use pageviews::application::store::{KeyValueStore, StoreError};
use pageviews::infra::redis::RedisStore;
use serial_test::serial;
use uuid::Uuid;

fn live_store() -> Option<RedisStore> {
    let url = std::env::var("PAGEVIEWS_TEST_REDIS_URL").ok()?;
    Some(
        RedisStore::from_url(&url, Duration::from_secs(2), Duration::from_secs(1))
            .expect("PAGEVIEWS_TEST_REDIS_URL should be a redis:// url"),
    )
}

fn prefix() -> String {
    format!("pageviews-test:{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[serial]
async fn increments_and_reads_back() {
    let Some(store) = live_store() else {
        return;
    };
    let key = format!("{}:projects:a", prefix());

    store.ping().await.expect("ping");
    assert_eq!(store.get(&key).await.expect("get"), None);
    assert_eq!(store.increment(&key).await.expect("incr"), 1);
    assert_eq!(store.increment(&key).await.expect("incr"), 2);
    assert_eq!(store.get(&key).await.expect("get").as_deref(), Some("2"));
}

#[tokio::test]
#[serial]
async fn batch_get_keeps_order_and_gaps() {
    let Some(store) = live_store() else {
        return;
    };
    let base = prefix();
    let first = format!("{base}:projects:first");
    let missing = format!("{base}:projects:missing");
    let last = format!("{base}:projects:last");

    store.increment(&last).await.expect("incr");
    store.increment(&last).await.expect("incr");
    store.increment(&first).await.expect("incr");

    let values = store
        .batch_get(&[first, missing, last])
        .await
        .expect("mget");
    assert_eq!(
        values,
        [Some("1".to_string()), None, Some("2".to_string())]
    );
    assert!(store.batch_get(&[]).await.expect("empty mget").is_empty());
}

#[tokio::test]
#[serial]
async fn set_if_absent_only_writes_once() {
    let Some(store) = live_store() else {
        return;
    };
    let key = format!("{}:seen:projects:0a1b2c3d:a", prefix());
    let ttl = Duration::from_secs(30);

    assert!(store.set_if_absent(&key, "1", ttl).await.expect("set nx"));
    assert!(!store.set_if_absent(&key, "1", ttl).await.expect("set nx"));
}

#[tokio::test]
#[serial]
async fn seen_markers_expire() {
    let Some(store) = live_store() else {
        return;
    };
    let key = format!("{}:seen:projects:0a1b2c3d:a", prefix());
    let ttl = Duration::from_millis(50);

    assert!(store.set_if_absent(&key, "1", ttl).await.expect("set nx"));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.set_if_absent(&key, "1", ttl).await.expect("set nx"));
}

#[tokio::test]
#[serial]
async fn incrementing_a_non_integer_is_reported() {
    let Some(store) = live_store() else {
        return;
    };
    let key = format!("{}:projects:text", prefix());
    store
        .set_if_absent(&key, "not-a-number", Duration::from_secs(30))
        .await
        .expect("set");

    let err = store.increment(&key).await.expect_err("not an integer");
    assert!(matches!(err, StoreError::NotAnInteger { .. }), "{err:?}");
}

#[tokio::test]
#[serial]
async fn close_then_reconnect() {
    let Some(store) = live_store() else {
        return;
    };
    let key = format!("{}:projects:a", prefix());

    store.increment(&key).await.expect("incr");
    store.close().await;
    store.close().await;
    assert_eq!(store.increment(&key).await.expect("incr after close"), 2);
}
