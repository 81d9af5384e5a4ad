use std::sync::{Arc, Mutex};
use std::time::Duration;

use swr_cache::{
    CacheConfig, RefreshStrategy, SweepFn, SwrCache, SwrError, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_TTL,
};
use tokio_util::sync::CancellationToken;

use crate::utils::*;

#[tokio::test(start_paused = true)]
async fn test_config_validation() {
    setup();
    let producer = versioned();

    let result = SwrCache::builder(producer.func())
        .ttl(Duration::from_secs(60))
        .refresh_interval(Duration::from_secs(60))
        .build();
    assert!(matches!(result, Err(SwrError::Config(_))));

    let result = SwrCache::builder(producer.func())
        .ttl(Duration::from_secs(120))
        .build();
    assert!(matches!(result, Err(SwrError::Config(_))));

    let cache = SwrCache::builder(producer.func()).build().unwrap();
    assert_eq!(cache.config().ttl, DEFAULT_TTL);
    assert_eq!(cache.config().refresh_interval, DEFAULT_REFRESH_INTERVAL);
    assert_eq!(cache.name(), "default");
    cache.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_config_from_yaml() {
    setup();
    let producer = versioned();
    let config: CacheConfig = serde_yaml::from_str("ttl: 1s\nrefresh_interval: 10s").unwrap();

    let cache = SwrCache::builder(producer.func())
        .name("yaml")
        .config(config)
        .build()
        .unwrap();
    assert_eq!(cache.config().ttl, Duration::from_secs(1));
    assert_eq!(cache.name(), "yaml");
    cache.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_clear() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    assert_eq!(cache.epoch(), 0);

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.epoch(), 1);
    assert_eq!(cache.peek(&"a".to_owned()), None);

    // the cache stays usable
    assert_eq!(read_value(&cache, "a").await, "a@1");
    settle().await;
    assert_eq!(
        describe(&events.take()),
        [
            "missing :a",
            "resolved :a a@0",
            "reset",
            "missing :a",
            "resolved :a a@1"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_clear_discards_running_operations() {
    setup();
    let producer = versioned();
    producer.pause();
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    let handle = cache.read("a".into()).unwrap().into_handle().unwrap();
    settle().await;
    cache.clear();

    producer.resume();
    // callers awaiting the operation still get its outcome
    assert_eq!(handle.await.unwrap(), "a@0");
    settle().await;

    // but the cache does not record it
    assert!(cache.is_empty());
    assert_eq!(describe(&events.take()), ["missing :a", "reset"]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_discards_running_refreshes() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    producer.pause();
    tokio::time::advance(TTL).await;
    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    cache.clear();

    // a read in the new epoch starts over, while the old refresh is still hanging
    let handle = cache.read("a".into()).unwrap().into_handle().unwrap();
    settle().await;
    producer.resume();
    assert_eq!(handle.await.unwrap(), "a@2");
    settle().await;

    assert_eq!(read_value(&cache, "a").await, "a@2");
    assert_eq!(
        describe(&events.take()),
        [
            "missing :a",
            "resolved :a a@0",
            "stale :a a@0",
            "reset",
            "missing :a",
            "resolved :a a@2"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_destroy() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let events = record_events(&cache);
    let param = "a".to_owned();

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    events.take();

    cache.destroy();
    assert!(cache.is_destroyed());
    assert!(cache.is_empty());
    assert_eq!(cache.epoch(), 1);

    assert_eq!(cache.read(param.clone()).unwrap_err(), SwrError::Destroyed);
    assert_eq!(cache.prime(param.clone()).unwrap_err(), SwrError::Destroyed);
    assert_eq!(cache.refresh(&param).unwrap_err(), SwrError::Destroyed);
    assert_eq!(cache.peek(&param), None);
    assert!(matches!(
        cache.subscribe(swr_cache::Topic::Reset, |_| {}),
        Err(SwrError::Destroyed)
    ));

    // both are no-ops now
    cache.clear();
    cache.destroy();
    assert_eq!(cache.epoch(), 1);
    cache.sweep().await;

    assert!(events.is_empty());
    assert_eq!(producer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_silences_running_operations() {
    setup();
    let producer = versioned();
    producer.pause();
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    let handle = cache.read("a".into()).unwrap().into_handle().unwrap();
    settle().await;
    cache.destroy();

    producer.resume();
    assert_eq!(handle.await.unwrap(), "a@0");
    settle().await;

    assert!(cache.is_empty());
    assert_eq!(describe(&events.take()), ["missing :a"]);
}

/// Hands out the cancellation token it was started with.
#[derive(Clone, Default)]
struct CapturingRefresh {
    cancel: Arc<Mutex<Option<CancellationToken>>>,
}

impl RefreshStrategy for CapturingRefresh {
    fn start(&self, _sweep: SweepFn, cancel: CancellationToken, _config: &CacheConfig) {
        *self.cancel.lock().unwrap() = Some(cancel);
    }
}

impl CapturingRefresh {
    fn token(&self) -> CancellationToken {
        self.cancel.lock().unwrap().clone().unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_cache_stops_the_sweep() {
    setup();
    let producer = versioned();
    let strategy = CapturingRefresh::default();
    let cache = SwrCache::builder(producer.func())
        .refresh_strategy(strategy.clone())
        .build()
        .unwrap();
    let token = strategy.token();

    let clone = cache.clone();
    drop(cache);
    assert!(!token.is_cancelled());

    assert_eq!(read_value(&clone, "a").await, "a@0");
    settle().await;
    drop(clone);
    assert!(token.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_custom_strategy_drives_sweeps() {
    setup();

    #[derive(Clone, Default)]
    struct StoredSweep(Arc<Mutex<Option<SweepFn>>>);

    impl RefreshStrategy for StoredSweep {
        fn start(&self, sweep: SweepFn, _cancel: CancellationToken, _config: &CacheConfig) {
            *self.0.lock().unwrap() = Some(sweep);
        }
    }

    let producer = versioned();
    let strategy = StoredSweep::default();
    let cache = SwrCache::builder(producer.func())
        .ttl(TTL)
        .refresh_interval(REFRESH_INTERVAL)
        .refresh_strategy(strategy.clone())
        .build()
        .unwrap();
    let sweep = strategy.0.lock().unwrap().clone().unwrap();

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    tokio::time::advance(TTL).await;

    sweep().await;
    settle().await;
    assert_eq!(cache.peek(&"a".to_owned()).as_deref(), Some("a@1"));

    // sweeping a dropped cache does nothing
    drop(cache);
    sweep().await;
    assert_eq!(producer.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_debug_output() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    assert_eq!(read_value(&cache, "a").await, "a@0");

    let debug = format!("{cache:?}");
    assert!(debug.contains("name: \"test\""));
    assert!(debug.contains("entries: 1"));
}
