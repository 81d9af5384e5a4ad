use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use swr_cache::SwrCache;
use swr_cache_test::Producer;

use crate::utils::*;

#[tokio::test(start_paused = true)]
async fn test_stale_value_is_served_and_refreshed() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    // still fresh right before the expiry
    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    assert_eq!(read_value(&cache, "a").await, "a@0");
    assert_eq!(producer.calls(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    let lookup = cache.read("a".into()).unwrap();
    assert_eq!(lookup.ready().as_deref(), Some("a@0"));
    settle().await;

    assert_eq!(read_value(&cache, "a").await, "a@1");
    assert_eq!(producer.calls(), 2);
    assert_eq!(
        describe(&events.take()),
        [
            "missing :a",
            "resolved :a a@0",
            "stale :a a@0",
            "resolved :a a@1"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_value_is_served_while_refreshing() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    events.take();

    producer.pause();
    tokio::time::advance(TTL).await;
    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    assert_eq!(producer.in_flight(), 1);

    // neither another refresh nor another `stale` event while one is running
    for _ in 0..3 {
        assert_eq!(read_value(&cache, "a").await, "a@0");
        assert_eq!(cache.peek(&"a".to_owned()).as_deref(), Some("a@0"));
    }
    tokio::time::advance(TTL / 2).await;
    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    assert_eq!(producer.calls(), 2);
    assert_eq!(describe(&events.take()), ["stale :a a@0"]);

    producer.resume();
    settle().await;
    assert_eq!(read_value(&cache, "a").await, "a@1");
    assert_eq!(producer.max_in_flight(), 1);
    assert_eq!(describe(&events.take()), ["resolved :a a@1"]);
}

#[tokio::test(start_paused = true)]
async fn test_peek_refreshes_stale_values() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let events = record_events(&cache);
    let param = "a".to_owned();

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    events.take();

    tokio::time::advance(TTL).await;
    assert_eq!(cache.peek(&param).as_deref(), Some("a@0"));
    settle().await;

    assert_eq!(cache.peek(&param).as_deref(), Some("a@1"));
    assert_eq!(
        describe(&events.take()),
        ["stale :a a@0", "resolved :a a@1"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_explicit_refresh_is_single_flight() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let param = "a".to_owned();

    assert!(cache.refresh(&param).unwrap().is_none());

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    producer.pause();
    let first = cache.refresh(&param).unwrap().unwrap();
    let second = cache.refresh(&param).unwrap().unwrap();
    settle().await;
    assert_eq!(producer.calls(), 2);

    producer.resume();
    let (first, second) = futures::join!(first, second);
    assert_eq!(first.unwrap(), "a@1");
    assert_eq!(second.unwrap(), "a@1");
    settle().await;

    assert_eq!(cache.peek(&param).as_deref(), Some("a@1"));
    assert_eq!(producer.calls(), 2);
    assert_eq!(producer.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_evicts_entry() {
    setup();
    let producer = Producer::new(|param: &String, call| {
        anyhow::ensure!(call != 1, "refresh fails");
        Ok(format!("{param}@{call}"))
    });
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    tokio::time::advance(TTL).await;
    // the stale value is still served, the failure is only visible as a notification
    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    assert!(!cache.contains(&"a".to_owned()));
    assert_eq!(read_value(&cache, "a").await, "a@2");
    settle().await;
    assert_eq!(
        describe(&events.take()),
        [
            "missing :a",
            "resolved :a a@0",
            "stale :a a@0",
            "rejected :a",
            "missing :a",
            "resolved :a a@2"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sweep_refreshes_stale_entries() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);
    let events = record_events(&cache);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    assert_eq!(read_value(&cache, "b").await, "b@1");
    settle().await;

    tokio::time::advance(TTL).await;
    // fresh entries are left alone
    assert_eq!(read_value(&cache, "c").await, "c@2");
    settle().await;
    events.take();

    cache.sweep().await;
    settle().await;

    assert_eq!(producer.calls(), 5);
    assert_eq!(cache.peek(&"c".to_owned()).as_deref(), Some("c@2"));
    let mut refreshed = describe(&events.take());
    refreshed.sort();
    // sweeping does not publish `stale`
    assert_eq!(refreshed, ["resolved :a a@3", "resolved :b b@4"]);

    // nothing is stale anymore
    cache.sweep().await;
    settle().await;
    assert_eq!(producer.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_skips_running_refreshes() {
    setup();
    let producer = versioned();
    let cache = cache_with(&producer);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    producer.pause();
    tokio::time::advance(TTL).await;
    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    assert_eq!(producer.calls(), 2);

    // the refresh started by the read is still running
    cache.sweep().await;
    assert_eq!(producer.calls(), 2);

    producer.resume();
    settle().await;
    assert_eq!(read_value(&cache, "a").await, "a@1");
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweep() {
    setup();
    let producer = versioned();
    let cache = SwrCache::builder(producer.func())
        .ttl(TTL)
        .refresh_interval(REFRESH_INTERVAL)
        .build()
        .unwrap();
    let param = "a".to_owned();

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    tokio::time::sleep(REFRESH_INTERVAL + Duration::from_millis(50)).await;
    settle().await;
    assert_eq!(producer.calls(), 2);
    assert_eq!(cache.peek(&param).as_deref(), Some("a@1"));

    tokio::time::sleep(REFRESH_INTERVAL).await;
    settle().await;
    assert_eq!(producer.calls(), 3);

    // destroying the cache stops the sweep
    cache.destroy();
    tokio::time::sleep(REFRESH_INTERVAL * 5).await;
    settle().await;
    assert_eq!(producer.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hung_refresh_does_not_stop_periodic_sweeps() {
    setup();
    let calls: Arc<Mutex<HashMap<String, usize>>> = Default::default();
    let producer_calls = Arc::clone(&calls);
    let cache: TestCache = SwrCache::builder(move |param: String| {
        let call = {
            let mut calls = producer_calls.lock().unwrap();
            let count = calls.entry(param.clone()).or_default();
            *count += 1;
            *count - 1
        };
        async move {
            // every refresh of `a` hangs forever
            if param == "a" && call > 0 {
                futures::future::pending::<()>().await;
            }
            Ok::<_, anyhow::Error>(format!("{param}@{call}"))
        }
    })
    .ttl(TTL)
    .refresh_interval(REFRESH_INTERVAL)
    .build()
    .unwrap();
    let calls_of = |param: &str| calls.lock().unwrap().get(param).copied().unwrap_or(0);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    assert_eq!(read_value(&cache, "b").await, "b@0");
    settle().await;

    tokio::time::sleep(REFRESH_INTERVAL + Duration::from_millis(50)).await;
    settle().await;
    for _ in 0..6 {
        tokio::time::sleep(REFRESH_INTERVAL).await;
        settle().await;
    }

    // `a` is stuck on its first refresh and is never refreshed a second time
    assert_eq!(calls_of("a"), 2);
    assert_eq!(cache.peek(&"a".to_owned()).as_deref(), Some("a@0"));
    // while `b` keeps being refreshed on every tick
    assert!(calls_of("b") >= 7, "b was refreshed {} times", calls_of("b") - 1);
    assert_ne!(cache.peek(&"b".to_owned()).as_deref(), Some("b@0"));

    cache.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_refreshes_on_every_access() {
    setup();
    let producer = versioned();
    let cache = SwrCache::builder(producer.func())
        .ttl(Duration::ZERO)
        .refresh_interval(REFRESH_INTERVAL)
        .refresh_strategy(swr_cache::ManualRefresh)
        .build()
        .unwrap();
    let events = record_events(&cache);

    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;

    // the value is served right away, and refreshed in the background
    assert_eq!(read_value(&cache, "a").await, "a@0");
    settle().await;
    assert_eq!(read_value(&cache, "a").await, "a@1");
    settle().await;

    assert_eq!(producer.calls(), 3);
    assert_eq!(
        describe(&events.take()),
        [
            "missing :a",
            "resolved :a a@0",
            "stale :a a@0",
            "resolved :a a@1",
            "stale :a a@1",
            "resolved :a a@2"
        ]
    );
}
