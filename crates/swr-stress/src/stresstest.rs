use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;

use swr_cache::{CacheConfig, CacheEvent, Topic, UpdateEvent};

use crate::workloads::{Outcome, StressCache, WorkloadsConfig, prepare_cache, process_payload};

/// Counts the notifications published by a cache.
#[derive(Debug, Default)]
struct EventCounts {
    missing: AtomicUsize,
    stale: AtomicUsize,
    resolved: AtomicUsize,
    rejected: AtomicUsize,
}

impl EventCounts {
    fn record(&self, event: &CacheEvent<u64, u64>) {
        let counter = match event {
            CacheEvent::Missing(_) => &self.missing,
            CacheEvent::Update(UpdateEvent::Stale { .. }) => &self.stale,
            CacheEvent::Update(UpdateEvent::Resolved { .. }) => &self.resolved,
            CacheEvent::Update(UpdateEvent::Rejected { .. }) => &self.rejected,
            CacheEvent::Reset => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn subscribe(self: &Arc<Self>, cache: &StressCache) -> Result<()> {
        for topic in [Topic::Missing, Topic::Update] {
            let counts = Arc::clone(self);
            cache.subscribe(topic, move |event| counts.record(event))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Outcomes {
    hits: AtomicUsize,
    misses: AtomicUsize,
    empty: AtomicUsize,
}

impl Outcomes {
    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Hit => &self.hits,
            Outcome::Miss => &self.misses,
            Outcome::Empty => &self.empty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn total(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
            + self.misses.load(Ordering::Relaxed)
            + self.empty.load(Ordering::Relaxed)
    }
}

pub async fn perform_stresstest(
    cache_config: CacheConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // initialize workloads, each against its own cache
    let mut prepared = Vec::with_capacity(workloads.workloads.len());
    for (i, workload) in workloads.workloads.into_iter().enumerate() {
        let cache = prepare_cache(format!("workload-{i}"), cache_config, &workload.payload)
            .context("failed to create cache")?;
        let events = Arc::new(EventCounts::default());
        events.subscribe(&cache)?;
        prepared.push((workload.concurrency.max(1), Arc::new(workload.payload), cache, events));
    }

    // warmup: run each workload once to make sure caches are populated
    {
        let start = Instant::now();

        let futures = prepared.iter().map(|(_, payload, cache, _)| {
            let payload = Arc::clone(payload);
            let cache = cache.clone();
            tokio::spawn(async move {
                process_payload(&cache, &payload).await;
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(prepared.len());
    for (concurrency, payload, cache, events) in prepared {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);

        let task = tokio::spawn(async move {
            let outcomes = Arc::new(Outcomes::default());
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let payload = Arc::clone(&payload);
                        let cache = cache.clone();
                        let outcomes = Arc::clone(&outcomes);

                        tokio::spawn(async move {
                            let outcome = process_payload(&cache, &payload).await;
                            outcomes.record(outcome);

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let entries = cache.len();
            cache.destroy();

            (concurrency, outcomes, events, entries)
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, outcomes, events, entries) = task.context("workload task panicked")?;

        let ops = outcomes.total();
        let ops_ps = ops as f64 / duration.as_secs_f64();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");
        println!(
            "  hits: {}; misses: {}; empty: {}; entries: {entries}",
            outcomes.hits.load(Ordering::Relaxed),
            outcomes.misses.load(Ordering::Relaxed),
            outcomes.empty.load(Ordering::Relaxed),
        );
        println!(
            "  missing: {}; stale: {}; resolved: {}; rejected: {}",
            events.missing.load(Ordering::Relaxed),
            events.stale.load(Ordering::Relaxed),
            events.resolved.load(Ordering::Relaxed),
            events.rejected.load(Ordering::Relaxed),
        );
    }

    Ok(())
}
