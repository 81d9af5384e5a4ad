//! Strategies for periodically sweeping the cache for stale entries.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;

/// Runs one bulk sweep over all cache entries, refreshing the stale ones.
pub type SweepFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Decides when the cache sweeps for stale entries.
///
/// The strategy is started once when the cache is built. It should invoke `sweep` at least once
/// per [`refresh_interval`](CacheConfig::refresh_interval) until `cancel` fires, which happens when
/// the cache is destroyed or dropped.
pub trait RefreshStrategy: Send + Sync + 'static {
    fn start(&self, sweep: SweepFn, cancel: CancellationToken, config: &CacheConfig);
}

/// The default strategy: a fixed-interval timer.
///
/// The first sweep happens one full interval after the cache was built. Every tick starts a new
/// sweep, even if the previous one is still waiting on a slow refresh. Entries with a refresh in
/// flight are skipped by later sweeps.
///
/// # Panics
///
/// Starting this strategy outside of a Tokio runtime panics.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntervalRefresh;

impl RefreshStrategy for IntervalRefresh {
    fn start(&self, sweep: SweepFn, cancel: CancellationToken, config: &CacheConfig) {
        let period = config.refresh_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        tracing::trace!("Running periodic stale sweep");
                        // a sweep stuck on a hung producer must not hold back the next one
                        let run = sweep();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {}
                                _ = run => {}
                            }
                        });
                    }
                }
            }

            tracing::trace!("Periodic stale sweep stopped");
        });
    }
}

/// Never sweeps on its own.
///
/// Entries are then only refreshed when they are accessed after expiry, or through
/// [`SwrCache::sweep`](crate::SwrCache::sweep).
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualRefresh;

impl RefreshStrategy for ManualRefresh {
    fn start(&self, _sweep: SweepFn, _cancel: CancellationToken, _config: &CacheConfig) {}
}
