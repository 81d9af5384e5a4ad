//! An in-memory stale-while-revalidate cache.
//!
//! The [`SwrCache`] wraps an asynchronous value-producing operation. Values are served
//! synchronously once they were produced, and refreshed in the background after they expire:
//!
//!  - The first [`read`](SwrCache::read) of a parameter starts a fetch and hands out an
//!    [`OperationHandle`] to await.
//!  - Once resolved, reads return the value right away. After the `ttl`, the value is still served
//!    but a refresh is started, of which there is never more than one per key.
//!  - A periodic sweep, driven by a [`RefreshStrategy`], refreshes all stale entries every
//!    `refresh_interval`.
//!  - [`clear`](SwrCache::clear) and [`destroy`](SwrCache::destroy) advance an epoch, so that
//!    operations started before are discarded once they complete.
//!
//! Observers can follow the lifecycle of entries by [subscribing](SwrCache::subscribe) to the
//! `missing`, `update` and `reset` [`Topic`]s.
//!
//! The cache needs to be used within a Tokio runtime.

#[macro_use]
pub mod metrics;

mod cache;
mod config;
mod error;
mod events;
mod handle;
mod key;
mod refresh;
mod utils;

pub use cache::{Lookup, SwrCache, SwrCacheBuilder, ValueProducer};
pub use config::{CacheConfig, DEFAULT_REFRESH_INTERVAL, DEFAULT_TTL};
pub use error::{ProducerError, SwrError};
pub use events::{
    CacheEvent, Listener, MissingEvent, Notifier, SubscriptionId, Topic, UpdateEvent,
};
pub use handle::{HandleStatus, OperationHandle};
pub use key::{CacheKey, CacheKeyBuilder, KEY_SEPARATOR, KeyFn, KeyParts, default_key_fn};
pub use refresh::{IntervalRefresh, ManualRefresh, RefreshStrategy, SweepFn};
