use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::error::{ProducerError, SwrError};
use crate::events::{CacheEvent, MissingEvent, Notifier, SubscriptionId, Topic, UpdateEvent};
use crate::handle::{HandleStatus, OperationHandle};
use crate::key::{CacheKey, KeyFn, KeyParts, default_key_fn};
use crate::refresh::{IntervalRefresh, RefreshStrategy, SweepFn};
use crate::utils::defer;

/// The value-producing operation of a cache.
pub type ValueProducer<P, V> =
    Arc<dyn Fn(P) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

/// The outcome of [`SwrCache::read`].
#[derive(Debug, Clone)]
pub enum Lookup<V> {
    /// A value is available right away. It might be stale, in which case a refresh was started.
    Ready(V),
    /// The value is being fetched for the first time. Await the handle to get it.
    Pending(OperationHandle<V>),
}

impl<V> Lookup<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns the value if it was available synchronously.
    pub fn ready(self) -> Option<V> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    /// Returns the operation handle if the value was not available synchronously.
    pub fn into_handle(self) -> Option<OperationHandle<V>> {
        match self {
            Self::Ready(_) => None,
            Self::Pending(handle) => Some(handle),
        }
    }

    /// Resolves to the value, awaiting the operation if necessary.
    pub async fn value(self) -> Result<V, SwrError> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending(handle) => handle.await,
        }
    }
}

/// An entry in the cache.
struct CacheEntry<P, V> {
    /// The parameter the entry was created with, used to invoke the producer on refresh.
    param: P,
    /// The most recent producer invocation.
    handle: OperationHandle<V>,
    /// The point in time after which the value is stale.
    expiry: Instant,
    /// The value of the most recently fulfilled operation, served while a refresh is pending.
    last_value: Option<V>,
    /// The refresh currently in flight, if any.
    refresh: Option<OperationHandle<V>>,
}

impl<P, V> CacheEntry<P, V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value the entry can serve synchronously.
    ///
    /// This is the value of the current handle if it is fulfilled, otherwise the value of the
    /// last fulfilled one. The boolean is `true` if that value is stale.
    fn servable(&self, now: Instant) -> Option<(V, bool)> {
        match self.handle.status() {
            HandleStatus::Fulfilled(value) => Some((value, self.expiry <= now)),
            HandleStatus::Pending => self.last_value.clone().map(|value| (value, false)),
            HandleStatus::Rejected(_) => None,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.refresh.is_none() && self.expiry <= now && self.handle.is_fulfilled()
    }
}

struct CacheState<P, V> {
    entries: HashMap<CacheKey, CacheEntry<P, V>>,
    /// Bumped by `clear` and `destroy`. Operations started in an older epoch are discarded.
    epoch: u64,
    destroyed: bool,
    next_ticket: u64,
}

impl<P, V> CacheState<P, V> {
    fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

/// Notifications and spawned operations collected while holding the state lock.
///
/// They are run once the lock is released, events first, so a `missing` or `stale` event is
/// always published before the outcome of the operation it announces.
struct Effects<P, V> {
    events: Vec<CacheEvent<P, V>>,
    operations: Vec<BoxFuture<'static, ()>>,
}

impl<P, V> Default for Effects<P, V> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            operations: Vec::new(),
        }
    }
}

impl<P, V> Effects<P, V> {
    fn run(self, notifier: &Notifier<P, V>) {
        for event in &self.events {
            notifier.publish(event);
        }
        // a listener may have destroyed the cache, which must not start any more work
        if notifier.is_closed() {
            return;
        }
        for operation in self.operations {
            tokio::spawn(operation);
        }
    }
}

struct Inner<P, V> {
    name: Arc<str>,
    producer: ValueProducer<P, V>,
    key_fn: KeyFn<P>,
    config: CacheConfig,
    state: Mutex<CacheState<P, V>>,
    notifier: Notifier<P, V>,
    sweeper: CancellationToken,
}

impl<P, V> Drop for Inner<P, V> {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

impl<P, V> Inner<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn state(&self) -> MutexGuard<'_, CacheState<P, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Creates a handle for a new producer invocation, and queues the operation driving it.
    ///
    /// The operation settles the entry once the producer completes, unless the epoch changed in
    /// the meantime.
    fn start_operation(
        self: &Arc<Self>,
        key: CacheKey,
        param: P,
        epoch: u64,
        ticket: u64,
        effects: &mut Effects<P, V>,
    ) -> OperationHandle<V> {
        let producer = Arc::clone(&self.producer);
        let handle = OperationHandle::new(ticket, move || producer(param));

        let inner = Arc::clone(self);
        let operation = handle.clone();
        effects.operations.push(
            async move {
                // releases the refresh marker even if this task is torn down
                let _release = defer(|| inner.release_refresh(&key, epoch, ticket));
                let result = operation.settle().await;
                inner.complete(&key, epoch, ticket, result);
            }
            .boxed(),
        );

        handle
    }

    /// Looks up the entry for `key`, creating it and starting the first fetch if it is missing.
    fn get_or_create<'s>(
        self: &Arc<Self>,
        state: &'s mut CacheState<P, V>,
        key: &CacheKey,
        param: P,
        now: Instant,
        effects: &mut Effects<P, V>,
    ) -> &'s mut CacheEntry<P, V> {
        let epoch = state.epoch;
        match state.entries.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(vacant) => {
                state.next_ticket += 1;
                let ticket = state.next_ticket;

                tracing::debug!(%key, ticket, "Fetching missing cache entry");
                metric!(counter("swr.fetch") += 1, "cache" => self.name.as_ref());

                let handle =
                    self.start_operation(key.clone(), param.clone(), epoch, ticket, effects);
                effects.events.push(CacheEvent::Missing(MissingEvent {
                    key: key.clone(),
                    param: param.clone(),
                }));

                vacant.insert(CacheEntry {
                    param,
                    handle,
                    expiry: now + self.ttl(),
                    last_value: None,
                    refresh: None,
                })
            }
        }
    }

    /// Starts a refresh of an existing entry.
    ///
    /// If an operation is already in flight for the entry, that one is returned instead, so the
    /// producer is never invoked concurrently for the same key. Returns `None` if there is no
    /// entry for `key`.
    fn start_refresh(
        self: &Arc<Self>,
        state: &mut CacheState<P, V>,
        key: &CacheKey,
        now: Instant,
        effects: &mut Effects<P, V>,
    ) -> Option<OperationHandle<V>> {
        let epoch = state.epoch;
        let ticket = state.next_ticket();
        let entry = state.entries.get_mut(key)?;

        if let Some(refresh) = &entry.refresh {
            metric!(counter("swr.refresh.deduplicated") += 1, "cache" => self.name.as_ref());
            return Some(refresh.clone());
        }
        match entry.handle.status() {
            HandleStatus::Fulfilled(value) => entry.last_value = Some(value),
            // the first fetch is still running, or its rejection is about to evict the entry
            HandleStatus::Pending | HandleStatus::Rejected(_) => {
                return Some(entry.handle.clone());
            }
        }

        tracing::debug!(%key, ticket, "Refreshing cache entry");
        metric!(counter("swr.refresh") += 1, "cache" => self.name.as_ref());

        let handle =
            self.start_operation(key.clone(), entry.param.clone(), epoch, ticket, effects);
        // bump the expiry right away, so that accesses during the refresh do not trigger another
        entry.handle = handle.clone();
        entry.expiry = now + self.ttl();
        entry.refresh = Some(handle.clone());

        Some(handle)
    }

    /// Records the outcome of the operation identified by `ticket`.
    fn complete(
        &self,
        key: &CacheKey,
        epoch: u64,
        ticket: u64,
        result: Result<V, ProducerError>,
    ) {
        let mut effects = Effects::default();

        {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.destroyed || state.epoch != epoch {
                tracing::debug!(%key, ticket, "Discarding result of a superseded operation");
                metric!(counter("swr.discarded") += 1, "cache" => self.name.as_ref());
                return;
            }
            // the entry might have been evicted on access in the meantime
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            if entry.handle.ticket() != ticket {
                return;
            }
            if entry.refresh.as_ref().is_some_and(|r| r.ticket() == ticket) {
                entry.refresh = None;
            }

            match result {
                Ok(value) => {
                    tracing::debug!(%key, ticket, "Cache entry resolved");
                    entry.last_value = Some(value.clone());
                    effects
                        .events
                        .push(CacheEvent::Update(UpdateEvent::Resolved {
                            key: key.clone(),
                            param: entry.param.clone(),
                            value,
                        }));
                }
                Err(error) => self.evict(state, key, error, &mut effects),
            }
        }

        effects.run(&self.notifier);
    }

    /// Removes a rejected entry and queues the `rejected` event.
    fn evict(
        &self,
        state: &mut CacheState<P, V>,
        key: &CacheKey,
        error: ProducerError,
        effects: &mut Effects<P, V>,
    ) {
        let Some(entry) = state.entries.remove(key) else {
            return;
        };
        tracing::debug!(
            %key,
            error = &error as &dyn std::error::Error,
            "Cache entry rejected, evicting it",
        );
        metric!(counter("swr.rejected") += 1, "cache" => self.name.as_ref());
        metric!(gauge("swr.entries") = state.entries.len() as u64, "cache" => self.name.as_ref());

        effects
            .events
            .push(CacheEvent::Update(UpdateEvent::Rejected {
                key: key.clone(),
                param: entry.param,
                error,
            }));
    }

    /// Evicts the entry for `key` if its operation was rejected.
    ///
    /// A caller awaiting the handle can observe the rejection before the operation task got to
    /// record it. Evicting on access makes sure the next lookup retries.
    fn evict_rejected(
        &self,
        state: &mut CacheState<P, V>,
        key: &CacheKey,
        effects: &mut Effects<P, V>,
    ) {
        let error = match state.entries.get(key).map(|entry| entry.handle.status()) {
            Some(HandleStatus::Rejected(error)) => error,
            _ => return,
        };
        self.evict(state, key, error, effects);
    }

    fn release_refresh(&self, key: &CacheKey, epoch: u64, ticket: u64) {
        let mut state = self.state();
        if state.epoch != epoch {
            return;
        }
        if let Some(entry) = state.entries.get_mut(key) {
            if entry.refresh.as_ref().is_some_and(|r| r.ticket() == ticket) {
                entry.refresh = None;
            }
        }
    }

    /// Queues a `stale` event for a value that was found expired on access, and refreshes it.
    fn refresh_stale(
        self: &Arc<Self>,
        state: &mut CacheState<P, V>,
        key: &CacheKey,
        value: V,
        now: Instant,
        effects: &mut Effects<P, V>,
    ) {
        let Some(entry) = state.entries.get(key) else {
            return;
        };
        tracing::trace!(%key, "Serving stale cache entry");
        metric!(counter("swr.stale") += 1, "cache" => self.name.as_ref());
        effects
            .events
            .push(CacheEvent::Update(UpdateEvent::Stale {
                key: key.clone(),
                param: entry.param.clone(),
                value,
            }));
        self.start_refresh(state, key, now, effects);
    }

    fn read(self: &Arc<Self>, key: CacheKey, param: P) -> Result<Lookup<V>, SwrError> {
        metric!(counter("swr.access") += 1, "cache" => self.name.as_ref(), "op" => "read");
        let mut effects = Effects::default();

        let lookup = {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.destroyed {
                return Err(SwrError::Destroyed);
            }
            let now = Instant::now();

            self.evict_rejected(state, &key, &mut effects);
            let entry = self.get_or_create(state, &key, param, now, &mut effects);
            let servable = entry.servable(now);
            let handle = entry.handle.clone();

            let lookup = match servable {
                Some((value, stale)) => {
                    if stale {
                        self.refresh_stale(state, &key, value.clone(), now, &mut effects);
                    } else {
                        tracing::trace!(%key, "Serving cached entry");
                        metric!(counter("swr.hit") += 1, "cache" => self.name.as_ref());
                    }
                    Lookup::Ready(value)
                }
                None => Lookup::Pending(handle),
            };
            metric!(gauge("swr.entries") = state.entries.len() as u64, "cache" => self.name.as_ref());
            lookup
        };

        effects.run(&self.notifier);
        Ok(lookup)
    }

    fn peek(self: &Arc<Self>, key: &CacheKey) -> Option<V> {
        metric!(counter("swr.access") += 1, "cache" => self.name.as_ref(), "op" => "peek");
        let mut effects = Effects::default();

        let value = {
            let mut guard = self.state();
            let state = &mut *guard;
            let now = Instant::now();

            self.evict_rejected(state, key, &mut effects);
            let servable = state.entries.get(key).and_then(|entry| entry.servable(now));
            if let Some((value, true)) = &servable {
                self.refresh_stale(state, key, value.clone(), now, &mut effects);
            }
            servable.map(|(value, _)| value)
        };

        effects.run(&self.notifier);
        value
    }

    fn prime(self: &Arc<Self>, key: CacheKey, param: P) -> Result<(), SwrError> {
        metric!(counter("swr.access") += 1, "cache" => self.name.as_ref(), "op" => "prime");
        let mut effects = Effects::default();

        {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.destroyed {
                return Err(SwrError::Destroyed);
            }
            let now = Instant::now();

            self.evict_rejected(state, &key, &mut effects);
            if state.entries.contains_key(&key) {
                self.start_refresh(state, &key, now, &mut effects);
            } else {
                self.get_or_create(state, &key, param, now, &mut effects);
            }
        }

        effects.run(&self.notifier);
        Ok(())
    }

    fn refresh(self: &Arc<Self>, key: &CacheKey) -> Result<Option<OperationHandle<V>>, SwrError> {
        let mut effects = Effects::default();

        let handle = {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.destroyed {
                return Err(SwrError::Destroyed);
            }
            self.evict_rejected(state, key, &mut effects);
            self.start_refresh(state, key, Instant::now(), &mut effects)
        };

        effects.run(&self.notifier);
        Ok(handle)
    }

    /// Refreshes every stale entry, one after the other.
    async fn sweep(self: Arc<Self>) {
        let (epoch, keys) = {
            let state = self.state();
            if state.destroyed {
                return;
            }
            let now = Instant::now();
            let keys: Vec<_> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_stale(now))
                .map(|(key, _)| key.clone())
                .collect();
            (state.epoch, keys)
        };
        if keys.is_empty() {
            return;
        }

        tracing::debug!(stale = keys.len(), "Sweeping stale cache entries");
        metric!(counter("swr.sweep") += 1, "cache" => self.name.as_ref());
        let sweep_start = Instant::now();

        for key in keys {
            let mut effects = Effects::default();
            let handle = {
                let mut guard = self.state();
                let state = &mut *guard;
                if state.destroyed || state.epoch != epoch {
                    break;
                }
                let now = Instant::now();
                // the entry might have been refreshed by an access in the meantime
                let still_stale = state
                    .entries
                    .get(&key)
                    .is_some_and(|entry| entry.is_stale(now));
                if !still_stale {
                    continue;
                }
                self.start_refresh(state, &key, now, &mut effects)
            };
            effects.run(&self.notifier);

            if let Some(handle) = handle {
                metric!(counter("swr.sweep.refreshed") += 1, "cache" => self.name.as_ref());
                // failures are reported through the `rejected` notification
                let _ = handle.await;
            }
        }

        metric!(
            timer("swr.sweep.duration") = sweep_start.elapsed(),
            "cache" => self.name.as_ref()
        );
    }

    fn clear(&self) {
        {
            let mut state = self.state();
            if state.destroyed {
                return;
            }
            state.entries.clear();
            state.epoch += 1;
            tracing::info!(cache = %self.name, epoch = state.epoch, "Cleared cache");
        }
        metric!(gauge("swr.entries") = 0u64, "cache" => self.name.as_ref());

        self.notifier.publish(&CacheEvent::Reset);
    }

    fn destroy(&self) {
        let entries = {
            let mut state = self.state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.epoch += 1;
            std::mem::take(&mut state.entries)
        };
        self.notifier.close();
        self.sweeper.cancel();
        metric!(gauge("swr.entries") = 0u64, "cache" => self.name.as_ref());
        tracing::info!(cache = %self.name, "Destroyed cache");

        drop(entries);
    }
}

/// A stale-while-revalidate cache.
///
/// Values are produced by an asynchronous operation given to the [builder](SwrCache::builder).
/// Once a value was produced for a parameter, it is served synchronously from then on. After the
/// configured `ttl`, the next access still serves the old value, but triggers a refresh in the
/// background. A periodic sweep refreshes all stale entries that are not being accessed.
///
/// - The producer is never invoked concurrently for the same key.
/// - A failed first fetch leaves no entry behind, so the next access retries.
/// - A failed refresh evicts the entry. Callers only learn about it through the `rejected`
///   notification.
/// - [`clear`](Self::clear) and [`destroy`](Self::destroy) do not abort operations in flight, but
///   their results are discarded.
///
/// Cloning the cache is cheap and yields a handle to the same entries. The periodic sweep stops
/// once the cache is destroyed or the last clone is dropped.
pub struct SwrCache<P, V> {
    inner: Arc<Inner<P, V>>,
}

impl<P, V> Clone for SwrCache<P, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, V> fmt::Debug for SwrCache<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (entries, epoch, destroyed) = self
            .inner
            .state
            .try_lock()
            .map(|s| (s.entries.len(), s.epoch, s.destroyed))
            .unwrap_or_default();
        f.debug_struct("SwrCache")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("entries", &entries)
            .field("epoch", &epoch)
            .field("destroyed", &destroyed)
            .field("notifier", &self.inner.notifier)
            .finish()
    }
}

impl<P, V> SwrCache<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts building a cache that derives its keys from the [`KeyParts`] of the parameter.
    pub fn builder<F, Fut>(get_value: F) -> SwrCacheBuilder<P, V>
    where
        P: KeyParts,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let get_key = default_key_fn();
        Self::builder_with_key(get_value, move |param: &P| get_key(param))
    }

    /// Starts building a cache with a custom key derivation.
    ///
    /// `get_key` must be deterministic: logically equal parameters have to produce equal keys.
    pub fn builder_with_key<F, Fut, K>(get_value: F, get_key: K) -> SwrCacheBuilder<P, V>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
        K: Fn(&P) -> CacheKey + Send + Sync + 'static,
    {
        SwrCacheBuilder {
            name: Arc::from("default"),
            producer: Arc::new(move |param| get_value(param).boxed()),
            key_fn: Arc::new(get_key),
            config: CacheConfig::default(),
            strategy: Arc::new(IntervalRefresh),
        }
    }

    /// Derives the key for `param`.
    pub fn key(&self, param: &P) -> CacheKey {
        (self.inner.key_fn)(param)
    }

    /// Reads the value for `param`.
    ///
    /// If a value was produced before, it is returned synchronously as [`Lookup::Ready`], even if
    /// it is stale. A stale value additionally publishes a `stale` update and triggers a refresh.
    ///
    /// Otherwise, the first fetch is started (publishing `missing`) or joined, and its handle is
    /// returned as [`Lookup::Pending`].
    ///
    /// # Errors
    ///
    /// Fails with [`SwrError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn read(&self, param: P) -> Result<Lookup<V>, SwrError> {
        let key = self.key(&param);
        self.inner.read(key, param)
    }

    /// Returns the value for `param` if one is available synchronously.
    ///
    /// This never creates an entry. It does however refresh a stale value in the background, the
    /// same way [`read`](Self::read) does.
    pub fn peek(&self, param: &P) -> Option<V> {
        let key = self.key(param);
        self.inner.peek(&key)
    }

    /// Starts fetching the value for `param`, or refreshes it if it exists already.
    ///
    /// This does not wait for the outcome.
    ///
    /// # Errors
    ///
    /// Fails with [`SwrError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn prime(&self, param: P) -> Result<(), SwrError> {
        let key = self.key(&param);
        self.inner.prime(key, param)
    }

    /// Refreshes the entry for `param`, regardless of its expiry.
    ///
    /// Returns the handle of the refresh, which is the already running operation if there is one.
    /// Returns `None` if there is no entry for `param`.
    ///
    /// # Errors
    ///
    /// Fails with [`SwrError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn refresh(&self, param: &P) -> Result<Option<OperationHandle<V>>, SwrError> {
        let key = self.key(param);
        self.inner.refresh(&key)
    }

    /// Runs one sweep over all entries right away, refreshing the stale ones sequentially.
    pub fn sweep(&self) -> BoxFuture<'static, ()> {
        Arc::clone(&self.inner).sweep().boxed()
    }

    /// Evicts all entries and publishes a `reset` event.
    ///
    /// Results of operations that are still in flight are discarded. The cache stays usable.
    pub fn clear(&self) {
        self.inner.clear()
    }

    /// Evicts all entries and permanently disables the cache.
    ///
    /// All subscriptions are dropped, and nothing is published from here on, not even for
    /// operations that are still in flight.
    pub fn destroy(&self) {
        self.inner.destroy()
    }

    /// Subscribes `listener` to all events published on `topic`.
    ///
    /// # Errors
    ///
    /// Fails with [`SwrError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn subscribe<L>(&self, topic: Topic, listener: L) -> Result<SubscriptionId, SwrError>
    where
        L: Fn(&CacheEvent<P, V>) + Send + Sync + 'static,
    {
        self.inner
            .notifier
            .subscribe(topic, Arc::new(listener))
            .ok_or(SwrError::Destroyed)
    }

    /// Revokes a single subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Returns `true` if there is an entry for `param`, in any state.
    pub fn contains(&self, param: &P) -> bool {
        let key = self.key(param);
        self.inner.state().entries.contains_key(&key)
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.inner.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current epoch, which is bumped by every [`clear`](Self::clear) and
    /// [`destroy`](Self::destroy).
    pub fn epoch(&self) -> u64 {
        self.inner.state().epoch
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state().destroyed
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

/// Builder for a [`SwrCache`], see [`SwrCache::builder`].
pub struct SwrCacheBuilder<P, V> {
    name: Arc<str>,
    producer: ValueProducer<P, V>,
    key_fn: KeyFn<P>,
    config: CacheConfig,
    strategy: Arc<dyn RefreshStrategy>,
}

impl<P, V> SwrCacheBuilder<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// The name of the cache, used for logs and as the `cache` tag of metrics.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the key derivation.
    pub fn key_fn(mut self, get_key: impl Fn(&P) -> CacheKey + Send + Sync + 'static) -> Self {
        self.key_fn = Arc::new(get_key);
        self
    }

    /// Replaces all timing options at once.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.config.refresh_interval = refresh_interval;
        self
    }

    /// Replaces the default [`IntervalRefresh`] sweep strategy.
    pub fn refresh_strategy(mut self, strategy: impl RefreshStrategy) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Validates the options and creates the cache, starting the periodic sweep.
    ///
    /// # Errors
    ///
    /// Fails with [`SwrError::Config`] if the options are invalid, see [`CacheConfig::validate`].
    ///
    /// # Panics
    ///
    /// The default [`IntervalRefresh`] strategy panics when not called within a Tokio runtime.
    pub fn build(self) -> Result<SwrCache<P, V>, SwrError> {
        self.config.validate()?;

        let inner = Arc::new(Inner {
            name: self.name,
            producer: self.producer,
            key_fn: self.key_fn,
            config: self.config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                epoch: 0,
                destroyed: false,
                next_ticket: 0,
            }),
            notifier: Notifier::default(),
            sweeper: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&inner);
        let sweep: SweepFn = Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.sweep().await;
                }
            }
            .boxed()
        });
        self.strategy
            .start(sweep, inner.sweeper.clone(), &inner.config);

        tracing::debug!(cache = %inner.name, config = ?inner.config, "Created cache");

        Ok(SwrCache { inner })
    }
}
