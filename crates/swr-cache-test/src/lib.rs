//! Helpers for testing the cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Run tests with `#[tokio::test(start_paused = true)]`, so that expiry can be tested by
//!    advancing the clock instead of sleeping.
//!
//!  - Cache operations are driven by spawned tasks. Call [`settle`] to let them run before
//!    asserting on their side effects.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `swr_cache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("swr_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Lets all spawned tasks run until they are blocked.
///
/// This only works reliably on the current-thread runtime used by `#[tokio::test]`.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Responder<P, V> = Box<dyn Fn(&P, usize) -> anyhow::Result<V> + Send + Sync>;

struct ProducerInner<P, V> {
    responder: Responder<P, V>,
    delay: Option<Duration>,
    gate: watch::Sender<bool>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    params: Mutex<Vec<P>>,
}

/// A scripted value producer that records how it is invoked.
///
/// The responder receives the parameter and the zero-based index of the invocation, so tests can
/// make particular calls fail or return distinct values.
///
/// ```ignore
/// let producer = Producer::new(|param: &String, call| Ok(format!("{param}#{call}")));
/// let cache = SwrCache::builder(producer.func()).build()?;
/// ```
pub struct Producer<P, V> {
    inner: Arc<ProducerInner<P, V>>,
}

impl<P, V> Clone for Producer<P, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, V> fmt::Debug for Producer<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("calls", &self.inner.calls.load(Ordering::Relaxed))
            .field("in_flight", &self.inner.in_flight.load(Ordering::Relaxed))
            .field("paused", &!*self.inner.gate.borrow())
            .finish()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<P, V> Producer<P, V>
where
    P: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&P, usize) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        Self::build(Box::new(responder), None)
    }

    /// Like [`new`](Self::new), but every invocation takes `delay` to complete.
    pub fn with_delay<F>(delay: Duration, responder: F) -> Self
    where
        F: Fn(&P, usize) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        Self::build(Box::new(responder), Some(delay))
    }

    fn build(responder: Responder<P, V>, delay: Option<Duration>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(ProducerInner {
                responder,
                delay,
                gate,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                params: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the function to hand to the cache builder.
    pub fn func(&self) -> impl Fn(P) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync + 'static {
        let inner = Arc::clone(&self.inner);
        move |param| Self::call(Arc::clone(&inner), param).boxed()
    }

    async fn call(inner: Arc<ProducerInner<P, V>>, param: P) -> anyhow::Result<V> {
        let call = inner.calls.fetch_add(1, Ordering::Relaxed);
        lock(&inner.params).push(param.clone());

        let in_flight = inner.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        inner.max_in_flight.fetch_max(in_flight, Ordering::Relaxed);
        let _in_flight = InFlight(&inner.in_flight);

        let mut gate = inner.gate.subscribe();
        gate.wait_for(|open| *open).await?;
        if let Some(delay) = inner.delay {
            tokio::time::sleep(delay).await;
        }

        (inner.responder)(&param, call)
    }

    /// Holds all invocations, including ones already running, until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.inner.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.inner.gate.send_replace(true);
    }

    /// The number of times the producer was invoked.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::Relaxed)
    }

    /// The number of invocations that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// The highest number of invocations that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::Relaxed)
    }

    /// The parameters of all invocations, in order.
    pub fn params(&self) -> Vec<P> {
        lock(&self.inner.params).clone()
    }
}

/// Records everything passed to its [`listener`](Self::listener).
#[derive(Debug)]
pub struct EventLog<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for EventLog<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T> Default for EventLog<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> EventLog<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener appending every event it receives to this log.
    pub fn listener(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| lock(&events).push(event.clone())
    }

    /// All events recorded so far.
    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.events).clone()
    }

    /// Removes and returns all events recorded so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.events))
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
