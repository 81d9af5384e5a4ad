//! Lifecycle notifications of the cache.
//!
//! Observers subscribe to a [`Topic`] and receive every [`CacheEvent`] published to it. All
//! subscriptions live in a single registry which is dropped as a whole when the cache is
//! destroyed, after which nothing is delivered anymore.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::ProducerError;
use crate::key::CacheKey;

/// The named topics observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// A lookup created a new entry.
    Missing,
    /// An entry went stale, resolved, or was rejected.
    Update,
    /// The cache was cleared.
    Reset,
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        match self {
            Self::Missing => "missing",
            Self::Update => "update",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Payload of the [`Topic::Missing`] event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingEvent<P> {
    pub key: CacheKey,
    pub param: P,
}

/// Payload of the [`Topic::Update`] event.
///
/// This serializes with a `type` tag, so a resolved update looks like
/// `{"type": "resolved", "key": .., "param": .., "value": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateEvent<P, V> {
    /// A resolved entry was accessed after its expiry. Carries the value about to be replaced.
    Stale { key: CacheKey, param: P, value: V },
    /// A fetch or refresh completed successfully.
    Resolved { key: CacheKey, param: P, value: V },
    /// A fetch or refresh failed, and the entry was evicted.
    Rejected {
        key: CacheKey,
        param: P,
        error: ProducerError,
    },
}

impl<P, V> UpdateEvent<P, V> {
    pub fn key(&self) -> &CacheKey {
        match self {
            Self::Stale { key, .. } | Self::Resolved { key, .. } | Self::Rejected { key, .. } => {
                key
            }
        }
    }

    /// The name of the update type, as used in the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stale { .. } => "stale",
            Self::Resolved { .. } => "resolved",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// An event published by the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CacheEvent<P, V> {
    Missing(MissingEvent<P>),
    Update(UpdateEvent<P, V>),
    Reset,
}

impl<P, V> CacheEvent<P, V> {
    /// The topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Missing(_) => Topic::Missing,
            Self::Update(_) => Topic::Update,
            Self::Reset => Topic::Reset,
        }
    }
}

/// Identifies a single subscription, see [`Notifier::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A callback receiving published events.
pub type Listener<P, V> = Arc<dyn Fn(&CacheEvent<P, V>) + Send + Sync>;

struct Registry<P, V> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Topic, Listener<P, V>)>,
}

/// A publish/subscribe facility for [`CacheEvent`]s.
///
/// Listeners are invoked synchronously, in subscription order, outside of any lock. They may call
/// back into the cache.
pub struct Notifier<P, V> {
    /// `None` once the notifier has been closed.
    registry: Mutex<Option<Registry<P, V>>>,
}

impl<P, V> Default for Notifier<P, V> {
    fn default() -> Self {
        Self {
            registry: Mutex::new(Some(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }
}

impl<P, V> fmt::Debug for Notifier<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.registry().as_ref().map(|r| r.listeners.len());
        f.debug_struct("Notifier")
            .field("listeners", &listeners)
            .finish()
    }
}

impl<P, V> Notifier<P, V> {
    fn registry(&self) -> MutexGuard<'_, Option<Registry<P, V>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `listener` for all events on `topic`.
    ///
    /// Returns `None` if the notifier was already closed.
    pub fn subscribe(&self, topic: Topic, listener: Listener<P, V>) -> Option<SubscriptionId> {
        let mut registry = self.registry();
        let registry = registry.as_mut()?;

        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((id, topic, listener));
        Some(id)
    }

    /// Removes a single subscription.
    ///
    /// Returns `true` if the subscription was still active.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(registry) = registry.as_mut() else {
            return false;
        };
        let before = registry.listeners.len();
        registry.listeners.retain(|(sub, _, _)| *sub != id);
        registry.listeners.len() != before
    }

    /// The number of active subscriptions.
    pub fn listener_count(&self) -> usize {
        self.registry().as_ref().map_or(0, |r| r.listeners.len())
    }

    /// Delivers `event` to all listeners of its topic.
    pub fn publish(&self, event: &CacheEvent<P, V>) {
        let topic = event.topic();
        let listeners: Vec<_> = match self.registry().as_ref() {
            Some(registry) => registry
                .listeners
                .iter()
                .filter(|(_, t, _)| *t == topic)
                .map(|(_, _, listener)| Arc::clone(listener))
                .collect(),
            None => return,
        };

        for listener in listeners {
            // an earlier listener may have closed the notifier
            if self.is_closed() {
                return;
            }
            listener(event);
        }
    }

    /// Drops all subscriptions at once. Nothing will be published afterwards.
    pub fn close(&self) {
        // drop the listeners outside of the lock, they might hold on to arbitrary state
        let registry = self.registry().take();
        drop(registry);
    }

    pub fn is_closed(&self) -> bool {
        self.registry().is_none()
    }
}
