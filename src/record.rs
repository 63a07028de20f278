//! `EndpointRecord<T>`: per-endpoint state, coalesced production, and the
//! type-erased handle the registry stores it behind.
//!
//! The coalescing strategy mirrors the teacher crate's revalidation guard
//! (a single in-flight marker keyed per endpoint) but upgrades it from a
//! boolean flag to a [`futures::future::Shared`] so every concurrent
//! `refetch()` caller can actually await the one production in flight rather
//! than merely skip starting a second one. A detached "driver" task holds
//! its own clone of the shared future so the production always runs to
//! completion even if the caller that originally triggered it stops polling.

use std::any::Any;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::CacheProvider;
use crate::errors::ProducerError;
use crate::platform::{self, now_millis};
use crate::subscription::{Listener, SubscriberSet, Unsubscribe};
use crate::types::{prefixed_key, CachedRecord, EndpointState, ResolvedOptions};

/// An async producer: `() -> Future<Output = Result<T, E>>`.
pub type Producer<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, ProducerError>> + Send + Sync>;

type SharedProduction = Shared<BoxFuture<'static, ()>>;

struct Inner<T> {
    state: EndpointState<T>,
    in_flight: Option<SharedProduction>,
}

/// The mutable half of an endpoint's identity: producer, merged options, and
/// resolved cache binding. Held behind its own lock so [`EndpointRecord::update`]
/// can swap all three atomically on a redefine without touching `state`,
/// `subscribers`, or `in_flight`.
struct Config<T> {
    producer: Producer<T>,
    options: ResolvedOptions,
    cache: Arc<dyn CacheProvider>,
}

/// All state the registry keeps for a single endpoint key.
pub(crate) struct EndpointRecord<T> {
    key: String,
    config: Mutex<Config<T>>,
    subscribers: SubscriberSet<T>,
    inner: Mutex<Inner<T>>,
}

impl<T> EndpointRecord<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(
        key: String,
        producer: Producer<T>,
        options: ResolvedOptions,
        cache: Arc<dyn CacheProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            config: Mutex::new(Config {
                producer,
                options,
                cache,
            }),
            subscribers: SubscriberSet::default(),
            inner: Mutex::new(Inner {
                state: EndpointState::default(),
                in_flight: None,
            }),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replace the producer, merged options, and cache binding in place,
    /// leaving `state`, `subscribers`, and any in-flight production untouched.
    ///
    /// This is what a redefine of an already-registered key goes through —
    /// per §3's "redefining an existing key replaces producer/options but
    /// preserves in-memory state", swapping the whole record would orphan
    /// live subscribers and discard state that never round-tripped through
    /// the cache (e.g. a retained stale-while-error value).
    pub fn update(&self, producer: Producer<T>, options: ResolvedOptions, cache: Arc<dyn CacheProvider>) {
        let mut config = self.config.lock().unwrap_or_else(|p| p.into_inner());
        config.producer = producer;
        config.options = options;
        config.cache = cache;
    }

    fn producer(&self) -> Producer<T> {
        self.config
            .lock()
            .map(|config| config.producer.clone())
            .unwrap_or_else(|p| p.into_inner().producer.clone())
    }

    fn cache(&self) -> Arc<dyn CacheProvider> {
        self.config
            .lock()
            .map(|config| config.cache.clone())
            .unwrap_or_else(|p| p.into_inner().cache.clone())
    }

    fn refetch_after(&self) -> Option<std::time::Duration> {
        self.config
            .lock()
            .map(|config| config.options.refetch_after)
            .unwrap_or_else(|p| p.into_inner().options.refetch_after)
    }

    pub fn get_state(&self) -> EndpointState<T> {
        self.inner
            .lock()
            .map(|inner| inner.state.clone())
            .unwrap_or_default()
    }

    pub fn is_observed(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Whether cached data is old enough that a focus/online signal should
    /// trigger a silent background refetch. Endpoints with no
    /// `refetch_after` configured are never refreshed this way.
    pub fn is_due_for_background_refresh(&self, now_millis: u64) -> bool {
        self.is_stale(&self.get_state(), now_millis)
    }

    fn is_stale(&self, state: &EndpointState<T>, now_millis: u64) -> bool {
        let Some(refetch_after) = self.refetch_after() else {
            return false;
        };
        match state.last_updated {
            None => true,
            Some(last_updated) => {
                now_millis.saturating_sub(last_updated) >= refetch_after.as_millis() as u64
            }
        }
    }

    /// Attach a subscriber, deliver it the current snapshot synchronously,
    /// and kick off a refetch if the current data is missing or stale.
    ///
    /// The refetch (if any) is deferred to the next tick so `subscribe`
    /// itself never awaits.
    pub fn subscribe(self: &Arc<Self>, listener: Listener<T>) -> Unsubscribe {
        let snapshot = self.get_state();
        listener(snapshot.clone());
        let id = self.subscribers.insert(listener);

        if snapshot.data.is_none() || self.is_stale(&snapshot, now_millis()) {
            let record = Arc::clone(self);
            platform::spawn(async move {
                record.refetch().await;
            });
        }

        let record = Arc::clone(self);
        Unsubscribe::new(move || record.subscribers.remove(id))
    }

    /// Read from the cache provider and adopt the result as the current
    /// state, if present and well-formed. Does not notify subscribers by
    /// itself; callers invoke this before the first subscription attaches.
    pub async fn hydrate(&self) {
        let Some(cached) = self.cache().get(&prefixed_key(&self.key)).await else {
            return;
        };
        match serde_json::from_value::<T>(cached.data) {
            Ok(data) => {
                if let Ok(mut inner) = self.inner.lock() {
                    inner.state = EndpointState::hydrated(data, cached.last_updated);
                }
            }
            Err(err) => {
                let err = crate::errors::CoreError::Deserialization {
                    key: self.key.clone(),
                    message: err.to_string(),
                };
                tracing::warn!(key = %self.key, %err, "cached entry failed to deserialize, ignoring");
            }
        }
    }

    /// Trigger (or join) a production for this endpoint. Resolves once the
    /// production that was in flight at call time has completed, whether
    /// that production succeeded, failed, or was started by this call.
    pub async fn refetch(self: &Arc<Self>) {
        let shared = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(existing) = &inner.in_flight {
                existing.clone()
            } else {
                let record = Arc::clone(self);
                let production: BoxFuture<'static, ()> =
                    Box::pin(async move { record.run_production().await });
                let shared = production.shared();
                inner.in_flight = Some(shared.clone());

                // Drive the production to completion on a detached task so it
                // finishes even if every caller awaiting `shared` is dropped.
                let driver = shared.clone();
                platform::spawn(async move {
                    driver.await;
                });

                shared
            }
        };
        shared.await;
    }

    async fn run_production(self: Arc<Self>) {
        let previous = self.get_state();
        let loading = EndpointState::loading_from(&previous);
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = loading.clone();
        }
        self.subscribers.notify(&loading);

        let producer = self.producer();
        let result = producer().await;

        let next_state = match result {
            Ok(data) => {
                let last_updated = now_millis();
                self.persist(&data, last_updated).await;
                EndpointState::succeeded(data, last_updated)
            }
            Err(error) => {
                tracing::debug!(key = %self.key, %error, "producer failed, keeping prior data");
                EndpointState::failed_from(&previous, error)
            }
        };

        if let Ok(mut inner) = self.inner.lock() {
            inner.state = next_state.clone();
            inner.in_flight = None;
        }
        self.subscribers.notify(&next_state);
    }

    async fn persist(&self, data: &T, last_updated: u64) {
        match serde_json::to_value(data) {
            Ok(value) => {
                self.cache()
                    .set(
                        &prefixed_key(&self.key),
                        CachedRecord {
                            data: value,
                            last_updated,
                        },
                    )
                    .await;
            }
            Err(err) => {
                let err = crate::errors::CoreError::Serialization {
                    key: self.key.clone(),
                    message: err.to_string(),
                };
                tracing::warn!(key = %self.key, %err, "failed to serialize value for caching");
            }
        }
    }

    /// Clear both the in-memory state and the cache entry, and notify
    /// subscribers of the reset. Does not cancel an in-flight production;
    /// a production that completes afterward will overwrite the reset state
    /// with its own result, per the registry's "last write wins" model.
    pub async fn invalidate(&self) {
        self.cache().remove(&prefixed_key(&self.key)).await;
        let reset = EndpointState::default();
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = reset.clone();
        }
        self.subscribers.notify(&reset);
    }
}

/// Type-erased handle the registry stores so endpoints of different `T` can
/// live in the same `HashMap`. Mirrors the teacher crate's
/// `Arc<dyn Any + Send + Sync>` cache-entry pattern, generalized to a full
/// trait object instead of a bare `Any` payload so the registry can drive
/// refresh/refetch without knowing `T`.
pub(crate) trait ErasedEndpoint: Any + Send + Sync {
    fn key(&self) -> &str;
    fn is_observed(&self) -> bool;
    fn is_due_for_background_refresh(&self, now_millis: u64) -> bool;
    fn refetch(self: Arc<Self>) -> BoxFuture<'static, ()>;
    fn invalidate(self: Arc<Self>) -> BoxFuture<'static, ()>;
    /// Upcast to `Arc<dyn Any + Send + Sync>` so the registry can recover
    /// the concrete `Arc<EndpointRecord<T>>` via `Arc::downcast`.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> ErasedEndpoint for EndpointRecord<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    fn key(&self) -> &str {
        EndpointRecord::key(self)
    }

    fn is_observed(&self) -> bool {
        EndpointRecord::is_observed(self)
    }

    fn is_due_for_background_refresh(&self, now_millis: u64) -> bool {
        EndpointRecord::is_due_for_background_refresh(self, now_millis)
    }

    fn refetch(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { EndpointRecord::refetch(&self).await })
    }

    fn invalidate(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { EndpointRecord::invalidate(&self).await })
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
