//! `QueryCore`: the public facade tying the endpoint registry, cache
//! providers, and the focus/online refresh orchestrator together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{resolve_provider, CacheProvider};
use crate::errors::ProducerError;
use crate::events::{EventCallback, EventSource, EventSubscription, ManualEventSource};
use crate::platform::{self, now_millis};
use crate::record::{EndpointRecord, ErasedEndpoint, Producer};
use crate::subscription::{Listener, Unsubscribe};
use crate::types::{merge_options, CacheProviderKind, CoreOptions, EndpointOptions, EndpointState};

struct Registry {
    records: Mutex<HashMap<String, Arc<dyn ErasedEndpoint>>>,
    caches: Mutex<HashMap<CacheProviderKind, Arc<dyn CacheProvider>>>,
    options: CoreOptions,
    events: Arc<dyn EventSource>,
}

impl Registry {
    fn cache_for(&self, kind: CacheProviderKind) -> Arc<dyn CacheProvider> {
        let mut caches = self.caches.lock().unwrap_or_else(|p| p.into_inner());
        caches
            .entry(kind)
            .or_insert_with(|| resolve_provider(kind))
            .clone()
    }
}

/// Entry point of the crate: defines endpoints, hands out subscriptions, and
/// drives refetch/invalidate against them.
///
/// Cloning a `QueryCore` is cheap and shares the same underlying registry,
/// cache provider instances, and refresh wiring (it is an `Arc` handle).
#[derive(Clone)]
pub struct QueryCore {
    inner: Arc<Registry>,
    _refresh_subscriptions: Arc<(EventSubscription, EventSubscription, EventSubscription)>,
}

impl QueryCore {
    /// Build a core using the default event source: a process-wide
    /// [`crate::events::browser::BrowserEventSource`] on wasm32, or a
    /// private, never-firing source on native targets (native callers pass
    /// their own [`ManualEventSource`] via [`CoreOptionsBuilder`] equivalents
    /// when they want focus/online behavior under test).
    pub fn new(options: CoreOptions) -> Self {
        Self::with_event_source(options, default_event_source())
    }

    /// Build a core against an explicit event source. Primarily used in
    /// tests, where a [`ManualEventSource`] lets focus/online behavior be
    /// triggered deterministically.
    pub fn with_event_source(options: CoreOptions, events: Arc<dyn EventSource>) -> Self {
        let inner = Arc::new(Registry {
            records: Mutex::new(HashMap::new()),
            caches: Mutex::new(HashMap::new()),
            options,
            events,
        });

        let subscriptions = wire_refresh_orchestrator(&inner);

        Self {
            inner,
            _refresh_subscriptions: Arc::new(subscriptions),
        }
    }

    /// Register (or re-register) an endpoint under `key`.
    ///
    /// Resolves once the one cache hydration attempt this call makes has
    /// completed (for a brand-new key only — see below), so `get_state`
    /// immediately after this call reflects a cache hit, not some later
    /// point once a background task happens to run.
    ///
    /// Calling this again for a key that already exists (under the same
    /// value type) updates the producer and options of the existing record
    /// in place: current state, subscribers, and any in-flight production
    /// are preserved rather than discarded, and no new cache hydration is
    /// attempted (the in-memory state already reflects whatever hydration or
    /// production last wrote). Redefining a key under a different value type
    /// than it was originally defined with installs a fresh record, since
    /// there is no way to preserve state across a type change.
    pub async fn define_endpoint<T, F, Fut, E>(&self, key: impl Into<String>, producer: F)
    where
        T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.define_endpoint_with_options(key, producer, EndpointOptions::default())
            .await;
    }

    /// Like [`Self::define_endpoint`] but with per-endpoint overrides of the
    /// core-wide [`CoreOptions`].
    pub async fn define_endpoint_with_options<T, F, Fut, E>(
        &self,
        key: impl Into<String>,
        producer: F,
        options: EndpointOptions,
    ) where
        T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key = key.into();
        let resolved = merge_options(&self.inner.options, &options);
        let cache = self.inner.cache_for(resolved.cache_provider);

        let boxed_producer: Producer<T> = Arc::new(move || {
            let fut = producer();
            Box::pin(async move { fut.await.map_err(ProducerError::wrap) }) as BoxFuture<'static, _>
        });

        if let Some(existing) = self.typed_record::<T>(&key) {
            existing.update(boxed_producer, resolved, cache);
            return;
        }

        let record = EndpointRecord::new(key.clone(), boxed_producer, resolved, cache);
        record.hydrate().await;

        if let Ok(mut records) = self.inner.records.lock() {
            records.insert(key, record as Arc<dyn ErasedEndpoint>);
        }
    }

    /// Subscribe to state changes for `key`.
    ///
    /// The listener is invoked immediately with the current snapshot, and
    /// again on every subsequent state change, until the returned
    /// [`Unsubscribe`] is dropped or cancelled. If no data is cached yet, or
    /// the cached data is stale, a refetch is triggered.
    ///
    /// Returns `None` if no endpoint has been defined for `key`, or if `T`
    /// does not match the type the endpoint was defined with.
    pub fn subscribe<T>(&self, key: &str, listener: Listener<T>) -> Option<Unsubscribe>
    where
        T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        let record = self.typed_record::<T>(key)?;
        Some(record.subscribe(listener))
    }

    /// Read the current state for `key` without subscribing.
    pub fn get_state<T>(&self, key: &str) -> Option<EndpointState<T>>
    where
        T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        self.typed_record::<T>(key).map(|record| record.get_state())
    }

    /// Trigger (or join) a refetch for `key`. Resolves once the production
    /// in flight at call time completes. A no-op if `key` is not defined.
    pub async fn refetch(&self, key: &str) {
        if let Some(record) = self.erased_record(key) {
            record.refetch().await;
        }
    }

    /// Clear both the cached entry and in-memory state for `key`, notifying
    /// subscribers of the reset. A no-op if `key` is not defined.
    pub async fn invalidate(&self, key: &str) {
        if let Some(record) = self.erased_record(key) {
            record.invalidate().await;
        }
    }

    fn erased_record(&self, key: &str) -> Option<Arc<dyn ErasedEndpoint>> {
        self.inner
            .records
            .lock()
            .ok()
            .and_then(|records| records.get(key).cloned())
    }

    fn typed_record<T>(&self, key: &str) -> Option<Arc<EndpointRecord<T>>>
    where
        T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        let erased = self.erased_record(key)?;
        erased.into_any_arc().downcast::<EndpointRecord<T>>().ok()
    }
}

#[cfg(not(target_family = "wasm"))]
fn default_event_source() -> Arc<dyn EventSource> {
    Arc::new(ManualEventSource::new())
}

#[cfg(target_family = "wasm")]
fn default_event_source() -> Arc<dyn EventSource> {
    crate::events::browser::BrowserEventSource::shared() as Arc<dyn EventSource>
}

fn wire_refresh_orchestrator(
    registry: &Arc<Registry>,
) -> (EventSubscription, EventSubscription, EventSubscription) {
    let weak = Arc::downgrade(registry);

    let focus_callback: EventCallback = {
        let weak = weak.clone();
        Arc::new(move || trigger_focus_refresh(&weak))
    };
    let visible_subscription = registry.events.on_visible(focus_callback.clone());
    let focus_subscription = registry.events.on_focus(focus_callback);

    let online_callback: EventCallback = {
        let weak = weak.clone();
        Arc::new(move || trigger_online_refresh(&weak))
    };
    let online_subscription = registry.events.on_online(online_callback);

    (visible_subscription, focus_subscription, online_subscription)
}

/// On focus/visibility regained: refetch only endpoints that are both
/// currently observed and stale past their `refetch_after` window.
fn trigger_focus_refresh(weak: &Weak<Registry>) {
    let Some(registry) = weak.upgrade() else {
        return;
    };
    let now = now_millis();
    let records: Vec<Arc<dyn ErasedEndpoint>> = match registry.records.lock() {
        Ok(records) => records.values().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
    };
    for record in records {
        if record.is_observed() && record.is_due_for_background_refresh(now) {
            platform::spawn(async move {
                record.refetch().await;
            });
        }
    }
}

/// On connectivity restored: refetch every currently observed endpoint,
/// regardless of staleness (the assumption is that while offline, any
/// observed endpoint may have missed updates).
fn trigger_online_refresh(weak: &Weak<Registry>) {
    let Some(registry) = weak.upgrade() else {
        return;
    };
    let records: Vec<Arc<dyn ErasedEndpoint>> = match registry.records.lock() {
        Ok(records) => records.values().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
    };
    for record in records {
        if record.is_observed() {
            platform::spawn(async move {
                record.refetch().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manual_core() -> (QueryCore, Arc<ManualEventSource>) {
        let events = Arc::new(ManualEventSource::new());
        let core = QueryCore::with_event_source(CoreOptions::new(), events.clone() as Arc<dyn EventSource>);
        (core, events)
    }

    #[derive(Debug, thiserror::Error)]
    #[error("producer failed")]
    struct TestError;

    #[tokio::test]
    async fn define_and_subscribe_delivers_snapshot_then_fetches() {
        let (core, _events) = manual_core();
        core.define_endpoint::<i32, _, _, TestError>("count", || async { Ok(7) })
            .await;

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let done = Arc::new(tokio::sync::Notify::new());
        let done_clone = done.clone();
        let _sub = core
            .subscribe::<i32>(
                "count",
                Arc::new(move |state: EndpointState<i32>| {
                    let mut seen = seen_clone.lock().unwrap();
                    let had_data = state.data.is_some();
                    seen.push(state.data);
                    if had_data {
                        done_clone.notify_one();
                    }
                }),
            )
            .expect("endpoint should exist");

        tokio::time::timeout(Duration::from_secs(1), done.notified())
            .await
            .expect("subscriber should eventually see fetched data");

        let final_state = core.get_state::<i32>("count").unwrap();
        assert_eq!(final_state.data, Some(7));
    }

    #[tokio::test]
    async fn invalidate_unknown_key_is_a_no_op() {
        let (core, _events) = manual_core();
        core.invalidate("does-not-exist").await;
    }

    #[tokio::test]
    async fn wrong_type_subscription_returns_none() {
        let (core, _events) = manual_core();
        core.define_endpoint::<i32, _, _, TestError>("typed", || async { Ok(1) })
            .await;
        let result = core.subscribe::<String>("typed", Arc::new(|_| {}));
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn define_endpoint_awaits_hydration_before_returning() {
        use crate::types::{prefixed_key, CachedRecord};

        let (core, _events) = manual_core();
        let cache = core.inner.cache_for(CacheProviderKind::Memory);
        cache
            .set(
                &prefixed_key("seeded"),
                CachedRecord {
                    data: serde_json::json!(42),
                    last_updated: 999,
                },
            )
            .await;

        core.define_endpoint::<i32, _, _, TestError>("seeded", || async { Ok(0) })
            .await;

        let state = core.get_state::<i32>("seeded").expect("endpoint should exist");
        assert_eq!(
            state.data,
            Some(42),
            "define_endpoint must not return until the cache hydration it triggers has completed"
        );
        assert_eq!(state.last_updated, Some(999));
    }

    #[tokio::test]
    async fn invalidate_removes_the_persisted_cache_entry() {
        use crate::types::prefixed_key;

        let (core, _events) = manual_core();
        core.define_endpoint::<i32, _, _, TestError>("persisted", || async { Ok(5) })
            .await;
        core.refetch("persisted").await;

        let cache = core.inner.cache_for(CacheProviderKind::Memory);
        assert!(cache.get(&prefixed_key("persisted")).await.is_some());

        core.invalidate("persisted").await;
        assert!(cache.get(&prefixed_key("persisted")).await.is_none());
    }

    #[tokio::test]
    async fn online_event_refetches_observed_endpoints() {
        let (core, events) = manual_core();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        core.define_endpoint::<i32, _, _, TestError>("observed", move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        })
        .await;

        let _sub = core.subscribe::<i32>("observed", Arc::new(|_| {})).unwrap();
        core.refetch("observed").await;
        let before = calls.load(Ordering::SeqCst);

        events.fire_online();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(calls.load(Ordering::SeqCst) > before);
    }
}
