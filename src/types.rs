//! Shared data types: endpoint state, configuration, and the cached-record
//! envelope persisted through a [`crate::cache::CacheProvider`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ProducerError;

/// Prefix applied to every endpoint key before it reaches a cache provider,
/// so the core's entries are identifiable (and namespaced away from
/// unrelated data) inside a shared `localStorage`/IndexedDB origin.
pub const CACHE_KEY_PREFIX: &str = "QueryCore_";

pub(crate) fn prefixed_key(key: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{key}")
}

/// Selects which [`crate::cache::CacheProvider`] backs an endpoint.
///
/// `LocalKv` and `ObjectStore` are only available on wasm32 targets, behind
/// the `local-kv` and `object-store` Cargo features respectively; selecting
/// them on a native target resolves back to [`CacheProviderKind::Memory`]
/// (see [`crate::cache::resolve_provider`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheProviderKind {
    /// In-process, non-persistent `HashMap`. Always available.
    #[default]
    Memory,
    /// Synchronous browser `localStorage`, wrapped in the async contract.
    LocalKv,
    /// Asynchronous browser IndexedDB object store.
    ObjectStore,
}

/// Core-wide defaults, overridable per endpoint via [`EndpointOptions`].
#[derive(Clone, Debug, Default)]
pub struct CoreOptions {
    pub(crate) cache_provider: CacheProviderKind,
    pub(crate) default_refetch_after: Option<Duration>,
}

impl CoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache provider new endpoints use unless they override it.
    pub fn with_cache_provider(mut self, kind: CacheProviderKind) -> Self {
        self.cache_provider = kind;
        self
    }

    /// Set the default staleness window applied to endpoints that don't
    /// specify their own `refetch_after`.
    pub fn with_default_refetch_after(mut self, duration: Duration) -> Self {
        self.default_refetch_after = Some(duration);
        self
    }
}

/// Per-endpoint overrides of the core-wide [`CoreOptions`].
#[derive(Clone, Debug, Default)]
pub struct EndpointOptions {
    pub(crate) cache_provider: Option<CacheProviderKind>,
    pub(crate) refetch_after: Option<Duration>,
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_provider(mut self, kind: CacheProviderKind) -> Self {
        self.cache_provider = Some(kind);
        self
    }

    /// How long cached data may stand before a focus/online event is allowed
    /// to trigger a silent refetch. `None` means this endpoint is never
    /// refreshed by focus/online events (but can still be refetched
    /// explicitly).
    pub fn with_refetch_after(mut self, duration: Duration) -> Self {
        self.refetch_after = Some(duration);
        self
    }
}

#[derive(Clone, Copy)]
pub(crate) struct ResolvedOptions {
    pub cache_provider: CacheProviderKind,
    pub refetch_after: Option<Duration>,
}

pub(crate) fn merge_options(core: &CoreOptions, endpoint: &EndpointOptions) -> ResolvedOptions {
    ResolvedOptions {
        cache_provider: endpoint.cache_provider.unwrap_or(core.cache_provider),
        refetch_after: endpoint.refetch_after.or(core.default_refetch_after),
    }
}

/// The full observable state of a single endpoint at a point in time.
///
/// A snapshot of this type is handed to every subscriber whenever any field
/// changes. `data` and `error` are independent: a failed refetch keeps
/// whatever `data` was last good, per the "errors never clobber prior data"
/// invariant.
#[derive(Clone, Debug)]
pub struct EndpointState<T> {
    pub data: Option<T>,
    /// Milliseconds since the Unix epoch when `data` was last produced
    /// successfully (hydration from cache counts).
    pub last_updated: Option<u64>,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<ProducerError>,
}

impl<T> Default for EndpointState<T> {
    fn default() -> Self {
        Self {
            data: None,
            last_updated: None,
            is_loading: false,
            is_error: false,
            error: None,
        }
    }
}

impl<T: Clone> EndpointState<T> {
    pub(crate) fn loading_from(previous: &Self) -> Self {
        Self {
            data: previous.data.clone(),
            last_updated: previous.last_updated,
            is_loading: true,
            is_error: false,
            error: None,
        }
    }

    pub(crate) fn succeeded(data: T, last_updated: u64) -> Self {
        Self {
            data: Some(data),
            last_updated: Some(last_updated),
            is_loading: false,
            is_error: false,
            error: None,
        }
    }

    pub(crate) fn failed_from(previous: &Self, error: ProducerError) -> Self {
        Self {
            data: previous.data.clone(),
            last_updated: previous.last_updated,
            is_loading: false,
            is_error: true,
            error: Some(error),
        }
    }

    pub(crate) fn hydrated(data: T, last_updated: u64) -> Self {
        Self {
            data: Some(data),
            last_updated: Some(last_updated),
            is_loading: false,
            is_error: false,
            error: None,
        }
    }
}

/// The envelope persisted through a [`crate::cache::CacheProvider`].
///
/// Stored as `serde_json::Value` rather than `T` directly so a single cache
/// provider implementation can serve every endpoint's concrete type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct CachedRecord {
    pub data: serde_json::Value,
    pub last_updated: u64,
}
