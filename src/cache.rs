//! Cache providers.
//!
//! A [`CacheProvider`] is the persistence boundary an [`crate::EndpointRecord`]
//! hydrates from and writes through to. Every method is infallible at the
//! trait boundary: a provider that hits a real failure (a poisoned lock, a
//! browser API throwing) logs it via `tracing` and behaves as though the
//! entry were absent, per the "cache access never panics, never blocks
//! indefinitely, never surfaces an error to the caller" contract.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{CacheProviderKind, CachedRecord};

/// Read/write/delete access to a single namespaced key/value store.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn get(&self, key: &str) -> Option<CachedRecord>;
    async fn set(&self, key: &str, record: CachedRecord);
    async fn remove(&self, key: &str);
}

/// Resolve a [`CacheProviderKind`] to a concrete provider instance.
///
/// `LocalKv` and `ObjectStore` require wasm32 plus their Cargo feature; on any
/// other configuration they fall back to [`MemoryCacheProvider`] and log a
/// warning, rather than failing `QueryCore::new` outright.
pub(crate) fn resolve_provider(kind: CacheProviderKind) -> std::sync::Arc<dyn CacheProvider> {
    match kind {
        CacheProviderKind::Memory => std::sync::Arc::new(MemoryCacheProvider::new()),
        CacheProviderKind::LocalKv => local_kv_provider(),
        CacheProviderKind::ObjectStore => object_store_provider(),
    }
}

#[cfg(all(target_family = "wasm", feature = "local-kv"))]
fn local_kv_provider() -> std::sync::Arc<dyn CacheProvider> {
    std::sync::Arc::new(local_kv::LocalKvCacheProvider::new())
}

#[cfg(not(all(target_family = "wasm", feature = "local-kv")))]
fn local_kv_provider() -> std::sync::Arc<dyn CacheProvider> {
    tracing::warn!("local-kv cache provider requested but unavailable on this target/feature set, falling back to in-memory cache");
    std::sync::Arc::new(MemoryCacheProvider::new())
}

#[cfg(all(target_family = "wasm", feature = "object-store"))]
fn object_store_provider() -> std::sync::Arc<dyn CacheProvider> {
    std::sync::Arc::new(object_store::ObjectStoreCacheProvider::new())
}

#[cfg(not(all(target_family = "wasm", feature = "object-store")))]
fn object_store_provider() -> std::sync::Arc<dyn CacheProvider> {
    tracing::warn!("object-store cache provider requested but unavailable on this target/feature set, falling back to in-memory cache");
    std::sync::Arc::new(MemoryCacheProvider::new())
}

/// Non-persistent, in-process cache backed by a `Mutex<HashMap<..>>`.
///
/// Used as the default provider and as the universal fallback for the
/// browser-only providers when they are unavailable.
#[derive(Default)]
pub struct MemoryCacheProvider {
    entries: Mutex<HashMap<String, CachedRecord>>,
}

impl MemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn get(&self, key: &str) -> Option<CachedRecord> {
        match self.entries.lock() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => {
                tracing::warn!(key, "memory cache lock poisoned on get, treating as miss");
                poisoned.into_inner().get(key).cloned()
            }
        }
    }

    async fn set(&self, key: &str, record: CachedRecord) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), record);
            }
            Err(poisoned) => {
                tracing::warn!(key, "memory cache lock poisoned on set, recovering");
                poisoned.into_inner().insert(key.to_string(), record);
            }
        }
    }

    async fn remove(&self, key: &str) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.remove(key);
            }
            Err(poisoned) => {
                tracing::warn!(key, "memory cache lock poisoned on remove, recovering");
                poisoned.into_inner().remove(key);
            }
        }
    }
}

/// Browser `localStorage`-backed provider.
///
/// `localStorage` access is synchronous; the `async` methods here exist only
/// to satisfy the uniform [`CacheProvider`] contract.
#[cfg(all(target_family = "wasm", feature = "local-kv"))]
mod local_kv {
    use super::*;
    use crate::errors::CoreError;

    /// Stateless handle: every call fetches `window().local_storage()` fresh,
    /// so this type holds nothing non-`Send` across an `.await` point.
    #[derive(Default)]
    pub struct LocalKvCacheProvider;

    impl LocalKvCacheProvider {
        pub fn new() -> Self {
            Self
        }

        fn storage(&self) -> Result<web_sys::Storage, CoreError> {
            web_sys::window()
                .and_then(|w| w.local_storage().ok().flatten())
                .ok_or_else(|| CoreError::CacheUnavailable {
                    key: String::new(),
                    message: "window.localStorage is unavailable".into(),
                })
        }
    }

    #[async_trait]
    impl CacheProvider for LocalKvCacheProvider {
        async fn get(&self, key: &str) -> Option<CachedRecord> {
            let storage = match self.storage() {
                Ok(storage) => storage,
                Err(err) => {
                    tracing::warn!(key, %err, "local-kv unavailable on get");
                    return None;
                }
            };
            let raw = storage.get_item(key).ok().flatten()?;
            match serde_json::from_str::<CachedRecord>(&raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(key, %err, "local-kv entry failed to deserialize, treating as miss");
                    None
                }
            }
        }

        async fn set(&self, key: &str, record: CachedRecord) {
            let storage = match self.storage() {
                Ok(storage) => storage,
                Err(err) => {
                    tracing::warn!(key, %err, "local-kv unavailable on set");
                    return;
                }
            };
            match serde_json::to_string(&record) {
                Ok(raw) => {
                    if storage.set_item(key, &raw).is_err() {
                        tracing::warn!(key, "local-kv set_item threw (quota exceeded?)");
                    }
                }
                Err(err) => tracing::warn!(key, %err, "failed to serialize cached record"),
            }
        }

        async fn remove(&self, key: &str) {
            if let Ok(storage) = self.storage() {
                let _ = storage.remove_item(key);
            }
        }
    }
}

/// Browser IndexedDB-backed provider for larger or structured payloads.
#[cfg(all(target_family = "wasm", feature = "object-store"))]
mod object_store {
    use super::*;
    use js_sys::{Object, Reflect, Uint8Array};
    use send_wrapper::SendWrapper;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;
    use wasm_bindgen::{closure::Closure, JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{IdbDatabase, IdbObjectStoreParameters, IdbOpenDbRequest, IdbTransactionMode};

    const DB_NAME: &str = "query_core_cache";
    const STORE_NAME: &str = "entries";
    const DB_VERSION: u32 = 1;

    /// Lazily-opened IndexedDB handle, memoized behind an async mutex.
    ///
    /// `IdbDatabase` is a JS-interop type and therefore `!Send`; the whole
    /// crate's scheduling model is single-threaded cooperative (wasm has no
    /// real OS threads here), so we wrap it in `SendWrapper` to satisfy the
    /// `CacheProvider: Send + Sync` bound. `SendWrapper` panics if it is ever
    /// actually touched from a different thread than the one it was created
    /// on, which can't happen on wasm32.
    pub struct ObjectStoreCacheProvider {
        db: Arc<AsyncMutex<Option<SendWrapper<IdbDatabase>>>>,
    }

    impl ObjectStoreCacheProvider {
        pub fn new() -> Self {
            Self {
                db: Arc::new(AsyncMutex::new(None)),
            }
        }

        async fn get_db(&self) -> Result<IdbDatabase, JsValue> {
            let mut guard = self.db.lock().await;
            if let Some(wrapped) = guard.as_ref() {
                return Ok(wrapped.clone());
            }
            let db = SendWrapper::new(open_database().await?);
            let handle = db.clone();
            *guard = Some(db);
            Ok(handle)
        }
    }

    async fn open_database() -> Result<IdbDatabase, JsValue> {
        let factory = web_sys::window()
            .and_then(|w| w.indexed_db().ok().flatten())
            .ok_or_else(|| JsValue::from_str("indexedDB is unavailable"))?;
        let open_request: IdbOpenDbRequest = factory.open_with_u32(DB_NAME, DB_VERSION)?;

        let upgrade_request = open_request.clone();
        let on_upgrade = Closure::once(move |_event: web_sys::Event| {
            let db: IdbDatabase = upgrade_request.result().unwrap().unchecked_into();
            if !db.object_store_names().contains(STORE_NAME) {
                let mut params = IdbObjectStoreParameters::new();
                params.key_path(Some(&JsValue::from_str("key")));
                let _ = db.create_object_store_with_optional_parameters(STORE_NAME, &params);
            }
        });
        open_request.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
        on_upgrade.forget();

        let result = SendWrapper::new(open_request_to_promise(open_request)).await?;
        Ok(result.unchecked_into())
    }

    fn open_request_to_promise(request: IdbOpenDbRequest) -> js_sys::Promise {
        js_sys::Promise::new(&mut |resolve, reject| {
            let done_request = request.clone();
            let on_success = Closure::once(move |_: web_sys::Event| {
                let _ = resolve.call1(&JsValue::NULL, &done_request.result().unwrap());
            });
            let err_request = request.clone();
            let on_error = Closure::once(move |_: web_sys::Event| {
                let _ = reject.call1(&JsValue::NULL, &err_request.error().unwrap().into());
            });
            request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
            request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
            on_success.forget();
            on_error.forget();
        })
    }

    fn request_to_promise(request: &web_sys::IdbRequest) -> js_sys::Promise {
        js_sys::Promise::new(&mut |resolve, reject| {
            let done_request = request.clone();
            let on_success = Closure::once(move |_: web_sys::Event| {
                let _ = resolve.call1(&JsValue::NULL, &done_request.result().unwrap());
            });
            let err_request = request.clone();
            let on_error = Closure::once(move |_: web_sys::Event| {
                let _ = reject.call1(&JsValue::NULL, &err_request.error().unwrap().into());
            });
            request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
            request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
            on_success.forget();
            on_error.forget();
        })
    }

    fn record_to_js(key: &str, record: &CachedRecord) -> Result<JsValue, JsValue> {
        let bytes = serde_json::to_vec(record)
            .map_err(|err| JsValue::from_str(&format!("serialize failed: {err}")))?;
        let array = Uint8Array::from(bytes.as_slice());
        let object = Object::new();
        Reflect::set(&object, &"key".into(), &JsValue::from_str(key))?;
        Reflect::set(&object, &"value".into(), &array)?;
        Ok(object.into())
    }

    fn record_from_js(value: JsValue) -> Option<CachedRecord> {
        let array: Uint8Array = Reflect::get(&value, &"value".into()).ok()?.unchecked_into();
        let bytes = array.to_vec();
        serde_json::from_slice(&bytes).ok()
    }

    #[async_trait]
    impl CacheProvider for ObjectStoreCacheProvider {
        async fn get(&self, key: &str) -> Option<CachedRecord> {
            let db = match self.get_db().await {
                Ok(db) => db,
                Err(_) => {
                    tracing::warn!(key, "indexeddb unavailable on get");
                    return None;
                }
            };
            let transaction = db
                .transaction_with_str_and_mode(STORE_NAME, IdbTransactionMode::Readonly)
                .ok()?;
            let store = transaction.object_store(STORE_NAME).ok()?;
            let request = store.get(&JsValue::from_str(key)).ok()?;
            let value = SendWrapper::new(JsFuture::from(request_to_promise(&request)))
                .await
                .ok()?;
            if value.is_undefined() {
                return None;
            }
            record_from_js(value)
        }

        async fn set(&self, key: &str, record: CachedRecord) {
            let db = match self.get_db().await {
                Ok(db) => db,
                Err(_) => {
                    tracing::warn!(key, "indexeddb unavailable on set");
                    return;
                }
            };
            let Ok(transaction) =
                db.transaction_with_str_and_mode(STORE_NAME, IdbTransactionMode::Readwrite)
            else {
                return;
            };
            let Ok(store) = transaction.object_store(STORE_NAME) else {
                return;
            };
            let Ok(js_record) = record_to_js(key, &record) else {
                return;
            };
            if let Ok(request) = store.put(&js_record) {
                let _ = SendWrapper::new(JsFuture::from(request_to_promise(&request))).await;
            }
        }

        async fn remove(&self, key: &str) {
            let Ok(db) = self.get_db().await else {
                return;
            };
            let Ok(transaction) =
                db.transaction_with_str_and_mode(STORE_NAME, IdbTransactionMode::Readwrite)
            else {
                return;
            };
            let Ok(store) = transaction.object_store(STORE_NAME) else {
                return;
            };
            if let Ok(request) = store.delete(&JsValue::from_str(key)) {
                let _ = SendWrapper::new(JsFuture::from(request_to_promise(&request))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_round_trips() {
        let provider = MemoryCacheProvider::new();
        assert!(provider.get("a").await.is_none());

        let record = CachedRecord {
            data: serde_json::json!({"n": 1}),
            last_updated: 42,
        };
        provider.set("a", record.clone()).await;
        let fetched = provider.get("a").await.unwrap();
        assert_eq!(fetched.last_updated, 42);

        provider.remove("a").await;
        assert!(provider.get("a").await.is_none());
    }

    #[tokio::test]
    async fn resolve_provider_defaults_to_memory_on_native() {
        let provider = resolve_provider(CacheProviderKind::Memory);
        assert!(provider.get("missing").await.is_none());
    }
}
