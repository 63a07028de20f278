//! Event sources driving the stale-on-focus/stale-on-online refresh policy.
//!
//! The refresh orchestrator never polls on a timer; it reacts to external
//! signals delivered through an [`EventSource`]. Production code uses
//! [`BrowserEventSource`] (wasm32 only) wired to `visibilitychange`,
//! `focus`, and `online` DOM events. Tests inject a [`ManualEventSource`] and
//! fire events explicitly, keeping refresh behavior deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A callback registered against one of an [`EventSource`]'s signals.
pub type EventCallback = Arc<dyn Fn() + Send + Sync>;

/// Source of the three external signals the refresh orchestrator reacts to.
///
/// Implementations must be safe to register callbacks against from multiple
/// `QueryCore` instances concurrently; callbacks are only ever removed via
/// the returned [`EventSubscription`]'s `Drop`, so registration must be
/// idempotent with respect to however many times it is called.
pub trait EventSource: Send + Sync {
    /// The document (or equivalent) became visible again.
    fn on_visible(&self, callback: EventCallback) -> EventSubscription;
    /// The window (or equivalent) regained focus.
    fn on_focus(&self, callback: EventCallback) -> EventSubscription;
    /// Network connectivity was (re)established.
    fn on_online(&self, callback: EventCallback) -> EventSubscription;
}

/// Guard that deregisters a callback when dropped.
pub struct EventSubscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    fn noop() -> Self {
        Self { remove: None }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

#[derive(Default)]
struct CallbackRegistry {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, EventCallback>>,
}

impl CallbackRegistry {
    fn register(self: &Arc<Self>, callback: EventCallback) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.insert(id, callback);
        }
        let registry = Arc::clone(self);
        EventSubscription::new(move || {
            if let Ok(mut callbacks) = registry.callbacks.lock() {
                callbacks.remove(&id);
            }
        })
    }

    fn fire(&self) {
        let callbacks: Vec<EventCallback> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for callback in callbacks {
            callback();
        }
    }
}

/// Test and non-browser event source: signals are fired explicitly by the
/// holder rather than derived from real OS/DOM events.
#[derive(Default)]
pub struct ManualEventSource {
    visible: Arc<CallbackRegistry>,
    focus: Arc<CallbackRegistry>,
    online: Arc<CallbackRegistry>,
}

impl ManualEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire_visible(&self) {
        self.visible.fire();
    }

    pub fn fire_focus(&self) {
        self.focus.fire();
    }

    pub fn fire_online(&self) {
        self.online.fire();
    }
}

impl EventSource for ManualEventSource {
    fn on_visible(&self, callback: EventCallback) -> EventSubscription {
        self.visible.register(callback)
    }

    fn on_focus(&self, callback: EventCallback) -> EventSubscription {
        self.focus.register(callback)
    }

    fn on_online(&self, callback: EventCallback) -> EventSubscription {
        self.online.register(callback)
    }
}

/// Event source with no signals at all, for environments (and tests) that
/// want the refresh orchestrator permanently quiescent.
#[derive(Default)]
pub struct NullEventSource;

impl EventSource for NullEventSource {
    fn on_visible(&self, _callback: EventCallback) -> EventSubscription {
        EventSubscription::noop()
    }

    fn on_focus(&self, _callback: EventCallback) -> EventSubscription {
        EventSubscription::noop()
    }

    fn on_online(&self, _callback: EventCallback) -> EventSubscription {
        EventSubscription::noop()
    }
}

/// `document`/`window`-backed event source, installing a single set of DOM
/// listeners lazily on first use and fanning them out to every registered
/// callback. Mirrors the global-singleton idiom used elsewhere in this crate
/// for cross-instance shared resources.
#[cfg(target_family = "wasm")]
pub mod browser {
    use super::*;
    use std::sync::OnceLock;
    use wasm_bindgen::{closure::Closure, JsCast};

    pub struct BrowserEventSource {
        visible: Arc<CallbackRegistry>,
        focus: Arc<CallbackRegistry>,
        online: Arc<CallbackRegistry>,
    }

    impl BrowserEventSource {
        fn install() -> Arc<Self> {
            let source = Arc::new(Self {
                visible: Arc::new(CallbackRegistry::default()),
                focus: Arc::new(CallbackRegistry::default()),
                online: Arc::new(CallbackRegistry::default()),
            });

            if let Some(window) = web_sys::window() {
                if let Some(document) = window.document() {
                    let visible = Arc::clone(&source.visible);
                    let on_visibility = Closure::<dyn Fn()>::new(move || {
                        if let Some(window) = web_sys::window() {
                            if let Some(document) = window.document() {
                                if document.visibility_state() == web_sys::VisibilityState::Visible
                                {
                                    visible.fire();
                                }
                            }
                        }
                    });
                    let _ = document.add_event_listener_with_callback(
                        "visibilitychange",
                        on_visibility.as_ref().unchecked_ref(),
                    );
                    on_visibility.forget();
                }

                let focus = Arc::clone(&source.focus);
                let on_focus = Closure::<dyn Fn()>::new(move || focus.fire());
                let _ = window
                    .add_event_listener_with_callback("focus", on_focus.as_ref().unchecked_ref());
                on_focus.forget();

                let online = Arc::clone(&source.online);
                let on_online = Closure::<dyn Fn()>::new(move || online.fire());
                let _ = window.add_event_listener_with_callback(
                    "online",
                    on_online.as_ref().unchecked_ref(),
                );
                on_online.forget();
            }

            source
        }

        /// Process-wide shared instance: DOM listeners are installed exactly
        /// once regardless of how many `QueryCore`s register against it.
        pub fn shared() -> Arc<Self> {
            static INSTANCE: OnceLock<Arc<BrowserEventSource>> = OnceLock::new();
            INSTANCE.get_or_init(Self::install).clone()
        }
    }

    impl EventSource for BrowserEventSource {
        fn on_visible(&self, callback: EventCallback) -> EventSubscription {
            self.visible.register(callback)
        }

        fn on_focus(&self, callback: EventCallback) -> EventSubscription {
            self.focus.register(callback)
        }

        fn on_online(&self, callback: EventCallback) -> EventSubscription {
            self.online.register(callback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn manual_source_fires_registered_callbacks() {
        let source = ManualEventSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _sub = source.on_focus(Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        source.fire_focus();
        source.fire_visible();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let source = ManualEventSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let sub = source.on_online(Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        source.fire_online();
        drop(sub);
        source.fire_online();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
