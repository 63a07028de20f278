#![doc = include_str!("../README.md")]

pub mod cache;
pub mod errors;
pub mod events;
pub mod platform;
mod record;
mod registry;
mod subscription;
pub mod types;

pub use cache::{CacheProvider, MemoryCacheProvider};
pub use errors::{CoreError, ProducerError};
pub use events::{EventCallback, EventSource, EventSubscription, ManualEventSource, NullEventSource};
pub use registry::QueryCore;
pub use subscription::{Listener, Unsubscribe};
pub use types::{CacheProviderKind, CoreOptions, EndpointOptions, EndpointState};

#[cfg(target_family = "wasm")]
pub use events::browser::BrowserEventSource;
