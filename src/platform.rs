//! # Cross-Platform Abstractions
//!
//! Unified time and task-spawning primitives so the rest of the crate does not
//! need `cfg(target_family = "wasm")` sprinkled through its logic.

use std::future::Future;
use std::time::Duration;

#[cfg(not(target_family = "wasm"))]
use std::time::{SystemTime, UNIX_EPOCH};
#[cfg(target_family = "wasm")]
use web_time::{SystemTime, UNIX_EPOCH};

#[cfg(not(target_family = "wasm"))]
use tokio::time::sleep as tokio_sleep;
#[cfg(target_family = "wasm")]
use wasmtimer::tokio::sleep as wasm_sleep;

/// Cross-platform time utilities.
pub mod time {
    use super::*;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    ///
    /// This is the unit `lastUpdated` is expressed in throughout the crate.
    pub fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Sleep for the given duration, on whichever runtime the target provides.
    pub async fn sleep(duration: Duration) {
        #[cfg(not(target_family = "wasm"))]
        tokio_sleep(duration).await;
        #[cfg(target_family = "wasm")]
        wasm_sleep(duration).await;
    }
}

/// Cross-platform task spawning.
///
/// Non-wasm targets run on a Tokio runtime (the crate assumes the caller has
/// one active, as is conventional for async Rust libraries). Wasm targets use
/// `wasm-bindgen-futures`' single-threaded local spawner.
pub mod task {
    use super::*;

    /// Spawn a detached unit-returning task.
    ///
    /// Used to drive coalesced productions and background refresh triggers to
    /// completion independently of whether the original caller keeps polling
    /// the future it was handed back.
    pub fn spawn<F>(future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        #[cfg(not(target_family = "wasm"))]
        {
            tokio::spawn(future);
        }
        #[cfg(target_family = "wasm")]
        {
            wasm_bindgen_futures::spawn_local(future);
        }
    }
}

pub use task::spawn;
pub use time::{now_millis, sleep};
