//! Focus/visibility refreshes only stale *observed* endpoints; online
//! refreshes every observed endpoint unconditionally; endpoints with no
//! subscriber are never touched by either signal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use query_core::{CoreOptions, EndpointOptions, EventSource, ManualEventSource, QueryCore};

mod common;

#[derive(Debug, thiserror::Error)]
#[error("producer failed")]
struct TestError;

async fn counting_endpoint(
    core: &QueryCore,
    key: &'static str,
    refetch_after: Option<Duration>,
) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let mut options = EndpointOptions::new();
    if let Some(refetch_after) = refetch_after {
        options = options.with_refetch_after(refetch_after);
    }
    core.define_endpoint_with_options::<i32, _, _, TestError>(
        key,
        move || {
            let calls = calls_clone.clone();
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as i32) }
        },
        options,
    )
    .await;
    calls
}

#[tokio::test]
async fn visibility_event_refreshes_only_stale_observed_endpoints() {
    common::init_tracing();
    let events = Arc::new(ManualEventSource::new());
    let core = QueryCore::with_event_source(CoreOptions::new(), events.clone() as Arc<dyn EventSource>);

    let fresh_calls = counting_endpoint(&core, "fresh", Some(Duration::from_secs(10))).await;
    let stale_calls = counting_endpoint(&core, "stale", Some(Duration::from_millis(50))).await;

    core.refetch("fresh").await;
    core.refetch("stale").await;

    let _fresh_sub = core.subscribe::<i32>("fresh", Arc::new(|_| {})).unwrap();
    let _stale_sub = core.subscribe::<i32>("stale", Arc::new(|_| {})).unwrap();

    // Let the just-taken subscriptions settle before moving the clock.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let fresh_before = fresh_calls.load(Ordering::SeqCst);
    let stale_before = stale_calls.load(Ordering::SeqCst);

    // Push past `stale`'s refetch_after but well short of `fresh`'s.
    tokio::time::sleep(Duration::from_millis(100)).await;

    events.fire_visible();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        fresh_calls.load(Ordering::SeqCst),
        fresh_before,
        "endpoint within its refetch_after window must not refresh on focus"
    );
    assert_eq!(
        stale_calls.load(Ordering::SeqCst),
        stale_before + 1,
        "stale observed endpoint must refresh exactly once on focus"
    );
}

#[tokio::test]
async fn online_event_refreshes_every_observed_endpoint_regardless_of_staleness() {
    common::init_tracing();
    let events = Arc::new(ManualEventSource::new());
    let core = QueryCore::with_event_source(CoreOptions::new(), events.clone() as Arc<dyn EventSource>);

    // No refetch_after at all: focus would never touch this, online must anyway.
    let calls = counting_endpoint(&core, "no-staleness-policy", None).await;
    core.refetch("no-staleness-policy").await;
    let _sub = core
        .subscribe::<i32>("no-staleness-policy", Arc::new(|_| {}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = calls.load(Ordering::SeqCst);

    events.fire_online();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), before + 1);
}

#[tokio::test]
async fn unobserved_endpoints_are_never_refreshed_by_background_events() {
    common::init_tracing();
    let events = Arc::new(ManualEventSource::new());
    let core = QueryCore::with_event_source(CoreOptions::new(), events.clone() as Arc<dyn EventSource>);

    let calls = counting_endpoint(&core, "unobserved", Some(Duration::from_millis(1))).await;
    core.refetch("unobserved").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = calls.load(Ordering::SeqCst);

    events.fire_visible();
    events.fire_online();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        calls.load(Ordering::SeqCst),
        before,
        "an endpoint with no subscriber must never be auto-refreshed"
    );
}
