//! Concurrent `refetch` calls against the same endpoint must coalesce into a
//! single production, with every caller observing the same outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use query_core::{CoreOptions, EndpointState, QueryCore};

mod common;

#[derive(Debug, thiserror::Error)]
#[error("producer failed")]
struct TestError;

#[tokio::test]
async fn three_concurrent_refetches_invoke_the_producer_once() {
    common::init_tracing();
    let core = QueryCore::new(CoreOptions::new());
    let invocations = Arc::new(AtomicUsize::new(0));

    let invocations_clone = invocations.clone();
    core.define_endpoint::<i32, _, _, TestError>("slow", move || {
        let invocations = invocations_clone.clone();
        async move {
            invocations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(40)).await;
            Ok(99)
        }
    })
    .await;

    let notifications = Arc::new(std::sync::Mutex::new(Vec::new()));
    let notifications_clone = notifications.clone();
    let _sub = core
        .subscribe::<i32>(
            "slow",
            Arc::new(move |state: EndpointState<i32>| {
                notifications_clone.lock().unwrap().push(state);
            }),
        )
        .unwrap();

    let (a, b, c) = tokio::join!(core.refetch("slow"), core.refetch("slow"), core.refetch("slow"));
    let _ = (a, b, c);

    assert_eq!(
        invocations.load(Ordering::SeqCst),
        1,
        "producer must run exactly once for three coalesced callers"
    );

    let state = core.get_state::<i32>("slow").unwrap();
    assert_eq!(state.data, Some(99));
    assert!(!state.is_loading);

    let seen = notifications.lock().unwrap();
    let loading_count = seen.iter().filter(|s| s.is_loading).count();
    let success_count = seen
        .iter()
        .filter(|s| !s.is_loading && s.data == Some(99))
        .count();
    assert_eq!(loading_count, 1, "exactly one loading notification expected");
    assert_eq!(success_count, 1, "exactly one completion notification expected");
}

#[tokio::test]
async fn refetch_on_unknown_key_is_a_no_op() {
    common::init_tracing();
    let core = QueryCore::new(CoreOptions::new());
    core.refetch("never-defined").await;
    assert!(core.get_state::<i32>("never-defined").is_none());
}
