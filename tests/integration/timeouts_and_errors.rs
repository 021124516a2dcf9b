//! Per-call timeouts, late responses, handler failures, and close-path
//! error semantics between two live endpoints.
//!
//! Uses paused Tokio time: the sleeps auto-advance, so the multi-second
//! scenarios run instantly and deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use wc_endpoint::{EndpointConfig, MessageHandler, SendError, handler};
use wc_test_utils::{connected_pair, echo_handler, failing_handler};

fn config(label: &str) -> EndpointConfig {
    EndpointConfig::with_label(label)
}

/// Handler that sleeps on its first call only, then echoes everything.
fn slow_first_call_handler(delay: Duration) -> MessageHandler {
    let first = Arc::new(AtomicBool::new(true));
    handler(move |message| {
        let first = first.clone();
        async move {
            if first.swap(false, Ordering::Relaxed) {
                tokio::time::sleep(delay).await;
            }
            Ok(message)
        }
    })
}

// ---------------------------------------------------------------------------
// Test: per-call timeout, then the late response is silently ignored.
// ---------------------------------------------------------------------------

/// A's call times out while B's handler is still sleeping. When B's
/// response finally lands, A must ignore it and keep working: the next
/// round trip succeeds.
#[tokio::test(start_paused = true)]
async fn timeout_then_late_response_is_ignored() {
    let (a, b) = connected_pair(
        echo_handler(),
        config("a"),
        slow_first_call_handler(Duration::from_secs(1)),
        config("b"),
    );

    let err = a
        .endpoint
        .send_message_with_timeout(b"slow".to_vec(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::TimedOut));
    assert!(err.is_communication());

    // Outlive B's handler so its RESPONSE actually arrives at A.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!a.endpoint.is_closing(), "late response must not hurt A");
    let response = a.endpoint.send_message(b"again".to_vec()).await.unwrap();
    assert_eq!(response, b"again");

    a.shutdown().await;
    b.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: handler failure produces no response and no teardown.
// ---------------------------------------------------------------------------

/// B's handler fails on every message: A's call times out (no response was
/// ever sent) and B keeps serving: its own outbound call still works.
#[tokio::test(start_paused = true)]
async fn handler_failure_is_logged_not_fatal() {
    let (a, b) = connected_pair(
        echo_handler(),
        config("a"),
        failing_handler(),
        config("b"),
    );

    let err = a
        .endpoint
        .send_message_with_timeout(b"doomed".to_vec(), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::TimedOut));

    assert!(!b.endpoint.is_closing(), "handler failure must not close B");
    let response = b.endpoint.send_message(b"ping".to_vec()).await.unwrap();
    assert_eq!(response, b"ping");

    a.shutdown().await;
    b.shutdown().await;
}

/// A failing handler never emits a RESPONSE packet: two calls, two
/// timeouts, and the handler saw both messages.
#[tokio::test(start_paused = true)]
async fn failing_handler_never_responds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counting_failure = {
        let calls = calls.clone();
        handler(move |_message: Vec<u8>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err("nope".into())
            }
        })
    };
    let (a, b) = connected_pair(echo_handler(), config("a"), counting_failure, config("b"));

    for _ in 0..2 {
        let err = a
            .endpoint
            .send_message_with_timeout(b"x".to_vec(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::TimedOut));
    }
    assert_eq!(calls.load(Ordering::Relaxed), 2);

    a.shutdown().await;
    b.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: oversize rejection mutates nothing.
// ---------------------------------------------------------------------------

/// An oversize send is rejected synchronously and the endpoint carries on
/// exactly as before.
#[tokio::test(start_paused = true)]
async fn oversize_send_leaves_endpoint_usable() {
    let (a, b) = connected_pair(echo_handler(), config("a"), echo_handler(), config("b"));

    let err = a
        .endpoint
        .send_message(vec![0u8; 65536])
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::OversizeMessage(65536)));
    assert!(!err.is_communication());
    assert!(!a.endpoint.is_closing());

    let response = a.endpoint.send_message(b"fine".to_vec()).await.unwrap();
    assert_eq!(response, b"fine");

    a.shutdown().await;
    b.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: close semantics.
// ---------------------------------------------------------------------------

/// Closing while a call is in flight cancels it with a communication
/// error; the peer's eventual response has nowhere to go and that's fine.
#[tokio::test(start_paused = true)]
async fn close_cancels_in_flight_calls() {
    let (a, b) = connected_pair(
        echo_handler(),
        config("a"),
        slow_first_call_handler(Duration::from_secs(5)),
        config("b"),
    );

    let endpoint = a.endpoint.clone();
    let call = tokio::spawn(async move { endpoint.send_message(b"stuck".to_vec()).await });

    // Let the call get its packet out before pulling the plug.
    tokio::time::sleep(Duration::from_millis(20)).await;
    a.endpoint.close();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, SendError::Cancelled | SendError::Closed));
    assert!(err.is_communication());

    a.endpoint.wait_closed().await;
    let _ = a.driver.await;
    b.shutdown().await;
}

/// After close, sends fail immediately with the closed error.
#[tokio::test(start_paused = true)]
async fn send_after_close_is_rejected() {
    let (a, b) = connected_pair(echo_handler(), config("a"), echo_handler(), config("b"));

    a.endpoint.close();
    let err = a.endpoint.send_message(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, SendError::Closed));

    a.endpoint.wait_closed().await;
    let _ = a.driver.await;
    b.shutdown().await;
}

/// One side closing surfaces on the other side as a dead connection, not a
/// hang: the peer's endpoint finishes on its own.
#[tokio::test(start_paused = true)]
async fn peer_close_terminates_other_side() {
    let (a, b) = connected_pair(echo_handler(), config("a"), echo_handler(), config("b"));

    // A round trip first, so both handshakes are done.
    a.endpoint.send_message(b"hi".to_vec()).await.unwrap();

    a.shutdown().await;

    // B's reader sees EOF and B tears itself down.
    b.driver.await.unwrap();
    assert!(b.endpoint.is_closing());
}
