//! Keepalive traffic and staleness teardown, on paused Tokio time with the
//! production intervals (10.73 s keepalive, 30 s timeout).
//!
//! # Scenarios
//! 1. Idle connection with keepalives flowing: stays up indefinitely.
//! 2. Both sides suppress keepalives: both terminate after the 30 s window.
//! 3. One side suppresses: the other side times out first, which then tears
//!    down the suppressing side via the dead connection.

use std::time::Duration;
use wc_endpoint::EndpointConfig;
use wc_test_utils::{connected_pair, echo_handler};

fn config(label: &str) -> EndpointConfig {
    EndpointConfig::with_label(label)
}

/// An idle but keepalive-carrying connection survives well past the
/// keepalive timeout window.
#[tokio::test(start_paused = true)]
async fn keepalives_keep_idle_connection_alive() {
    let (a, b) = connected_pair(echo_handler(), config("a"), echo_handler(), config("b"));

    // Make sure both handshakes are consumed before going idle.
    a.endpoint.send_message(b"hi".to_vec()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(!a.endpoint.is_closing());
    assert!(!b.endpoint.is_closing());

    a.shutdown().await;
    b.shutdown().await;
}

/// Handshake-only connection: with keepalives suppressed on both sides,
/// each endpoint independently reaches its keepalive timeout and tears
/// down on its own, silently, as an expected teardown.
#[tokio::test(start_paused = true)]
async fn silent_connection_times_out_on_both_sides() {
    let (a, b) = connected_pair(echo_handler(), config("a"), echo_handler(), config("b"));
    a.endpoint.test_suppress_keepalives(true);
    b.endpoint.test_suppress_keepalives(true);

    // First staleness check past the 30 s window is the third tick, at
    // ~32.2 s of virtual time.
    a.driver.await.unwrap();
    b.driver.await.unwrap();
    assert!(a.endpoint.is_closing());
    assert!(b.endpoint.is_closing());
}

/// One-sided suppression: the quiet side's peer times out first; the
/// resulting dead connection then finishes the quiet side too.
#[tokio::test(start_paused = true)]
async fn one_sided_suppression_times_out_the_peer() {
    let (a, b) = connected_pair(echo_handler(), config("a"), echo_handler(), config("b"));
    a.endpoint.test_suppress_keepalives(true);

    // B hears nothing from A and gives up after its timeout window.
    b.driver.await.unwrap();
    assert!(b.endpoint.is_closing());

    // B's teardown closes the stream, which ends A as well even though A
    // was happily receiving B's keepalives.
    a.driver.await.unwrap();
    assert!(a.endpoint.is_closing());
}

/// Suppression is a test hook and reversible: turned off again before the
/// window expires, the connection survives.
#[tokio::test(start_paused = true)]
async fn unsuppressed_in_time_survives() {
    let (a, b) = connected_pair(echo_handler(), config("a"), echo_handler(), config("b"));
    a.endpoint.test_suppress_keepalives(true);

    // One suppressed tick passes (~10.7 s), well inside B's 30 s window.
    tokio::time::sleep(Duration::from_secs(15)).await;
    a.endpoint.test_suppress_keepalives(false);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!a.endpoint.is_closing());
    assert!(!b.endpoint.is_closing());

    a.shutdown().await;
    b.shutdown().await;
}
