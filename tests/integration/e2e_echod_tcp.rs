//! End-to-end over real TCP: the echod service library on one side, an
//! endpoint (or the echod one-shot client) on the other.
//!
//! Real time, real sockets: these tests cover the seam the in-memory
//! suites can't: `TcpStream::into_split` halves driving the endpoint.

use echod::EchodConfig;
use tokio::net::{TcpListener, TcpStream};
use wc_endpoint::{EndpointConfig, RpcEndpoint, handler};

async fn start_echod() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = echod::serve(listener, EchodConfig::default()).await;
    });
    addr
}

/// Test: the one-shot client round trips a message through a live server.
#[tokio::test]
async fn send_once_round_trips() {
    let addr = start_echod().await;

    let response = echod::send_once(addr, b"hello over tcp".to_vec(), &EchodConfig::default())
        .await
        .unwrap();
    assert_eq!(response, b"hello over tcp");
}

/// Test: a hand-built endpoint over TCP split halves talks to the server,
/// including several sequential calls on one connection.
#[tokio::test]
async fn endpoint_over_tcp_split_halves() {
    let addr = start_echod().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, writer) = stream.into_split();
    let endpoint = RpcEndpoint::new(
        handler(|message| async move { Ok(message) }),
        reader,
        writer,
        EndpointConfig::with_label("tcp-client"),
    );
    let driver = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.run().await })
    };

    for i in 0..5u8 {
        let payload = vec![i; (i as usize) * 10 + 1];
        let response = endpoint.send_message(payload.clone()).await.unwrap();
        assert_eq!(response, payload);
    }

    let info = endpoint.peer_info().unwrap();
    assert_eq!(info.protocol, 1);

    endpoint.close();
    endpoint.wait_closed().await;
    let _ = driver.await;
}

/// Test: two one-shot clients in a row; the server serves each connection
/// with its own endpoint.
#[tokio::test]
async fn server_handles_sequential_connections() {
    let addr = start_echod().await;
    let cfg = EchodConfig::default();

    let first = echod::send_once(addr, b"first".to_vec(), &cfg).await.unwrap();
    assert_eq!(first, b"first");

    let second = echod::send_once(addr, b"second".to_vec(), &cfg).await.unwrap();
    assert_eq!(second, b"second");
}
