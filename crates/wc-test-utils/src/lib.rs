// wc-test-utils: Shared test helpers for the wirecall crates.
//
// Provides in-memory duplex links, canned message handlers, and a
// back-to-back endpoint harness so endpoint tests don't need real sockets.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use wc_endpoint::{EndpointConfig, MessageHandler, RpcEndpoint, handler};

// ---------------------------------------------------------------------------
// In-memory links
// ---------------------------------------------------------------------------

/// One side of an in-memory duplex connection: a read half wired to the
/// other side's write half and vice versa.
pub struct MemoryLink {
    pub reader: ReadHalf<DuplexStream>,
    pub writer: WriteHalf<DuplexStream>,
}

/// Create a connected pair of in-memory duplex links.
pub fn link_pair() -> (MemoryLink, MemoryLink) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (a_reader, a_writer) = tokio::io::split(a);
    let (b_reader, b_writer) = tokio::io::split(b);
    (
        MemoryLink { reader: a_reader, writer: a_writer },
        MemoryLink { reader: b_reader, writer: b_writer },
    )
}

// ---------------------------------------------------------------------------
// Canned handlers
// ---------------------------------------------------------------------------

/// Handler that returns the request bytes unchanged.
pub fn echo_handler() -> MessageHandler {
    handler(|message| async move { Ok(message) })
}

/// Handler that ASCII-uppercases the request bytes.
pub fn uppercase_handler() -> MessageHandler {
    handler(|message: Vec<u8>| async move { Ok(message.to_ascii_uppercase()) })
}

/// Handler that always fails. The endpoint must log it and never send a
/// response.
pub fn failing_handler() -> MessageHandler {
    handler(|_message| async move { Err("handler intentionally failed".into()) })
}

/// Handler that sleeps before echoing, for timeout tests.
pub fn sleeping_handler(delay: Duration) -> MessageHandler {
    handler(move |message| async move {
        tokio::time::sleep(delay).await;
        Ok(message)
    })
}

/// Handler that echoes a response of the given size regardless of input,
/// for payload boundary tests.
pub fn fixed_size_handler(len: usize) -> MessageHandler {
    handler(move |_message| async move { Ok(vec![0x5au8; len]) })
}

// ---------------------------------------------------------------------------
// Endpoint harness
// ---------------------------------------------------------------------------

/// A running endpoint plus the task driving its `run()`.
pub struct RunningEndpoint {
    pub endpoint: Arc<RpcEndpoint>,
    pub driver: JoinHandle<()>,
}

impl RunningEndpoint {
    /// Close the endpoint and wait for its driver to finish.
    pub async fn shutdown(self) {
        self.endpoint.close();
        self.endpoint.wait_closed().await;
        let _ = self.driver.await;
    }
}

/// Start an endpoint over the given link and spawn its `run()` driver.
pub fn start_endpoint(
    handler: MessageHandler,
    link: MemoryLink,
    config: EndpointConfig,
) -> RunningEndpoint {
    let endpoint = RpcEndpoint::new(handler, link.reader, link.writer, config);
    let driver = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.run().await })
    };
    RunningEndpoint { endpoint, driver }
}

/// Wire two endpoints back-to-back over an in-memory link and spawn both
/// drivers. The first uses `handler_a`/`config_a`, the second
/// `handler_b`/`config_b`.
pub fn connected_pair(
    handler_a: MessageHandler,
    config_a: EndpointConfig,
    handler_b: MessageHandler,
    config_b: EndpointConfig,
) -> (RunningEndpoint, RunningEndpoint) {
    let (link_a, link_b) = link_pair();
    (
        start_endpoint(handler_a, link_a, config_a),
        start_endpoint(handler_b, link_b, config_b),
    )
}
