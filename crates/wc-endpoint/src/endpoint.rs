//! The RPC endpoint.
//!
//! One endpoint per connection, shared as `Arc<RpcEndpoint>`. Each side is
//! symmetric: it issues calls to its peer and serves calls from its peer,
//! with many calls in flight in both directions over a single duplex byte
//! stream. Three core activities cooperate over the shared state:
//!
//! - **reader**: consumes the peer's handshake, then dispatches incoming
//!   packets (keepalives, messages, responses);
//! - **writer**: emits our handshake, then drains the outgoing queue in
//!   strict FIFO order;
//! - **keepalive**: enqueues periodic keepalives and watches peer
//!   freshness.
//!
//! Any core activity exiting, cleanly or not, closes the whole endpoint.
//! There is no reset; a new connection needs a new endpoint.
//!
//! Packets are sent serially on one stream, so an excessively long message
//! or response delays everything behind it. Payloads are capped at 65535
//! bytes, which keeps that delay bounded.

use crate::error::{ActivityError, SendError};
use crate::inflight::InFlightTable;
use crate::queue::OutgoingQueue;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};
use wc_protocol::{self as protocol, MAX_PAYLOAD_LEN, PROTOCOL_VERSION, PacketType, PeerInfo};

// ---------------------------------------------------------------------------
// Handler seam
// ---------------------------------------------------------------------------

/// Error type handlers may fail with. A failure is logged loudly and the
/// peer never receives a response for that message.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a message handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, HandlerError>> + Send>>;

/// The user-supplied message handler: opaque request bytes in, opaque
/// response bytes out. Invoked on its own task per inbound message so slow
/// handlers never stall the stream.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, HandlerError>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Endpoint tuning knobs. `Default` gives the production values.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Diagnostic label carried on every log line from this endpoint.
    pub label: String,
    /// Emit verbose per-packet debug logs.
    pub debug: bool,
    /// How often we send keepalive packets. The default is deliberately
    /// irregular so fleets of connections don't synchronize their traffic.
    pub keepalive_interval: Duration,
    /// How much silence from the peer we tolerate before tearing down.
    pub keepalive_timeout: Duration,
    /// Default per-call timeout for [`RpcEndpoint::send_message`]. Includes
    /// handler processing time on the other end.
    pub message_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> EndpointConfig {
        EndpointConfig {
            label: "rpc".to_owned(),
            debug: false,
            keepalive_interval: Duration::from_secs_f64(10.73),
            keepalive_timeout: Duration::from_secs(30),
            message_timeout: Duration::from_secs(60),
        }
    }
}

impl EndpointConfig {
    /// Default config with the given diagnostic label.
    pub fn with_label(label: impl Into<String>) -> EndpointConfig {
        EndpointConfig {
            label: label.into(),
            ..EndpointConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint state
// ---------------------------------------------------------------------------

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

// Message ids start near the u16 wrap point so the wrapping path is
// exercised early in every connection's life.
const INITIAL_MESSAGE_ID: u16 = 65530;

#[derive(Debug)]
struct State {
    closing: bool,
    did_wait_closed: bool,
    run_called: bool,
    next_message_id: u16,
    peer_info: Option<PeerInfo>,
    last_keepalive_receive: Option<Instant>,
}

/// One side of a multiplexed RPC connection.
pub struct RpcEndpoint {
    config: EndpointConfig,
    /// Runtime captured at construction; every activity is spawned on it.
    runtime: Handle,
    /// Cleared on close to break ownership cycles through user state the
    /// handler may close over.
    handler: Mutex<Option<MessageHandler>>,
    reader: Mutex<Option<BoxReader>>,
    writer: Mutex<Option<BoxWriter>>,
    state: Mutex<State>,
    out_queue: OutgoingQueue,
    in_flight: InFlightTable,
    /// Every task this endpoint ever spawned. Aborted by `close()`, drained
    /// by `wait_closed()`, pruned of finished entries on insert. The handles
    /// hold no reference back to the endpoint.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    suppress_keepalives: AtomicBool,
}

impl RpcEndpoint {
    /// Create an endpoint over the given stream halves.
    ///
    /// Must be called from within a Tokio runtime: the endpoint captures
    /// the current runtime handle and pins all of its activities to it.
    /// The endpoint is inert until [`run`](RpcEndpoint::run) is called.
    pub fn new<R, W>(
        handler: MessageHandler,
        reader: R,
        writer: W,
        config: EndpointConfig,
    ) -> Arc<RpcEndpoint>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(RpcEndpoint {
            config,
            runtime: Handle::current(),
            handler: Mutex::new(Some(handler)),
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
            state: Mutex::new(State {
                closing: false,
                did_wait_closed: false,
                run_called: false,
                next_message_id: INITIAL_MESSAGE_ID,
                peer_info: None,
                last_keepalive_receive: None,
            }),
            out_queue: OutgoingQueue::new(),
            in_flight: InFlightTable::new(),
            tasks: Mutex::new(Vec::new()),
            suppress_keepalives: AtomicBool::new(false),
        })
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Drive the endpoint until the connection is lost or closed.
    ///
    /// Spawns the reader, writer, and keepalive activities, waits for all
    /// of them to settle, then closes the endpoint and waits for teardown
    /// to complete. May be called only once per endpoint; a second call
    /// panics.
    pub async fn run(self: &Arc<Self>) {
        self.check_runtime();
        {
            let mut state = self.state.lock().unwrap();
            assert!(!state.run_called, "run() may only be called once per endpoint");
            state.run_called = true;
        }

        let reader = self.reader.lock().unwrap().take();
        let writer = self.writer.lock().unwrap().take();
        let (Some(reader), Some(writer)) = (reader, writer) else {
            // close() already released the halves; nothing to drive.
            self.close();
            self.wait_closed().await;
            return;
        };

        // Each core activity holds a clone of this sender and nothing is
        // ever sent on it, so recv() returns None exactly when all three
        // futures have finished or been dropped by an abort.
        let (core_guard, mut cores_done) = mpsc::channel::<()>(1);
        self.spawn_registered(Self::run_core_activity(
            self.clone(),
            "read",
            self.clone().read_activity(reader),
            core_guard.clone(),
        ));
        self.spawn_registered(Self::run_core_activity(
            self.clone(),
            "write",
            self.clone().write_activity(writer),
            core_guard.clone(),
        ));
        self.spawn_registered(Self::run_core_activity(
            self.clone(),
            "keepalive",
            self.clone().keepalive_activity(),
            core_guard,
        ));

        let _ = cores_done.recv().await;

        // All core activities settled; tear the rest down.
        self.close();
        self.wait_closed().await;
        if self.config.debug {
            debug!(label = %self.config.label, "endpoint finished");
        }
    }

    /// Send a message to the peer and await its response, with the default
    /// per-call timeout from the endpoint config.
    pub async fn send_message(&self, message: Vec<u8>) -> Result<Vec<u8>, SendError> {
        self.send_message_with_timeout(message, self.config.message_timeout).await
    }

    /// Send a message to the peer and await its response.
    ///
    /// Every send carries a timeout so a hung or failed peer cannot strand
    /// the caller, and so in-flight table entries have bounded lifetime,
    /// which is the invariant that lets the 16-bit id counter wrap safely.
    pub async fn send_message_with_timeout(
        &self,
        message: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, SendError> {
        self.check_runtime();
        if message.len() > MAX_PAYLOAD_LEN {
            return Err(SendError::OversizeMessage(message.len()));
        }
        if self.is_closing() {
            return Err(SendError::Closed);
        }

        let message_id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_message_id;
            state.next_message_id = id.wrapping_add(1);
            id
        };

        // Insert before enqueueing: once the packet is on the queue the
        // response can race back on another worker, and the table entry
        // must already exist to catch it.
        let receiver = self.in_flight.insert(message_id);
        let guard = InFlightGuard {
            table: &self.in_flight,
            message_id,
            armed: true,
        };

        // close() may have raced us between the closing check and the
        // insert; its table sweep can't have seen this entry, so re-check
        // rather than letting the call idle out against a dead connection.
        if self.is_closing() {
            return Err(SendError::Closed);
        }

        self.enqueue_packet(protocol::message_packet(message_id, &message));

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => {
                // Completion already removed the entry; by now the id may
                // even have been reissued, so the guard must not fire.
                guard.disarm();
                Ok(response)
            }
            Ok(Err(_)) => {
                // Slot sender dropped without a response: the endpoint shut
                // down underneath us. The guard clears any residual entry.
                if self.config.debug {
                    debug!(label = %self.config.label, message_id, "message cancelled");
                }
                Err(SendError::Cancelled)
            }
            Err(_) => {
                if self.config.debug {
                    debug!(label = %self.config.label, message_id, "message timed out");
                }
                Err(SendError::TimedOut)
            }
        }
    }

    /// Begin shutting the endpoint down. Idempotent; safe to call from any
    /// task on the owning runtime.
    pub fn close(&self) {
        self.check_runtime();
        {
            let mut state = self.state.lock().unwrap();
            if state.closing {
                return;
            }
            state.closing = true;
        }
        if self.config.debug {
            debug!(label = %self.config.label, "closing");
        }

        // Cancel everything we've spawned and every pending send.
        for task in self.tasks.lock().unwrap().iter() {
            task.abort();
        }
        self.in_flight.clear();

        // If run() never claimed the halves, dropping them here closes the
        // connection; otherwise the aborted activities release them.
        drop(self.reader.lock().unwrap().take());
        drop(self.writer.lock().unwrap().take());

        // The handler may close over user state that owns this endpoint;
        // dropping our reference breaks the cycle.
        *self.handler.lock().unwrap() = None;
    }

    /// Wait for teardown to complete: every spawned task settled and the
    /// stream halves released.
    ///
    /// Must be called after [`close`](RpcEndpoint::close); panics otherwise.
    /// Idempotent; only the first caller actually waits.
    pub async fn wait_closed(&self) {
        self.check_runtime();
        {
            let mut state = self.state.lock().unwrap();
            assert!(state.closing, "wait_closed() must be called after close()");
            if state.did_wait_closed {
                return;
            }
            state.did_wait_closed = true;
        }

        // Drain every task we ever spawned. Cancellation is the normal
        // outcome here; activities already classified and logged their own
        // errors, so only panics are worth noise. Once the writer task is
        // gone its half has been dropped, which is what closes the stream.
        loop {
            let drained = std::mem::take(&mut *self.tasks.lock().unwrap());
            if drained.is_empty() {
                break;
            }
            for task in drained {
                match task.await {
                    Ok(()) => {}
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        error!(label = %self.config.label, %err, "task failed during shutdown");
                    }
                }
            }
        }
        if self.config.debug {
            debug!(label = %self.config.label, "closed");
        }
    }

    /// Has the shutdown process begun?
    pub fn is_closing(&self) -> bool {
        self.state.lock().unwrap().closing
    }

    /// The peer's handshake parameters; `None` until the handshake has been
    /// received.
    pub fn peer_info(&self) -> Option<PeerInfo> {
        self.state.lock().unwrap().peer_info.clone()
    }

    /// Diagnostic label for this endpoint.
    pub fn label(&self) -> &str {
        &self.config.label
    }

    /// Test hook: stop emitting keepalives so peer-side staleness handling
    /// can be exercised.
    pub fn test_suppress_keepalives(&self, suppress: bool) {
        self.suppress_keepalives.store(suppress, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Core activities
    // -----------------------------------------------------------------------

    /// Classify an activity's exit, then take the whole endpoint down.
    /// Shutdown on first exit is what keeps reader, writer, and keepalive
    /// in lockstep.
    async fn run_core_activity(
        self: Arc<Self>,
        name: &'static str,
        activity: impl Future<Output = Result<(), ActivityError>>,
        _core_guard: mpsc::Sender<()>,
    ) {
        match activity.await {
            Ok(()) => {}
            Err(err) if err.is_expected_teardown() => {
                debug!(label = %self.config.label, activity = name, %err, "activity exiting cleanly");
            }
            Err(err) => {
                error!(label = %self.config.label, activity = name, %err, "unexpected error in core activity");
            }
        }
        self.close();
    }

    /// Read from the peer: handshake first, then packets forever.
    async fn read_activity(self: Arc<Self>, mut reader: BoxReader) -> Result<(), ActivityError> {
        // The first thing the peer sends is its handshake; nothing else is
        // meaningful until we have it.
        let len = reader.read_u32().await?;
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        let info = protocol::decode_peer_info(&buf)?;
        {
            let mut state = self.state.lock().unwrap();
            debug_assert!(state.peer_info.is_none());
            state.peer_info = Some(info);
            state.last_keepalive_receive = Some(Instant::now());
        }
        if self.config.debug {
            debug!(label = %self.config.label, "received handshake");
        }

        loop {
            let tag = reader.read_u8().await?;
            match PacketType::try_from(tag)? {
                PacketType::Handshake => {
                    // Tag 0 never reappears on a well-formed stream, but a
                    // peer that sends it has lost the plot.
                    return Err(protocol::ProtocolError::RepeatedHandshake.into());
                }
                PacketType::Keepalive => {
                    if self.config.debug {
                        debug!(label = %self.config.label, "received keepalive");
                    }
                    self.state.lock().unwrap().last_keepalive_receive = Some(Instant::now());
                }
                PacketType::Message => {
                    let message_id = reader.read_u16().await?;
                    let len = reader.read_u16().await?;
                    let mut payload = vec![0u8; len as usize];
                    reader.read_exact(&mut payload).await?;
                    if self.config.debug {
                        debug!(label = %self.config.label, message_id, len, "received message");
                    }
                    // Handle on a task of its own so a slow handler doesn't
                    // stall the stream.
                    let endpoint = self.clone();
                    self.spawn_registered(endpoint.handle_message(message_id, payload));
                }
                PacketType::Response => {
                    let message_id = reader.read_u16().await?;
                    let len = reader.read_u16().await?;
                    let mut payload = vec![0u8; len as usize];
                    reader.read_exact(&mut payload).await?;
                    if self.config.debug {
                        debug!(label = %self.config.label, message_id, len, "received response");
                    }
                    self.in_flight.complete(message_id, payload);
                }
            }
        }
    }

    /// Write to the peer: our handshake first, then the outgoing queue.
    async fn write_activity(self: Arc<Self>, mut writer: BoxWriter) -> Result<(), ActivityError> {
        // Introduce ourself so the peer knows how to talk to us.
        let info = PeerInfo {
            protocol: PROTOCOL_VERSION,
            keepalive_interval: self.config.keepalive_interval.as_secs_f64(),
        };
        writer.write_all(&protocol::handshake_packet(&info)?).await?;

        // Drain packets in strict FIFO order. No per-packet flush: the
        // transport's own buffering is relied upon.
        loop {
            let packet = self.out_queue.pop().await;
            writer.write_all(&packet).await?;
        }
    }

    /// Emit periodic keepalives and watch how long the peer has been quiet.
    ///
    /// Explicit keepalives let us notice a dead peer far sooner than OS
    /// TCP timeouts would, and keep that behavior identical across
    /// platforms.
    async fn keepalive_activity(self: Arc<Self>) -> Result<(), ActivityError> {
        loop {
            tokio::time::sleep(self.config.keepalive_interval).await;
            if !self.suppress_keepalives.load(Ordering::Relaxed) {
                self.enqueue_packet(protocol::keepalive_packet());
            }

            // The staleness check only means anything once the handshake
            // has stamped the freshness clock; the reader gets a full
            // interval of head start, so a missing stamp here is a bug.
            let last = {
                let state = self.state.lock().unwrap();
                assert!(
                    state.peer_info.is_some(),
                    "keepalive staleness check before handshake was consumed"
                );
                state.last_keepalive_receive
            };
            if let Some(last) = last {
                let since = last.elapsed();
                if since > self.config.keepalive_timeout {
                    if self.config.debug {
                        debug!(
                            label = %self.config.label,
                            since = since.as_secs_f64(),
                            "keepalive timeout reached"
                        );
                    }
                    return Err(ActivityError::KeepaliveTimeout(since.as_secs_f64()));
                }
            }
        }
    }

    /// Serve one inbound MESSAGE: run the handler, enqueue the RESPONSE.
    async fn handle_message(self: Arc<Self>, message_id: u16, message: Vec<u8>) {
        // The handler slot empties when the endpoint closes; a message that
        // raced the close is simply dropped.
        let handler = match self.handler.lock().unwrap().as_ref() {
            Some(handler) => handler.clone(),
            None => return,
        };
        let response = match handler(message).await {
            Ok(response) => response,
            Err(err) => {
                // A failing local handler is a bug worth noise. The peer
                // never gets a response and will time the message out.
                error!(label = %self.config.label, message_id, %err, "message handler failed");
                return;
            }
        };
        if response.len() > MAX_PAYLOAD_LEN {
            error!(
                label = %self.config.label,
                message_id,
                len = response.len(),
                "handler response exceeds maximum payload size; dropping"
            );
            return;
        }
        self.enqueue_packet(protocol::response_packet(message_id, &response));
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn enqueue_packet(&self, packet: Vec<u8>) {
        if self.config.debug {
            debug!(label = %self.config.label, len = packet.len(), "enqueueing outgoing packet");
        }
        self.out_queue.push(packet);
    }

    /// Spawn on the owning runtime and track the handle for close/wait.
    fn spawn_registered<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.spawn(future);
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// All endpoint use must happen on the owning runtime; catching the
    /// no-runtime case loudly here beats a confusing panic deeper down.
    fn check_runtime(&self) {
        assert!(
            Handle::try_current().is_ok(),
            "endpoint operations must be called from within the owning tokio runtime"
        );
    }
}

impl std::fmt::Debug for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEndpoint")
            .field("label", &self.config.label)
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-flight cleanup guard
// ---------------------------------------------------------------------------

/// Removes a sender's in-flight entry on every exit path (timeout, outside
/// cancellation, the caller's future being dropped) so abandoned ids never
/// linger in the table.
struct InFlightGuard<'a> {
    table: &'a InFlightTable,
    message_id: u16,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.table.remove(self.message_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests: lifecycle and misuse. Round trips live in the integration
// suites at the workspace root.
// ---------------------------------------------------------------------------
