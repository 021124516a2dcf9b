// wc-endpoint: Bidirectional multiplexed RPC endpoint over a duplex byte
// stream.
//
// The transport is the caller's problem: anything that splits into
// `AsyncRead`/`AsyncWrite` halves works (TCP, TLS-over-TCP, in-memory
// duplex pipes in tests). The endpoint owns everything above that:
// handshake, framing, correlation, keepalives, timeouts, and teardown.

mod endpoint;
mod error;
mod inflight;
mod queue;

pub use endpoint::{
    EndpointConfig, HandlerError, HandlerFuture, MessageHandler, RpcEndpoint, handler,
};
pub use error::SendError;
