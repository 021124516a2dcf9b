// wirecall: Bidirectional multiplexed RPC over a duplex byte stream.
//
// Umbrella crate: re-exports the protocol and endpoint crates and hosts the
// cross-crate integration suites under tests/integration/.

pub use wc_endpoint::{
    EndpointConfig, HandlerError, HandlerFuture, MessageHandler, RpcEndpoint, SendError, handler,
};
pub use wc_protocol::{MAX_PAYLOAD_LEN, PROTOCOL_VERSION, PeerInfo};
