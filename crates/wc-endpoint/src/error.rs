//! Endpoint error types and teardown classification.

use std::io;
use thiserror::Error;
use wc_protocol::{MAX_PAYLOAD_LEN, ProtocolError};

// ---------------------------------------------------------------------------
// SendError (user-visible)
// ---------------------------------------------------------------------------

/// Errors surfaced to callers of `send_message`.
///
/// Everything except [`SendError::OversizeMessage`] is in the communication
/// category: the round trip did not complete and the payload was never (or
/// may never have been) answered.
#[derive(Debug, Error)]
pub enum SendError {
    /// Payload exceeds the wire format's `u16` length field. Rejected
    /// synchronously; no state was changed.
    #[error("message of {0} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit")]
    OversizeMessage(usize),
    /// The endpoint was already closing when the send was attempted.
    #[error("endpoint is closed")]
    Closed,
    /// No response arrived within the per-call timeout.
    #[error("timed out waiting for response")]
    TimedOut,
    /// The endpoint shut down while the response was still pending.
    #[error("endpoint shut down while awaiting response")]
    Cancelled,
}

impl SendError {
    /// True for the communication category; false only for the
    /// invalid-argument case.
    pub fn is_communication(&self) -> bool {
        !matches!(self, SendError::OversizeMessage(_))
    }
}

// ---------------------------------------------------------------------------
// ActivityError (internal)
// ---------------------------------------------------------------------------

/// Why a core activity stopped. The wrapper around each activity decides
/// from this whether to log an error or exit quietly.
#[derive(Debug, Error)]
pub(crate) enum ActivityError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("handshake could not be encoded: {0}")]
    HandshakeEncode(#[from] serde_json::Error),
    #[error("no keepalive received for {0:.1}s")]
    KeepaliveTimeout(f64),
}

impl ActivityError {
    /// Expected teardown causes: the connection-reset/EOF family, our own
    /// keepalive timeout, and the TLS application-data-after-close-notify
    /// noise some stacks emit while a stream is being torn down. These end
    /// the endpoint without being worth an error log.
    pub(crate) fn is_expected_teardown(&self) -> bool {
        match self {
            ActivityError::KeepaliveTimeout(_) => true,
            ActivityError::Io(err) => is_expected_io_teardown(err),
            ActivityError::Protocol(_) | ActivityError::HandshakeEncode(_) => false,
        }
    }
}

pub(crate) fn is_expected_io_teardown(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    ) || err.to_string().contains("close_notify")
}
