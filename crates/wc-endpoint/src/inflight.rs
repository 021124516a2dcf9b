//! In-flight message table.
//!
//! Maps the 16-bit correlation id of every outstanding MESSAGE to the
//! oneshot slot its sender is awaiting. Completion consumes the slot's
//! sender, so a response can be delivered at most once per id; a response
//! for an id with no entry is the normal aftermath of a sender timing out
//! and is dropped quietly.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    entries: Mutex<HashMap<u16, oneshot::Sender<Vec<u8>>>>,
}

impl InFlightTable {
    pub(crate) fn new() -> InFlightTable {
        InFlightTable::default()
    }

    /// Register a new outstanding message and return the slot to await.
    ///
    /// Panics on id collision. Per-call timeouts bound entry lifetime, so
    /// the wrapping 16-bit counter cannot lap a live entry while in-flight
    /// counts stay far below 65536.
    pub(crate) fn insert(&self, message_id: u16) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let prev = self.entries.lock().unwrap().insert(message_id, tx);
        assert!(prev.is_none(), "message id {message_id} already in flight");
        rx
    }

    /// Deliver a response to the waiter for `message_id`.
    ///
    /// A missing entry means the sender already gave up on this id; the
    /// response is dropped and noted at debug verbosity only.
    pub(crate) fn complete(&self, message_id: u16, response: Vec<u8>) {
        let entry = self.entries.lock().unwrap().remove(&message_id);
        match entry {
            Some(tx) => {
                // The waiter can vanish between our lookup and the send;
                // dropping the response then is just as fine.
                let _ = tx.send(response);
            }
            None => {
                debug!(message_id, "response for unknown message id; sender likely timed out");
            }
        }
    }

    /// Drop the entry for `message_id`, if present. Sender-side cleanup
    /// after a timeout or cancellation.
    pub(crate) fn remove(&self, message_id: u16) {
        self.entries.lock().unwrap().remove(&message_id);
    }

    /// Drop every entry, waking all pending senders with a closed-channel
    /// error. Called once when the endpoint begins closing.
    pub(crate) fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
