//! Outgoing packet queue.
//!
//! A FIFO of already-encoded packets with a non-empty wakeup signal for the
//! writer activity. Enqueueing never blocks; the writer pops one packet per
//! cycle and parks on the signal only while the queue is empty. Strict FIFO
//! order is what guarantees the handshake-then-packets framing stays intact.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct OutgoingQueue {
    packets: Mutex<VecDeque<Vec<u8>>>,
    nonempty: Notify,
}

impl OutgoingQueue {
    pub(crate) fn new() -> OutgoingQueue {
        OutgoingQueue::default()
    }

    /// Push an encoded packet on the tail and wake the writer.
    pub(crate) fn push(&self, packet: Vec<u8>) {
        self.packets.lock().unwrap().push_back(packet);
        self.nonempty.notify_one();
    }

    /// Pop the head packet, waiting until one is available.
    ///
    /// Re-checks emptiness after every wakeup: a notification can predate
    /// the pop that consumed its packet.
    pub(crate) async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(packet) = self.packets.lock().unwrap().pop_front() {
                return packet;
            }
            self.nonempty.notified().await;
        }
    }
}
