use crate::error::PipeResult;
use crate::packet::PacketBuffer;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Invoked once, outside the queue's lock, when a message's completion is known.
pub type SentCallback = Box<dyn FnOnce(PipeResult<()>) + Send>;

struct Inner {
    fifo: VecDeque<PacketBuffer>,
    callbacks: HashMap<u8, SentCallback>,
}

/// FIFO of outgoing packets plus per-message-id completion callbacks.
///
/// A message completes the moment its Last-flagged packet is handed to `send_to` — not when
/// every fragment has gone out, since fragments before the last carry no completion signal of
/// their own. Shared between whichever thread calls `compose_msg` and the network worker thread;
/// every method takes its own lock and returns, so callbacks never fire with the mutex held.
pub struct SendQueue {
    inner: Mutex<Inner>,
}

impl SendQueue {
    pub fn new() -> SendQueue {
        SendQueue {
            inner: Mutex::new(Inner {
                fifo: VecDeque::new(),
                callbacks: HashMap::new(),
            }),
        }
    }

    /// Enqueue every fragment of one message, in order, and remember how to report completion.
    pub fn send(&self, msg_id: u8, packets: Vec<PacketBuffer>, on_report: SentCallback) {
        let mut inner = self.inner.lock().unwrap();
        inner.callbacks.insert(msg_id, on_report);
        inner.fifo.extend(packets);
    }

    /// Pop the next packet due to go out, for the worker thread to hand to the socket.
    pub fn next_packet(&self) -> Option<PacketBuffer> {
        self.inner.lock().unwrap().fifo.pop_front()
    }

    /// Put a packet back at the head of the queue, e.g. after `send_to` returned `WouldBlock`.
    pub fn requeue_front(&self, packet: PacketBuffer) {
        self.inner.lock().unwrap().fifo.push_front(packet);
    }

    /// Report the outcome of sending `msg_id`'s Last-flagged packet. Drops the record and invokes
    /// its callback with `result`, with the queue's mutex released. A no-op if `msg_id` has
    /// already been reported (or was never sent through this queue), e.g. a duplicate report.
    pub fn sent_report(&self, msg_id: u8, result: PipeResult<()>) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            inner.callbacks.remove(&msg_id)
        };
        if let Some(callback) = callback {
            callback(result);
        }
    }

    /// Reserved for the Response flag. Acknowledgement-driven retransmission is out of scope:
    /// this transport is fire-and-forget, so replies carrying the Response flag are accepted on
    /// the wire but otherwise ignored.
    pub fn process_response(&self, _msg_id: u8) {}

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().fifo.is_empty()
    }

    /// Drain every packet still queued for transmission, for the caller to release back to the
    /// pool, and discard any not-yet-invoked completion callbacks without invoking them: a
    /// compose-message whose pipe has closed first observes no callback at all, per spec.
    pub fn close(&self) -> Vec<PacketBuffer> {
        let mut inner = self.inner.lock().unwrap();
        inner.callbacks.clear();
        inner.fifo.drain(..).collect()
    }
}
