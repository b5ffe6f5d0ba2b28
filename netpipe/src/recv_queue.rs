use crate::packet::{flag, PacketBuffer};
use std::collections::HashMap;

/// Reassembles fragmented datagrams into whole messages, keyed by message id.
///
/// Owned exclusively by the network worker thread: UDP delivers to one socket from one thread,
/// so there is no concurrent access to guard against and no internal locking.
pub struct RecvQueue {
    partial: HashMap<u8, Vec<PacketBuffer>>,
}

impl RecvQueue {
    pub fn new() -> RecvQueue {
        RecvQueue {
            partial: HashMap::new(),
        }
    }

    /// Splice one received packet into its message's fragment list. Returns the complete
    /// fragment list, ordered by packet sequence, once the Last flag arrives; `None` while the
    /// message is still being assembled.
    ///
    /// UDP may reorder datagrams within a message, so fragments are sorted by sequence number at
    /// completion rather than assumed to arrive First-to-Last.
    pub fn process_buffer(&mut self, buffer: PacketBuffer) -> Option<Vec<PacketBuffer>> {
        let header = buffer.header();
        let is_last = header.has_flag(flag::LAST);

        let fragments = self.partial.entry(header.msg_id).or_insert_with(Vec::new);
        fragments.push(buffer);

        if !is_last {
            return None;
        }

        let mut fragments = self.partial.remove(&header.msg_id).unwrap();
        fragments.sort_by_key(|buf| buf.header().packet);
        Some(fragments)
    }

    /// Messages currently being assembled that have not (yet) seen a Last fragment. Used to spot
    /// inbound records stuck mid-reassembly, e.g. a dropped final datagram.
    pub fn pending_message_count(&self) -> usize {
        self.partial.len()
    }

    /// Drop a message's fragments without reassembling them, e.g. when garbage-collecting a
    /// record that never produced a Last fragment.
    pub fn discard(&mut self, msg_id: u8) {
        self.partial.remove(&msg_id);
    }
}
