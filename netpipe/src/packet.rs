use byteorder::{ByteOrder, LittleEndian};

/// Size of the bit-packed header prepended to every datagram.
pub const HEADER_SIZE: usize = 4;

pub mod flag {
    pub const FIRST: u8 = 0x1;
    pub const LAST: u8 = 0x2;
    pub const RESPONSE: u8 = 0x4;
}

/// The 32-bit little-endian word prepended to every datagram: 4 bits of flags, an 8 bit
/// message id (wraps mod 256) and a 20 bit packet sequence within the message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PacketHeader {
    pub flags: u8,
    pub msg_id: u8,
    pub packet: u32,
}

impl PacketHeader {
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn encode(&self) -> u32 {
        (u32::from(self.flags) & 0xF) | (u32::from(self.msg_id) << 4) | ((self.packet & 0xF_FFFF) << 12)
    }

    #[inline]
    pub fn decode(word: u32) -> PacketHeader {
        PacketHeader {
            flags: (word & 0xF) as u8,
            msg_id: ((word >> 4) & 0xFF) as u8,
            packet: (word >> 12) & 0xF_FFFF,
        }
    }
}

/// A single fixed-capacity packet buffer, owned exclusively by the buffer pool, a message in
/// flight, or the worker thread for the duration of one recv/send call.
///
/// `size` tracks how many bytes of `data` (header included) are currently valid: written by the
/// producer on send, or by the worker after `recv_from` on receive.
pub struct PacketBuffer {
    data: Vec<u8>,
    size: usize,
}

impl PacketBuffer {
    #[inline]
    pub fn new(capacity: usize) -> PacketBuffer {
        PacketBuffer {
            data: vec![0u8; capacity],
            size: HEADER_SIZE,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Payload capacity, i.e. the room available after the header.
    #[inline]
    pub fn payload_capacity(&self) -> usize {
        self.data.len() - HEADER_SIZE
    }

    #[inline]
    pub fn header(&self) -> PacketHeader {
        PacketHeader::decode(LittleEndian::read_u32(&self.data[..HEADER_SIZE]))
    }

    #[inline]
    pub fn set_header(&mut self, header: PacketHeader) {
        LittleEndian::write_u32(&mut self.data[..HEADER_SIZE], header.encode());
    }

    #[inline]
    pub fn set_flag(&mut self, flag: u8) {
        let mut header = self.header();
        header.flags |= flag;
        self.set_header(header);
    }

    /// The payload view, valid up to the last byte written/received.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..self.size]
    }

    /// The full writable payload region, regardless of how much of it is valid yet.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_SIZE..]
    }

    /// Record how many payload bytes were written by the producer.
    #[inline]
    pub fn set_payload_size(&mut self, len: usize) {
        self.size = HEADER_SIZE + len;
    }

    /// Record the total number of valid bytes (header included), as reported by `recv_from`.
    #[inline]
    pub fn set_data_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Header + payload byte count: what a sender hands to `send_to`.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn whole(&self) -> &[u8] {
        &self.data[..self.size]
    }

    #[inline]
    pub fn whole_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Clear the header and payload accounting so the buffer can be handed out again by the pool.
    #[inline]
    pub fn reset(&mut self) {
        self.data[..HEADER_SIZE].fill(0);
        self.size = HEADER_SIZE;
    }
}
