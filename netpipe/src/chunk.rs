use byteorder::{ByteOrder, LittleEndian};

/// Size of a chunk's header: 4 bytes of little-endian total size, 1 byte of type tag.
const CHUNK_HEADER_SIZE: usize = 5;

/// A type that can be streamed as one chunk: `<u32 total_size><u8 type_tag><payload>`.
pub trait ChunkValue: Sized {
    const TAG: u8;

    /// The raw payload bytes for this value (everything after the chunk header).
    fn to_payload(&self) -> Vec<u8>;

    /// Reconstruct a value from its exact-length payload.
    fn from_payload(bytes: &[u8]) -> Self;
}

impl ChunkValue for u32 {
    const TAG: u8 = 1;

    fn to_payload(&self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn from_payload(bytes: &[u8]) -> Self {
        LittleEndian::read_u32(bytes)
    }
}

impl ChunkValue for u8 {
    const TAG: u8 = 2;

    fn to_payload(&self) -> Vec<u8> {
        vec![*self]
    }

    fn from_payload(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl ChunkValue for char {
    const TAG: u8 = 3;

    fn to_payload(&self) -> Vec<u8> {
        vec![*self as u8]
    }

    fn from_payload(bytes: &[u8]) -> Self {
        bytes[0] as char
    }
}

impl ChunkValue for String {
    const TAG: u8 = 4;

    fn to_payload(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_payload(bytes: &[u8]) -> Self {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl ChunkValue for Vec<u8> {
    const TAG: u8 = 5;

    fn to_payload(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_payload(bytes: &[u8]) -> Self {
        bytes.to_vec()
    }
}

/// The destination a `ChunkWriter` streams bytes into. Buffers are requested and addressed by
/// an index assigned in allocation order (0, 1, 2, ...).
pub trait ChunkSink {
    /// Allocate a new buffer, appended after any previously allocated ones, and return its
    /// payload capacity. `None` signals allocation exhaustion.
    fn alloc(&mut self) -> Option<usize>;

    /// The full writable payload slice of the buffer at `index`.
    fn payload_mut(&mut self, index: usize) -> &mut [u8];

    /// Record that `len` bytes of buffer `index`'s payload are valid. Called both when the
    /// writer moves past a full buffer and, once more, for the still-active buffer on `flush`.
    fn commit(&mut self, index: usize, len: usize);
}

/// Streams typed values as chunks across a sequence of buffers obtained from a `ChunkSink`.
pub struct ChunkWriter<S: ChunkSink> {
    sink: S,
    capacities: Vec<usize>,
    current: usize,
    pos_in_buffer: usize,
}

impl<S: ChunkSink> ChunkWriter<S> {
    pub fn new(sink: S) -> ChunkWriter<S> {
        ChunkWriter {
            sink,
            capacities: Vec::new(),
            current: 0,
            pos_in_buffer: 0,
        }
    }

    /// Emit one chunk for `value`.
    ///
    /// Returns `false` on allocator exhaustion, leaving any bytes already written in place; the
    /// caller is expected to discard the whole message in that case.
    pub fn write<T: ChunkValue>(&mut self, value: &T) -> bool {
        let payload = value.to_payload();
        let total_size = CHUNK_HEADER_SIZE + payload.len();

        if !self.check_and_alloc(total_size) {
            return false;
        }

        let mut header = [0u8; CHUNK_HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], total_size as u32);
        header[4] = T::TAG;

        self.write_safe(&header);
        self.write_safe(&payload);
        true
    }

    /// Report the final byte count of the still-active buffer.
    pub fn flush(&mut self) {
        if !self.capacities.is_empty() {
            self.sink.commit(self.current, self.pos_in_buffer);
        }
    }

    /// Unwrap the writer, handing the sink back to its caller (e.g. to collect the buffers it
    /// allocated).
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn check_and_alloc(&mut self, size: usize) -> bool {
        let mut available = if self.capacities.is_empty() {
            0
        } else {
            self.capacities[self.current] - self.pos_in_buffer
        };

        while available < size {
            match self.sink.alloc() {
                Some(capacity) => {
                    self.capacities.push(capacity);
                    available += capacity;
                }
                None => return false,
            }
        }
        true
    }

    fn write_safe(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let available = self.capacities[self.current] - self.pos_in_buffer;
            if available == 0 {
                self.sink.commit(self.current, self.pos_in_buffer);
                self.current += 1;
                self.pos_in_buffer = 0;
                continue;
            }

            let copy_len = available.min(data.len());
            let index = self.current;
            let pos = self.pos_in_buffer;
            self.sink.payload_mut(index)[pos..pos + copy_len].copy_from_slice(&data[..copy_len]);
            self.pos_in_buffer += copy_len;
            data = &data[copy_len..];
        }
    }
}

/// Reads typed values, in chunk form, from a fixed, ordered sequence of read-only buffer views.
pub struct ChunkReader<'a> {
    buffers: &'a [&'a [u8]],
    buffer: usize,
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    pub fn new(buffers: &'a [&'a [u8]]) -> ChunkReader<'a> {
        ChunkReader {
            buffers,
            buffer: 0,
            pos: 0,
        }
    }

    /// Reads one chunk. `None` covers both a tag mismatch (cursor restored to the position
    /// before the header, so a retry with a different `T` can succeed) and a short stream
    /// (cursor left wherever it ran out).
    pub fn read<T: ChunkValue>(&mut self) -> Option<T> {
        let saved = (self.buffer, self.pos);

        let header = self.read_raw(CHUNK_HEADER_SIZE)?;
        let total_size = LittleEndian::read_u32(&header[0..4]) as usize;
        if total_size < CHUNK_HEADER_SIZE {
            return None;
        }

        let tag = header[4];
        if tag != T::TAG {
            self.buffer = saved.0;
            self.pos = saved.1;
            return None;
        }

        let payload = self.read_raw(total_size - CHUNK_HEADER_SIZE)?;
        Some(T::from_payload(&payload))
    }

    fn read_raw(&mut self, mut size: usize) -> Option<Vec<u8>> {
        let mut result = Vec::with_capacity(size);

        while size > 0 {
            if self.buffer >= self.buffers.len() {
                return None;
            }

            let buf = self.buffers[self.buffer];
            let available = buf.len() - self.pos;
            if available == 0 {
                self.buffer += 1;
                self.pos = 0;
                continue;
            }

            let copy_len = available.min(size);
            result.extend_from_slice(&buf[self.pos..self.pos + copy_len]);
            self.pos += copy_len;
            size -= copy_len;
        }

        Some(result)
    }
}
