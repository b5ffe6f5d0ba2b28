use crate::packet::PacketBuffer;
use std::sync::Mutex;

struct Inner {
    free: Vec<PacketBuffer>,
    total_allocated: usize,
    total_released: usize,
}

/// Allocates and recycles fixed-size packet buffers.
///
/// All buffers handed out by one pool share the same capacity (the transport's MTU). Allocation
/// recycles the most recently released buffer; the pool grows on demand and never shrinks.
pub struct BufferPool {
    inner: Mutex<Inner>,
    buffer_capacity: usize,
}

impl BufferPool {
    pub fn new(buffer_capacity: usize, initial_capacity: usize) -> BufferPool {
        let free = (0..initial_capacity)
            .map(|_| PacketBuffer::new(buffer_capacity))
            .collect();

        BufferPool {
            inner: Mutex::new(Inner {
                free,
                total_allocated: 0,
                total_released: 0,
            }),
            buffer_capacity,
        }
    }

    /// Appends one buffer of at least `size` bytes to `out`. Returns `false` only when `size`
    /// exceeds the pool's fixed buffer capacity (allocation exhaustion).
    pub fn alloc(&self, out: &mut Vec<PacketBuffer>, size: usize) -> bool {
        if size > self.buffer_capacity {
            return false;
        }

        let mut inner = self.inner.lock().unwrap();
        let buffer = match inner.free.pop() {
            Some(mut buffer) => {
                buffer.reset();
                buffer
            }
            None => PacketBuffer::new(self.buffer_capacity),
        };
        inner.total_allocated += 1;
        out.push(buffer);
        true
    }

    /// Moves every buffer out of `list` and back into the free store.
    pub fn release(&self, list: &mut Vec<PacketBuffer>) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_released += list.len();
        inner.free.extend(list.drain(..));
    }

    /// Buffers currently allocated and not yet released. Used to assert the pool balances out
    /// after a transport closes.
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.total_allocated - inner.total_released
    }
}
