use crate::buffer_pool::BufferPool;
use crate::chunk::{ChunkSink, ChunkWriter};
use crate::config::PipeConfig;
use crate::error::{PipeError, PipeResult};
use crate::packet::{flag, PacketBuffer, PacketHeader};
use crate::peer::Peer;
use crate::send_queue::SendQueue;
use crate::uri::resolve;
use crate::worker::Worker;
use mio::net::UdpSocket as MioUdpSocket;
use slog::Logger;
use std::net::UdpSocket as StdUdpSocket;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Allocates fragment buffers from the pool for one outgoing message, handed to a `ChunkWriter`
/// as its `ChunkSink`.
pub(crate) struct MessageSink {
    pool: Arc<BufferPool>,
    mtu: usize,
    buffers: Vec<PacketBuffer>,
}

impl ChunkSink for MessageSink {
    fn alloc(&mut self) -> Option<usize> {
        if !self.pool.alloc(&mut self.buffers, self.mtu) {
            return None;
        }
        Some(self.buffers.last().unwrap().payload_capacity())
    }

    fn payload_mut(&mut self, index: usize) -> &mut [u8] {
        self.buffers[index].payload_mut()
    }

    fn commit(&mut self, index: usize, len: usize) {
        self.buffers[index].set_payload_size(len);
    }
}

/// One open endpoint of the pipe: a UDP socket, its dedicated worker thread, the buffer pool
/// both feed from, and the per-message-id bookkeeping of the send path.
///
/// `create` binds to a URI and waits to learn its peer from the first inbound datagram, the way
/// a named pipe's creator doesn't yet know who will open it. `open` resolves its URI as the
/// remote peer up front and binds an ephemeral local port, the way a named pipe's opener dials a
/// known address.
pub struct Transport {
    pool: Arc<BufferPool>,
    send_queue: Arc<SendQueue>,
    worker: Worker,
    next_msg_id: AtomicU8,
    mtu: usize,
    logger: Logger,
}

impl Transport {
    pub fn create<F>(uri: &str, config: PipeConfig, logger: Logger, on_message: F) -> PipeResult<Transport>
    where
        F: FnMut(&[PacketBuffer]) + Send + 'static,
    {
        let local = resolve(uri)?;
        let socket = StdUdpSocket::bind(local)?;
        Self::start(socket, Peer::learned(), uri, config, logger, on_message)
    }

    pub fn open<F>(uri: &str, config: PipeConfig, logger: Logger, on_message: F) -> PipeResult<Transport>
    where
        F: FnMut(&[PacketBuffer]) + Send + 'static,
    {
        let remote = resolve(uri)?;
        let bind_addr = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = StdUdpSocket::bind(bind_addr)?;
        Self::start(socket, Peer::fixed(remote), uri, config, logger, on_message)
    }

    fn start<F>(
        std_socket: StdUdpSocket,
        peer: Peer,
        uri: &str,
        config: PipeConfig,
        logger: Logger,
        on_message: F,
    ) -> PipeResult<Transport>
    where
        F: FnMut(&[PacketBuffer]) + Send + 'static,
    {
        std_socket.set_nonblocking(true)?;
        let socket = MioUdpSocket::from_std(std_socket);

        let pool = Arc::new(BufferPool::new(config.mtu, config.initial_pool_capacity));
        let send_queue = Arc::new(SendQueue::new());
        let peer = Arc::new(peer);

        let worker = Worker::spawn(
            socket,
            Arc::clone(&pool),
            Arc::clone(&send_queue),
            Arc::clone(&peer),
            config.clone(),
            logger.clone(),
            on_message,
        )?;

        slog::info!(logger, "transport opened"; "uri" => uri);

        Ok(Transport {
            pool,
            send_queue,
            worker,
            next_msg_id: AtomicU8::new(0),
            mtu: config.mtu,
            logger,
        })
    }

    /// Compose and enqueue one outgoing message. `build` writes the message body through the
    /// supplied chunk writer; its return value (`false` on allocator exhaustion) is propagated
    /// as a `PipeError::Fatal`. `on_sent` fires exactly once, off the send queue's lock, once the
    /// message's Last-flagged packet has been handed to `send_to` (successfully or not).
    pub fn compose_msg(
        &self,
        build: impl FnOnce(&mut ChunkWriter<MessageSink>) -> bool,
        on_sent: impl FnOnce(PipeResult<()>) + Send + 'static,
    ) -> PipeResult<()> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);

        let sink = MessageSink {
            pool: Arc::clone(&self.pool),
            mtu: self.mtu,
            buffers: Vec::new(),
        };
        let mut writer = ChunkWriter::new(sink);

        if !build(&mut writer) {
            slog::warn!(self.logger, "message composition exhausted the buffer pool"; "msg_id" => msg_id);
            return Err(PipeError::Fatal(
                "buffer pool exhausted while composing message".to_string(),
            ));
        }
        writer.flush();

        let mut buffers = writer.into_sink().buffers;
        if buffers.is_empty() {
            return Err(PipeError::Fatal("message produced no packets".to_string()));
        }

        let total = buffers.len() as u32;
        for (index, buffer) in buffers.iter_mut().enumerate() {
            let mut flags = 0u8;
            if index == 0 {
                flags |= flag::FIRST;
            }
            if index as u32 + 1 == total {
                flags |= flag::LAST;
            }
            buffer.set_header(PacketHeader {
                flags,
                msg_id,
                packet: index as u32,
            });
        }

        self.send_queue.send(msg_id, buffers, Box::new(on_sent));
        Ok(())
    }

    /// Stop the worker thread and release any packets still queued for transmission back to the
    /// pool. Idempotent; safe to call more than once (a second `close()` drains nothing new).
    pub fn close(&self) {
        slog::info!(self.logger, "transport closing");
        self.worker.shutdown();
        let mut pending = self.send_queue.close();
        self.pool.release(&mut pending);
    }

    /// Buffers allocated from the pool and not yet released. Should be zero once a transport
    /// that has finished sending everything is closed.
    pub fn outstanding_buffers(&self) -> usize {
        self.pool.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{Discard, Logger};
    use std::net::UdpSocket;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_logger() -> Logger {
        Logger::root(Discard, slog::o!())
    }

    fn test_config() -> PipeConfig {
        let mut config = PipeConfig::default();
        config.worker_poll_interval = Duration::from_millis(10);
        config
    }

    fn free_local_udp() -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        format!("udp://{}", socket.local_addr().unwrap())
    }

    /// Copy out what a test needs from the borrowed fragment slice before it is released back
    /// to the pool, since the callback only gets to see the buffers for the duration of the call.
    fn capture(fragments: &[PacketBuffer]) -> Vec<(PacketHeader, Vec<u8>)> {
        fragments.iter().map(|buf| (buf.header(), buf.payload().to_vec())).collect()
    }

    #[test]
    fn test_compose_msg_delivers_fragments_with_first_and_last_flags() {
        let server_uri = free_local_udp();

        let (tx, rx) = mpsc::channel();
        let server = Transport::create(&server_uri, test_config(), test_logger(), move |fragments| {
            tx.send(capture(fragments)).unwrap();
        })
        .unwrap();
        let client = Transport::open(&server_uri, test_config(), test_logger(), |_fragments| {}).unwrap();

        let (sent_tx, sent_rx) = mpsc::channel();
        client
            .compose_msg(|writer| writer.write(&42u32), move |result| sent_tx.send(result.is_ok()).unwrap())
            .unwrap();

        let fragments = rx.recv_timeout(Duration::from_secs(2)).expect("no message received");
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].0.has_flag(flag::FIRST));
        assert!(fragments[0].0.has_flag(flag::LAST));

        let payload: &[u8] = &fragments[0].1;
        let slices = [payload];
        let mut reader = crate::chunk::ChunkReader::new(&slices);
        assert_eq!(reader.read::<u32>(), Some(42u32));

        assert_eq!(sent_rx.recv_timeout(Duration::from_secs(2)).unwrap(), true);

        client.close();
        server.close();
    }

    #[test]
    fn test_reply_reaches_client_once_server_has_learned_its_peer() {
        let server_uri = free_local_udp();

        let (server_tx, server_rx) = mpsc::channel();
        let (client_tx, client_rx) = mpsc::channel();

        let server = Transport::create(&server_uri, test_config(), test_logger(), move |fragments| {
            server_tx.send(capture(fragments)).unwrap();
        })
        .unwrap();
        let client = Transport::open(&server_uri, test_config(), test_logger(), move |fragments| {
            client_tx.send(capture(fragments)).unwrap();
        })
        .unwrap();

        client.compose_msg(|writer| writer.write(&1u32), |_| {}).unwrap();
        server_rx.recv_timeout(Duration::from_secs(2)).expect("server never learned its peer");

        server.compose_msg(|writer| writer.write(&2u32), |_| {}).unwrap();
        let reply = client_rx.recv_timeout(Duration::from_secs(2)).expect("no reply received");

        let payload: &[u8] = &reply[0].1;
        let slices = [payload];
        let mut reader = crate::chunk::ChunkReader::new(&slices);
        assert_eq!(reader.read::<u32>(), Some(2u32));

        client.close();
        server.close();
    }

    #[test]
    fn test_outstanding_buffers_is_zero_before_any_traffic() {
        let uri = free_local_udp();
        let transport = Transport::create(&uri, PipeConfig::default(), test_logger(), |_| {}).unwrap();
        assert_eq!(transport.outstanding_buffers(), 0);
        transport.close();
    }

    #[test]
    fn test_outstanding_buffers_is_zero_after_close_with_pending_sends() {
        // No peer is ever dialed, so the worker can never hand these packets to `send_to`; they
        // sit in the send queue's FIFO until `close()` is expected to release them.
        let uri = free_local_udp();
        let transport = Transport::create(&uri, test_config(), test_logger(), |_| {}).unwrap();

        transport
            .compose_msg(|writer| writer.write(&"pending".to_string()), |_| {})
            .unwrap();
        assert!(transport.outstanding_buffers() > 0);

        transport.close();
        assert_eq!(transport.outstanding_buffers(), 0);
    }
}
