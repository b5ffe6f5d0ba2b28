use crate::config::PipeConfig;
use crate::packet::{flag, PacketBuffer};
use crate::peer::Peer;
use crate::recv_queue::RecvQueue;
use crate::send_queue::SendQueue;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use slog::Logger;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::buffer_pool::BufferPool;

const SOCKET_TOKEN: Token = Token(0);

/// The single thread that owns the socket: alternates between draining inbound readiness into
/// the receive queue and outbound readiness into `send_to`, on a bounded poll cycle.
///
/// Mirrors the one-thread-per-connection model of a dedicated network worker: nothing besides
/// this thread ever touches the socket, so no synchronization is needed around `recv`/`send`
/// themselves, only around the queues it hands results to.
pub struct Worker {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn spawn<F>(
        mut socket: UdpSocket,
        pool: Arc<BufferPool>,
        send_queue: Arc<SendQueue>,
        peer: Arc<Peer>,
        config: PipeConfig,
        logger: Logger,
        mut on_message: F,
    ) -> io::Result<Worker>
    where
        F: FnMut(&[PacketBuffer]) + Send + 'static,
    {
        let mut poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE | Interest::WRITABLE)?;

        let running = Arc::new(AtomicBool::new(true));
        let running_worker = Arc::clone(&running);
        let poll_interval = config.worker_poll_interval;
        let mtu = config.mtu;

        let handle = thread::Builder::new()
            .name("netpipe-worker".to_string())
            .spawn(move || {
                let mut events = Events::with_capacity(64);
                let mut recv_queue = RecvQueue::new();

                while running_worker.load(Ordering::Acquire) {
                    match poll.poll(&mut events, Some(poll_interval)) {
                        Ok(()) => {}
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            slog::error!(logger, "poll failed"; "error" => %err);
                            continue;
                        }
                    }

                    // At most one packet either way per cycle: §4.6 guarantees no starvation
                    // beyond that, so a flood on one side can never starve the other for longer
                    // than a single poll quantum.
                    drain_recv(&socket, mtu, &peer, &mut recv_queue, &send_queue, &pool, &mut on_message, &logger);
                    drain_send(&socket, &peer, &send_queue, &pool, &logger);
                }
            })?;

        Ok(Worker {
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the worker thread and wait for it to exit. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receive at most one datagram this cycle: allocate its buffer from the pool, route it by the
/// Response flag, and release it back to the pool once the receive-callback (for a completed
/// message) or the routing itself (for everything else) is done with it.
fn drain_recv<F>(
    socket: &UdpSocket,
    mtu: usize,
    peer: &Peer,
    recv_queue: &mut RecvQueue,
    send_queue: &SendQueue,
    pool: &BufferPool,
    on_message: &mut F,
    logger: &Logger,
) where
    F: FnMut(&[PacketBuffer]),
{
    let mut allocated = Vec::new();
    if !pool.alloc(&mut allocated, mtu) {
        slog::warn!(logger, "buffer pool exhausted on receive");
        return;
    }
    let mut buffer = allocated.pop().unwrap();

    match socket.recv_from(buffer.whole_mut()) {
        Ok((len, from)) => {
            peer.observe(from);
            buffer.set_data_size(len);

            if buffer.header().has_flag(flag::RESPONSE) {
                send_queue.process_response(buffer.header().msg_id);
                let mut released = vec![buffer];
                pool.release(&mut released);
                return;
            }

            if let Some(mut fragments) = recv_queue.process_buffer(buffer) {
                on_message(&fragments);
                pool.release(&mut fragments);
            }
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            let mut released = vec![buffer];
            pool.release(&mut released);
        }
        Err(err) => {
            slog::warn!(logger, "recv_from failed"; "error" => %err);
            let mut released = vec![buffer];
            pool.release(&mut released);
        }
    }
}

/// Send at most one queued packet this cycle, so a burst of outbound traffic can't starve the
/// receive side across poll cycles (§4.6's "at most one packet either way per cycle").
fn drain_send(socket: &UdpSocket, peer: &Peer, send_queue: &SendQueue, pool: &BufferPool, logger: &Logger) {
    let packet = match send_queue.next_packet() {
        Some(packet) => packet,
        None => return,
    };

    let dest = match peer.current() {
        Some(addr) => addr,
        None => {
            // A creator that hasn't heard from anyone yet: nowhere to send this packet.
            // Leave it at the head of the queue and try again once a peer is known.
            send_queue.requeue_front(packet);
            return;
        }
    };

    let msg_id = packet.header().msg_id;
    let is_last = packet.header().has_flag(flag::LAST);

    match socket.send_to(packet.whole(), dest) {
        Ok(_) => {
            if is_last {
                send_queue.sent_report(msg_id, Ok(()));
            }
            let mut released = vec![packet];
            pool.release(&mut released);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            send_queue.requeue_front(packet);
        }
        Err(err) => {
            slog::warn!(logger, "send_to failed"; "msg_id" => msg_id, "error" => %err);
            if is_last {
                send_queue.sent_report(msg_id, Err(crate::error::PipeError::SendError(err)));
            }
            let mut released = vec![packet];
            pool.release(&mut released);
        }
    }
}
